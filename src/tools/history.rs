//! `get_transaction_history` tool: recent activity of the bound wallet.
//!
//! Read-only ledger query; not part of the authorization state machine.

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result, SessionError};
use crate::security::{limit_key, limits};
use crate::tools::{Tool, ToolContext, ToolOutput, connect_prompt, parse_params};

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 50;

pub struct GetTransactionHistoryTool;

#[derive(Debug, Deserialize)]
struct HistoryParams {
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for GetTransactionHistoryTool {
    fn name(&self) -> &'static str {
        "get_transaction_history"
    }

    fn description(&self) -> &'static str {
        "List recent transactions of the connected wallet."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "number", "minimum": 1, "maximum": 50 },
            },
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: serde_json::Value) -> Result<ToolOutput> {
        let params: HistoryParams = match parse_params(params) {
            Ok(params) => params,
            Err(output) => return Ok(output),
        };
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

        let services = &ctx.services;
        let actor = ctx.actor_id.as_str();
        services
            .limiter
            .check(&limit_key("global", actor), limits::GLOBAL, "global")?;

        let session = match services.sessions.validate_session(actor).await {
            Ok(validated) => validated.session,
            Err(Error::Session(SessionError::NotFound { .. })) => {
                let session = services.sessions.create_session(actor).await?;
                let url = services.sessions.build_connection_url(&session.connection_token);
                return Ok(connect_prompt(&url));
            }
            Err(err) => return Err(err),
        };

        let Some(wallet_address) = session.wallet_address.as_deref() else {
            let url = services.sessions.build_connection_url(&session.connection_token);
            return Ok(connect_prompt(&url));
        };

        let wallet = crate::solana::parse_wallet_address("wallet", wallet_address)?;
        let entries = services.ledger.get_recent_signatures(&wallet, limit).await?;

        if entries.is_empty() {
            return Ok(ToolOutput::text(
                "No recent transactions found for this wallet.",
            ));
        }

        let mut text = format!("Recent Transactions (last {}):\n\n", entries.len());
        for entry in &entries {
            let status = match &entry.err {
                Some(err) => format!("Failed ({err})"),
                None => "Confirmed".to_string(),
            };
            let time = entry
                .block_time
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| "Unknown time".to_string());

            text.push_str(&format!("- Signature: {}\n", entry.signature));
            text.push_str(&format!("  Status: {status}\n"));
            text.push_str(&format!("  Time: {time}\n"));
            if let Some(memo) = &entry.memo {
                text.push_str(&format!("  Memo: {memo}\n"));
            }
            text.push('\n');
        }

        Ok(ToolOutput::text(text.trim_end().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solana::gateway::HistoryEntry;
    use crate::tools::testing;

    fn entry(signature: &str, err: Option<&str>) -> HistoryEntry {
        HistoryEntry {
            signature: signature.to_string(),
            slot: 1000,
            block_time: Some(1_722_470_400),
            err: err.map(str::to_string),
            memo: None,
        }
    }

    #[tokio::test]
    async fn empty_history_reads_as_such() {
        let bed = testing::bound().await;
        let output = GetTransactionHistoryTool
            .execute(&bed.ctx, json!({}))
            .await
            .unwrap();
        assert_eq!(output.text, "No recent transactions found for this wallet.");
    }

    #[tokio::test]
    async fn lists_entries_with_status_and_time() {
        let bed = testing::bound().await;
        {
            let mut history = bed.ledger.history.lock().unwrap();
            history.push(entry("sigAAA", None));
            history.push(entry("sigBBB", Some("InstructionError")));
        }

        let output = GetTransactionHistoryTool
            .execute(&bed.ctx, json!({}))
            .await
            .unwrap();
        assert!(output.text.starts_with("Recent Transactions (last 2):"));
        assert!(output.text.contains("Signature: sigAAA"));
        assert!(output.text.contains("Status: Confirmed"));
        assert!(output.text.contains("Status: Failed (InstructionError)"));
    }

    #[tokio::test]
    async fn limit_is_clamped_to_the_supported_range() {
        let bed = testing::bound().await;
        {
            let mut history = bed.ledger.history.lock().unwrap();
            for i in 0..60 {
                history.push(entry(&format!("sig{i}"), None));
            }
        }

        let output = GetTransactionHistoryTool
            .execute(&bed.ctx, json!({ "limit": 500 }))
            .await
            .unwrap();
        assert!(output.text.starts_with("Recent Transactions (last 50):"));
    }
}
