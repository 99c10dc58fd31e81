//! `check_transaction` tool: reconcile and report a transfer's status.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::db::TxStatus;
use crate::error::Result;
use crate::security::{limit_key, limits};
use crate::tools::{Tool, ToolContext, ToolOutput, parse_params};

pub struct CheckTransactionTool;

#[derive(Debug, Deserialize)]
struct CheckTransactionParams {
    transaction_id: String,
}

#[async_trait]
impl Tool for CheckTransactionTool {
    fn name(&self) -> &'static str {
        "check_transaction"
    }

    fn description(&self) -> &'static str {
        "Check the status of a previously created transfer."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "transaction_id": { "type": "string" },
            },
            "required": ["transaction_id"],
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: serde_json::Value) -> Result<ToolOutput> {
        let params: CheckTransactionParams = match parse_params(params) {
            Ok(params) => params,
            Err(output) => return Ok(output),
        };

        ctx.services.limiter.check(
            &limit_key("global", &ctx.actor_id),
            limits::GLOBAL,
            "global",
        )?;

        let Ok(tx_id) = Uuid::parse_str(params.transaction_id.trim()) else {
            return Ok(ToolOutput::text("Transaction not found."));
        };
        if ctx.services.authorizer.get(tx_id).await?.is_none() {
            return Ok(ToolOutput::text("Transaction not found."));
        }

        let record = ctx.services.authorizer.reconcile(tx_id).await?;
        let text = match record.status {
            TxStatus::Confirmed => {
                let signature = record.signature.as_deref().unwrap_or_default();
                format!("Transaction confirmed.\n\nSignature:\n{signature}")
            }
            TxStatus::Failed => "Transaction failed on-chain.".to_string(),
            status => format!("Transaction status: {}", status.as_str()),
        };
        Ok(ToolOutput::text(text))
    }
}
