//! `transfer_sol` tool: propose a transfer for user approval.
//!
//! Creates a pending transaction (or returns the live equivalent, so a
//! repeated tool call can never queue the same transfer twice) and hands
//! back the approval URL the user must visit to sign.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result, SessionError};
use crate::security::{limit_key, limits};
use crate::tools::{Tool, ToolContext, ToolOutput, parse_params};
use crate::transactions::CreateOutcome;

pub struct TransferSolTool;

#[derive(Debug, Deserialize)]
struct TransferSolParams {
    recipient_address: String,
    amount: Decimal,
    #[serde(default)]
    memo: Option<String>,
}

#[async_trait]
impl Tool for TransferSolTool {
    fn name(&self) -> &'static str {
        "transfer_sol"
    }

    fn description(&self) -> &'static str {
        "Create a SOL transfer transaction. The user must approve and sign it \
         in their wallet."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "recipient_address": { "type": "string" },
                "amount": { "type": "number" },
                "memo": { "type": "string" },
            },
            "required": ["recipient_address", "amount"],
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: serde_json::Value) -> Result<ToolOutput> {
        let params: TransferSolParams = match parse_params(params) {
            Ok(params) => params,
            Err(output) => return Ok(output),
        };

        let services = &ctx.services;
        let actor = ctx.actor_id.as_str();

        services
            .limiter
            .check(&limit_key("global", actor), limits::GLOBAL, "global")?;
        services
            .limiter
            .check(&limit_key("transfer", actor), limits::TRANSFER, "transfer")?;

        let session = match services.sessions.validate_session(actor).await {
            Ok(validated) if validated.wallet_connected => validated.session,
            Ok(_) => return Err(SessionError::WalletNotConnected.into()),
            Err(Error::Session(SessionError::NotFound { .. })) => {
                return Err(SessionError::WalletNotConnected.into());
            }
            Err(err) => return Err(err),
        };

        let outcome = services
            .authorizer
            .create_transfer(
                &session,
                &params.recipient_address,
                params.amount,
                params.memo.as_deref(),
            )
            .await?;

        let url = services.config.links.approval_url(outcome.record().tx_id);
        let text = match &outcome {
            CreateOutcome::Existing(record) => format!(
                "A transaction is already in progress.\n\nStatus: {}\n\nApprove here:\n{url}",
                record.status.as_str()
            ),
            CreateOutcome::Created(_) => {
                format!("Transaction ready for approval:\n{url}")
            }
        };
        Ok(ToolOutput::text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing;

    #[tokio::test]
    async fn unbound_actor_cannot_transfer() {
        let bed = testing::unbound().await;
        let err = TransferSolTool
            .execute(
                &bed.ctx,
                json!({ "recipient_address": testing::recipient(), "amount": 1.5 }),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::WalletNotConnected)
        ));
    }

    #[tokio::test]
    async fn repeated_calls_return_the_same_approval_url() {
        let bed = testing::bound().await;
        let to = testing::recipient();

        let first = TransferSolTool
            .execute(&bed.ctx, json!({ "recipient_address": to, "amount": 1.5 }))
            .await
            .unwrap();
        assert!(first.text.starts_with("Transaction ready for approval:"));

        let second = TransferSolTool
            .execute(&bed.ctx, json!({ "recipient_address": to, "amount": 1.5 }))
            .await
            .unwrap();
        assert!(second.text.starts_with("A transaction is already in progress."));

        // Both point at the same approval link: same tx_id.
        let url = first.text.lines().last().unwrap();
        assert!(second.text.contains(url));
    }

    #[tokio::test]
    async fn malformed_parameters_read_as_a_message_not_an_error() {
        let bed = testing::bound().await;
        let output = TransferSolTool
            .execute(&bed.ctx, json!({ "amount": 1.5 }))
            .await
            .unwrap();
        assert!(output.text.starts_with("Invalid parameters:"));
    }
}
