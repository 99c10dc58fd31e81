//! `get_balance` tool: SOL and SPL token balances of the bound wallet.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use solana_sdk::native_token::LAMPORTS_PER_SOL;

use crate::error::{Error, Result, SessionError};
use crate::security::{limit_key, limits};
use crate::tools::{Tool, ToolContext, ToolOutput, connect_prompt};

pub struct GetBalanceTool;

#[async_trait]
impl Tool for GetBalanceTool {
    fn name(&self) -> &'static str {
        "get_balance"
    }

    fn description(&self) -> &'static str {
        "Get the SOL and SPL token balances of the connected wallet. \
         If no wallet is connected, asks the user to connect."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {},
        })
    }

    async fn execute(&self, ctx: &ToolContext, _params: serde_json::Value) -> Result<ToolOutput> {
        let services = &ctx.services;
        let actor = ctx.actor_id.as_str();

        services
            .limiter
            .check(&limit_key("global", actor), limits::GLOBAL, "global")?;
        services
            .limiter
            .check(&limit_key("balance", actor), limits::BALANCE, "balance")?;

        let session = match services.sessions.validate_session(actor).await {
            Ok(validated) => validated.session,
            // First contact: open a session and hand out the connect link.
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
        let lamports = services.ledger.get_balance(&wallet).await?;
        let tokens = services.ledger.get_token_balances(&wallet).await?;

        let sol = (Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL)).round_dp(4);

        let mut text = format!("Wallet: {wallet_address}\n");
        text.push_str(&format!("SOL Balance: {sol} SOL\n"));
        if tokens.is_empty() {
            text.push_str("\nNo SPL tokens found.");
        } else {
            text.push_str("\nSPL Tokens:\n");
            for token in &tokens {
                text.push_str(&format!("- {}: {}\n", token.mint, token.ui_amount));
            }
        }

        Ok(ToolOutput::text(text.trim_end().to_string()))
    }
}
