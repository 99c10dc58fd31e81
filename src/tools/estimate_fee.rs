//! `estimate_fee` tool: flat network fee estimate for a simple transfer.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use solana_sdk::native_token::LAMPORTS_PER_SOL;

use crate::error::Result;
use crate::security::{limit_key, limits};
use crate::solana::ESTIMATED_FEE_LAMPORTS;
use crate::tools::{Tool, ToolContext, ToolOutput};

pub struct EstimateFeeTool;

#[async_trait]
impl Tool for EstimateFeeTool {
    fn name(&self) -> &'static str {
        "estimate_fee"
    }

    fn description(&self) -> &'static str {
        "Estimate the network fee for a SOL transfer."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {},
        })
    }

    async fn execute(&self, ctx: &ToolContext, _params: serde_json::Value) -> Result<ToolOutput> {
        ctx.services.limiter.check(
            &limit_key("global", &ctx.actor_id),
            limits::GLOBAL,
            "global",
        )?;

        let fee_sol = (Decimal::from(ESTIMATED_FEE_LAMPORTS) / Decimal::from(LAMPORTS_PER_SOL))
            .round_dp(6);
        Ok(ToolOutput::text(format!(
            "Estimated network fee: {fee_sol} SOL"
        )))
    }
}
