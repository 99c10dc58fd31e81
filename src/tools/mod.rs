//! Agent-facing tool surface.
//!
//! Every tool invocation passes the rate limiter, then resolves the actor's
//! session, then does its work. The registry is the tool-call boundary:
//! errors are mapped to structured agent-readable messages there, and
//! internal details never reach the agent channel.

mod check_transaction;
mod estimate_fee;
mod get_balance;
mod history;
mod transfer_sol;

use std::sync::Arc;

use async_trait::async_trait;

use crate::bootstrap::Services;
use crate::error::Result;

pub use check_transaction::CheckTransactionTool;
pub use estimate_fee::EstimateFeeTool;
pub use get_balance::GetBalanceTool;
pub use history::GetTransactionHistoryTool;
pub use transfer_sol::TransferSolTool;

/// Execution context for one tool call.
pub struct ToolContext {
    /// Opaque actor identifier, stable per agent conversation.
    pub actor_id: String,
    pub services: Arc<Services>,
}

/// Text returned to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// One agent-invocable operation.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the tool's parameters.
    fn input_schema(&self) -> serde_json::Value;

    async fn execute(&self, ctx: &ToolContext, params: serde_json::Value) -> Result<ToolOutput>;
}

/// The wallet tool set.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Registry with the five wallet tools.
    pub fn standard() -> Self {
        Self {
            tools: vec![
                Arc::new(GetBalanceTool),
                Arc::new(EstimateFeeTool),
                Arc::new(TransferSolTool),
                Arc::new(CheckTransactionTool),
                Arc::new(GetTransactionHistoryTool),
            ],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    /// Dispatch a call. Returns `None` for an unknown tool; otherwise the
    /// output, with any failure converted to its agent-facing message.
    pub async fn call(
        &self,
        ctx: &ToolContext,
        name: &str,
        params: serde_json::Value,
    ) -> Option<ToolOutput> {
        let tool = self.get(name)?;
        match tool.execute(ctx, params).await {
            Ok(output) => Some(output),
            Err(err) => {
                let payload = err.to_agent_payload();
                tracing::error!(tool = name, code = payload.code, error = %err, "tool call failed");
                Some(ToolOutput::text(payload.message))
            }
        }
    }
}

/// Deserialize tool parameters, surfacing a readable message on mismatch.
fn parse_params<T: serde::de::DeserializeOwned>(
    params: serde_json::Value,
) -> std::result::Result<T, ToolOutput> {
    serde_json::from_value(params)
        .map_err(|e| ToolOutput::text(format!("Invalid parameters: {e}")))
}

/// Standard binding prompt pointing the user at the connect page.
fn connect_prompt(url: &str) -> ToolOutput {
    ToolOutput::text(format!("Please connect your wallet to continue:\n{url}"))
}

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lists_the_five_wallet_tools() {
        let registry = ToolRegistry::standard();
        let names: Vec<&str> = registry.iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec![
                "get_balance",
                "estimate_fee",
                "transfer_sol",
                "check_transaction",
                "get_transaction_history",
            ]
        );
        assert!(registry.get("transfer_sol").is_some());
        assert!(registry.get("mint_nft").is_none());
    }

    #[tokio::test]
    async fn unknown_tools_are_not_dispatched() {
        let registry = ToolRegistry::standard();
        let bed = testing::unbound().await;
        assert!(
            registry
                .call(&bed.ctx, "mint_nft", serde_json::json!({}))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn dispatch_converts_failures_to_agent_messages() {
        let registry = ToolRegistry::standard();
        let bed = testing::unbound().await;

        // transfer_sol without a wallet fails inside the tool; the boundary
        // turns it into readable text instead of an error.
        let output = registry
            .call(
                &bed.ctx,
                "transfer_sol",
                serde_json::json!({
                    "recipient_address": testing::recipient(),
                    "amount": 1.0,
                }),
            )
            .await
            .unwrap();
        assert_eq!(
            output.text,
            "Please connect your wallet before making a transfer."
        );
    }
}
