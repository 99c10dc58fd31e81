//! MCP stdio server.
//!
//! Line-delimited JSON-RPC 2.0 over stdin/stdout exposing the wallet tools
//! to an MCP client. Stdout carries only protocol frames; logs go to stderr.
//!
//! One stdio process serves one agent conversation, so the actor identity is
//! fixed at startup and every tool call resolves the same per-actor session.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::bootstrap::Services;
use crate::tools::{ToolContext, ToolRegistry};

const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Stdio MCP frontend over the wallet tool registry.
pub struct McpServer {
    registry: ToolRegistry,
    ctx: ToolContext,
}

impl McpServer {
    pub fn new(services: Arc<Services>, actor_id: String) -> Self {
        Self {
            registry: ToolRegistry::standard(),
            ctx: ToolContext { actor_id, services },
        }
    }

    /// Serve requests until stdin closes.
    pub async fn run(self) -> anyhow::Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        let mut lines = stdin.lines();

        tracing::info!(actor_id = %self.ctx.actor_id, "MCP server listening on stdio");

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line).await {
                let mut frame = serde_json::to_vec(&response)?;
                frame.push(b'\n');
                stdout.write_all(&frame).await?;
                stdout.flush().await?;
            }
        }

        tracing::info!("stdin closed, MCP server stopping");
        Ok(())
    }

    /// Handle one frame. Returns `None` for notifications.
    async fn handle_line(&self, line: &str) -> Option<Value> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                return Some(error_response(
                    Value::Null,
                    PARSE_ERROR,
                    &format!("parse error: {err}"),
                ));
            }
        };

        // Notifications get no response.
        let id = match request.id {
            Some(id) => id,
            None => return None,
        };

        let response = match request.method.as_str() {
            "initialize" => ok_response(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": "solbridge",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            ),
            "ping" => ok_response(id, json!({})),
            "tools/list" => {
                let tools: Vec<Value> = self
                    .registry
                    .iter()
                    .map(|tool| {
                        json!({
                            "name": tool.name(),
                            "description": tool.description(),
                            "inputSchema": tool.input_schema(),
                        })
                    })
                    .collect();
                ok_response(id, json!({ "tools": tools }))
            }
            "tools/call" => {
                let params: ToolCallParams =
                    match serde_json::from_value(request.params) {
                        Ok(params) => params,
                        Err(err) => {
                            return Some(error_response(
                                id,
                                INVALID_PARAMS,
                                &format!("invalid tool call params: {err}"),
                            ));
                        }
                    };

                match self
                    .registry
                    .call(&self.ctx, &params.name, params.arguments)
                    .await
                {
                    Some(output) => ok_response(
                        id,
                        json!({
                            "content": [{ "type": "text", "text": output.text }],
                            "isError": false,
                        }),
                    ),
                    None => error_response(
                        id,
                        INVALID_PARAMS,
                        &format!("unknown tool: {}", params.name),
                    ),
                }
            }
            other => error_response(id, METHOD_NOT_FOUND, &format!("unknown method: {other}")),
        };
        Some(response)
    }
}

fn ok_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}
