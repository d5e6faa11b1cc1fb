//! Routes JSON-RPC messages to MCP methods.

use std::sync::atomic::{AtomicBool, Ordering};

use assetlens::AssetExtractor;
use serde_json::Value;

use super::message::*;
use super::tools;

pub struct ProtocolHandler {
    extractor: AssetExtractor,
    initialized: AtomicBool,
}

impl ProtocolHandler {
    pub fn new(extractor: AssetExtractor) -> Self {
        Self {
            extractor,
            initialized: AtomicBool::new(false),
        }
    }

    /// Whether the client has sent `notifications/initialized`.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    /// Response for a request; `None` for notifications and stray replies.
    pub async fn handle_message(&self, msg: JsonRpcMessage) -> Option<Value> {
        match msg {
            JsonRpcMessage::Request(req) => Some(self.handle_request(req).await),
            JsonRpcMessage::Notification(notif) => {
                self.handle_notification(notif);
                None
            }
            _ => {
                tracing::warn!("ignoring unexpected response from client");
                None
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Value {
        let id = request.id.clone();
        let outcome = match validate(&request) {
            Ok(()) => self.dispatch(request).await,
            Err(e) => Err(e),
        };

        let reply = match outcome {
            Ok(result) => serde_json::to_value(JsonRpcResponse::new(id, result)),
            Err(e) => serde_json::to_value(e.to_json_rpc_error(id)),
        };
        reply.unwrap_or_default()
    }

    async fn dispatch(&self, request: JsonRpcRequest) -> McpResult<Value> {
        match request.method.as_str() {
            "initialize" => {
                let params: InitializeParams = parse_params(request.params, "initialize")?;
                if params.protocol_version != MCP_VERSION {
                    tracing::warn!(
                        "client asked for protocol {}, answering with {MCP_VERSION}",
                        params.protocol_version
                    );
                }
                tracing::info!(
                    "initialized by {} v{}",
                    params.client_info.name,
                    params.client_info.version
                );
                Ok(serde_json::to_value(InitializeResult::current())?)
            }
            "ping" | "shutdown" => Ok(Value::Object(serde_json::Map::new())),
            "tools/list" => Ok(serde_json::to_value(ToolListResult {
                tools: tools::list_tools(),
            })?),
            "tools/call" => {
                let params: ToolCallParams = parse_params(request.params, "tools/call")?;
                let result = tools::call(&params.name, params.arguments, &self.extractor).await?;
                Ok(serde_json::to_value(result)?)
            }
            other => Err(McpError::MethodNotFound(other.to_string())),
        }
    }

    fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" | "initialized" => {
                self.initialized.store(true, Ordering::Relaxed);
                tracing::info!("MCP handshake complete");
            }
            "notifications/cancelled" => {
                tracing::info!("client cancelled a request");
            }
            other => tracing::debug!("unknown notification: {other}"),
        }
    }
}

fn validate(request: &JsonRpcRequest) -> McpResult<()> {
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(McpError::InvalidRequest(format!(
            "expected jsonrpc \"{JSONRPC_VERSION}\", got \"{}\"",
            request.jsonrpc
        )));
    }
    if request.method.is_empty() {
        return Err(McpError::InvalidRequest("empty method name".to_string()));
    }
    Ok(())
}

fn parse_params<T: serde::de::DeserializeOwned>(
    params: Option<Value>,
    method: &str,
) -> McpResult<T> {
    let params =
        params.ok_or_else(|| McpError::InvalidParams(format!("{method} requires params")))?;
    serde_json::from_value(params).map_err(|e| McpError::InvalidParams(e.to_string()))
}
