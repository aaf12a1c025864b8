//! MCP Server for SAP Gateway OData
//!
//! Dispatches JSON-RPC requests to the tool registry.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::mcp::protocol::*;
use crate::mcp::registry::{ToolCallRequest, ToolRegistry};

/// MCP Server for SAP Gateway OData
pub struct SapMcpServer {
    registry: Arc<ToolRegistry>,
}

impl SapMcpServer {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Parse and handle one line of input; `None` when nothing should be sent back.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => Some(JsonRpcResponse::error(
                None,
                PARSE_ERROR,
                &format!("Parse error: {}", e),
            )),
        }
    }

    /// Handle a request; notifications get no response
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            tracing::debug!("Notification: {}", request.method);
            return None;
        }

        let id = request.id.clone();
        let response = match request.method.as_str() {
            "initialize" => {
                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: ServerCapabilities {
                        tools: Some(ToolsCapability {
                            list_changed: Some(false),
                        }),
                    },
                    server_info: ServerInfo {
                        name: env!("CARGO_PKG_NAME").to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                };
                respond(id, &result)
            }

            "tools/list" => {
                let result = ListToolsResult {
                    tools: self.registry.list_tools(),
                };
                respond(id, &result)
            }

            "tools/call" => {
                let params = match request.params.map(serde_json::from_value::<CallToolParams>) {
                    Some(Ok(params)) => params,
                    Some(Err(e)) => {
                        return Some(JsonRpcResponse::error(
                            id,
                            INVALID_PARAMS,
                            &format!("Invalid params: {}", e),
                        ));
                    }
                    None => {
                        return Some(JsonRpcResponse::error(id, INVALID_PARAMS, "Missing params"));
                    }
                };

                let request =
                    ToolCallRequest::new(params.name, params.arguments.unwrap_or_default());
                let result = self.registry.call_tool(request).await;
                respond(id, &result)
            }

            "ping" => JsonRpcResponse::success(id, json!({})),

            _ => JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                &format!("Method not found: {}", request.method),
            ),
        };

        Some(response)
    }
}

fn respond<T: Serialize>(id: Option<Value>, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => {
            JsonRpcResponse::error(id, INTERNAL_ERROR, &format!("Serialization error: {}", e))
        }
    }
}
