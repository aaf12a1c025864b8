use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::ToolContext;
use crate::mcp::protocol::create_tool_schema;
use crate::mcp::registry::McpTool;

/// `sap_authenticate`: run (or reuse) the CSRF handshake
pub struct AuthenticateTool {
    ctx: ToolContext,
}

impl AuthenticateTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl McpTool for AuthenticateTool {
    fn name(&self) -> &str {
        "sap_authenticate"
    }

    fn description(&self) -> &str {
        "Authenticate with SAP Gateway using the configured username and password"
    }

    fn input_schema(&self) -> Value {
        create_tool_schema(&[])
    }

    async fn execute(&self, _arguments: &HashMap<String, Value>) -> anyhow::Result<Value> {
        let config = self.ctx.client.config();

        if self.ctx.client.authenticate().await {
            Ok(json!({
                "success": true,
                "message": "Successfully authenticated with SAP Gateway",
                "host": config.host(),
                "client": config.client(),
            }))
        } else {
            Ok(json!({"success": false, "error": "Authentication failed"}))
        }
    }
}
