use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{str_arg, validate_tool_arguments, ToolContext};
use crate::mcp::protocol::create_tool_schema;
use crate::mcp::registry::McpTool;

/// `sap_list_services`: configured services, or the live gateway catalog
pub struct ListServicesTool {
    ctx: ToolContext,
}

impl ListServicesTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }

    fn configured_services(&self) -> Value {
        let services: Vec<Value> = self
            .ctx
            .services
            .services
            .iter()
            .map(|service| {
                let entities: Vec<Value> = service
                    .entities
                    .iter()
                    .map(|entity| {
                        json!({
                            "name": entity.name,
                            "key_field": entity.key_field,
                            "description": entity.description,
                        })
                    })
                    .collect();

                json!({
                    "id": service.id,
                    "name": service.name,
                    "path": service.path,
                    "version": service.version,
                    "description": service.description,
                    "entities": entities,
                })
            })
            .collect();

        json!({
            "success": true,
            "count": services.len(),
            "services": services,
            "source": "services.yaml configuration",
        })
    }
}

#[async_trait]
impl McpTool for ListServicesTool {
    fn name(&self) -> &str {
        "sap_list_services"
    }

    fn description(&self) -> &str {
        "List SAP OData services: the configured catalog (default) or the gateway's live service catalog"
    }

    fn input_schema(&self) -> Value {
        create_tool_schema(&[(
            "source",
            "string",
            "'config' for services.yaml (default) or 'gateway' for the live catalog",
            false,
        )])
    }

    async fn execute(&self, arguments: &HashMap<String, Value>) -> anyhow::Result<Value> {
        validate_tool_arguments(arguments, &self.input_schema())?;

        match str_arg(arguments, "source").unwrap_or("config") {
            "config" => Ok(self.configured_services()),
            "gateway" => {
                let services = self
                    .ctx
                    .client
                    .list_services()
                    .await
                    .context("Failed to list gateway services")?;
                Ok(json!({
                    "success": true,
                    "count": services.len(),
                    "services": services,
                    "source": "gateway catalog",
                }))
            }
            other => bail!("Unknown source '{}', expected 'config' or 'gateway'", other),
        }
    }
}
