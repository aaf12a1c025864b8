use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{required_str, str_arg, validate_tool_arguments, ToolContext};
use crate::mcp::protocol::create_tool_schema;
use crate::mcp::registry::McpTool;
use crate::odata::query::{validate_entity_key, validate_select_fields};

/// `sap_get_entity`: fetch one entity by key from a configured entity set
pub struct GetEntityTool {
    ctx: ToolContext,
}

impl GetEntityTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl McpTool for GetEntityTool {
    fn name(&self) -> &str {
        "sap_get_entity"
    }

    fn description(&self) -> &str {
        "Retrieve a single entity from an SAP OData service by key (e.g., OrderID)"
    }

    fn input_schema(&self) -> Value {
        create_tool_schema(&[
            ("service", "string", "Service id from the service catalog", true),
            ("entity_set", "string", "Entity set name, e.g. 'zsd004Set'", true),
            (
                "entity_key",
                "string",
                "Entity key value, e.g. '91000092' or OrderID='1',Item='10'",
                true,
            ),
            ("select", "string", "Comma-separated list of fields to select", false),
        ])
    }

    async fn execute(&self, arguments: &HashMap<String, Value>) -> anyhow::Result<Value> {
        validate_tool_arguments(arguments, &self.input_schema())?;

        let service_id = required_str(arguments, "service")?;
        let entity_set = required_str(arguments, "entity_set")?;
        let entity_key = required_str(arguments, "entity_key")?;

        // Quoted and composite keys are passed through as written.
        let composite = entity_key.starts_with('\'') || entity_key.contains('=');
        if !composite && !validate_entity_key(entity_key) {
            bail!("Invalid entity key: {}", entity_key);
        }

        let service = self.ctx.service(service_id)?;
        let entity = self.ctx.entity(service, entity_set)?;

        let select = str_arg(arguments, "select")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(validate_select_fields)
            .transpose()?
            .or_else(|| entity.default_select.clone());

        if !self.ctx.client.authenticate().await {
            bail!("Authentication failed");
        }

        let data = self
            .ctx
            .client
            .get_entity(&service.path, entity_set, entity_key, select.as_deref())
            .await
            .with_context(|| {
                format!(
                    "Error fetching {}({}) from {}",
                    entity_set, entity_key, service_id
                )
            })?;

        Ok(json!({
            "success": true,
            "service": service_id,
            "entity_set": entity_set,
            "entity_key": entity_key,
            "key_field": entity.key_field,
            "data": data,
        }))
    }
}
