use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{required_str, str_arg, validate_tool_arguments, ToolContext};
use crate::mcp::protocol::create_tool_schema;
use crate::mcp::registry::McpTool;
use crate::odata::{entity_sets, entity_types};

/// `sap_get_metadata`: summarize a service's `$metadata`
pub struct GetMetadataTool {
    ctx: ToolContext,
}

impl GetMetadataTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl McpTool for GetMetadataTool {
    fn name(&self) -> &str {
        "sap_get_metadata"
    }

    fn description(&self) -> &str {
        "Get the entity types (keys, properties, navigation properties) and entity sets of an SAP OData service from its $metadata"
    }

    fn input_schema(&self) -> Value {
        create_tool_schema(&[
            ("service", "string", "Service id from the service catalog", true),
            ("entity_type", "string", "Only describe this entity type, e.g. 'Order'", false),
        ])
    }

    async fn execute(&self, arguments: &HashMap<String, Value>) -> anyhow::Result<Value> {
        validate_tool_arguments(arguments, &self.input_schema())?;

        let service = self.ctx.service(required_str(arguments, "service")?)?;
        let metadata = self
            .ctx
            .client
            .get_service_metadata(&service.path)
            .await
            .with_context(|| format!("Failed to fetch metadata for {}", service.id))?;

        let mut types = entity_types(&metadata);
        if let Some(wanted) = str_arg(arguments, "entity_type").filter(|s| !s.is_empty()) {
            types.retain(|t| t.name == wanted);
            if types.is_empty() {
                bail!("Entity type '{}' not found in {} metadata", wanted, service.id);
            }
        }

        Ok(json!({
            "success": true,
            "service": service.id,
            "entity_sets": entity_sets(&metadata),
            "entity_types": types,
        }))
    }
}
