//! SAP tool handlers
//!
//! Each tool is a value implementing [`McpTool`]; they share a [`ToolContext`]
//! holding the gateway client and the service catalog.

mod auth;
mod entity;
mod metadata;
mod query;
mod services;

pub use auth::AuthenticateTool;
pub use entity::GetEntityTool;
pub use metadata::GetMetadataTool;
pub use query::QueryTool;
pub use services::ListServicesTool;

use anyhow::{anyhow, bail};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{EntityConfig, ServiceConfig, ServicesConfig};
use crate::mcp::registry::{McpTool, ToolRegistry};
use crate::odata::SapClient;

/// Shared state of the SAP tools
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub client: Arc<SapClient>,
    pub services: Arc<ServicesConfig>,
}

impl ToolContext {
    pub fn new(client: Arc<SapClient>, services: Arc<ServicesConfig>) -> Self {
        Self { client, services }
    }

    /// Look up a configured service, listing the available ids on failure
    pub(crate) fn service(&self, service_id: &str) -> anyhow::Result<&ServiceConfig> {
        self.services.get_service(service_id).ok_or_else(|| {
            anyhow!(
                "Service '{}' not found in configuration. Available services: {}",
                service_id,
                self.services.list_service_ids().join(", ")
            )
        })
    }

    /// Look up a configured entity set of a service
    pub(crate) fn entity<'a>(
        &self,
        service: &'a ServiceConfig,
        entity_set: &str,
    ) -> anyhow::Result<&'a EntityConfig> {
        service.get_entity(entity_set).ok_or_else(|| {
            let available: Vec<&str> = service.entities.iter().map(|e| e.name.as_str()).collect();
            anyhow!(
                "Entity set '{}' not found in service '{}'. Available entities: {}",
                entity_set,
                service.id,
                available.join(", ")
            )
        })
    }
}

/// Register every SAP tool
pub fn register_sap_tools(registry: &ToolRegistry, ctx: ToolContext) {
    let tools: Vec<Arc<dyn McpTool>> = vec![
        Arc::new(AuthenticateTool::new(ctx.clone())),
        Arc::new(QueryTool::new(ctx.clone())),
        Arc::new(GetEntityTool::new(ctx.clone())),
        Arc::new(ListServicesTool::new(ctx.clone())),
        Arc::new(GetMetadataTool::new(ctx)),
    ];

    for tool in tools {
        registry.register(tool);
    }
}

/// Check arguments against a tool's input schema.
///
/// Required keys must be present; declared `string`, `integer`, `boolean` and
/// `object` properties must carry a value of that JSON type. Clients often send
/// numbers as strings, so `integer` also accepts a string holding an integer.
/// Undeclared keys are ignored.
pub fn validate_tool_arguments(
    arguments: &HashMap<String, Value>,
    schema: &Value,
) -> anyhow::Result<()> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !arguments.contains_key(field) {
                bail!("Missing required argument: {}", field);
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, value) in arguments {
        let Some(expected) = properties
            .get(key)
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
        else {
            continue;
        };

        let matches = match expected {
            "string" => value.is_string(),
            "integer" => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_str().is_some_and(|s| s.trim().parse::<i64>().is_ok())
            }
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            _ => true,
        };
        if !matches {
            let article = if expected == "integer" || expected == "object" {
                "an"
            } else {
                "a"
            };
            bail!("Argument '{}' must be {} {}", key, article, expected);
        }
    }

    Ok(())
}

pub(crate) fn str_arg<'a>(args: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

pub(crate) fn required_str<'a>(
    args: &'a HashMap<String, Value>,
    key: &str,
) -> anyhow::Result<&'a str> {
    str_arg(args, key)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("Missing required argument: {}", key))
}

/// Parse a number argument (handles both string and number types)
pub(crate) fn parse_number_arg(
    args: &HashMap<String, Value>,
    key: &str,
) -> anyhow::Result<Option<i64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            .map(Some)
            .ok_or_else(|| anyhow!("Argument '{}' must be an integer", key)),
    }
}
