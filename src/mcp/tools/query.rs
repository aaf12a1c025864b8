use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use super::{parse_number_arg, required_str, str_arg, validate_tool_arguments, ToolContext};
use crate::mcp::protocol::create_tool_schema;
use crate::mcp::registry::McpTool;
use crate::odata::query::{validate_field_name, validate_pagination, validate_select_fields};
use crate::odata::QueryOptions;

/// `sap_query`: read an entity set with filters, projection and paging
pub struct QueryTool {
    ctx: ToolContext,
}

impl QueryTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }

    fn build_options(
        &self,
        args: &HashMap<String, Value>,
        default_select: Option<&Vec<String>>,
    ) -> anyhow::Result<QueryOptions> {
        let filters = match args.get("filters") {
            Some(Value::Object(map)) if !map.is_empty() => {
                if let Some(field) = map.keys().find(|k| !validate_field_name(k)) {
                    bail!("Invalid field name in filters: {}", field);
                }
                Some(map.clone())
            }
            _ => None,
        };

        let select = match str_arg(args, "select").map(str::trim).filter(|s| !s.is_empty()) {
            Some(fields) => Some(validate_select_fields(fields)?),
            None => default_select.cloned(),
        };

        let (top, skip) = validate_pagination(
            parse_number_arg(args, "top")?,
            parse_number_arg(args, "skip")?,
        )?;

        Ok(QueryOptions {
            filters,
            filter: str_arg(args, "filter").map(String::from),
            select,
            top,
            skip,
        })
    }
}

#[async_trait]
impl McpTool for QueryTool {
    fn name(&self) -> &str {
        "sap_query"
    }

    fn description(&self) -> &str {
        "Query SAP OData service entity sets with optional filters. Returns the raw OData response."
    }

    fn input_schema(&self) -> Value {
        create_tool_schema(&[
            (
                "service",
                "string",
                "Service id from the service catalog, e.g. 'Z_SALES_ORDER_SRV'",
                true,
            ),
            ("entity_set", "string", "Entity set name to query, e.g. 'zsd004Set'", true),
            ("filter", "string", "OData filter expression, e.g. \"Status eq 'OPEN'\"", false),
            (
                "filters",
                "object",
                "Equality filters as field/value pairs, joined with 'and'",
                false,
            ),
            ("select", "string", "Comma-separated list of fields to select", false),
            ("top", "integer", "Maximum number of records to return (1-10000)", false),
            ("skip", "integer", "Number of records to skip (for pagination)", false),
        ])
    }

    async fn execute(&self, arguments: &HashMap<String, Value>) -> anyhow::Result<Value> {
        validate_tool_arguments(arguments, &self.input_schema())?;

        let service = self.ctx.service(required_str(arguments, "service")?)?;
        let entity_set = required_str(arguments, "entity_set")?;
        // Entity sets outside the catalog may still be queried, just without defaults.
        let default_select = service
            .get_entity(entity_set)
            .and_then(|e| e.default_select.as_ref());

        let options = self.build_options(arguments, default_select)?;

        self.ctx
            .client
            .query_entity_set(&service.path, entity_set, &options)
            .await
            .with_context(|| format!("Error querying {} in {}", entity_set, service.id))
    }
}
