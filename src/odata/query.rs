//! OData query options, filter building and key predicates

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::error::{Result, SapError};

const MAX_TOP: u64 = 10_000;

/// Query options for an entity set read
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Equality filters, joined with `and` in insertion order
    pub filters: Option<Map<String, Value>>,
    /// Raw `$filter` expression, `and`-joined with `filters`
    pub filter: Option<String>,
    pub select: Option<Vec<String>>,
    pub top: Option<u64>,
    pub skip: Option<u64>,
}

impl QueryOptions {
    /// Combined `$filter` expression, if any
    pub fn filter_expression(&self) -> Option<String> {
        let built = self
            .filters
            .as_ref()
            .map(build_filter)
            .filter(|f| !f.is_empty());
        let raw = self
            .filter
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty());

        match (built, raw) {
            (Some(built), Some(raw)) => Some(format!("{} and {}", built, raw)),
            (Some(built), None) => Some(built),
            (None, Some(raw)) => Some(raw.to_string()),
            (None, None) => None,
        }
    }

    /// Query parameters, always requesting JSON
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();

        if let Some(filter) = self.filter_expression() {
            params.push(("$filter".to_string(), filter));
        }

        if let Some(ref select) = self.select {
            if !select.is_empty() {
                params.push(("$select".to_string(), select.join(",")));
            }
        }

        if let Some(top) = self.top {
            params.push(("$top".to_string(), top.to_string()));
        }

        if let Some(skip) = self.skip {
            params.push(("$skip".to_string(), skip.to_string()));
        }

        params.push(("$format".to_string(), "json".to_string()));
        params
    }
}

/// Build `Field eq 'text' and Other eq 42` from a filter map.
///
/// String values are quoted with embedded quotes doubled; everything else is
/// written bare.
pub fn build_filter(filters: &Map<String, Value>) -> String {
    filters
        .iter()
        .map(|(field, value)| match value {
            Value::String(s) => format!("{} eq '{}'", field, s.replace('\'', "''")),
            other => format!("{} eq {}", field, other),
        })
        .collect::<Vec<_>>()
        .join(" and ")
}

/// OData key predicate for an entity key
///
/// Plain keys are quoted (`'91000092'`); already quoted or composite keys
/// (`OrderID='1',Item='10'`) are used as given.
pub fn key_predicate(key: &str) -> String {
    let key = key.trim();
    if key.starts_with('\'') || key.contains('=') {
        format!("({})", key)
    } else {
        format!("('{}')", key.replace('\'', "''"))
    }
}

fn entity_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9._-]+$").expect("valid regex"))
}

fn field_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("valid regex"))
}

fn service_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/[a-zA-Z0-9/_-]+$").expect("valid regex"))
}

pub fn validate_entity_key(key: &str) -> bool {
    entity_key_re().is_match(key)
}

pub fn validate_field_name(field: &str) -> bool {
    field_name_re().is_match(field)
}

pub fn validate_service_path(path: &str) -> bool {
    service_path_re().is_match(path)
}

/// Split a comma-separated `$select` list, rejecting invalid field names
pub fn validate_select_fields(fields: &str) -> Result<Vec<String>> {
    fields
        .split(',')
        .map(str::trim)
        .map(|field| {
            if validate_field_name(field) {
                Ok(field.to_string())
            } else {
                Err(SapError::Validation(format!("Invalid field name: {}", field)))
            }
        })
        .collect()
}

/// Check `$top` (1..=10000) and `$skip` (>= 0)
pub fn validate_pagination(
    top: Option<i64>,
    skip: Option<i64>,
) -> Result<(Option<u64>, Option<u64>)> {
    let top = match top {
        Some(t) if t <= 0 => {
            return Err(SapError::Validation(
                "$top must be a positive integer".into(),
            ))
        }
        Some(t) if t as u64 > MAX_TOP => {
            return Err(SapError::Validation(format!(
                "$top cannot exceed {}",
                MAX_TOP
            )))
        }
        other => other.map(|t| t as u64),
    };

    let skip = match skip {
        Some(s) if s < 0 => {
            return Err(SapError::Validation(
                "$skip must be a non-negative integer".into(),
            ))
        }
        other => other.map(|s| s as u64),
    };

    Ok((top, skip))
}
