//! Tool registry
//!
//! Name → handler lookup with uniform error boxing and per-tool statistics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::mcp::protocol::{CallToolResult, Tool};

/// A named, schema-described operation callable through MCP
#[async_trait]
pub trait McpTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the accepted arguments
    fn input_schema(&self) -> Value;

    async fn execute(&self, arguments: &HashMap<String, Value>) -> anyhow::Result<Value>;

    fn to_tool_info(&self) -> Tool {
        Tool {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// A tool invocation
#[derive(Debug, Clone, Default)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: HashMap<String, Value>,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: HashMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct StatsEntry {
    call_count: u64,
    error_count: u64,
    total_duration: Duration,
    last_called: Option<DateTime<Utc>>,
}

/// Statistics snapshot for one tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolStatistics {
    pub call_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    /// Seconds
    pub average_duration: f64,
    /// Seconds
    pub total_duration: f64,
    pub last_called: Option<DateTime<Utc>>,
}

impl From<&StatsEntry> for ToolStatistics {
    fn from(entry: &StatsEntry) -> Self {
        let total = entry.total_duration.as_secs_f64();
        let (average_duration, error_rate) = if entry.call_count > 0 {
            let calls = entry.call_count as f64;
            (total / calls, entry.error_count as f64 / calls)
        } else {
            (0.0, 0.0)
        };

        Self {
            call_count: entry.call_count,
            error_count: entry.error_count,
            error_rate,
            average_duration,
            total_duration: total,
            last_called: entry.last_called,
        }
    }
}

/// Registry of MCP tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn McpTool>>>,
    stats: Mutex<HashMap<String, StatsEntry>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing (and resetting statistics of) any tool with the same name
    pub fn register(&self, tool: Arc<dyn McpTool>) {
        let name = tool.name().to_string();
        let replaced = self.tools.write().insert(name.clone(), tool).is_some();
        self.stats.lock().insert(name.clone(), StatsEntry::default());

        if replaced {
            tracing::warn!("Tool '{}' already registered, overwriting", name);
        } else {
            tracing::info!("Registered tool: {}", name);
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.tools.write().remove(name).is_some();
        if removed {
            self.stats.lock().remove(name);
            tracing::info!("Unregistered tool: {}", name);
        }
        removed
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn McpTool>> {
        self.tools.read().get(name).cloned()
    }

    /// MCP descriptors of all registered tools, sorted by name
    pub fn list_tools(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .tools
            .read()
            .values()
            .map(|tool| tool.to_tool_info())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Execute a tool call; never fails, errors come back as error-flagged results.
    pub async fn call_tool(&self, request: ToolCallRequest) -> CallToolResult {
        let correlation_id = uuid::Uuid::new_v4();
        tracing::info!(
            "Calling tool '{}' [correlation_id: {}]",
            request.name,
            correlation_id
        );

        let Some(tool) = self.get_tool(&request.name) else {
            let message = format!("Tool '{}' not found", request.name);
            tracing::error!("{} [correlation_id: {}]", message, correlation_id);
            return CallToolResult::error(message);
        };

        let start = Instant::now();
        let outcome = tool.execute(&request.arguments).await;
        let duration = start.elapsed();
        self.record(&request.name, duration, outcome.is_err());

        match outcome {
            Ok(result) => {
                tracing::info!(
                    "Tool '{}' executed successfully in {:.3}s [correlation_id: {}]",
                    request.name,
                    duration.as_secs_f64(),
                    correlation_id
                );
                CallToolResult::text(result_text(result))
            }
            Err(e) => {
                tracing::error!(
                    "Tool '{}' failed after {:.3}s: {:#} [correlation_id: {}]",
                    request.name,
                    duration.as_secs_f64(),
                    e,
                    correlation_id
                );
                CallToolResult::error(format!("Tool execution failed: {:#}", e))
            }
        }
    }

    fn record(&self, name: &str, duration: Duration, failed: bool) {
        let mut stats = self.stats.lock();
        // Unregistered while running: nothing to update.
        if let Some(entry) = stats.get_mut(name) {
            entry.call_count += 1;
            entry.total_duration += duration;
            entry.last_called = Some(Utc::now());
            if failed {
                entry.error_count += 1;
            }
        }
    }

    /// Snapshot of per-tool statistics
    pub fn get_statistics(&self) -> HashMap<String, ToolStatistics> {
        self.stats
            .lock()
            .iter()
            .map(|(name, entry)| (name.clone(), ToolStatistics::from(entry)))
            .collect()
    }
}

fn result_text(result: Value) -> String {
    match result {
        Value::String(text) => text,
        other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    }
}
