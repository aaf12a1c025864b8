//! MCP layer for SAP Gateway OData
//!
//! JSON-RPC protocol types, the tool registry, the SAP tools and the request dispatcher.

pub mod protocol;
pub mod registry;
mod server;
pub mod tools;

pub use protocol::*;
pub use registry::{McpTool, ToolCallRequest, ToolRegistry, ToolStatistics};
pub use server::SapMcpServer;
pub use tools::{register_sap_tools, ToolContext};
