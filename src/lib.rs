//! SAP Gateway OData MCP Library
//!
//! Model Context Protocol server exposing SAP Gateway OData services as tools.
//! Handles the CSRF/session handshake, authenticated requests with retry, and
//! per-tool statistics.

pub mod auth;
pub mod config;
pub mod error;
pub mod mcp;
pub mod odata;

pub use auth::{AuthToken, SapAuthenticator};
pub use config::{AppConfig, ConfigError, ConnectionConfig, ServicesConfig};
pub use error::{Result, SapError};
pub use mcp::{SapMcpServer, ToolRegistry};
pub use odata::{QueryOptions, SapClient};
