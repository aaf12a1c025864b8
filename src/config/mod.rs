//! Configuration
//!
//! Connection settings (TOML + environment) and the YAML service catalog.
//! Built once at startup and passed into the authenticator, client and tools.

pub mod services;
pub mod settings;

use std::path::PathBuf;
use thiserror::Error;

pub use services::{AuthEndpointConfig, EntityConfig, GatewayConfig, ServiceConfig, ServicesConfig};
pub use settings::{AppConfig, ConnectionConfig, ConnectionConfigBuilder};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required settings: {0}")]
    Missing(String),

    #[error("Failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
