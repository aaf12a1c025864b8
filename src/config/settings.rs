//! Connection and server settings
//!
//! Loaded from an optional TOML file, then overridden by `SAP_*` / `MCP_*`
//! environment variables.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::ConfigError;

pub const DEFAULT_PORT: u16 = 44300;
pub const DEFAULT_CLIENT: &str = "100";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// SAP sessions usually outlive this; the server's 401 is the real expiry signal.
pub const DEFAULT_SESSION_LIFETIME_SECS: u64 = 30 * 60;

const DEFAULT_CONFIG_FILE: &str = "sap-mcp.toml";
const VALID_LOG_LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

/// Validated, immutable connection settings for one SAP Gateway
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    host: String,
    port: u16,
    client: String,
    username: String,
    password: String,
    verify_tls: bool,
    use_https: bool,
    timeout: Duration,
    retry_attempts: u32,
    session_lifetime: Duration,
    backoff_unit: Duration,
}

impl ConnectionConfig {
    pub fn builder(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            host: host.into(),
            port: DEFAULT_PORT,
            client: DEFAULT_CLIENT.to_string(),
            username: username.into(),
            password: password.into(),
            verify_tls: false,
            use_https: true,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            session_lifetime: Duration::from_secs(DEFAULT_SESSION_LIFETIME_SECS),
            backoff_unit: Duration::from_secs(1),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// SAP client number sent as `sap-client`
    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn verify_tls(&self) -> bool {
        self.verify_tls
    }

    pub fn scheme(&self) -> &'static str {
        if self.use_https {
            "https"
        } else {
            "http"
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Total attempts per request, first try included
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    pub fn session_lifetime(&self) -> Duration {
        self.session_lifetime
    }

    /// Backoff before retry `n` (0-based) is `2^n` of this unit
    pub fn backoff_unit(&self) -> Duration {
        self.backoff_unit
    }

    /// Gateway root, e.g. `https://sap.example.com:44300`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme(), self.host, self.port)
    }
}

/// Builder for [`ConnectionConfig`]
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    host: String,
    port: u16,
    client: String,
    username: String,
    password: String,
    verify_tls: bool,
    use_https: bool,
    timeout: Duration,
    retry_attempts: u32,
    session_lifetime: Duration,
    backoff_unit: Duration,
}

impl ConnectionConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn client(mut self, client: impl Into<String>) -> Self {
        self.client = client.into();
        self
    }

    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    /// Plain HTTP is only useful against local mock gateways
    pub fn use_https(mut self, enabled: bool) -> Self {
        self.use_https = enabled;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn session_lifetime(mut self, lifetime: Duration) -> Self {
        self.session_lifetime = lifetime;
        self
    }

    pub fn backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn build(self) -> Result<ConnectionConfig, ConfigError> {
        let host = self.host.trim().to_string();
        if host.is_empty() {
            return Err(ConfigError::Invalid("SAP host cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid(
                "Port must be between 1 and 65535".into(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry_attempts must be at least 1".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be positive".into()));
        }

        Ok(ConnectionConfig {
            host,
            port: self.port,
            client: self.client,
            username: self.username,
            password: self.password,
            verify_tls: self.verify_tls,
            use_https: self.use_https,
            timeout: self.timeout,
            retry_attempts: self.retry_attempts,
            session_lifetime: self.session_lifetime,
            backoff_unit: self.backoff_unit,
        })
    }
}

/// `[sap]` table of the config file; every field may be overridden from the environment
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SapSettings {
    pub host: Option<String>,
    pub port: Option<u32>,
    pub client: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub verify_ssl: Option<bool>,
    pub use_https: Option<bool>,
    pub timeout: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub session_lifetime: Option<u64>,
}

/// `[server]` table of the config file
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub services_config_path: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            services_config_path: None,
        }
    }
}

fn default_log_level() -> String {
    "INFO".to_string()
}

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sap: SapSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Load `.env.server`/`.env`, the config file (if any), then apply environment overrides.
    ///
    /// The file is `$SAP_MCP_CONFIG` or `./sap-mcp.toml`; a missing default file is not an error.
    pub fn load_default() -> Result<Self, ConfigError> {
        if dotenvy::from_filename(".env.server").is_err() {
            let _ = dotenvy::dotenv();
        }

        let mut config = match std::env::var_os("SAP_MCP_CONFIG") {
            Some(path) => Self::load(Path::new(&path))?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `SAP_*` / `MCP_*` overrides from a variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sap = &mut self.sap;
        if let Some(v) = lookup("SAP_HOST") {
            sap.host = Some(v);
        }
        if let Some(v) = lookup("SAP_PORT") {
            sap.port = Some(parse_var("SAP_PORT", &v)?);
        }
        if let Some(v) = lookup("SAP_CLIENT") {
            sap.client = Some(v);
        }
        if let Some(v) = lookup("SAP_USERNAME") {
            sap.username = Some(v);
        }
        if let Some(v) = lookup("SAP_PASSWORD") {
            sap.password = Some(v);
        }
        if let Some(v) = lookup("SAP_VERIFY_SSL") {
            sap.verify_ssl = Some(parse_bool("SAP_VERIFY_SSL", &v)?);
        }
        if let Some(v) = lookup("SAP_USE_HTTPS") {
            sap.use_https = Some(parse_bool("SAP_USE_HTTPS", &v)?);
        }
        if let Some(v) = lookup("SAP_TIMEOUT") {
            sap.timeout = Some(parse_var("SAP_TIMEOUT", &v)?);
        }
        if let Some(v) = lookup("SAP_RETRY_ATTEMPTS") {
            sap.retry_attempts = Some(parse_var("SAP_RETRY_ATTEMPTS", &v)?);
        }
        if let Some(v) = lookup("SAP_SESSION_LIFETIME") {
            sap.session_lifetime = Some(parse_var("SAP_SESSION_LIFETIME", &v)?);
        }

        if let Some(v) = lookup("MCP_LOG_LEVEL") {
            self.server.log_level = v;
        }
        if let Some(v) = lookup("MCP_SERVICES_CONFIG_PATH") {
            self.server.services_config_path = Some(PathBuf::from(v));
        }

        self.validate_log_level()
    }

    fn validate_log_level(&mut self) -> Result<(), ConfigError> {
        let level = self.server.log_level.to_uppercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Log level must be one of: {}",
                VALID_LOG_LEVELS.join(", ")
            )));
        }
        self.server.log_level = level;
        Ok(())
    }

    /// Map the configured level onto a `tracing` filter directive
    pub fn tracing_level(&self) -> &'static str {
        match self.server.log_level.as_str() {
            "DEBUG" => "debug",
            "WARNING" => "warn",
            "ERROR" | "CRITICAL" => "error",
            _ => "info",
        }
    }

    /// Build the validated connection settings
    pub fn connection(&self) -> Result<ConnectionConfig, ConfigError> {
        let sap = &self.sap;
        let missing: Vec<&str> = [
            ("SAP_HOST", &sap.host),
            ("SAP_USERNAME", &sap.username),
            ("SAP_PASSWORD", &sap.password),
        ]
        .iter()
        .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
        .map(|(name, _)| *name)
        .collect();

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing.join(", ")));
        }

        let port = sap.port.unwrap_or(u32::from(DEFAULT_PORT));
        let port = u16::try_from(port)
            .map_err(|_| ConfigError::Invalid("Port must be between 1 and 65535".into()))?;

        let mut builder = ConnectionConfig::builder(
            sap.host.clone().unwrap_or_default(),
            sap.username.clone().unwrap_or_default(),
            sap.password.clone().unwrap_or_default(),
        )
        .port(port)
        .verify_tls(sap.verify_ssl.unwrap_or(false))
        .use_https(sap.use_https.unwrap_or(true))
        .timeout(Duration::from_secs(sap.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS)))
        .retry_attempts(sap.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS))
        .session_lifetime(Duration::from_secs(
            sap.session_lifetime.unwrap_or(DEFAULT_SESSION_LIFETIME_SECS),
        ));

        if let Some(client) = &sap.client {
            builder = builder.client(client.clone());
        }

        builder.build()
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} has invalid value '{}'", name, value)))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid(format!(
            "{} has invalid boolean '{}'",
            name, value
        ))),
    }
}
