//! Service catalog loaded from `services.yaml`
//!
//! Read-only lookup table of the OData services and entity sets the tools may
//! touch, plus gateway URL layout and the endpoints used for the CSRF handshake.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use super::settings::ConnectionConfig;
use super::ConfigError;
use crate::odata::query::validate_service_path;

pub const CATALOG_COLLECTION_PATH: &str =
    "/sap/opu/odata/IWFND/CATALOGSERVICE;v=2/ServiceCollection";
pub const CATALOG_METADATA_PATH: &str = "/sap/opu/odata/IWFND/CATALOGSERVICE;v=2/$metadata";

/// Configuration for an OData entity set
#[derive(Debug, Clone, Deserialize)]
pub struct EntityConfig {
    pub name: String,
    pub key_field: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub navigations: Vec<String>,
    #[serde(default)]
    pub default_select: Option<Vec<String>>,
}

/// Configuration for an OData service
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub id: String,
    pub name: String,
    /// Path below the OData base, e.g. `/sap/Z_SALES_ORDER_SRV`
    pub path: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_version() -> String {
    "v2".to_string()
}

impl ServiceConfig {
    pub fn get_entity(&self, entity_name: &str) -> Option<&EntityConfig> {
        self.entities.iter().find(|e| e.name == entity_name)
    }
}

/// Which endpoints the authenticator primes and validates the session against
#[derive(Debug, Clone, Deserialize)]
pub struct AuthEndpointConfig {
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub entity_name: Option<String>,
    #[serde(default = "default_true")]
    pub use_catalog_metadata: bool,
}

impl Default for AuthEndpointConfig {
    fn default() -> Self {
        Self {
            service_id: None,
            entity_name: None,
            use_catalog_metadata: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl AuthEndpointConfig {
    /// Path of the `X-CSRF-Token: Fetch` request
    ///
    /// Falls back to the catalog collection when no usable service is configured.
    pub fn csrf_path(&self, services: &ServicesConfig) -> String {
        if self.use_catalog_metadata {
            return CATALOG_COLLECTION_PATH.to_string();
        }

        let Some(service) = self
            .service_id
            .as_deref()
            .and_then(|id| services.get_service(id))
        else {
            return CATALOG_COLLECTION_PATH.to_string();
        };

        let entity = self
            .entity_name
            .as_deref()
            .or_else(|| service.entities.first().map(|e| e.name.as_str()));

        match entity {
            Some(entity) => format!(
                "{}{}/{}",
                services.gateway.odata_base_path(),
                service.path,
                entity
            ),
            None => CATALOG_COLLECTION_PATH.to_string(),
        }
    }

    /// Path of the session validation request
    pub fn auth_validation_path(&self) -> String {
        CATALOG_METADATA_PATH.to_string()
    }
}

/// SAP Gateway URL layout
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_base_url_pattern")]
    pub base_url_pattern: String,
    #[serde(default = "default_metadata_suffix")]
    pub metadata_suffix: String,
    #[serde(default = "default_catalog_path")]
    pub service_catalog_path: String,
    #[serde(default)]
    pub auth_endpoint: AuthEndpointConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url_pattern: default_base_url_pattern(),
            metadata_suffix: default_metadata_suffix(),
            service_catalog_path: default_catalog_path(),
            auth_endpoint: AuthEndpointConfig::default(),
        }
    }
}

fn default_base_url_pattern() -> String {
    "{scheme}://{host}:{port}/sap/opu/odata".to_string()
}

fn default_metadata_suffix() -> String {
    "/$metadata".to_string()
}

fn default_catalog_path() -> String {
    CATALOG_COLLECTION_PATH.to_string()
}

impl GatewayConfig {
    /// OData base URL for the given connection
    pub fn odata_base(&self, connection: &ConnectionConfig) -> String {
        self.base_url_pattern
            .replace("{scheme}", connection.scheme())
            .replace("{host}", connection.host())
            .replace("{port}", &connection.port().to_string())
    }

    /// Path part of the OData base, e.g. `/sap/opu/odata`
    pub fn odata_base_path(&self) -> &str {
        self.base_url_pattern
            .split_once("{port}")
            .map_or("", |(_, path)| path)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url_pattern.contains("{host}") || !self.base_url_pattern.contains("{port}") {
            return Err(ConfigError::Invalid(
                "base_url_pattern must contain {host} and {port} placeholders".into(),
            ));
        }
        Ok(())
    }
}

/// Root of `services.yaml`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl ServicesConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config = Self::from_yaml_str(&content)?;
        tracing::info!(
            "Loaded {} services from {}",
            config.services.len(),
            path.display()
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.gateway.validate()?;

        for service in &self.services {
            if !validate_service_path(&service.path) {
                return Err(ConfigError::Invalid(format!(
                    "Service '{}': path must start with '/' and contain only letters, digits, '/', '_' or '-'",
                    service.id
                )));
            }
            if service.version != "v2" && service.version != "v4" {
                return Err(ConfigError::Invalid(format!(
                    "Service '{}': OData version must be v2 or v4",
                    service.id
                )));
            }
            if let Some(entity) = service.entities.iter().find(|e| e.name.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "Service '{}': entity name cannot be empty (key field '{}')",
                    service.id, entity.key_field
                )));
            }
        }
        Ok(())
    }

    pub fn get_service(&self, service_id: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.id == service_id)
    }

    pub fn list_service_ids(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn get_entity(&self, service_id: &str, entity_name: &str) -> Option<&EntityConfig> {
        self.get_service(service_id)?.get_entity(entity_name)
    }
}
