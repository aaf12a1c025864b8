//! SAP Gateway OData client
//!
//! Authenticated CRUD calls against OData entity sets with transparent
//! session refresh on 401 and exponential backoff on transport failures.

use reqwest::header::{HeaderName, CONTENT_TYPE, COOKIE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::auth::{build_http_client, header_value, AuthToken, SapAuthenticator};
use crate::config::{ConnectionConfig, GatewayConfig, ServicesConfig};
use crate::error::{Result, SapError};
use crate::odata::metadata::parse_xml;
use crate::odata::query::{key_predicate, QueryOptions};

/// Request payload
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// Serialized to JSON with `Content-Type: application/json`
    Json(Value),
    /// Sent as `text/plain` unless the caller sets `Content-Type`
    Text(String),
}

/// Per-call request options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Caller headers; they win over the authentication headers
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub params: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn accept(mime: &str) -> Self {
        Self {
            headers: vec![("Accept".to_string(), mime.to_string())],
            ..Default::default()
        }
    }
}

/// One row of the gateway service catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub version: Option<String>,
    /// `TechnicalServiceName` of the catalog row
    #[serde(rename = "url")]
    pub technical_name: Option<String>,
}

/// OData client for one SAP Gateway
#[derive(Debug)]
pub struct SapClient {
    config: Arc<ConnectionConfig>,
    authenticator: Arc<SapAuthenticator>,
    gateway: GatewayConfig,
    base_url: String,
    odata_base: String,
    /// Custom headers keyed by service path
    service_headers: HashMap<String, Vec<(String, String)>>,
    session: Mutex<Option<Client>>,
}

impl SapClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `config` - Connection settings shared with the authenticator
    /// * `authenticator` - Session/CSRF handler for the same gateway
    /// * `services` - Service catalog (URL layout and per-service headers)
    pub fn new(
        config: Arc<ConnectionConfig>,
        authenticator: Arc<SapAuthenticator>,
        services: &ServicesConfig,
    ) -> Self {
        let service_headers = services
            .services
            .iter()
            .filter(|s| !s.custom_headers.is_empty())
            .map(|s| {
                let headers = s
                    .custom_headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                (s.path.clone(), headers)
            })
            .collect();

        Self {
            base_url: config.base_url(),
            odata_base: services.gateway.odata_base(&config),
            gateway: services.gateway.clone(),
            config,
            authenticator,
            service_headers,
            session: Mutex::new(None),
        }
    }

    /// Create a client and its authenticator from the catalog's auth endpoint settings
    pub fn from_config(config: Arc<ConnectionConfig>, services: &ServicesConfig) -> Result<Self> {
        let authenticator = Arc::new(SapAuthenticator::from_catalog(config.clone(), services)?);
        Ok(Self::new(config, authenticator, services))
    }

    pub fn authenticator(&self) -> &Arc<SapAuthenticator> {
        &self.authenticator
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// OData base URL, e.g. `https://host:port/sap/opu/odata`
    pub fn odata_base(&self) -> &str {
        &self.odata_base
    }

    async fn ensure_session(&self) -> Result<Client> {
        let mut session = self.session.lock().await;
        match session.as_ref() {
            Some(client) => Ok(client.clone()),
            None => {
                tracing::debug!("Opening HTTP session to {}", self.base_url);
                let client = build_http_client(&self.config)?;
                *session = Some(client.clone());
                Ok(client)
            }
        }
    }

    /// Close the HTTP session; calling it again is a no-op.
    pub async fn close(&self) {
        let mut session = self.session.lock().await;
        if session.take().is_some() {
            tracing::debug!("Closed HTTP session to {}", self.base_url);
        }
    }

    pub async fn is_open(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Authenticate with the gateway; failures are logged and reported as `false`.
    pub async fn authenticate(&self) -> bool {
        match self.authenticator.get_valid_token().await {
            Ok(_) => {
                tracing::info!("SAP authentication successful");
                true
            }
            Err(e) => {
                tracing::error!("SAP authentication failed: {}", e);
                false
            }
        }
    }

    /// Authenticated request, body buffered as text
    pub async fn make_request(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<String> {
        let response = self.send_with_retry(&method, url, options).await?;
        response
            .text()
            .await
            .map_err(|e| SapError::Connection(format!("Failed to read response body: {}", e)))
    }

    /// Authenticated request returning the live response for streaming reads
    pub async fn make_request_raw(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Response> {
        self.send_with_retry(&method, url, options).await
    }

    async fn send_with_retry(
        &self,
        method: &Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Response> {
        let budget = self.config.retry_attempts();
        let mut attempt: u32 = 0;

        loop {
            if attempt >= budget {
                return Err(SapError::Request {
                    message: format!("Max retry attempts ({}) exceeded", budget),
                    status_code: None,
                    url: Some(url.to_string()),
                    method: Some(method.to_string()),
                });
            }

            let token = self.authenticator.get_valid_token().await.map_err(|e| {
                SapError::Authentication {
                    message: format!("Failed to get authentication token: {}", e),
                    status_code: e.status_code(),
                }
            })?;

            let request = self.build_request(method, url, options, &token).await?;
            tracing::debug!("{} {} (attempt {}/{})", method, url, attempt + 1, budget);

            match request.send().await {
                Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                    tracing::warn!("Authentication token expired, refreshing...");
                    self.authenticator.invalidate_token().await;
                    attempt += 1;
                }
                Ok(response) if response.status().as_u16() >= 400 => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    return Err(SapError::Request {
                        message: format!("SAP request failed: {} - {}", status, body),
                        status_code: Some(status),
                        url: Some(url.to_string()),
                        method: Some(method.to_string()),
                    });
                }
                Ok(response) => return Ok(response),
                Err(e) if e.is_timeout() => {
                    return Err(SapError::Timeout(format!(
                        "Request timeout for {} {}",
                        method, url
                    )));
                }
                Err(e) if e.is_builder() => {
                    return Err(SapError::Request {
                        message: format!("Invalid request: {}", e),
                        status_code: None,
                        url: Some(url.to_string()),
                        method: Some(method.to_string()),
                    });
                }
                Err(e) => {
                    if attempt + 1 < budget {
                        let delay = backoff_delay(self.config.backoff_unit(), attempt);
                        tracing::warn!(
                            "Request failed, retrying ({}/{}) after {:?}: {}",
                            attempt + 1,
                            budget,
                            delay,
                            e
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    } else {
                        return Err(SapError::Connection(format!("Connection error: {}", e)));
                    }
                }
            }
        }
    }

    async fn build_request(
        &self,
        method: &Method,
        url: &str,
        options: &RequestOptions,
        token: &AuthToken,
    ) -> Result<RequestBuilder> {
        let client = self.ensure_session().await?;

        let mut headers = self.authenticator.get_auth_headers(token)?;
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                SapError::Validation(format!("Invalid header name '{}': {}", name, e))
            })?;
            headers.insert(name, header_value(value)?);
        }
        if let Some(cookie) = token.cookie_header() {
            headers.insert(COOKIE, header_value(&cookie)?);
        }

        let mut params = options.params.clone();
        if !params.iter().any(|(k, _)| k == "sap-client") {
            params.push(("sap-client".to_string(), self.config.client().to_string()));
        }

        let mut builder = client.request(method.clone(), url).query(&params);

        match &options.body {
            Some(RequestBody::Json(value)) => {
                let body = serde_json::to_string(value)
                    .map_err(|e| SapError::Validation(format!("Failed to encode body: {}", e)))?;
                headers.insert(CONTENT_TYPE, header_value("application/json")?);
                builder = builder.body(body);
            }
            Some(RequestBody::Text(text)) => {
                let caller_type = options
                    .headers
                    .iter()
                    .any(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
                if !caller_type {
                    headers.insert(CONTENT_TYPE, header_value("text/plain; charset=utf-8")?);
                }
                builder = builder.body(text.clone());
            }
            None => {}
        }

        Ok(builder.headers(headers))
    }

    fn options_for(&self, service_path: &str, accept: &str) -> RequestOptions {
        let mut options = RequestOptions::accept(accept);
        if let Some(extra) = self.service_headers.get(service_path) {
            options.headers.extend(extra.iter().cloned());
        }
        options
    }

    fn entity_set_url(&self, service_path: &str, entity_set: &str) -> String {
        format!("{}{}/{}", self.odata_base, service_path, entity_set)
    }

    fn entity_url(&self, service_path: &str, entity_set: &str, key: &str) -> String {
        format!(
            "{}{}",
            self.entity_set_url(service_path, entity_set),
            key_predicate(key)
        )
    }

    /// Fetch and parse `$metadata` for a service
    pub async fn get_service_metadata(&self, service_path: &str) -> Result<Value> {
        let url = format!(
            "{}{}{}",
            self.odata_base, service_path, self.gateway.metadata_suffix
        );
        let options = self.options_for(service_path, "application/xml");

        let xml = self.make_request(Method::GET, &url, &options).await?;
        let metadata = parse_xml(&xml)?;

        tracing::info!("Retrieved metadata for service: {}", service_path);
        Ok(metadata)
    }

    /// List services published in the gateway catalog
    pub async fn list_services(&self) -> Result<Vec<ServiceInfo>> {
        let catalog_path = &self.gateway.service_catalog_path;
        let url = if catalog_path.starts_with("http") {
            catalog_path.clone()
        } else {
            format!("{}{}", self.base_url, catalog_path)
        };

        let text = self
            .make_request(Method::GET, &url, &RequestOptions::accept("application/json"))
            .await?;
        let services = parse_service_catalog(&text)?;

        tracing::info!("Retrieved {} available services", services.len());
        Ok(services)
    }

    /// Query an entity set
    pub async fn query_entity_set(
        &self,
        service_path: &str,
        entity_set: &str,
        query: &QueryOptions,
    ) -> Result<Value> {
        let url = self.entity_set_url(service_path, entity_set);
        let mut options = self.options_for(service_path, "application/json");
        options.params = query.to_params();

        let text = self.make_request(Method::GET, &url, &options).await?;
        let data = parse_json(&text)?;

        tracing::info!(
            "Queried entity set {} from service {}",
            entity_set,
            service_path
        );
        Ok(data)
    }

    /// Get a single entity by key
    pub async fn get_entity(
        &self,
        service_path: &str,
        entity_set: &str,
        key: &str,
        select: Option<&[String]>,
    ) -> Result<Value> {
        let url = self.entity_url(service_path, entity_set, key);
        let mut options = self.options_for(service_path, "application/json");
        options.params.push(("$format".to_string(), "json".to_string()));
        if let Some(fields) = select.filter(|f| !f.is_empty()) {
            options.params.push(("$select".to_string(), fields.join(",")));
        }

        let text = self.make_request(Method::GET, &url, &options).await?;
        let data = parse_json(&text)?;

        tracing::info!("Retrieved entity {} from {}", key, entity_set);
        Ok(data)
    }

    /// Create an entity; an empty response body yields `{"status":"created"}`
    pub async fn create_entity(
        &self,
        service_path: &str,
        entity_set: &str,
        data: Value,
    ) -> Result<Value> {
        let url = self.entity_set_url(service_path, entity_set);
        let mut options = self.options_for(service_path, "application/json");
        options.body = Some(RequestBody::Json(data));

        let text = self.make_request(Method::POST, &url, &options).await?;
        tracing::info!("Created entity in {}", entity_set);

        if text.trim().is_empty() {
            return Ok(json!({"status": "created"}));
        }
        parse_json(&text)
    }

    /// Update an entity; 204 No Content yields `{"status":"updated"}`
    pub async fn update_entity(
        &self,
        service_path: &str,
        entity_set: &str,
        key: &str,
        data: Value,
    ) -> Result<Value> {
        let url = self.entity_url(service_path, entity_set, key);
        let mut options = self.options_for(service_path, "application/json");
        options.body = Some(RequestBody::Json(data));

        let text = self.make_request(Method::PUT, &url, &options).await?;
        tracing::info!("Updated entity {} in {}", key, entity_set);

        if text.trim().is_empty() {
            return Ok(json!({"status": "updated"}));
        }
        parse_json(&text)
    }

    /// Delete an entity; the response body is not parsed
    pub async fn delete_entity(
        &self,
        service_path: &str,
        entity_set: &str,
        key: &str,
    ) -> Result<()> {
        let url = self.entity_url(service_path, entity_set, key);
        let options = self.options_for(service_path, "application/json");

        self.make_request(Method::DELETE, &url, &options).await?;
        tracing::info!("Deleted entity {} from {}", key, entity_set);
        Ok(())
    }
}

/// Delay before retry number `attempt` (0-based): `unit * 2^attempt`
pub fn backoff_delay(unit: Duration, attempt: u32) -> Duration {
    unit.saturating_mul(1u32 << attempt.min(16))
}

fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text)
        .map_err(|e| SapError::Validation(format!("Failed to parse JSON response: {}", e)))
}

/// Project catalog rows from either an OData V2 (`d.results`) or V4 (`value`) body
pub fn parse_service_catalog(text: &str) -> Result<Vec<ServiceInfo>> {
    let data = parse_json(text)?;

    let rows = data
        .get("d")
        .and_then(|d| d.get("results"))
        .or_else(|| data.get("value"))
        .and_then(Value::as_array);

    let field = |row: &Value, name: &str| row.get(name).and_then(Value::as_str).map(String::from);

    Ok(rows
        .map(|rows| {
            rows.iter()
                .map(|row| ServiceInfo {
                    id: field(row, "ID"),
                    title: field(row, "Title"),
                    version: row.get("Version").map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    }),
                    technical_name: field(row, "TechnicalServiceName"),
                })
                .collect()
        })
        .unwrap_or_default())
}
