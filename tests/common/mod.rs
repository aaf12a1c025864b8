//! Mock SAP Gateway shared by the integration tests

#![allow(dead_code)]

use sap_odata_mcp::config::{ConnectionConfig, ServicesConfig};
use sap_odata_mcp::SapClient;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockBuilder, MockServer, ResponseTemplate};

pub const CSRF_PATH: &str = "/sap/opu/odata/IWFND/CATALOGSERVICE;v=2/ServiceCollection";
pub const VALIDATION_PATH: &str = "/sap/opu/odata/IWFND/CATALOGSERVICE;v=2/$metadata";
pub const CSRF_TOKEN: &str = "tok-123";
pub const SESSION_COOKIE: &str = "SAP_SESSIONID_DEV_100=sess-abc";
/// `Basic base64(user:secret)`
pub const BASIC_AUTH: &str = "Basic dXNlcjpzZWNyZXQ=";

pub const SERVICES_YAML: &str = r#"
services:
  - id: Z_SALES_ORDER_SRV
    name: Sales Orders
    path: /sap/Z_SALES_ORDER_SRV
    entities:
      - name: OrderSet
        key_field: OrderID
"#;

pub fn connection(server: &MockServer, retry_attempts: u32) -> ConnectionConfig {
    let address = server.address();
    ConnectionConfig::builder(address.ip().to_string(), "user", "secret")
        .port(address.port())
        .use_https(false)
        .retry_attempts(retry_attempts)
        .timeout(Duration::from_secs(5))
        .backoff_unit(Duration::from_millis(1))
        .build()
        .expect("valid connection config")
}

pub fn services() -> ServicesConfig {
    ServicesConfig::from_yaml_str(SERVICES_YAML).expect("valid services yaml")
}

pub fn client_with(config: ConnectionConfig) -> SapClient {
    SapClient::from_config(Arc::new(config), &services()).expect("client")
}

pub fn client(server: &MockServer, retry_attempts: u32) -> SapClient {
    client_with(connection(server, retry_attempts))
}

/// Full OData URL of an entity set path below the gateway
pub fn odata_url(server: &MockServer, rest: &str) -> String {
    format!("{}/sap/opu/odata{}", server.uri(), rest)
}

/// Step 1 request: `X-CSRF-Token: Fetch` with Basic credentials
pub fn csrf_fetch_request() -> MockBuilder {
    Mock::given(method("GET"))
        .and(path(CSRF_PATH))
        .and(header("x-csrf-token", "Fetch"))
        .and(header("authorization", BASIC_AUTH))
        .and(query_param("sap-client", "100"))
}

/// Token fetch response carrying the token and a session cookie
pub fn csrf_response() -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("x-csrf-token", CSRF_TOKEN)
        .insert_header("set-cookie", format!("{}; path=/; HttpOnly", SESSION_COOKIE))
}

/// Step 1: token fetch answered with a token and a session cookie
pub fn csrf_fetch() -> Mock {
    csrf_fetch_request().respond_with(csrf_response())
}

/// Step 2: session validation with the fetched token and cookie
pub fn session_validation(status: u16) -> Mock {
    Mock::given(method("GET"))
        .and(path(VALIDATION_PATH))
        .and(header("x-csrf-token", CSRF_TOKEN))
        .and(header("cookie", SESSION_COOKIE))
        .respond_with(ResponseTemplate::new(status).set_body_string("<edmx:Edmx/>"))
}

/// Mount a handshake that succeeds `times` times
pub async fn mount_handshake(server: &MockServer, times: u64) {
    csrf_fetch().expect(times).mount(server).await;
    session_validation(200).expect(times).mount(server).await;
}
