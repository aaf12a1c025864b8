//! SAP Gateway authentication module
//!
//! Implements the two-step CSRF handshake (token fetch, then session
//! validation) and caches the resulting session for reuse by the client.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE,
};
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{ConnectionConfig, ServicesConfig};
use crate::error::{Result, SapError};

pub const CSRF_HEADER: &str = "x-csrf-token";

/// Session credentials produced by a successful handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub csrf_token: String,
    pub cookies: BTreeMap<String, String>,
    pub expires_at: DateTime<Utc>,
    pub session_id: Option<String>,
}

impl AuthToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        !self.csrf_token.is_empty() && !self.is_expired()
    }

    /// All captured cookies as a single `Cookie` header value
    pub fn cookie_header(&self) -> Option<String> {
        cookie_header(&self.cookies)
    }
}

#[derive(Debug, Default)]
struct TokenState {
    token: Option<AuthToken>,
    last_failure: Option<SapError>,
}

/// CSRF/session authenticator for one SAP Gateway
///
/// At most one handshake runs at a time. Callers that queue up behind a
/// running handshake get its outcome instead of starting their own.
#[derive(Debug)]
pub struct SapAuthenticator {
    config: Arc<ConnectionConfig>,
    csrf_url: String,
    validation_url: String,
    http_client: Client,
    state: Mutex<TokenState>,
    /// Number of finished handshakes, bumped while `state` is held
    generation: AtomicU64,
}

impl SapAuthenticator {
    /// Create an authenticator using explicit handshake paths
    ///
    /// # Arguments
    /// * `config` - Connection settings
    /// * `csrf_path` - Path of the `X-CSRF-Token: Fetch` request
    /// * `validation_path` - Path used to validate the primed session
    pub fn new(
        config: Arc<ConnectionConfig>,
        csrf_path: &str,
        validation_path: &str,
    ) -> Result<Self> {
        let base_url = config.base_url();
        let http_client = build_http_client(&config)?;

        Ok(Self {
            csrf_url: format!("{}{}", base_url, csrf_path),
            validation_url: format!("{}{}", base_url, validation_path),
            config,
            http_client,
            state: Mutex::new(TokenState::default()),
            generation: AtomicU64::new(0),
        })
    }

    /// Create an authenticator using the endpoints configured in the service catalog
    pub fn from_catalog(config: Arc<ConnectionConfig>, services: &ServicesConfig) -> Result<Self> {
        let endpoint = &services.gateway.auth_endpoint;
        Self::new(
            config,
            &endpoint.csrf_path(services),
            &endpoint.auth_validation_path(),
        )
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Return the cached token, or run the handshake and cache its result.
    pub async fn get_valid_token(&self) -> Result<AuthToken> {
        let observed = self.generation.load(Ordering::Acquire);
        let mut state = self.state.lock().await;

        if let Some(token) = state.token.as_ref().filter(|t| t.is_valid()) {
            tracing::debug!("Using cached SAP session");
            return Ok(token.clone());
        }

        // A handshake finished while we were waiting on the lock: share its failure.
        if self.generation.load(Ordering::Acquire) != observed {
            if let Some(err) = &state.last_failure {
                return Err(err.clone());
            }
        }

        tracing::info!("Authenticating with SAP Gateway...");
        state.token = None;
        let result = self.authenticate().await;

        match &result {
            Ok(token) => {
                state.token = Some(token.clone());
                state.last_failure = None;
            }
            Err(e) => {
                tracing::error!("SAP handshake failed: {}", e);
                state.last_failure = Some(e.clone());
            }
        }
        self.generation.fetch_add(1, Ordering::AcqRel);

        result
    }

    /// Drop the cached token; the next `get_valid_token` performs a fresh handshake.
    pub async fn invalidate_token(&self) {
        let mut state = self.state.lock().await;
        state.token = None;
        tracing::info!("Authentication token invalidated");
    }

    /// Whether a valid token is cached right now (false while a handshake is running)
    pub fn has_valid_token(&self) -> bool {
        self.state
            .try_lock()
            .map(|state| state.token.as_ref().map_or(false, AuthToken::is_valid))
            .unwrap_or(false)
    }

    /// Number of handshakes completed so far, successful or not
    pub fn handshake_count(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    async fn authenticate(&self) -> Result<AuthToken> {
        let (csrf_token, cookies) = self.fetch_csrf_token().await?;
        self.validate_session(&csrf_token, &cookies).await?;

        let lifetime = chrono::Duration::from_std(self.config.session_lifetime())
            .unwrap_or_else(|_| chrono::Duration::minutes(30));

        Ok(AuthToken {
            session_id: session_id_from(&cookies),
            csrf_token,
            cookies,
            expires_at: Utc::now() + lifetime,
        })
    }

    async fn fetch_csrf_token(&self) -> Result<(String, BTreeMap<String, String>)> {
        tracing::info!(
            "Getting CSRF token from: {}?sap-client={}",
            self.csrf_url,
            self.config.client()
        );

        let response = self
            .http_client
            .get(&self.csrf_url)
            .query(&[("sap-client", self.config.client())])
            .header(CSRF_HEADER, "Fetch")
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, self.basic_auth_header())
            .send()
            .await
            .map_err(|e| handshake_error("while getting CSRF token", &e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(SapError::authentication_status(
                format!("Failed to get CSRF token: {} - {}", status.as_u16(), body),
                status.as_u16(),
            ));
        }

        let csrf_token = response
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(String::from)
            .ok_or_else(|| SapError::authentication("No CSRF token in response"))?;

        let cookies = collect_cookies(response.headers());
        tracing::info!("CSRF token obtained ({} cookies)", cookies.len());

        Ok((csrf_token, cookies))
    }

    async fn validate_session(
        &self,
        csrf_token: &str,
        cookies: &BTreeMap<String, String>,
    ) -> Result<()> {
        tracing::info!(
            "Validating authentication with: {}?sap-client={}",
            self.validation_url,
            self.config.client()
        );

        let mut request = self
            .http_client
            .get(&self.validation_url)
            .query(&[("sap-client", self.config.client())])
            .header(CSRF_HEADER, csrf_token)
            .header(ACCEPT, "application/xml")
            .header(AUTHORIZATION, self.basic_auth_header());

        if let Some(cookie) = cookie_header(cookies) {
            request = request.header(COOKIE, cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|e| handshake_error("during authentication", &e))?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                tracing::info!(
                    "Authentication successful for user: {}",
                    self.config.username()
                );
                Ok(())
            }
            StatusCode::UNAUTHORIZED => {
                let body = response.text().await.unwrap_or_default();
                Err(SapError::authentication_status(
                    format!(
                        "Invalid credentials for user {}: {}",
                        self.config.username(),
                        body
                    ),
                    401,
                ))
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(SapError::authentication_status(
                    format!("Authentication failed: {} - {}", status.as_u16(), body),
                    status.as_u16(),
                ))
            }
        }
    }

    fn basic_auth_header(&self) -> String {
        basic_auth(self.config.username(), self.config.password())
    }

    /// Headers for an authenticated OData call. Pure; no I/O.
    pub fn get_auth_headers(&self, token: &AuthToken) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(CSRF_HEADER),
            header_value(&token.csrf_token)?,
        );
        headers.insert(AUTHORIZATION, header_value(&self.basic_auth_header())?);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

/// reqwest client honouring the configured timeout and TLS verification
pub(crate) fn build_http_client(config: &ConnectionConfig) -> Result<Client> {
    let mut builder = Client::builder().timeout(config.timeout());

    if !config.verify_tls() {
        tracing::warn!("SSL certificate verification is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| SapError::Connection(format!("Failed to build HTTP client: {}", e)))
}

/// `Basic base64(user:pass)`
pub fn basic_auth(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        BASE64.encode(format!("{}:{}", username, password))
    )
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| SapError::Validation(format!("Invalid header value: {}", e)))
}

fn handshake_error(context: &str, err: &reqwest::Error) -> SapError {
    if err.is_timeout() {
        SapError::Connection(format!("Timeout {}", context))
    } else {
        SapError::Connection(format!("Connection error {}: {}", context, err))
    }
}

fn collect_cookies(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(parse_set_cookie)
        .collect()
}

/// `name=value` part of a `Set-Cookie` header
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

pub(crate) fn cookie_header(cookies: &BTreeMap<String, String>) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

fn session_id_from(cookies: &BTreeMap<String, String>) -> Option<String> {
    cookies
        .iter()
        .find(|(name, _)| name.starts_with("SAP_SESSIONID") || name.as_str() == "MYSAPSSO2")
        .map(|(_, value)| value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(csrf: &str, expires_in: Duration) -> AuthToken {
        AuthToken {
            csrf_token: csrf.to_string(),
            cookies: BTreeMap::new(),
            expires_at: Utc::now() + expires_in,
            session_id: None,
        }
    }

    fn authenticator() -> SapAuthenticator {
        let config = ConnectionConfig::builder("sap.example.com", "user", "pass")
            .build()
            .unwrap();
        SapAuthenticator::new(Arc::new(config), "/csrf", "/validate").unwrap()
    }

    #[test]
    fn test_token_validity() {
        assert!(token("abc", Duration::minutes(30)).is_valid());
        assert!(!token("abc", Duration::seconds(-1)).is_valid());
        assert!(token("abc", Duration::seconds(-1)).is_expired());
        assert!(!token("", Duration::minutes(30)).is_valid());
    }

    #[test]
    fn test_handshake_urls() {
        let auth = authenticator();
        assert_eq!(auth.csrf_url, "https://sap.example.com:44300/csrf");
        assert_eq!(auth.validation_url, "https://sap.example.com:44300/validate");
    }

    #[test]
    fn test_basic_auth() {
        assert_eq!(basic_auth("user", "pass"), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_auth_headers() {
        let auth = authenticator();
        let headers = auth
            .get_auth_headers(&token("tok-1", Duration::minutes(5)))
            .unwrap();

        assert_eq!(headers["x-csrf-token"], "tok-1");
        assert_eq!(headers[AUTHORIZATION], "Basic dXNlcjpwYXNz");
        assert_eq!(headers[ACCEPT], "application/json");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_parse_set_cookie() {
        assert_eq!(
            parse_set_cookie("SAP_SESSIONID_ABC_100=xyz%3d; path=/; secure; HttpOnly"),
            Some(("SAP_SESSIONID_ABC_100".to_string(), "xyz%3d".to_string()))
        );
        assert_eq!(
            parse_set_cookie("sap-usercontext=sap-client=100; path=/"),
            Some(("sap-usercontext".to_string(), "sap-client=100".to_string()))
        );
        assert_eq!(parse_set_cookie("=novalue"), None);
        assert_eq!(parse_set_cookie("garbage"), None);
    }

    #[test]
    fn test_cookie_header_and_session_id() {
        let mut cookies = BTreeMap::new();
        assert_eq!(cookie_header(&cookies), None);

        cookies.insert("sap-usercontext".to_string(), "sap-client=100".to_string());
        cookies.insert("SAP_SESSIONID_X_100".to_string(), "s1".to_string());

        assert_eq!(
            cookie_header(&cookies).unwrap(),
            "SAP_SESSIONID_X_100=s1; sap-usercontext=sap-client=100"
        );
        assert_eq!(session_id_from(&cookies), Some("s1".to_string()));
    }

    #[tokio::test]
    async fn test_invalidate_without_token_is_noop() {
        let auth = authenticator();
        assert!(!auth.has_valid_token());
        auth.invalidate_token().await;
        assert!(!auth.has_valid_token());
        assert_eq!(auth.handshake_count(), 0);
    }
}
