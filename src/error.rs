//! Error kinds shared by the authenticator and the gateway client

use thiserror::Error;

/// SAP Gateway errors
///
/// Variants only carry owned strings so one failed handshake can be handed to
/// every caller that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SapError {
    #[error("Authentication error: {message}")]
    Authentication {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request error: {message}")]
    Request {
        message: String,
        status_code: Option<u16>,
        url: Option<String>,
        method: Option<String>,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl SapError {
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            status_code: None,
        }
    }

    pub fn authentication_status(message: impl Into<String>, status_code: u16) -> Self {
        Self::Authentication {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// HTTP status code attached to the error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Authentication { status_code, .. } | Self::Request { status_code, .. } => {
                *status_code
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SapError>;
