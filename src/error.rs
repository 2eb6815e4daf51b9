//! Error types for the gateway.
//!
//! Every failure a request can hit is one of the variants below. Adapters turn
//! them into their own protocol's error envelope; the status code is shared.

use axum::http::StatusCode;
use thiserror::Error;

/// Why a credential check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    Missing,
    Invalid,
}

/// Backend-reported refusal categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    RateLimited,
    ContentPolicy,
    Quota,
    Unavailable,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Authentication failed: {message}")]
    Auth { failure: AuthFailure, message: String },

    #[error("Request contains no prompt text")]
    MissingPrompt,

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Model '{model}' is not supported")]
    UnsupportedModel { model: String },

    #[error("Backend did not respond within {secs}s")]
    BackendTimeout { secs: u64 },

    #[error("Backend rejected the request: {message}")]
    BackendRejected { kind: RejectionKind, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GatewayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn missing_credential(msg: impl Into<String>) -> Self {
        Self::Auth {
            failure: AuthFailure::Missing,
            message: msg.into(),
        }
    }

    pub fn invalid_credential(msg: impl Into<String>) -> Self {
        Self::Auth {
            failure: AuthFailure::Invalid,
            message: msg.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    pub fn rejected(kind: RejectionKind, msg: impl Into<String>) -> Self {
        Self::BackendRejected {
            kind,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
        }
    }

    /// HTTP status shared by every protocol surface.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth { .. } => StatusCode::UNAUTHORIZED,
            Self::MissingPrompt | Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::UnsupportedModel { .. } => StatusCode::NOT_FOUND,
            Self::BackendTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::BackendRejected { kind, .. } => match kind {
                RejectionKind::RateLimited | RejectionKind::Quota => StatusCode::TOO_MANY_REQUESTS,
                RejectionKind::ContentPolicy => StatusCode::BAD_REQUEST,
                RejectionKind::Unavailable => StatusCode::BAD_GATEWAY,
            },
            Self::Config { .. } | Self::Internal { .. } | Self::Toml(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to hand back to a client. Server-side failures are
    /// collapsed into a generic string.
    #[must_use]
    pub fn public_message(&self) -> String {
        if self.status().is_server_error() && !self.is_backend_failure() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }

    fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::BackendTimeout { .. } | Self::BackendRejected { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
