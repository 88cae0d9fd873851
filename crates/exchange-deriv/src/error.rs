//! Error types for the Deriv API client.

use deriv_bot_core::AccountType;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Error codes after which retrying the same credential is pointless.
const PERMANENT_CREDENTIAL_CODES: &[&str] = &[
    "InvalidToken",
    "TokenExpired",
    "AccountDisabled",
    "DisabledClient",
];

/// Error envelope returned by the broker: `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Classifies a failed authorization.
    #[must_use]
    pub fn auth_kind(&self) -> AuthErrorKind {
        if PERMANENT_CREDENTIAL_CODES.contains(&self.code.as_str()) {
            AuthErrorKind::Permanent
        } else {
            AuthErrorKind::Transient
        }
    }

    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        self.code == "RateLimit"
    }

    /// The session lost its authorization and must authorize again.
    #[must_use]
    pub fn requires_authorization(&self) -> bool {
        self.code == "AuthorizationRequired"
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Whether an authorization failure may succeed on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Bad or revoked credential. Never retried.
    Permanent,
    /// Timeouts and server-side hiccups. Retried with backoff.
    Transient,
}

/// Errors that can occur when talking to Deriv.
#[derive(Debug, Error)]
pub enum DerivError {
    /// Failed to establish the WebSocket connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket protocol error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON encoding or decoding error.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Error envelope returned by the API.
    #[error("API error {0}")]
    Api(ApiError),

    /// Endpoint URL could not be used.
    #[error("invalid endpoint url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// No token configured for the requested account.
    #[error("no credential configured for {0} account")]
    MissingCredential(AccountType),

    /// Broker host did not answer the reachability probe.
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    /// Request attempted before the session was authorized.
    #[error("client not ready")]
    NotReady,

    /// Reconnection budget used up.
    #[error("max reconnection attempts exceeded ({0})")]
    MaxReconnectsExceeded(u32),
}

impl DerivError {
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the failure is worth retrying later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed(_)
            | Self::WebSocket(_)
            | Self::NetworkUnreachable(_)
            | Self::NotReady => true,
            Self::Api(api) => api.auth_kind() == AuthErrorKind::Transient,
            Self::Parse(_)
            | Self::InvalidUrl { .. }
            | Self::MissingCredential(_)
            | Self::MaxReconnectsExceeded(_) => false,
        }
    }
}

impl From<ApiError> for DerivError {
    fn from(err: ApiError) -> Self {
        Self::Api(err)
    }
}
