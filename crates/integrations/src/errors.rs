use thiserror::Error;

use treejar_cache::CacheError;
use treejar_core::ApplicationError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("token refresh failed for {provider}: {message}")]
    RefreshFailed { provider: String, message: String },
    #[error("malformed token grant for {provider}: {message}")]
    MalformedGrant { provider: String, message: String },
    #[error("token refresh lock timeout")]
    LockTimeout { provider: String },
    #[error("{provider} rejected credentials after {attempts} attempts")]
    Rejected { provider: String, attempts: u32 },
    #[error("no token source registered for `{0}`")]
    UnknownProvider(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportFailure {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("network failure: {0}")]
    Network(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IntegrationError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("rate limited by {provider} after {attempts} attempts")]
    RateLimited { provider: String, attempts: u32 },
    #[error("transport failure calling {provider} after {attempts} attempts: {source}")]
    Transport {
        provider: String,
        attempts: u32,
        #[source]
        source: TransportFailure,
    },
    #[error("{provider} rejected request with status {status}: {body}")]
    Request { provider: String, status: u16, body: String },
    #[error("unexpected response from {provider}: {message}")]
    UnexpectedResponse { provider: String, message: String },
}

impl IntegrationError {
    /// Stable class name used in logs and retry bookkeeping.
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transport { .. } => "transport",
            Self::Request { .. } => "request",
            Self::UnexpectedResponse { .. } => "unexpected_response",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::Auth(AuthError::Rejected { .. }) => Some(401),
            _ => None,
        }
    }
}

impl From<IntegrationError> for ApplicationError {
    fn from(value: IntegrationError) -> Self {
        Self::Integration(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum DebounceError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("buffered event could not be encoded: {0}")]
    Serialization(String),
    #[error("batch handler failed for {group_key} after {attempts} attempts: {message}")]
    HandlerExhausted { group_key: String, attempts: u32, message: String },
}

impl From<DebounceError> for ApplicationError {
    fn from(value: DebounceError) -> Self {
        match value {
            DebounceError::Cache(error) => Self::Cache(error.to_string()),
            other => Self::Integration(other.to_string()),
        }
    }
}
