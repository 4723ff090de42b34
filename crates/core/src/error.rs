//! Error types for the Caduceus domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; only provider and
//! transport failures ever escape a run.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Whether the same request may succeed if sent again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::AuthenticationFailed(_)
            | Self::ModelNotFound(_)
            | Self::NotConfigured(_)
            | Self::MalformedResponse(_) => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("Capability '{name}' is not registered. Available: {available}")]
    NotFound { name: String, available: String },

    #[error("Capability execution failed: {name} — {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Capability timed out: {name} after {timeout_secs}s")]
    Timeout { name: String, timeout_secs: u64 },

    #[error("Capability panicked: {0}")]
    Panicked(String),

    #[error("Invalid capability arguments: {0}")]
    InvalidArguments(String),

    #[error("Upstream lookup failed: {0}")]
    Upstream(String),
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Stream receiver disconnected")]
    Disconnected,

    #[error("Stream read failed: {0}")]
    Read(String),

    #[error("Stream ended without a terminal frame")]
    Truncated,
}
