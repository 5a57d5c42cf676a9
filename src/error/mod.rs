//! Identity Error Types
//!
//! Error hierarchy for device attestation and installation identity
//! operations.
//!
//! Every error type is `Clone`: a coalesced refresh delivers one outcome to
//! every waiting caller, so failures must be fan-out-able.

use std::time::Duration;
use thiserror::Error;

/// Root error type for identity operations.
#[derive(Error, Debug, Clone)]
pub enum IdentityError {
    #[error("Configuration error: {0}")]
    NotConfigured(#[from] NotConfiguredError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Attestation error: {0}")]
    Attestation(#[from] AttestationError),

    #[error("Attestation rejected by server: {message}")]
    InvalidAttestation { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl IdentityError {
    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotConfigured(_) => "IDENTITY_CONFIG",
            Self::Network(_) => "IDENTITY_NETWORK",
            Self::Attestation(_) => "IDENTITY_ATTESTATION",
            Self::InvalidAttestation { .. } => "IDENTITY_ATTESTATION_REJECTED",
            Self::Storage(_) => "IDENTITY_STORAGE",
            Self::Protocol(_) => "IDENTITY_PROTOCOL",
        }
    }

    /// Check if the operation may be retried with backoff.
    ///
    /// Configuration and validation failures are final for the attempt;
    /// only transport-level trouble is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Get retry-after duration if the server provided one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Network(NetworkError::RateLimited { retry_after }) => {
                Some(Duration::from_secs(*retry_after as u64))
            }
            _ => None,
        }
    }
}

/// Missing or invalid required configuration.
#[derive(Error, Debug, Clone)]
pub enum NotConfiguredError {
    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid endpoint URL: {url}")]
    InvalidEndpoint { url: String },
}

/// Network/transport error.
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Rate limited, retry after {retry_after} seconds")]
    RateLimited { retry_after: u32 },

    #[error("Service unavailable (HTTP {status})")]
    ServiceUnavailable { status: u16 },
}

impl NetworkError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        true
    }
}

/// Attestation flow error, tagged with the step that failed.
#[derive(Error, Debug, Clone)]
pub enum AttestationError {
    #[error("Challenge request failed: {message}")]
    Challenge { message: String },

    #[error("Platform attestation failed: {message}")]
    PlatformAttestation { message: String },

    #[error("Server validation failed: {message}")]
    ServerValidation { message: String },
}

/// Persistence error.
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("Read failed: {message}")]
    ReadFailed { message: String },

    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    #[error("Delete failed: {message}")]
    DeleteFailed { message: String },

    #[error("Corrupted data: {message}")]
    CorruptedData { message: String },
}

/// Response parsing error.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Unexpected redirect to: {location}")]
    UnexpectedRedirect { location: String },

    #[error("Response too large: {size} bytes")]
    ResponseTooLarge { size: usize },

    #[error("Invalid JSON: {message}")]
    InvalidJson { message: String },
}

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Error response body from the backend.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BackendErrorResponse {
    pub error: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Parse a backend error body, if it is one.
pub fn parse_error_response(body: &str) -> Option<BackendErrorResponse> {
    serde_json::from_str(body).ok()
}

fn status_message(status: u16, body: &str) -> String {
    parse_error_response(body)
        .and_then(|r| r.message.or(Some(r.error)))
        .unwrap_or_else(|| format!("HTTP {}", status))
}

/// Map a non-success HTTP response from a token-issuing endpoint to an error.
///
/// 4xx on an exchange means the server examined and rejected the attestation
/// material; 429 and 5xx are transient.
pub fn create_error_from_response(status: u16, body: &str) -> IdentityError {
    match status {
        400 | 401 | 403 | 404 => IdentityError::InvalidAttestation {
            message: status_message(status, body),
        },
        429 => IdentityError::Network(NetworkError::RateLimited { retry_after: 60 }),
        500..=599 => IdentityError::Network(NetworkError::ServiceUnavailable { status }),
        _ => IdentityError::Protocol(ProtocolError::InvalidResponse {
            message: status_message(status, body),
        }),
    }
}
