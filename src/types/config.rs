//! Configuration Types
//!
//! Per-application identity configuration.

use secrecy::SecretString;
use std::time::Duration;

/// Configuration for one application identity.
///
/// An installation is unique per application name and app ID; each
/// configured application gets its own handle and its own cached state.
#[derive(Clone)]
pub struct IdentityConfig {
    /// Application name, used as the registry key and in change events.
    pub app_name: String,
    /// Backend project identifier.
    pub project_id: String,
    /// Application identifier within the project.
    pub app_id: String,
    /// API key sent with backend requests.
    pub api_key: Option<SecretString>,
    /// Base URL of the identity service.
    pub api_base_url: String,
    /// HTTP timeout.
    pub timeout: Duration,
    /// Treat a token expiring within this window as already expired.
    pub token_expiration_tolerance: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            app_name: String::new(),
            project_id: String::new(),
            app_id: String::new(),
            api_key: None,
            api_base_url: String::new(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            token_expiration_tolerance: Duration::from_secs(DEFAULT_TOKEN_TOLERANCE_SECS),
        }
    }
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("app_name", &self.app_name)
            .field("project_id", &self.project_id)
            .field("app_id", &self.app_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base_url", &self.api_base_url)
            .field("timeout", &self.timeout)
            .field(
                "token_expiration_tolerance",
                &self.token_expiration_tolerance,
            )
            .finish()
    }
}

/// Default configuration values.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_TOKEN_TOLERANCE_SECS: u64 = 300;
