//! Configuration Builder
//!
//! Fluent builder for identity configuration.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::error::{IdentityError, NotConfiguredError};
use crate::types::{IdentityConfig, DEFAULT_TIMEOUT_MS, DEFAULT_TOKEN_TOLERANCE_SECS};

/// Identity configuration builder.
#[derive(Default)]
pub struct IdentityConfigBuilder {
    app_name: Option<String>,
    project_id: Option<String>,
    app_id: Option<String>,
    api_key: Option<SecretString>,
    api_base_url: Option<String>,
    timeout: Option<Duration>,
    token_expiration_tolerance: Option<Duration>,
}

impl IdentityConfigBuilder {
    /// Create new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set application name.
    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    /// Set project ID.
    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Set app ID.
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Set API key.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(api_key.into()));
        self
    }

    /// Set identity service base URL.
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Set HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the expiry tolerance window.
    pub fn token_expiration_tolerance(mut self, tolerance: Duration) -> Self {
        self.token_expiration_tolerance = Some(tolerance);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<IdentityConfig, IdentityError> {
        let app_name = require(self.app_name, "app_name")?;
        let project_id = require(self.project_id, "project_id")?;
        let app_id = require(self.app_id, "app_id")?;
        let api_base_url = require(self.api_base_url, "api_base_url")?;

        let url = Url::parse(&api_base_url).map_err(|_| NotConfiguredError::InvalidEndpoint {
            url: api_base_url.clone(),
        })?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(NotConfiguredError::InvalidEndpoint { url: api_base_url }.into());
        }

        Ok(IdentityConfig {
            app_name,
            project_id,
            app_id,
            api_key: self.api_key,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            timeout: self
                .timeout
                .unwrap_or(Duration::from_millis(DEFAULT_TIMEOUT_MS)),
            token_expiration_tolerance: self
                .token_expiration_tolerance
                .unwrap_or(Duration::from_secs(DEFAULT_TOKEN_TOLERANCE_SECS)),
        })
    }
}

fn require(value: Option<String>, field: &str) -> Result<String, IdentityError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(NotConfiguredError::MissingRequired {
            field: field.to_string(),
        }
        .into()),
    }
}

/// Create a new identity configuration builder.
pub fn identity_config() -> IdentityConfigBuilder {
    IdentityConfigBuilder::new()
}
