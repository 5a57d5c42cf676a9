//! Credential Types
//!
//! Installation credential and token wire types.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::{IdentityError, ProtocolError};

/// Where a credential was obtained from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialOrigin {
    /// Returned from the local cache without a network call.
    Cached,
    /// Just issued by the backend.
    FreshFromServer,
}

/// Token response from the backend.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    /// Opaque bearer token.
    pub token: String,
    /// Validity window in seconds.
    pub ttl_seconds: u64,
}

/// An issued installation credential.
///
/// Immutable once constructed: a refresh produces a new `Credential`, it
/// never mutates an existing one. `expires_at` is always after `issued_at`.
#[derive(Clone)]
pub struct Credential {
    identifier: String,
    token: SecretString,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    origin: CredentialOrigin,
}

impl Credential {
    /// Build a fresh credential from a backend token response.
    pub fn from_response(
        identifier: impl Into<String>,
        response: &TokenResponse,
    ) -> Result<Self, IdentityError> {
        if response.token.is_empty() {
            return Err(ProtocolError::MissingField {
                field: "token".to_string(),
            }
            .into());
        }
        let issued_at = Utc::now();
        let ttl = i64::try_from(response.ttl_seconds)
            .ok()
            .filter(|secs| *secs > 0)
            .and_then(Duration::try_seconds)
            .ok_or_else(|| ProtocolError::InvalidResponse {
                message: format!("invalid token ttl: {}", response.ttl_seconds),
            })?;
        let expires_at =
            issued_at
                .checked_add_signed(ttl)
                .ok_or_else(|| ProtocolError::InvalidResponse {
                    message: format!("token ttl out of range: {}", response.ttl_seconds),
                })?;

        Ok(Self {
            identifier: identifier.into(),
            token: SecretString::new(response.token.clone()),
            issued_at,
            expires_at,
            origin: CredentialOrigin::FreshFromServer,
        })
    }

    /// Rehydrate a previously persisted credential.
    pub fn from_parts(
        identifier: String,
        token: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, IdentityError> {
        if expires_at <= issued_at {
            return Err(ProtocolError::InvalidResponse {
                message: "credential expires before it was issued".to_string(),
            }
            .into());
        }
        Ok(Self {
            identifier,
            token: SecretString::new(token),
            issued_at,
            expires_at,
            origin: CredentialOrigin::Cached,
        })
    }

    /// The installation identifier this credential belongs to.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The bearer token value.
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }

    /// Format as Authorization header value.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }

    /// Issuance timestamp.
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Expiry timestamp.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Where this credential came from.
    pub fn origin(&self) -> CredentialOrigin {
        self.origin
    }

    /// Check if the credential expires within the given tolerance window.
    ///
    /// A credential nearing expiry is treated as expired so it cannot lapse
    /// mid-use.
    pub fn is_expiring_within(&self, tolerance: std::time::Duration) -> bool {
        match Duration::from_std(tolerance) {
            Ok(tolerance) => match Utc::now().checked_add_signed(tolerance) {
                Some(cutoff) => self.expires_at <= cutoff,
                None => true,
            },
            Err(_) => true,
        }
    }

    /// Check if the credential is past its expiry.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Remaining lifetime in seconds, zero if already expired.
    pub fn remaining_lifetime(&self) -> i64 {
        let now = Utc::now();
        if self.expires_at > now {
            (self.expires_at - now).num_seconds()
        } else {
            0
        }
    }

    /// Copy of this credential marked as served from the local cache.
    pub fn as_cached(&self) -> Self {
        Self {
            origin: CredentialOrigin::Cached,
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("identifier", &self.identifier)
            .field("token", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("origin", &self.origin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(ttl_seconds: u64) -> TokenResponse {
        TokenResponse {
            token: "test-token".to_string(),
            ttl_seconds,
        }
    }

    #[test]
    fn test_from_response() {
        let credential = Credential::from_response("fid-1", &response(3600)).unwrap();
        assert_eq!(credential.identifier(), "fid-1");
        assert_eq!(credential.token(), "test-token");
        assert_eq!(credential.origin(), CredentialOrigin::FreshFromServer);
        assert!(credential.expires_at() > credential.issued_at());
        assert!(!credential.is_expired());
    }

    #[test]
    fn test_from_response_rejects_zero_ttl() {
        assert!(Credential::from_response("fid-1", &response(0)).is_err());
    }

    #[test]
    fn test_from_response_rejects_empty_token() {
        let response = TokenResponse {
            token: String::new(),
            ttl_seconds: 3600,
        };
        assert!(Credential::from_response("fid-1", &response).is_err());
    }

    #[test]
    fn test_from_parts_enforces_ordering() {
        let now = Utc::now();
        let result = Credential::from_parts(
            "fid-1".to_string(),
            "t".to_string(),
            now,
            now - Duration::seconds(10),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_tolerance_window() {
        let credential = Credential::from_response("fid-1", &response(600)).unwrap();
        // Expires in 10 minutes; a 5 minute tolerance leaves it valid.
        assert!(!credential.is_expiring_within(std::time::Duration::from_secs(300)));
        // A 15 minute tolerance swallows the remaining lifetime.
        assert!(credential.is_expiring_within(std::time::Duration::from_secs(900)));
    }

    #[test]
    fn test_as_cached_preserves_window() {
        let credential = Credential::from_response("fid-1", &response(3600)).unwrap();
        let cached = credential.as_cached();
        assert_eq!(cached.origin(), CredentialOrigin::Cached);
        assert_eq!(cached.expires_at(), credential.expires_at());
        assert_eq!(cached.token(), credential.token());
    }

    #[test]
    fn test_debug_redacts_token() {
        let credential = Credential::from_response("fid-1", &response(3600)).unwrap();
        let rendered = format!("{credential:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("test-token"));
    }

    #[test]
    fn test_token_response_parsing() {
        let json = r#"{"token":"abc","ttl_seconds":3600}"#;
        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.token, "abc");
        assert_eq!(response.ttl_seconds, 3600);
    }
}
