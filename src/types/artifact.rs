//! Attestation Artifact Types
//!
//! Long-lived attestation material and the exchange wire types.

use serde::Deserialize;

use crate::error::{IdentityError, ProtocolError};
use crate::types::TokenResponse;

/// Long-lived secret material bound to one installation.
///
/// Produced once by the attestation exchange and reused for every
/// subsequent token refresh. Never re-derived unless the installation is
/// deleted and recreated.
#[derive(Clone, PartialEq, Eq)]
pub struct AttestationArtifact {
    key_id: String,
    artifact: Vec<u8>,
}

impl AttestationArtifact {
    /// Create an artifact from its parts.
    pub fn new(key_id: impl Into<String>, artifact: Vec<u8>) -> Self {
        Self {
            key_id: key_id.into(),
            artifact,
        }
    }

    /// Identifier of the attested key.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Opaque artifact bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.artifact
    }
}

impl std::fmt::Debug for AttestationArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationArtifact")
            .field("key_id", &self.key_id)
            .field("artifact", &format_args!("[{} bytes]", self.artifact.len()))
            .finish()
    }
}

/// Response to a successful attestation exchange.
#[derive(Clone, Debug, Deserialize)]
pub struct ExchangeResponse {
    /// Base64-encoded attestation artifact.
    pub artifact: String,
    /// Initial token issued alongside the artifact.
    pub token: TokenResponse,
}

impl ExchangeResponse {
    /// Decode the artifact blob.
    pub fn decode_artifact(&self, key_id: &str) -> Result<AttestationArtifact, IdentityError> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.artifact)
            .map_err(|e| ProtocolError::InvalidResponse {
                message: format!("invalid artifact encoding: {e}"),
            })?;
        if bytes.is_empty() {
            return Err(ProtocolError::MissingField {
                field: "artifact".to_string(),
            }
            .into());
        }
        Ok(AttestationArtifact::new(key_id, bytes))
    }
}
