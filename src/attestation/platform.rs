//! Platform Attestation Primitive
//!
//! Interface to the OS secure-hardware attestation facility. The primitive
//! is an external collaborator with its own failure taxonomy; callers map
//! its failures into the attestation error hierarchy.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Failure reported by the platform attestation primitive.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct PlatformAttestationFailure {
    /// Platform-specific failure description.
    pub message: String,
}

impl PlatformAttestationFailure {
    /// Create a failure from a platform-specific description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Raw attestation produced by the platform.
#[derive(Clone)]
pub struct PlatformAttestation {
    /// Identifier of the key the attestation is bound to.
    pub key_id: String,
    /// Opaque attestation statement.
    pub blob: Vec<u8>,
}

impl std::fmt::Debug for PlatformAttestation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformAttestation")
            .field("key_id", &self.key_id)
            .field("blob", &format_args!("[{} bytes]", self.blob.len()))
            .finish()
    }
}

/// Platform attestation interface (for dependency injection).
#[async_trait]
pub trait PlatformAttestor: Send + Sync {
    /// Attest a hardware-backed key over the given client data hash,
    /// producing the key identifier and raw attestation statement.
    async fn attest(
        &self,
        client_data_hash: &[u8],
    ) -> Result<PlatformAttestation, PlatformAttestationFailure>;

    /// Generate an assertion with a previously attested key.
    async fn generate_assertion(
        &self,
        key_id: &str,
        client_data_hash: &[u8],
    ) -> Result<Vec<u8>, PlatformAttestationFailure>;
}

/// Mock platform attestor for testing.
#[derive(Default)]
pub struct MockPlatformAttestor {
    key_id: Mutex<Option<String>>,
    next_attest_failure: Mutex<Option<PlatformAttestationFailure>>,
    next_assertion_failure: Mutex<Option<PlatformAttestationFailure>>,
    attest_history: Mutex<Vec<Vec<u8>>>,
    assertion_history: Mutex<Vec<(String, Vec<u8>)>>,
    attest_calls: AtomicUsize,
}

impl MockPlatformAttestor {
    /// Create new mock attestor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key identifier to attest with.
    pub fn set_key_id(&self, key_id: impl Into<String>) -> &Self {
        *self.key_id.lock().unwrap() = Some(key_id.into());
        self
    }

    /// Fail the next attestation.
    pub fn set_next_attest_failure(&self, failure: PlatformAttestationFailure) -> &Self {
        *self.next_attest_failure.lock().unwrap() = Some(failure);
        self
    }

    /// Fail the next assertion generation.
    pub fn set_next_assertion_failure(&self, failure: PlatformAttestationFailure) -> &Self {
        *self.next_assertion_failure.lock().unwrap() = Some(failure);
        self
    }

    /// Client data hashes attested so far.
    pub fn attest_history(&self) -> Vec<Vec<u8>> {
        self.attest_history.lock().unwrap().clone()
    }

    /// Key/hash pairs asserted so far.
    pub fn assertion_history(&self) -> Vec<(String, Vec<u8>)> {
        self.assertion_history.lock().unwrap().clone()
    }

    /// Number of attestations performed.
    pub fn attest_calls(&self) -> usize {
        self.attest_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformAttestor for MockPlatformAttestor {
    async fn attest(
        &self,
        client_data_hash: &[u8],
    ) -> Result<PlatformAttestation, PlatformAttestationFailure> {
        self.attest_calls.fetch_add(1, Ordering::SeqCst);
        self.attest_history
            .lock()
            .unwrap()
            .push(client_data_hash.to_vec());

        if let Some(failure) = self.next_attest_failure.lock().unwrap().take() {
            return Err(failure);
        }

        Ok(PlatformAttestation {
            key_id: self
                .key_id
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| "mock-key".to_string()),
            blob: b"mock-attestation".to_vec(),
        })
    }

    async fn generate_assertion(
        &self,
        key_id: &str,
        client_data_hash: &[u8],
    ) -> Result<Vec<u8>, PlatformAttestationFailure> {
        self.assertion_history
            .lock()
            .unwrap()
            .push((key_id.to_string(), client_data_hash.to_vec()));

        if let Some(failure) = self.next_assertion_failure.lock().unwrap().take() {
            return Err(failure);
        }

        Ok(b"mock-assertion".to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_attest_records_hash() {
        let attestor = MockPlatformAttestor::new();
        attestor.set_key_id("key-7");

        let attestation = attestor.attest(b"hash").await.unwrap();
        assert_eq!(attestation.key_id, "key-7");
        assert!(!attestation.blob.is_empty());

        assert_eq!(attestor.attest_calls(), 1);
        assert_eq!(attestor.attest_history(), vec![b"hash".to_vec()]);
    }

    #[tokio::test]
    async fn test_mock_failure_is_one_shot() {
        let attestor = MockPlatformAttestor::new();
        attestor.set_next_attest_failure(PlatformAttestationFailure::new("unsupported device"));

        assert!(attestor.attest(b"hash").await.is_err());
        assert!(attestor.attest(b"hash").await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_assertion_history() {
        let attestor = MockPlatformAttestor::new();
        attestor.generate_assertion("key-1", b"h1").await.unwrap();

        let history = attestor.assertion_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].0, "key-1");
    }

    #[test]
    fn test_debug_hides_blob() {
        let attestation = PlatformAttestation {
            key_id: "key-1".to_string(),
            blob: vec![0; 16],
        };
        let rendered = format!("{attestation:?}");
        assert!(rendered.contains("[16 bytes]"));
    }
}
