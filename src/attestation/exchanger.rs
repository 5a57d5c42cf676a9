//! Attestation Exchanger
//!
//! Drives the one-time attestation protocol: fetch a challenge, attest a
//! hardware key over it, and trade the attestation for a long-lived
//! artifact plus an initial token. The exchanger performs no retries and
//! persists nothing; retry policy and persistence belong to the lifecycle
//! manager.

use std::sync::Arc;
use tracing::debug;

use crate::attestation::{client_data_hash, PlatformAttestor};
use crate::core::BackendClient;
use crate::error::{AttestationError, IdentityError, IdentityResult};
use crate::types::{AttestationArtifact, TokenResponse};

/// Exchange protocol state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeState {
    /// Requesting a random challenge from the backend.
    AwaitingChallenge,
    /// Handing the challenge hash to the platform primitive.
    AwaitingPlatformAttestation,
    /// Submitting the attestation for server validation.
    AwaitingServerValidation,
    /// Artifact and initial token obtained.
    Success,
    /// A step failed; the originating error kind was surfaced to the caller.
    Failed,
}

/// Result of a successful exchange.
#[derive(Debug)]
pub struct AttestationExchange {
    /// Long-lived artifact to reuse for subsequent refreshes.
    pub artifact: AttestationArtifact,
    /// Initial token issued alongside the artifact.
    pub token: TokenResponse,
}

/// One-shot attestation exchange state machine.
pub struct AttestationExchanger<B: BackendClient, P: PlatformAttestor> {
    backend: Arc<B>,
    attestor: Arc<P>,
    state: ExchangeState,
}

impl<B: BackendClient, P: PlatformAttestor> AttestationExchanger<B, P> {
    /// Create a new exchanger.
    pub fn new(backend: Arc<B>, attestor: Arc<P>) -> Self {
        Self {
            backend,
            attestor,
            state: ExchangeState::AwaitingChallenge,
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Drive the exchange to a terminal state.
    ///
    /// Failure at any step preserves the step's error kind; network-class
    /// errors and server attestation rejections pass through unchanged so
    /// callers keep their retryability classification.
    pub async fn run(&mut self) -> IdentityResult<AttestationExchange> {
        if self.state != ExchangeState::AwaitingChallenge {
            return Err(AttestationError::Challenge {
                message: "exchange already driven to a terminal state".to_string(),
            }
            .into());
        }

        let challenge = match self.backend.get_random_challenge().await {
            Ok(challenge) => challenge,
            Err(error) => {
                self.state = ExchangeState::Failed;
                return Err(Self::challenge_error(error));
            }
        };
        debug!(challenge_len = challenge.len(), "attestation challenge received");

        self.state = ExchangeState::AwaitingPlatformAttestation;
        let hash = client_data_hash(&challenge);
        let attestation = match self.attestor.attest(&hash).await {
            Ok(attestation) => attestation,
            Err(failure) => {
                self.state = ExchangeState::Failed;
                return Err(AttestationError::PlatformAttestation {
                    message: failure.to_string(),
                }
                .into());
            }
        };

        self.state = ExchangeState::AwaitingServerValidation;
        match self
            .backend
            .exchange_attestation(&attestation.blob, &attestation.key_id, &challenge)
            .await
        {
            Ok((artifact, token)) => {
                self.state = ExchangeState::Success;
                debug!(key_id = %artifact.key_id(), "attestation exchange succeeded");
                Ok(AttestationExchange { artifact, token })
            }
            Err(error) => {
                self.state = ExchangeState::Failed;
                Err(Self::validation_error(error))
            }
        }
    }

    fn challenge_error(error: IdentityError) -> IdentityError {
        match error {
            error @ IdentityError::Network(_) => error,
            other => AttestationError::Challenge {
                message: other.to_string(),
            }
            .into(),
        }
    }

    fn validation_error(error: IdentityError) -> IdentityError {
        match error {
            error @ IdentityError::Network(_) => error,
            error @ IdentityError::InvalidAttestation { .. } => error,
            other => AttestationError::ServerValidation {
                message: other.to_string(),
            }
            .into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::{MockPlatformAttestor, PlatformAttestationFailure};
    use crate::core::MockBackendClient;
    use crate::error::{NetworkError, ProtocolError};
    use std::time::Duration;

    fn exchanger(
        backend: Arc<MockBackendClient>,
        attestor: Arc<MockPlatformAttestor>,
    ) -> AttestationExchanger<MockBackendClient, MockPlatformAttestor> {
        AttestationExchanger::new(backend, attestor)
    }

    #[tokio::test]
    async fn test_successful_exchange() {
        let backend = Arc::new(MockBackendClient::new());
        let attestor = Arc::new(MockPlatformAttestor::new());
        attestor.set_key_id("key-1");
        backend.set_challenge(b"challenge-1".to_vec());

        let mut exchanger = exchanger(backend.clone(), attestor.clone());
        let exchange = exchanger.run().await.unwrap();

        assert_eq!(exchanger.state(), ExchangeState::Success);
        assert_eq!(exchange.artifact.key_id(), "key-1");
        assert!(!exchange.token.token.is_empty());
        assert_eq!(backend.challenge_calls(), 1);
        assert_eq!(backend.exchange_calls(), 1);

        // The platform attested the hash of the server challenge.
        let attested = attestor.attest_history();
        assert_eq!(attested, vec![client_data_hash(b"challenge-1")]);
    }

    #[tokio::test]
    async fn test_challenge_failure_keeps_step_kind() {
        let backend = Arc::new(MockBackendClient::new());
        backend.set_next_challenge_error(
            ProtocolError::MissingField {
                field: "challenge".to_string(),
            }
            .into(),
        );
        let attestor = Arc::new(MockPlatformAttestor::new());

        let mut exchanger = exchanger(backend.clone(), attestor);
        let result = exchanger.run().await;

        assert_eq!(exchanger.state(), ExchangeState::Failed);
        match result {
            Err(IdentityError::Attestation(AttestationError::Challenge { .. })) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(backend.exchange_calls(), 0);
    }

    #[tokio::test]
    async fn test_network_error_passes_through() {
        let backend = Arc::new(MockBackendClient::new());
        backend.set_next_challenge_error(IdentityError::Network(NetworkError::Timeout {
            timeout: Duration::from_secs(30),
        }));
        let attestor = Arc::new(MockPlatformAttestor::new());

        let mut exchanger = exchanger(backend, attestor);
        let error = exchanger.run().await.unwrap_err();
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn test_platform_failure_maps_to_platform_kind() {
        let backend = Arc::new(MockBackendClient::new());
        let attestor = Arc::new(MockPlatformAttestor::new());
        attestor.set_next_attest_failure(PlatformAttestationFailure::new("no secure hardware"));

        let mut exchanger = exchanger(backend.clone(), attestor);
        let result = exchanger.run().await;

        assert_eq!(exchanger.state(), ExchangeState::Failed);
        match result {
            Err(IdentityError::Attestation(AttestationError::PlatformAttestation {
                message,
            })) => {
                assert!(message.contains("no secure hardware"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // No partial artifact: the server validation step never ran.
        assert_eq!(backend.exchange_calls(), 0);
    }

    #[tokio::test]
    async fn test_server_rejection_passes_through() {
        let backend = Arc::new(MockBackendClient::new());
        backend.set_next_exchange_error(IdentityError::InvalidAttestation {
            message: "statement rejected".to_string(),
        });
        let attestor = Arc::new(MockPlatformAttestor::new());

        let mut exchanger = exchanger(backend, attestor);
        let result = exchanger.run().await;

        assert_eq!(exchanger.state(), ExchangeState::Failed);
        match result {
            Err(IdentityError::InvalidAttestation { message }) => {
                assert_eq!(message, "statement rejected");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_validation_failure_maps_to_validation_kind() {
        let backend = Arc::new(MockBackendClient::new());
        backend.set_next_exchange_error(
            ProtocolError::InvalidJson {
                message: "truncated".to_string(),
            }
            .into(),
        );
        let attestor = Arc::new(MockPlatformAttestor::new());

        let mut exchanger = exchanger(backend, attestor);
        match exchanger.run().await {
            Err(IdentityError::Attestation(AttestationError::ServerValidation { .. })) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exchange_is_one_shot() {
        let backend = Arc::new(MockBackendClient::new());
        let attestor = Arc::new(MockPlatformAttestor::new());

        let mut exchanger = exchanger(backend, attestor);
        exchanger.run().await.unwrap();
        assert!(exchanger.run().await.is_err());
    }
}
