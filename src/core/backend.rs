//! Backend Client
//!
//! The remote operations behind credential issuance. Each call is a single
//! network round trip; caching and coalescing live entirely in the
//! lifecycle manager.

use async_trait::async_trait;
use base64::Engine;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::{HttpMethod, HttpRequest, HttpTransport};
use crate::error::{create_error_from_response, IdentityError, ProtocolError};
use crate::types::{AttestationArtifact, ExchangeResponse, IdentityConfig, TokenResponse};

/// Backend client interface.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Request a random challenge from the server.
    async fn get_random_challenge(&self) -> Result<Vec<u8>, IdentityError>;

    /// Submit attestation material for validation, receiving the long-lived
    /// artifact and an initial token.
    async fn exchange_attestation(
        &self,
        attestation: &[u8],
        key_id: &str,
        challenge: &[u8],
    ) -> Result<(AttestationArtifact, TokenResponse), IdentityError>;

    /// Exchange the stored artifact plus a fresh assertion for a new token.
    async fn refresh_token(
        &self,
        artifact: &AttestationArtifact,
        challenge: &[u8],
        assertion: &[u8],
    ) -> Result<TokenResponse, IdentityError>;

    /// Delete the installation on the server.
    async fn delete_installation(&self, identifier: &str) -> Result<(), IdentityError>;
}

#[derive(serde::Deserialize)]
struct ChallengeResponse {
    challenge: String,
}

/// JSON REST implementation of [`BackendClient`].
pub struct RestBackendClient<T: HttpTransport> {
    config: IdentityConfig,
    transport: Arc<T>,
}

impl<T: HttpTransport> RestBackendClient<T> {
    /// Create new backend client.
    pub fn new(config: IdentityConfig, transport: Arc<T>) -> Self {
        Self { config, transport }
    }

    fn app_endpoint(&self, verb: &str) -> String {
        format!(
            "{}/v1/projects/{}/apps/{}:{}",
            self.config.api_base_url, self.config.project_id, self.config.app_id, verb
        )
    }

    fn installation_endpoint(&self, identifier: &str) -> String {
        format!(
            "{}/v1/projects/{}/installations/{}",
            self.config.api_base_url, self.config.project_id, identifier
        )
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert("accept".to_string(), "application/json".to_string());
        if let Some(api_key) = &self.config.api_key {
            use secrecy::ExposeSecret;
            headers.insert("x-api-key".to_string(), api_key.expose_secret().to_string());
        }
        headers
    }

    async fn post_json(
        &self,
        url: String,
        body: serde_json::Value,
    ) -> Result<String, IdentityError> {
        let request = HttpRequest {
            method: HttpMethod::Post,
            url,
            headers: self.build_headers(),
            body: Some(body.to_string()),
            timeout: Some(self.config.timeout),
        };

        let response = self.transport.send(request).await?;
        if !(200..300).contains(&response.status) {
            return Err(create_error_from_response(response.status, &response.body));
        }
        Ok(response.body)
    }

    fn parse<D: serde::de::DeserializeOwned>(body: &str) -> Result<D, IdentityError> {
        serde_json::from_str(body).map_err(|e| {
            IdentityError::Protocol(ProtocolError::InvalidJson {
                message: e.to_string(),
            })
        })
    }
}

fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[async_trait]
impl<T: HttpTransport> BackendClient for RestBackendClient<T> {
    async fn get_random_challenge(&self) -> Result<Vec<u8>, IdentityError> {
        let body = self
            .post_json(self.app_endpoint("generateChallenge"), serde_json::json!({}))
            .await?;
        let response: ChallengeResponse = Self::parse(&body)?;

        let challenge = base64::engine::general_purpose::STANDARD
            .decode(&response.challenge)
            .map_err(|e| ProtocolError::InvalidResponse {
                message: format!("invalid challenge encoding: {e}"),
            })?;
        if challenge.is_empty() {
            return Err(ProtocolError::MissingField {
                field: "challenge".to_string(),
            }
            .into());
        }
        Ok(challenge)
    }

    async fn exchange_attestation(
        &self,
        attestation: &[u8],
        key_id: &str,
        challenge: &[u8],
    ) -> Result<(AttestationArtifact, TokenResponse), IdentityError> {
        let body = self
            .post_json(
                self.app_endpoint("exchangeAttestation"),
                serde_json::json!({
                    "attestation_statement": encode(attestation),
                    "key_id": key_id,
                    "challenge": encode(challenge),
                }),
            )
            .await?;
        let response: ExchangeResponse = Self::parse(&body)?;
        let artifact = response.decode_artifact(key_id)?;
        Ok((artifact, response.token))
    }

    async fn refresh_token(
        &self,
        artifact: &AttestationArtifact,
        challenge: &[u8],
        assertion: &[u8],
    ) -> Result<TokenResponse, IdentityError> {
        let body = self
            .post_json(
                self.app_endpoint("exchangeAssertion"),
                serde_json::json!({
                    "artifact": encode(artifact.bytes()),
                    "challenge": encode(challenge),
                    "assertion": encode(assertion),
                }),
            )
            .await?;
        Self::parse(&body)
    }

    async fn delete_installation(&self, identifier: &str) -> Result<(), IdentityError> {
        let request = HttpRequest {
            method: HttpMethod::Delete,
            url: self.installation_endpoint(identifier),
            headers: self.build_headers(),
            body: None,
            timeout: Some(self.config.timeout),
        };

        let response = self.transport.send(request).await?;
        if !(200..300).contains(&response.status) {
            return Err(create_error_from_response(response.status, &response.body));
        }
        Ok(())
    }
}

/// Mock backend client for testing.
///
/// Counts every operation and lets tests queue one-shot failures or slow a
/// refresh down to hold its in-flight window open.
#[derive(Default)]
pub struct MockBackendClient {
    challenge: Mutex<Option<Vec<u8>>>,
    next_token: Mutex<Option<TokenResponse>>,
    next_challenge_error: Mutex<Option<IdentityError>>,
    next_exchange_error: Mutex<Option<IdentityError>>,
    next_refresh_error: Mutex<Option<IdentityError>>,
    next_delete_error: Mutex<Option<IdentityError>>,
    refresh_delay: Mutex<Option<Duration>>,
    challenge_calls: AtomicUsize,
    exchange_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    deleted: Mutex<Vec<String>>,
}

impl MockBackendClient {
    /// Create new mock backend client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the challenge to return.
    pub fn set_challenge(&self, challenge: Vec<u8>) -> &Self {
        *self.challenge.lock().unwrap() = Some(challenge);
        self
    }

    /// Set the next token response.
    pub fn set_next_token(&self, token: TokenResponse) -> &Self {
        *self.next_token.lock().unwrap() = Some(token);
        self
    }

    /// Fail the next challenge request.
    pub fn set_next_challenge_error(&self, error: IdentityError) -> &Self {
        *self.next_challenge_error.lock().unwrap() = Some(error);
        self
    }

    /// Fail the next attestation exchange.
    pub fn set_next_exchange_error(&self, error: IdentityError) -> &Self {
        *self.next_exchange_error.lock().unwrap() = Some(error);
        self
    }

    /// Fail the next token refresh.
    pub fn set_next_refresh_error(&self, error: IdentityError) -> &Self {
        *self.next_refresh_error.lock().unwrap() = Some(error);
        self
    }

    /// Fail the next installation deletion.
    pub fn set_next_delete_error(&self, error: IdentityError) -> &Self {
        *self.next_delete_error.lock().unwrap() = Some(error);
        self
    }

    /// Delay refresh responses, keeping the refresh in flight.
    pub fn set_refresh_delay(&self, delay: Duration) -> &Self {
        *self.refresh_delay.lock().unwrap() = Some(delay);
        self
    }

    /// Number of challenge requests issued.
    pub fn challenge_calls(&self) -> usize {
        self.challenge_calls.load(Ordering::SeqCst)
    }

    /// Number of attestation exchanges issued.
    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    /// Number of token refreshes issued.
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Number of deletion requests issued.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Identifiers deleted on the server.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn token_for_call(&self, call: usize) -> TokenResponse {
        self.next_token
            .lock()
            .unwrap()
            .take()
            .unwrap_or(TokenResponse {
                token: format!("mock-token-{call}"),
                ttl_seconds: 3600,
            })
    }

    fn take_error(slot: &Mutex<Option<IdentityError>>) -> Result<(), IdentityError> {
        match slot.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BackendClient for MockBackendClient {
    async fn get_random_challenge(&self) -> Result<Vec<u8>, IdentityError> {
        self.challenge_calls.fetch_add(1, Ordering::SeqCst);
        Self::take_error(&self.next_challenge_error)?;
        Ok(self
            .challenge
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| b"mock-challenge".to_vec()))
    }

    async fn exchange_attestation(
        &self,
        _attestation: &[u8],
        key_id: &str,
        _challenge: &[u8],
    ) -> Result<(AttestationArtifact, TokenResponse), IdentityError> {
        let call = self.exchange_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Self::take_error(&self.next_exchange_error)?;
        Ok((
            AttestationArtifact::new(key_id, b"mock-artifact".to_vec()),
            self.token_for_call(call),
        ))
    }

    async fn refresh_token(
        &self,
        _artifact: &AttestationArtifact,
        _challenge: &[u8],
        _assertion: &[u8],
    ) -> Result<TokenResponse, IdentityError> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.refresh_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Self::take_error(&self.next_refresh_error)?;
        Ok(self.token_for_call(call))
    }

    async fn delete_installation(&self, identifier: &str) -> Result<(), IdentityError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        Self::take_error(&self.next_delete_error)?;
        self.deleted.lock().unwrap().push(identifier.to_string());
        Ok(())
    }
}
