//! Identity Store
//!
//! Durable persistence for the installation identifier, the cached
//! credential, and the long-lived attestation artifact.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;

use crate::error::{IdentityError, IdentityResult, StorageError};
use crate::types::{AttestationArtifact, Credential};

/// Persistence interface for identity state (for dependency injection).
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Load the cached credential, if any.
    async fn load_credential(&self) -> IdentityResult<Option<Credential>>;

    /// Persist the credential.
    async fn save_credential(&self, credential: &Credential) -> IdentityResult<()>;

    /// Remove the persisted credential.
    async fn clear_credential(&self) -> IdentityResult<()>;

    /// Load the attestation artifact, if any.
    async fn load_artifact(&self) -> IdentityResult<Option<AttestationArtifact>>;

    /// Persist the attestation artifact.
    async fn save_artifact(&self, artifact: &AttestationArtifact) -> IdentityResult<()>;

    /// Remove the persisted artifact.
    async fn clear_artifact(&self) -> IdentityResult<()>;

    /// Load the installation identifier, if any.
    async fn load_identifier(&self) -> IdentityResult<Option<String>>;

    /// Persist the installation identifier.
    async fn save_identifier(&self, identifier: &str) -> IdentityResult<()>;

    /// Remove the persisted identifier.
    async fn clear_identifier(&self) -> IdentityResult<()>;

    /// Remove identifier, credential, and artifact in one operation.
    async fn clear_all(&self) -> IdentityResult<()>;
}

#[derive(Default, Serialize, Deserialize)]
struct PersistedState {
    identifier: Option<String>,
    credential: Option<PersistedCredential>,
    artifact: Option<PersistedArtifact>,
}

#[derive(Serialize, Deserialize)]
struct PersistedCredential {
    identifier: String,
    token: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl PersistedCredential {
    fn from_credential(credential: &Credential) -> Self {
        Self {
            identifier: credential.identifier().to_string(),
            token: credential.token().to_string(),
            issued_at: credential.issued_at(),
            expires_at: credential.expires_at(),
        }
    }

    fn into_credential(self) -> IdentityResult<Credential> {
        Credential::from_parts(self.identifier, self.token, self.issued_at, self.expires_at)
            .map_err(|error| {
                StorageError::CorruptedData {
                    message: format!("stored credential invalid: {error}"),
                }
                .into()
            })
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedArtifact {
    key_id: String,
    artifact: String,
}

impl PersistedArtifact {
    fn from_artifact(artifact: &AttestationArtifact) -> Self {
        Self {
            key_id: artifact.key_id().to_string(),
            artifact: base64::engine::general_purpose::STANDARD.encode(artifact.bytes()),
        }
    }

    fn into_artifact(self) -> IdentityResult<AttestationArtifact> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.artifact)
            .map_err(|e| StorageError::CorruptedData {
                message: format!("stored artifact invalid: {e}"),
            })?;
        Ok(AttestationArtifact::new(self.key_id, bytes))
    }
}

/// In-memory identity store for tests and ephemeral installations.
#[derive(Default)]
pub struct InMemoryIdentityStore {
    state: StdMutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    identifier: Option<String>,
    credential: Option<Credential>,
    artifact: Option<AttestationArtifact>,
}

impl InMemoryIdentityStore {
    /// Create new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn load_credential(&self) -> IdentityResult<Option<Credential>> {
        Ok(self.state.lock().unwrap().credential.clone())
    }

    async fn save_credential(&self, credential: &Credential) -> IdentityResult<()> {
        self.state.lock().unwrap().credential = Some(credential.clone());
        Ok(())
    }

    async fn clear_credential(&self) -> IdentityResult<()> {
        self.state.lock().unwrap().credential = None;
        Ok(())
    }

    async fn load_artifact(&self) -> IdentityResult<Option<AttestationArtifact>> {
        Ok(self.state.lock().unwrap().artifact.clone())
    }

    async fn save_artifact(&self, artifact: &AttestationArtifact) -> IdentityResult<()> {
        self.state.lock().unwrap().artifact = Some(artifact.clone());
        Ok(())
    }

    async fn clear_artifact(&self) -> IdentityResult<()> {
        self.state.lock().unwrap().artifact = None;
        Ok(())
    }

    async fn load_identifier(&self) -> IdentityResult<Option<String>> {
        Ok(self.state.lock().unwrap().identifier.clone())
    }

    async fn save_identifier(&self, identifier: &str) -> IdentityResult<()> {
        self.state.lock().unwrap().identifier = Some(identifier.to_string());
        Ok(())
    }

    async fn clear_identifier(&self) -> IdentityResult<()> {
        self.state.lock().unwrap().identifier = None;
        Ok(())
    }

    async fn clear_all(&self) -> IdentityResult<()> {
        *self.state.lock().unwrap() = InMemoryState::default();
        Ok(())
    }
}

/// File-backed identity store, durable across process restarts.
///
/// All state lives in one JSON file; writes go through a temp file and an
/// atomic rename so a crash mid-write never leaves a torn state file.
pub struct FileIdentityStore {
    path: PathBuf,
    io_lock: Mutex<()>,
}

impl FileIdentityStore {
    /// Create a store backed by the given state file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io_lock: Mutex::new(()),
        }
    }

    /// Path of the state file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn read_state(&self) -> IdentityResult<PersistedState> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                IdentityError::Storage(StorageError::CorruptedData {
                    message: e.to_string(),
                })
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistedState::default()),
            Err(e) => Err(StorageError::ReadFailed {
                message: e.to_string(),
            }
            .into()),
        }
    }

    async fn write_state(&self, state: &PersistedState) -> IdentityResult<()> {
        let write_failed = |e: std::io::Error| {
            IdentityError::Storage(StorageError::WriteFailed {
                message: e.to_string(),
            })
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
            }
        }

        let json = serde_json::to_vec_pretty(state).map_err(|e| {
            IdentityError::Storage(StorageError::WriteFailed {
                message: e.to_string(),
            })
        })?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &json).await.map_err(write_failed)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_failed)?;
        Ok(())
    }

    async fn update<F>(&self, mutate: F) -> IdentityResult<()>
    where
        F: FnOnce(&mut PersistedState) + Send,
    {
        let _guard = self.io_lock.lock().await;
        let mut state = self.read_state().await?;
        mutate(&mut state);
        self.write_state(&state).await
    }
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn load_credential(&self) -> IdentityResult<Option<Credential>> {
        let _guard = self.io_lock.lock().await;
        let state = self.read_state().await?;
        state
            .credential
            .map(PersistedCredential::into_credential)
            .transpose()
    }

    async fn save_credential(&self, credential: &Credential) -> IdentityResult<()> {
        let persisted = PersistedCredential::from_credential(credential);
        self.update(|state| state.credential = Some(persisted)).await
    }

    async fn clear_credential(&self) -> IdentityResult<()> {
        self.update(|state| state.credential = None).await
    }

    async fn load_artifact(&self) -> IdentityResult<Option<AttestationArtifact>> {
        let _guard = self.io_lock.lock().await;
        let state = self.read_state().await?;
        state
            .artifact
            .map(PersistedArtifact::into_artifact)
            .transpose()
    }

    async fn save_artifact(&self, artifact: &AttestationArtifact) -> IdentityResult<()> {
        let persisted = PersistedArtifact::from_artifact(artifact);
        self.update(|state| state.artifact = Some(persisted)).await
    }

    async fn clear_artifact(&self) -> IdentityResult<()> {
        self.update(|state| state.artifact = None).await
    }

    async fn load_identifier(&self) -> IdentityResult<Option<String>> {
        let _guard = self.io_lock.lock().await;
        Ok(self.read_state().await?.identifier)
    }

    async fn save_identifier(&self, identifier: &str) -> IdentityResult<()> {
        let identifier = identifier.to_string();
        self.update(move |state| state.identifier = Some(identifier))
            .await
    }

    async fn clear_identifier(&self) -> IdentityResult<()> {
        self.update(|state| state.identifier = None).await
    }

    async fn clear_all(&self) -> IdentityResult<()> {
        self.update(|state| *state = PersistedState::default()).await
    }
}

/// Mock identity store for testing.
///
/// Records every write and lets tests inject failures.
#[derive(Default)]
pub struct MockIdentityStore {
    state: StdMutex<InMemoryState>,
    save_credential_history: StdMutex<Vec<Credential>>,
    save_artifact_history: StdMutex<Vec<AttestationArtifact>>,
    save_identifier_history: StdMutex<Vec<String>>,
    clear_all_calls: AtomicUsize,
    next_errors: StdMutex<VecDeque<IdentityError>>,
    should_fail: StdMutex<bool>,
}

impl MockIdentityStore {
    /// Create new mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the credential.
    pub fn set_credential(&self, credential: Credential) -> &Self {
        self.state.lock().unwrap().credential = Some(credential);
        self
    }

    /// Pre-populate the artifact.
    pub fn set_artifact(&self, artifact: AttestationArtifact) -> &Self {
        self.state.lock().unwrap().artifact = Some(artifact);
        self
    }

    /// Pre-populate the identifier.
    pub fn set_identifier(&self, identifier: impl Into<String>) -> &Self {
        self.state.lock().unwrap().identifier = Some(identifier.into());
        self
    }

    /// Queue an error for the next store operation.
    pub fn push_next_error(&self, error: IdentityError) -> &Self {
        self.next_errors.lock().unwrap().push_back(error);
        self
    }

    /// Fail every operation.
    pub fn set_should_fail(&self, should_fail: bool) -> &Self {
        *self.should_fail.lock().unwrap() = should_fail;
        self
    }

    /// Currently stored credential.
    pub fn credential(&self) -> Option<Credential> {
        self.state.lock().unwrap().credential.clone()
    }

    /// Currently stored artifact.
    pub fn artifact(&self) -> Option<AttestationArtifact> {
        self.state.lock().unwrap().artifact.clone()
    }

    /// Currently stored identifier.
    pub fn identifier(&self) -> Option<String> {
        self.state.lock().unwrap().identifier.clone()
    }

    /// Credentials written so far.
    pub fn save_credential_history(&self) -> Vec<Credential> {
        self.save_credential_history.lock().unwrap().clone()
    }

    /// Artifacts written so far.
    pub fn save_artifact_history(&self) -> Vec<AttestationArtifact> {
        self.save_artifact_history.lock().unwrap().clone()
    }

    /// Identifiers written so far.
    pub fn save_identifier_history(&self) -> Vec<String> {
        self.save_identifier_history.lock().unwrap().clone()
    }

    /// Number of `clear_all` invocations.
    pub fn clear_all_calls(&self) -> usize {
        self.clear_all_calls.load(Ordering::SeqCst)
    }

    fn check_error(&self) -> IdentityResult<()> {
        if *self.should_fail.lock().unwrap() {
            return Err(StorageError::WriteFailed {
                message: "mock store failure".to_string(),
            }
            .into());
        }
        if let Some(error) = self.next_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for MockIdentityStore {
    async fn load_credential(&self) -> IdentityResult<Option<Credential>> {
        self.check_error()?;
        Ok(self.state.lock().unwrap().credential.clone())
    }

    async fn save_credential(&self, credential: &Credential) -> IdentityResult<()> {
        self.check_error()?;
        self.save_credential_history
            .lock()
            .unwrap()
            .push(credential.clone());
        self.state.lock().unwrap().credential = Some(credential.clone());
        Ok(())
    }

    async fn clear_credential(&self) -> IdentityResult<()> {
        self.check_error()?;
        self.state.lock().unwrap().credential = None;
        Ok(())
    }

    async fn load_artifact(&self) -> IdentityResult<Option<AttestationArtifact>> {
        self.check_error()?;
        Ok(self.state.lock().unwrap().artifact.clone())
    }

    async fn save_artifact(&self, artifact: &AttestationArtifact) -> IdentityResult<()> {
        self.check_error()?;
        self.save_artifact_history
            .lock()
            .unwrap()
            .push(artifact.clone());
        self.state.lock().unwrap().artifact = Some(artifact.clone());
        Ok(())
    }

    async fn clear_artifact(&self) -> IdentityResult<()> {
        self.check_error()?;
        self.state.lock().unwrap().artifact = None;
        Ok(())
    }

    async fn load_identifier(&self) -> IdentityResult<Option<String>> {
        self.check_error()?;
        Ok(self.state.lock().unwrap().identifier.clone())
    }

    async fn save_identifier(&self, identifier: &str) -> IdentityResult<()> {
        self.check_error()?;
        self.save_identifier_history
            .lock()
            .unwrap()
            .push(identifier.to_string());
        self.state.lock().unwrap().identifier = Some(identifier.to_string());
        Ok(())
    }

    async fn clear_identifier(&self) -> IdentityResult<()> {
        self.check_error()?;
        self.state.lock().unwrap().identifier = None;
        Ok(())
    }

    async fn clear_all(&self) -> IdentityResult<()> {
        self.check_error()?;
        self.clear_all_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = InMemoryState::default();
        Ok(())
    }
}
