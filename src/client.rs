//! Identity Client
//!
//! High-level handle combining the lifecycle manager with its default
//! component assembly, plus the per-application registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::attestation::PlatformAttestor;
use crate::core::{BackendClient, ReqwestHttpTransport, RestBackendClient};
use crate::error::{IdentityError, IdentityResult};
use crate::events::EventBus;
use crate::lifecycle::{
    CredentialManager, DefaultCredentialManager, FileIdentityStore, IdentityStore, LifecycleConfig,
};
use crate::resilience::{IdentityRetryExecutor, RetryConfig, RetryExecutor};
use crate::types::{Credential, IdentityConfig};

/// Caller-facing identity handle, one per configured application identity.
///
/// The handle is a thin delegation layer: all caching, coalescing, and
/// refresh policy lives in the long-lived manager it wraps. Unlike
/// per-call flow objects, the manager must be constructed once and held,
/// since its in-flight refresh state outlives individual calls.
pub struct IdentityClient<B, S, P>
where
    B: BackendClient + 'static,
    S: IdentityStore + 'static,
    P: PlatformAttestor + 'static,
{
    config: IdentityConfig,
    manager: Arc<DefaultCredentialManager<B, S, P>>,
    events: Arc<EventBus>,
}

/// Production client: REST backend over reqwest, file-backed store.
pub type RestIdentityClient<P> =
    IdentityClient<RestBackendClient<ReqwestHttpTransport>, FileIdentityStore, P>;

impl<P: PlatformAttestor + 'static> RestIdentityClient<P> {
    /// Create a client with the default production components.
    ///
    /// `state_path` is the JSON state file backing the durable store; the
    /// platform attestor remains caller-supplied since it wraps
    /// OS-specific secure-hardware functionality.
    pub fn new(
        config: IdentityConfig,
        attestor: Arc<P>,
        state_path: impl Into<PathBuf>,
    ) -> Result<Self, IdentityError> {
        Self::with_event_bus(config, attestor, state_path, Arc::new(EventBus::new()))
    }

    /// Create a production client sharing an existing event bus.
    pub fn with_event_bus(
        config: IdentityConfig,
        attestor: Arc<P>,
        state_path: impl Into<PathBuf>,
        events: Arc<EventBus>,
    ) -> Result<Self, IdentityError> {
        let transport = Arc::new(ReqwestHttpTransport::new()?);
        let backend = Arc::new(RestBackendClient::new(config.clone(), transport));
        let store = Arc::new(FileIdentityStore::new(state_path));
        Ok(Self::with_components(config, backend, store, attestor, events))
    }
}

impl<B, S, P> IdentityClient<B, S, P>
where
    B: BackendClient + 'static,
    S: IdentityStore + 'static,
    P: PlatformAttestor + 'static,
{
    /// Create a client with custom components.
    pub fn with_components(
        config: IdentityConfig,
        backend: Arc<B>,
        store: Arc<S>,
        attestor: Arc<P>,
        events: Arc<EventBus>,
    ) -> Self {
        let lifecycle = LifecycleConfig::from(&config);
        let manager = Arc::new(DefaultCredentialManager::new(
            config.clone(),
            lifecycle,
            backend,
            store,
            attestor,
            events.clone(),
        ));

        Self {
            config,
            manager,
            events,
        }
    }

    /// Get the identity configuration.
    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    /// Event bus carrying identifier lifecycle notifications.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Get a valid credential, refreshing if necessary.
    pub async fn get_credential(&self, force_refresh: bool) -> IdentityResult<Credential> {
        self.manager.get_credential(force_refresh).await
    }

    /// Get the stable installation identifier, creating one on first run.
    pub async fn get_identifier(&self) -> IdentityResult<String> {
        self.manager.get_identifier().await
    }

    /// Delete the installation server-side and clear all local state.
    pub async fn delete(&self) -> IdentityResult<()> {
        self.manager.delete().await
    }

    /// Get a credential, retrying transient failures with backoff.
    ///
    /// The manager itself never retries; this wrapper re-invokes it for
    /// errors classified as retryable.
    pub async fn credential_with_retry(
        &self,
        force_refresh: bool,
        retry: RetryConfig,
    ) -> IdentityResult<Credential> {
        let executor = IdentityRetryExecutor::new(retry);
        let manager = self.manager.clone();
        executor
            .execute(move || {
                let manager = manager.clone();
                async move { manager.get_credential(force_refresh).await }
            })
            .await
    }
}

/// Registry of identity clients keyed by application name.
///
/// Handles are constructed lazily on first lookup; the registry lock
/// guards against duplicate concurrent construction for the same key, and
/// every handle shares the registry's event bus. The first configuration
/// registered for a name wins; later calls return the existing handle.
pub struct IdentityRegistry<P: PlatformAttestor + 'static> {
    base_dir: PathBuf,
    attestor: Arc<P>,
    events: Arc<EventBus>,
    clients: Mutex<HashMap<String, Arc<RestIdentityClient<P>>>>,
}

impl<P: PlatformAttestor + 'static> IdentityRegistry<P> {
    /// Create a registry storing state files under `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>, attestor: Arc<P>) -> Self {
        Self {
            base_dir: base_dir.into(),
            attestor,
            events: Arc::new(EventBus::new()),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Event bus shared by every handle in this registry.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Get the handle for an already-configured application.
    pub fn get(&self, app_name: &str) -> Option<Arc<RestIdentityClient<P>>> {
        self.clients.lock().unwrap().get(app_name).cloned()
    }

    /// Get the handle for the configured application, constructing it on
    /// first use.
    pub fn get_or_create(
        &self,
        config: IdentityConfig,
    ) -> Result<Arc<RestIdentityClient<P>>, IdentityError> {
        let mut clients = self.clients.lock().unwrap();
        if let Some(client) = clients.get(&config.app_name) {
            return Ok(client.clone());
        }

        let state_path = self.base_dir.join(format!("{}.json", config.app_name));
        let client = Arc::new(RestIdentityClient::with_event_bus(
            config.clone(),
            self.attestor.clone(),
            state_path,
            self.events.clone(),
        )?);
        clients.insert(config.app_name, client.clone());
        Ok(client)
    }

    /// Names of the applications configured so far.
    pub fn app_names(&self) -> Vec<String> {
        self.clients.lock().unwrap().keys().cloned().collect()
    }
}
