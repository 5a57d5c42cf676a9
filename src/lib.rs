//! Device Identity Integration Module
//!
//! Client-side credential management for a mobile backend platform:
//! device attestation exchange and installation identity issuance.
//!
//! # Features
//!
//! - Installation identifier issuance with durable persistence
//! - Device attestation exchange (challenge, platform attestation, server
//!   validation) producing a long-lived artifact
//! - Credential caching with an expiry tolerance window
//! - Single-flight coalescing of concurrent refreshes per identity
//! - All-or-nothing server-confirmed installation deletion
//! - Identity change notifications for dependent subsystems
//! - Opt-in retry with exponential backoff for transient failures
//!
//! # Example
//!
//! ```rust,ignore
//! use device_identity_integration::{identity_config, IdentityClient};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Build configuration using the fluent builder
//!     let config = identity_config()
//!         .app_name("default")
//!         .project_id("my-project")
//!         .app_id("1:1234567890:app")
//!         .api_key("my-api-key")
//!         .api_base_url("https://identity.example.com")
//!         .build()?;
//!
//!     // The platform attestor wraps the OS secure-hardware primitive
//!     let attestor = Arc::new(my_platform::HardwareAttestor::new());
//!
//!     let client = IdentityClient::new(config, attestor, "identity-state.json")?;
//!
//!     // Cached when valid, refreshed (and coalesced) otherwise
//!     let credential = client.get_credential(false).await?;
//!     println!("Authorization: {}", credential.authorization_header());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The module is organized into several sub-modules:
//!
//! - `types`: credential, artifact, and configuration types
//! - `error`: error hierarchy with retryability classification
//! - `core`: HTTP transport and the backend client (remote operations only)
//! - `attestation`: platform attestor seam and the attestation exchange
//!   state machine
//! - `lifecycle`: identity store and the credential lifecycle manager
//!   (caching, coalescing, refresh, deletion)
//! - `events`: identifier change notifications
//! - `builders`: fluent configuration builder
//! - `resilience`: caller-side retry with backoff
//! - `client`: high-level handle and per-application registry

pub mod attestation;
pub mod builders;
pub mod client;
pub mod core;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod resilience;
pub mod types;

// Re-export main client
pub use client::{IdentityClient, IdentityRegistry, RestIdentityClient};

// Re-export builders
pub use builders::{identity_config, IdentityConfigBuilder};

// Re-export errors
pub use error::{
    create_error_from_response, parse_error_response, AttestationError, BackendErrorResponse,
    IdentityError, IdentityResult, NetworkError, NotConfiguredError, ProtocolError, StorageError,
};

// Re-export types
pub use types::{
    AttestationArtifact, Credential, CredentialOrigin, ExchangeResponse, IdentityConfig,
    TokenResponse,
};

// Re-export core components
pub use core::{
    BackendClient, HttpMethod, HttpRequest, HttpResponse, HttpTransport, MockBackendClient,
    MockHttpTransport, ReqwestHttpTransport, RestBackendClient,
};

// Re-export attestation
pub use attestation::{
    client_data_hash, AttestationExchange, AttestationExchanger, ExchangeState,
    MockPlatformAttestor, PlatformAttestation, PlatformAttestationFailure, PlatformAttestor,
};

// Re-export lifecycle management
pub use lifecycle::{
    CredentialManager, DefaultCredentialManager, FileIdentityStore, IdentityStore,
    InMemoryIdentityStore, LifecycleConfig, MockCredentialManager, MockIdentityStore,
};

// Re-export events
pub use events::{
    EventBus, IdentityChange, IdentityChangeKind, IdentityObserver, SubscriptionId,
};

// Re-export resilience
pub use resilience::{
    IdentityRetryExecutor, MockRetryExecutor, RetryConfig, RetryExecutor, RetryStats,
    DEFAULT_RETRY_CONFIG,
};
