//! Credential Lifecycle
//!
//! Caching, coalescing, and refresh policy around a credential's lifetime.
//!
//! This module provides:
//!
//! - **Identity Store**: durable persistence for identifier, credential,
//!   and attestation artifact
//! - **Lifecycle Manager**: cache-or-refresh decisions with single-flight
//!   coalescing of concurrent refreshes

pub mod manager;
pub mod store;

pub use manager::{
    CredentialManager, DefaultCredentialManager, LifecycleConfig, MockCredentialManager,
};
pub use store::{FileIdentityStore, IdentityStore, InMemoryIdentityStore, MockIdentityStore};
