//! Identity Change Events
//!
//! Subscription interface for identifier lifecycle notifications. The
//! lifecycle manager publishes a change when an installation identifier is
//! created or deleted; dependent subsystems subscribe to invalidate their
//! own caches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// What happened to the installation identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentityChangeKind {
    /// A new identifier was created and persisted.
    Created,
    /// The installation was deleted, server-side and locally.
    Deleted,
}

/// An identifier lifecycle change, tagged with the owning application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityChange {
    /// Name of the application the identifier belongs to.
    pub app_name: String,
    /// The kind of change.
    pub kind: IdentityChangeKind,
}

/// Observer interface for identity changes.
pub trait IdentityObserver: Send + Sync {
    /// Called synchronously for every published change.
    fn on_identity_change(&self, change: &IdentityChange);
}

/// Handle for removing a registered observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct FnObserver<F: Fn(&IdentityChange) + Send + Sync>(F);

impl<F: Fn(&IdentityChange) + Send + Sync> IdentityObserver for FnObserver<F> {
    fn on_identity_change(&self, change: &IdentityChange) {
        (self.0)(change)
    }
}

/// Registry of identity change observers with synchronous dispatch.
#[derive(Default)]
pub struct EventBus {
    observers: Mutex<HashMap<u64, Arc<dyn IdentityObserver>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create new event bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer, returning its subscription handle.
    pub fn subscribe(&self, observer: Arc<dyn IdentityObserver>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.observers.lock().unwrap().insert(id, observer);
        SubscriptionId(id)
    }

    /// Register a closure as an observer.
    pub fn subscribe_fn(
        &self,
        handler: impl Fn(&IdentityChange) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribe(Arc::new(FnObserver(handler)))
    }

    /// Remove an observer. Returns false if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.lock().unwrap().remove(&id.0).is_some()
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap().len()
    }

    /// Deliver a change to every registered observer.
    ///
    /// Observers are snapshotted before dispatch so a handler may subscribe
    /// or unsubscribe without deadlocking.
    pub fn publish(&self, change: &IdentityChange) {
        let observers: Vec<Arc<dyn IdentityObserver>> =
            self.observers.lock().unwrap().values().cloned().collect();
        for observer in observers {
            observer.on_identity_change(change);
        }
    }
}
