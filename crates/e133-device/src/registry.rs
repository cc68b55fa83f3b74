//! Dynamic endpoint registry.
//!
//! Id 0 belongs to the root endpoint, which the device owner installs on the
//! dispatcher directly. Everything else comes and goes through here.
//!
//! Changes and their notifications are serialized, so every observer sees
//! adds and removes in the order they were applied to the map.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::endpoint::EndpointHandle;

pub const ROOT_ENDPOINT: u16 = 0;

/// Notified after an endpoint is added or removed.
///
/// Called with the registry's change lock held: an observer may read the
/// registry but must not register or unregister from inside a callback.
pub trait EndpointObserver: Send + Sync {
    fn endpoint_added(&self, id: u16);
    fn endpoint_removed(&self, id: u16);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("endpoint 0 is reserved for the root endpoint")]
    ReservedId,
    #[error("endpoint {0} is already registered")]
    AlreadyRegistered(u16),
    #[error("endpoint {0} is not registered")]
    NotRegistered(u16),
}

#[derive(Default)]
struct Inner {
    endpoints: HashMap<u16, EndpointHandle>,
    observers: Vec<Weak<dyn EndpointObserver>>,
}

#[derive(Default)]
pub struct EndpointRegistry {
    inner: RwLock<Inner>,
    // Held from a change until its notifications have been delivered.
    changes: Mutex<()>,
}

enum Change {
    Added(u16),
    Removed(u16),
}

impl EndpointRegistry {
    /// An empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `endpoint` under `id` and notify observers.
    ///
    /// Id 0 is reserved and an id can only be registered once.
    pub fn register(&self, id: u16, endpoint: EndpointHandle) -> Result<(), RegistryError> {
        if id == ROOT_ENDPOINT {
            return Err(RegistryError::ReservedId);
        }
        let _changes = self.changes.lock();
        {
            let mut inner = self.inner.write();
            if inner.endpoints.contains_key(&id) {
                return Err(RegistryError::AlreadyRegistered(id));
            }
            inner.endpoints.insert(id, endpoint);
        }
        tracing::info!("Endpoint {} has been added", id);
        self.notify(Change::Added(id));
        Ok(())
    }

    /// Remove the endpoint under `id`, returning its handle.
    pub fn unregister(&self, id: u16) -> Result<EndpointHandle, RegistryError> {
        if id == ROOT_ENDPOINT {
            return Err(RegistryError::ReservedId);
        }
        let _changes = self.changes.lock();
        let endpoint = self
            .inner
            .write()
            .endpoints
            .remove(&id)
            .ok_or(RegistryError::NotRegistered(id))?;
        tracing::info!("Endpoint {} has been removed", id);
        self.notify(Change::Removed(id));
        Ok(endpoint)
    }

    /// The endpoint registered under `id`. Always `None` for id 0.
    pub fn lookup(&self, id: u16) -> Option<EndpointHandle> {
        self.inner.read().endpoints.get(&id).cloned()
    }

    /// Registered ids in ascending order.
    pub fn endpoint_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.inner.read().endpoints.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Whether no dynamic endpoints are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().endpoints.is_empty()
    }

    /// Subscribe to changes. The observer is first told about every endpoint
    /// already registered, in ascending id order.
    ///
    /// The registry holds observers weakly; dropping the observer unsubscribes it.
    pub fn subscribe(&self, observer: Weak<dyn EndpointObserver>) {
        let _changes = self.changes.lock();
        let existing = self.endpoint_ids();
        let live = observer.upgrade();
        self.inner.write().observers.push(observer);
        if let Some(live) = live {
            for id in existing {
                live.endpoint_added(id);
            }
        }
    }

    // Caller holds `changes`. The map lock is released before observers run.
    fn notify(&self, change: Change) {
        let observers: Vec<Arc<dyn EndpointObserver>> = {
            let mut inner = self.inner.write();
            inner.observers.retain(|o| o.strong_count() > 0);
            inner.observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            match change {
                Change::Added(id) => observer.endpoint_added(id),
                Change::Removed(id) => observer.endpoint_removed(id),
            }
        }
    }
}
