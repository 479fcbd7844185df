//! Dispatch admission: per-action serialization and a global cap.

use plinth_core::{ActionSpec, BrokerConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

/// Held for the whole dispatch of one invocation.
pub struct DispatchGuard {
    _action: Option<OwnedMutexGuard<()>>,
    _permit: Option<OwnedSemaphorePermit>,
}

/// Lock table keyed by action name, plus the optional concurrency limit.
///
/// Entries are created on first use and never removed; the set of names is
/// bounded by the registry.
pub struct DispatchGate {
    actions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    limit: Option<Arc<Semaphore>>,
}

impl DispatchGate {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            actions: Mutex::new(HashMap::new()),
            limit: config.max_concurrent.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    fn action_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut table = self.actions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(table.entry(name.to_string()).or_default())
    }

    /// Wait until `spec` may be dispatched.
    ///
    /// The per-action lock is taken before the global permit, so a queue of
    /// same-name requests never holds more than one permit.
    pub async fn admit(&self, spec: &ActionSpec) -> DispatchGuard {
        let action = if spec.exclusive {
            Some(self.action_lock(&spec.name).lock_owned().await)
        } else {
            None
        };

        // The semaphore is never closed.
        let permit = match &self.limit {
            Some(limit) => Arc::clone(limit).acquire_owned().await.ok(),
            None => None,
        };

        DispatchGuard {
            _action: action,
            _permit: permit,
        }
    }

    #[cfg(test)]
    fn available_permits(&self) -> Option<usize> {
        self.limit.as_ref().map(|s| s.available_permits())
    }
}
