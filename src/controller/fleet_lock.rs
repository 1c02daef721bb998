//! Per-fleet serialization of reconcile passes
//!
//! Passes for different fleets run concurrently; passes for the same fleet
//! never overlap, including ones triggered outside the controller runtime.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of one async mutex per fleet key
#[derive(Clone, Default)]
pub struct FleetLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl FleetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a fleet; released when the guard drops
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Forget a fleet that no longer exists
    pub async fn forget(&self, key: &str) {
        self.locks.lock().await.remove(key);
    }
}

/// Key identifying a fleet across namespaces
pub fn fleet_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}
