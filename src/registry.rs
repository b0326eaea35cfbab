//! Device registry (component E): maps a device MAC to its live Connection.
//!
//! Modeled on an `Arc<RwLock<HashMap<_, _>>>` registry, guarded by a single
//! write-lock acquisition per mutating call so the evict-then-insert pair
//! (and the check-then-remove pair) are atomic with respect to any other
//! insert or remove for the same key.

use std::collections::HashMap;
use std::sync::Arc;

use gw_protocol::Mac;
use tokio::sync::RwLock;

use crate::connection::Connection;

#[derive(Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<RwLock<HashMap<Mac, Arc<Connection>>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn` under `mac`, closing and evicting any prior entry
    /// for the same MAC first. The swap itself happens under one write-lock
    /// hold; the prior connection's close runs after the lock is released.
    pub async fn insert(&self, mac: Mac, conn: Arc<Connection>) {
        let prior = self.inner.write().await.insert(mac, conn.clone());
        if let Some(prior) = prior {
            if !Arc::ptr_eq(&prior, &conn) {
                prior.close().await;
            }
        }
    }

    /// Remove `conn` from the registry, but only if it is still the entry
    /// currently registered for `mac` -- a connection that already lost the
    /// race to a newer one for the same MAC must not evict the newer entry.
    pub async fn remove(&self, mac: &Mac, conn: &Arc<Connection>) {
        let mut guard = self.inner.write().await;
        if guard.get(mac).is_some_and(|current| Arc::ptr_eq(current, conn)) {
            guard.remove(mac);
        }
    }

    pub async fn get(&self, mac: &Mac) -> Option<Arc<Connection>> {
        self.inner.read().await.get(mac).cloned()
    }

    pub async fn iterate(&self) -> Vec<Arc<Connection>> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
