//! In-memory coordination store reproducing lease expiry and watch delivery,
//! used by tests and local development.

use crate::{
    ConfigEntry, CoordinationResult, CoordinationStore, CoordinationStoreError, WatchEvent,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: String,
    version: i64,
    // Generation of the lease currently attached to this key; a re-acquired
    // key gets a fresh generation so a stale expiry task leaves it alone.
    lease_generation: Option<u64>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<HashMap<String, StoredEntry>>,
    watchers: Mutex<Vec<(String, mpsc::UnboundedSender<WatchEvent>)>>,
    generation: AtomicU64,
}

impl Inner {
    fn notify(&self, event: WatchEvent) {
        let key = match &event {
            WatchEvent::Put { key, .. } => key.clone(),
            WatchEvent::Delete { key } => key.clone(),
        };
        let mut watchers = self.watchers.lock();
        watchers.retain(|(prefix, tx)| {
            if key.starts_with(prefix.as_str()) {
                tx.send(event.clone()).is_ok()
            } else {
                !tx.is_closed()
            }
        });
    }

    fn expire(&self, key: &str, generation: u64) {
        let mut state = self.state.lock();
        let matches = state
            .get(key)
            .map(|e| e.lease_generation == Some(generation))
            .unwrap_or(false);
        if matches {
            state.remove(key);
            drop(state);
            self.notify(WatchEvent::Delete {
                key: key.to_string(),
            });
        }
    }
}

/// Coordination store held in process memory
///
/// Lease TTLs run on the tokio clock so tests can drive expiry with paused
/// time; expiry produces the same watch deletes an etcd lease would.
#[derive(Clone, Default)]
pub struct MemoryCoordinationStore {
    inner: Arc<Inner>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn attach_expiry(&self, key: &str, generation: u64, ttl: Duration) {
        let inner = self.inner.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            inner.expire(&key, generation);
        });
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn acquire_lease(&self, key: &str, ttl: Duration) -> CoordinationResult<bool> {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.inner.state.lock();
            if state.contains_key(key) {
                return Ok(false);
            }
            state.insert(
                key.to_string(),
                StoredEntry {
                    value: "locked".to_string(),
                    version: 1,
                    lease_generation: Some(generation),
                },
            );
        }
        self.inner.notify(WatchEvent::Put {
            key: key.to_string(),
            value: "locked".to_string(),
        });
        self.attach_expiry(key, generation, ttl);
        Ok(true)
    }

    async fn release_lease(&self, key: &str) -> CoordinationResult<()> {
        self.delete(key).await
    }

    async fn put_with_lease(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> CoordinationResult<()> {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.inner.state.lock();
            let version = state.get(key).map(|e| e.version + 1).unwrap_or(1);
            state.insert(
                key.to_string(),
                StoredEntry {
                    value: value.to_string(),
                    version,
                    lease_generation: Some(generation),
                },
            );
        }
        self.inner.notify(WatchEvent::Put {
            key: key.to_string(),
            value: value.to_string(),
        });
        self.attach_expiry(key, generation, ttl);
        Ok(())
    }

    async fn put(&self, key: &str, value: &str) -> CoordinationResult<()> {
        {
            let mut state = self.inner.state.lock();
            let version = state.get(key).map(|e| e.version + 1).unwrap_or(1);
            state.insert(
                key.to_string(),
                StoredEntry {
                    value: value.to_string(),
                    version,
                    lease_generation: None,
                },
            );
        }
        self.inner.notify(WatchEvent::Put {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn get(&self, key: &str) -> CoordinationResult<Option<ConfigEntry>> {
        let state = self.inner.state.lock();
        Ok(state.get(key).map(|e| ConfigEntry {
            key: key.to_string(),
            value: e.value.clone(),
            version: e.version,
        }))
    }

    async fn delete(&self, key: &str) -> CoordinationResult<()> {
        let removed = {
            let mut state = self.inner.state.lock();
            state.remove(key).is_some()
        };
        if removed {
            self.inner.notify(WatchEvent::Delete {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> CoordinationResult<Vec<(String, String)>> {
        let state = self.inner.state.lock();
        let mut entries: Vec<(String, String)> = state
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
    ) -> CoordinationResult<mpsc::UnboundedReceiver<WatchEvent>> {
        if prefix.is_empty() {
            return Err(CoordinationStoreError::watch(prefix, "empty prefix"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.watchers.lock().push((prefix.to_string(), tx));
        Ok(rx)
    }
}
