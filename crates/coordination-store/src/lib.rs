//! Coordination store abstraction: leased key ownership, configuration keys,
//! and prefix watches
//!
//! The `CoordinationStore` trait covers the three coordination concerns of
//! the flash-sale core: distributed locks as TTL-bounded leases acquired with
//! a transactional put-if-absent, auto-expiring records for the user
//! blacklist, and watchable configuration keys. The production implementation
//! runs against etcd; the in-memory implementation reproduces lease expiry
//! and watch delivery for tests.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

pub mod etcd;
pub mod memory;

pub use etcd::EtcdCoordinationStore;
pub use memory::MemoryCoordinationStore;

/// Result type for coordination operations
pub type CoordinationResult<T> = Result<T, CoordinationStoreError>;

/// Errors reported by a coordination store
#[derive(Error, Debug)]
pub enum CoordinationStoreError {
    /// The store cannot be reached or refused the operation
    #[error("coordination store unavailable: {message}")]
    Unavailable { message: String },

    /// A watch stream ended or could not be established
    #[error("watch failed for prefix {prefix}: {message}")]
    Watch { prefix: String, message: String },
}

impl CoordinationStoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn watch(prefix: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Watch {
            prefix: prefix.into(),
            message: message.into(),
        }
    }
}

/// A change observed by a prefix watch, delivered in key order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put { key: String, value: String },
    Delete { key: String },
}

/// A configuration key with its store-side version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub version: i64,
}

/// Leased key ownership, config keys, and prefix watches
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Acquire an exclusive lease on `key` with the given TTL.
    ///
    /// Implemented as a transactional put-if-absent with an attached lease so
    /// the key disappears on its own if the holder crashes. Returns whether
    /// the lease was acquired.
    async fn acquire_lease(&self, key: &str, ttl: Duration) -> CoordinationResult<bool>;

    /// Release a lease by deleting its key. The lease grant itself is left
    /// to expire server-side.
    async fn release_lease(&self, key: &str) -> CoordinationResult<()>;

    /// Write an auto-expiring record (blacklist entries).
    async fn put_with_lease(&self, key: &str, value: &str, ttl: Duration)
        -> CoordinationResult<()>;

    /// Write a durable key (configuration).
    async fn put(&self, key: &str, value: &str) -> CoordinationResult<()>;

    /// Read a key. Absent keys return `None`.
    async fn get(&self, key: &str) -> CoordinationResult<Option<ConfigEntry>>;

    /// Delete a key.
    async fn delete(&self, key: &str) -> CoordinationResult<()>;

    /// List all live keys under a prefix with their values.
    async fn list_prefix(&self, prefix: &str) -> CoordinationResult<Vec<(String, String)>>;

    /// Watch a prefix for changes, including lease-expiry deletes.
    ///
    /// Every observed change is delivered exactly once to the returned
    /// channel; the watch ends when the receiver is dropped.
    async fn watch_prefix(
        &self,
        prefix: &str,
    ) -> CoordinationResult<mpsc::UnboundedReceiver<WatchEvent>>;
}

/// Deadline for the scoped lease release, independent of any request context
const RELEASE_DEADLINE: Duration = Duration::from_secs(3);

/// Scoped ownership of an acquired lease
///
/// Callers release explicitly on their exit paths with [`LeaseGuard::release`],
/// which uses a fresh deadline so release still happens when the surrounding
/// request was cancelled. Dropping an unreleased guard spawns the release as
/// a backstop for panic paths.
pub struct LeaseGuard {
    store: Arc<dyn CoordinationStore>,
    key: String,
    released: bool,
}

impl LeaseGuard {
    pub fn new(store: Arc<dyn CoordinationStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            released: false,
        }
    }

    /// Release the lease under a fresh deadline. Failures are logged; the
    /// lease TTL bounds how long a failed release can block other holders.
    pub async fn release(mut self) {
        self.released = true;
        match timeout(RELEASE_DEADLINE, self.store.release_lease(&self.key)).await {
            Ok(Ok(())) => debug!("🔓 Released lease {}", self.key),
            Ok(Err(e)) => warn!("Failed to release lease {}: {}", self.key, e),
            Err(_) => warn!(
                "Timed out releasing lease {} after {:?}",
                self.key, RELEASE_DEADLINE
            ),
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Ok(Err(e)) = timeout(RELEASE_DEADLINE, store.release_lease(&key)).await {
                    warn!("Failed to release lease {} from drop: {}", key, e);
                }
            });
        } else {
            warn!("Lease {} dropped outside a runtime; waiting for TTL expiry", key);
        }
    }
}
