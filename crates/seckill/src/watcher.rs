//! Config and blacklist watch loop
//!
//! Admission decisions must stay cheap, so the flags and the blacklist live
//! in an in-process cache maintained from coordination store watches. The
//! cache may briefly run stale; the durable compare-and-set remains the
//! authority, and watches converge within seconds.

use crate::error::Result;
use crate::keys;
use coordination_store::{CoordinationStore, WatchEvent};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default for `/config/seckill/enabled`
pub const DEFAULT_ENABLED: bool = true;
/// Default for `/config/rate_limit`
pub const DEFAULT_RATE_LIMIT: i64 = 10;
/// Default for `/config/stock_preload`
pub const DEFAULT_STOCK_PRELOAD: bool = true;

/// A blacklist record as stored under `/blacklist/<user_id>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub user_id: i64,
    pub reason: String,
    /// Epoch milliseconds
    pub added_at: i64,
    /// Epoch milliseconds; the store's lease deletes the entry around this time
    pub expires_at: i64,
}

#[derive(Debug)]
struct CacheState {
    enabled: bool,
    rate_limit: i64,
    stock_preload: bool,
    blacklist: HashMap<i64, BlacklistEntry>,
}

/// The one process-wide mutable state: many readers on the admission path,
/// a single writer driven by watch events
pub struct ConfigCache {
    state: RwLock<CacheState>,
}

impl Default for ConfigCache {
    fn default() -> Self {
        Self {
            state: RwLock::new(CacheState {
                enabled: DEFAULT_ENABLED,
                rate_limit: DEFAULT_RATE_LIMIT,
                stock_preload: DEFAULT_STOCK_PRELOAD,
                blacklist: HashMap::new(),
            }),
        }
    }
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seckill_enabled(&self) -> bool {
        self.state.read().enabled
    }

    pub fn rate_limit(&self) -> i64 {
        self.state.read().rate_limit
    }

    pub fn stock_preload(&self) -> bool {
        self.state.read().stock_preload
    }

    pub fn is_blacklisted(&self, user_id: i64) -> bool {
        self.state.read().blacklist.contains_key(&user_id)
    }

    /// Apply a config key change; deletes fall back to the default.
    pub fn apply_config(&self, key: &str, value: Option<&str>) {
        let mut state = self.state.write();
        match key {
            keys::CONFIG_ENABLED => {
                state.enabled = value.map(|v| v == "true").unwrap_or(DEFAULT_ENABLED);
                info!("Campaign switch now {}", state.enabled);
            }
            keys::CONFIG_RATE_LIMIT => {
                state.rate_limit = match value {
                    None => DEFAULT_RATE_LIMIT,
                    Some(raw) => match raw.parse::<i64>() {
                        Ok(limit) if limit >= 1 => limit,
                        _ => {
                            warn!("Ignoring invalid rate limit value {:?}", raw);
                            state.rate_limit
                        }
                    },
                };
                info!("Rate limit now {}", state.rate_limit);
            }
            keys::CONFIG_STOCK_PRELOAD => {
                state.stock_preload = value.map(|v| v == "true").unwrap_or(DEFAULT_STOCK_PRELOAD);
                info!("Stock preload switch now {}", state.stock_preload);
            }
            other => debug!("Ignoring unrecognized config key {}", other),
        }
    }

    fn apply_blacklist_put(&self, key: &str, value: &str) {
        let Some(user_id) = keys::blacklist_user(key) else {
            warn!("Ignoring malformed blacklist key {}", key);
            return;
        };
        match serde_json::from_str::<BlacklistEntry>(value) {
            Ok(entry) => {
                info!("User {} blacklisted: {}", user_id, entry.reason);
                self.state.write().blacklist.insert(user_id, entry);
            }
            Err(e) => warn!("Ignoring malformed blacklist entry for {}: {}", key, e),
        }
    }

    fn apply_blacklist_delete(&self, key: &str) {
        let Some(user_id) = keys::blacklist_user(key) else {
            return;
        };
        if self.state.write().blacklist.remove(&user_id).is_some() {
            info!("User {} removed from blacklist", user_id);
        }
    }
}

/// Maintains the cache from the `/config/` and `/blacklist/` prefixes
pub struct ConfigWatcher {
    coordination: Arc<dyn CoordinationStore>,
    cache: Arc<ConfigCache>,
}

impl ConfigWatcher {
    pub fn new(coordination: Arc<dyn CoordinationStore>, cache: Arc<ConfigCache>) -> Self {
        Self {
            coordination,
            cache,
        }
    }

    /// Write the default config keys if they are absent, so a fresh cluster
    /// starts in a known state.
    pub async fn seed_defaults(&self) -> Result<()> {
        let defaults = [
            (keys::CONFIG_ENABLED, DEFAULT_ENABLED.to_string()),
            (keys::CONFIG_RATE_LIMIT, DEFAULT_RATE_LIMIT.to_string()),
            (keys::CONFIG_STOCK_PRELOAD, DEFAULT_STOCK_PRELOAD.to_string()),
        ];
        for (key, value) in defaults {
            if self.coordination.get(key).await?.is_none() {
                self.coordination.put(key, &value).await?;
                info!("Seeded default config {} = {}", key, value);
            }
        }
        Ok(())
    }

    /// Load the current config and blacklist into the cache with point reads
    /// before the watches take over.
    pub async fn load_snapshot(&self) -> Result<()> {
        for key in [
            keys::CONFIG_ENABLED,
            keys::CONFIG_RATE_LIMIT,
            keys::CONFIG_STOCK_PRELOAD,
        ] {
            if let Some(entry) = self.coordination.get(key).await? {
                self.cache.apply_config(key, Some(&entry.value));
            }
        }
        for (key, value) in self.coordination.list_prefix(keys::BLACKLIST_PREFIX).await? {
            self.cache.apply_blacklist_put(&key, &value);
        }
        Ok(())
    }

    /// Run the watch loop until cancelled, re-establishing the watches if a
    /// stream drops.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Starting config watcher");
        loop {
            match self.watch_once(&cancel).await {
                Ok(()) => {
                    info!("Config watcher stopped");
                    return;
                }
                Err(e) => {
                    warn!("Config watch interrupted: {}; re-establishing", e);
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                    if let Err(e) = self.load_snapshot().await {
                        warn!("Snapshot reload failed: {}", e);
                    }
                }
            }
        }
    }

    async fn watch_once(&self, cancel: &CancellationToken) -> Result<()> {
        let mut config_rx = self.coordination.watch_prefix(keys::CONFIG_PREFIX).await?;
        let mut blacklist_rx = self
            .coordination
            .watch_prefix(keys::BLACKLIST_PREFIX)
            .await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                event = config_rx.recv() => {
                    let Some(event) = event else {
                        return Err(crate::error::SeckillError::StoreUnavailable(
                            "config watch stream ended".to_string(),
                        ));
                    };
                    match event {
                        WatchEvent::Put { key, value } => self.cache.apply_config(&key, Some(&value)),
                        WatchEvent::Delete { key } => self.cache.apply_config(&key, None),
                    }
                }
                event = blacklist_rx.recv() => {
                    let Some(event) = event else {
                        return Err(crate::error::SeckillError::StoreUnavailable(
                            "blacklist watch stream ended".to_string(),
                        ));
                    };
                    match event {
                        WatchEvent::Put { key, value } => self.cache.apply_blacklist_put(&key, &value),
                        WatchEvent::Delete { key } => self.cache.apply_blacklist_delete(&key),
                    }
                }
            }
        }
    }
}
