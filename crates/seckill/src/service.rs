//! Service facade: the surface the outer layer (HTTP glue, CLI) talks to
//!
//! One long-lived object owns the four store adapters and the sub-services.
//! `start` brings up the background loops (config watcher, two event
//! consumers); `shutdown` cancels them and waits. Administrative operations
//! are gated by a configured admin token, distinct from user-facing flow.

use crate::admission::AdmissionGate;
use crate::config::EngineConfig;
use crate::engine::SeckillEngine;
use crate::error::{Result, SeckillError};
use crate::keys;
use crate::token::TokenService;
use crate::watcher::{BlacklistEntry, ConfigCache, ConfigWatcher};
use chrono::Utc;
use coordination_store::CoordinationStore;
use counter_store::CounterStore;
use durable_store::DurableStore;
use event_bus::EventBus;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The flash-sale core, fully wired
pub struct SeckillService {
    durable: Arc<dyn DurableStore>,
    coordination: Arc<dyn CoordinationStore>,
    bus: Arc<dyn EventBus>,
    tokens: TokenService,
    admission: AdmissionGate,
    engine: SeckillEngine,
    cache: Arc<ConfigCache>,
    config: EngineConfig,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SeckillService {
    /// Wire the core from already-connected adapters.
    pub fn new(
        config: EngineConfig,
        counter: Arc<dyn CounterStore>,
        durable: Arc<dyn DurableStore>,
        coordination: Arc<dyn CoordinationStore>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let cache = Arc::new(ConfigCache::new());
        let tokens = TokenService::new(counter.clone());
        let admission = AdmissionGate::new(
            counter.clone(),
            durable.clone(),
            coordination.clone(),
            tokens.clone(),
            cache.clone(),
            config.rate_window,
        );
        let engine = SeckillEngine::new(
            counter.clone(),
            durable.clone(),
            coordination.clone(),
            bus.clone(),
            tokens.clone(),
            cancel.clone(),
        );

        Self {
            durable,
            coordination,
            bus,
            tokens,
            admission,
            engine,
            cache,
            config,
            cancel,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Connect the four production adapters from configuration and wire the
    /// core around them.
    pub async fn connect(config: EngineConfig) -> Result<Self> {
        let counter: Arc<dyn CounterStore> =
            Arc::new(counter_store::RedisCounterStore::connect(&config.redis_url).await?);
        let durable: Arc<dyn DurableStore> = Arc::new(
            durable_store::MysqlDurableStore::connect(
                &config.database_url,
                durable_store::mysql::PoolConfig::default(),
            )
            .await?,
        );
        let coordination: Arc<dyn CoordinationStore> = Arc::new(
            coordination_store::EtcdCoordinationStore::connect(&config.etcd_endpoints).await?,
        );
        let bus: Arc<dyn EventBus> = Arc::new(
            event_bus::NatsEventBus::connect(&config.nats_url, &config.stream_name).await?,
        );

        Ok(Self::new(config, counter, durable, coordination, bus))
    }

    /// Seed defaults, take the config snapshot, and spawn the background
    /// loops. Call once.
    pub async fn start(&self) -> Result<()> {
        let watcher = ConfigWatcher::new(self.coordination.clone(), self.cache.clone());
        watcher.seed_defaults().await?;
        watcher.load_snapshot().await?;

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(watcher.run(self.cancel.clone())));

        let order_consumer = crate::consumer::EventConsumers::new(
            self.bus.clone(),
            self.durable.clone(),
            self.config.consumer_group.clone(),
        );
        let cancel = self.cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = order_consumer.run_order_consumer(cancel).await {
                error!("Order consumer exited: {}", e);
            }
        }));

        let payment_consumer = crate::consumer::EventConsumers::new(
            self.bus.clone(),
            self.durable.clone(),
            self.config.consumer_group.clone(),
        );
        let cancel = self.cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = payment_consumer.run_payment_consumer(cancel).await {
                error!("Payment consumer exited: {}", e);
            }
        }));

        info!("Seckill core started");
        Ok(())
    }

    /// Cancel the background loops and wait for them to wind down.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        info!("Seckill core stopped");
    }

    // ----- user-facing surface -----

    /// Issue a 24-hour session token for a logged-in user.
    pub async fn issue_session_token(&self, user_id: i64) -> Result<String> {
        self.tokens.issue_session(user_id).await
    }

    /// Resolve a session token to its user.
    pub async fn validate_session_token(&self, token: &str) -> Result<i64> {
        self.tokens.validate_session(token).await
    }

    /// Run the admission gates; success returns a purchase token.
    pub async fn authorize_purchase_attempt(
        &self,
        user_id: i64,
        product_id: i64,
    ) -> Result<String> {
        self.admission
            .authorize_purchase_attempt(user_id, product_id)
            .await
    }

    /// Redeem a purchase token for an order id.
    pub async fn commit_purchase(
        &self,
        user_id: i64,
        product_id: i64,
        purchase_token: &str,
    ) -> Result<String> {
        self.engine
            .commit_purchase(user_id, product_id, purchase_token)
            .await
    }

    /// Emit a payment outcome event for an order.
    pub async fn simulate_payment(&self, order_id: &str, success: bool) -> Result<()> {
        self.engine.simulate_payment(order_id, success).await
    }

    // ----- administrative surface -----

    fn require_admin(&self, admin_token: &str) -> Result<()> {
        match &self.config.admin_token {
            Some(expected) if constant_time_eq(expected.as_bytes(), admin_token.as_bytes()) => {
                Ok(())
            }
            Some(_) => Err(SeckillError::Unauthorized),
            None => {
                warn!("Administrative call refused: no admin token configured");
                Err(SeckillError::Unauthorized)
            }
        }
    }

    /// Copy a promotion's remaining count into the counter store cell.
    pub async fn preload_stock(&self, admin_token: &str, product_id: i64) -> Result<()> {
        self.require_admin(admin_token)?;
        self.admission.preload_stock(product_id).await
    }

    /// Clear a product's orders and restore its promotion stock.
    pub async fn reset_product(&self, admin_token: &str, product_id: i64) -> Result<()> {
        self.require_admin(admin_token)?;
        self.durable
            .reset_product(product_id, self.config.reset_stock_count)
            .await?;
        info!(
            "Product {} reset to {} units; preload again before reopening",
            product_id, self.config.reset_stock_count
        );
        Ok(())
    }

    /// Write a recognized config key after validating its value.
    pub async fn set_config(&self, admin_token: &str, key: &str, value: &str) -> Result<()> {
        self.require_admin(admin_token)?;
        match key {
            keys::CONFIG_ENABLED | keys::CONFIG_STOCK_PRELOAD => {
                if value != "true" && value != "false" {
                    return Err(SeckillError::invalid_parameter(
                        key,
                        format!("expected \"true\" or \"false\", got {value:?}"),
                    ));
                }
            }
            keys::CONFIG_RATE_LIMIT => match value.parse::<i64>() {
                Ok(limit) if limit >= 1 => {}
                _ => {
                    return Err(SeckillError::invalid_parameter(
                        key,
                        format!("expected a positive integer, got {value:?}"),
                    ))
                }
            },
            other => {
                return Err(SeckillError::invalid_parameter(
                    "key",
                    format!("unrecognized config key {other:?}"),
                ))
            }
        }
        self.coordination.put(key, value).await?;
        Ok(())
    }

    /// Blacklist a user for `ttl`; the entry expires on its own.
    pub async fn add_blacklist(
        &self,
        admin_token: &str,
        user_id: i64,
        reason: &str,
        ttl: Duration,
    ) -> Result<()> {
        self.require_admin(admin_token)?;
        let now = Utc::now().timestamp_millis();
        let entry = BlacklistEntry {
            user_id,
            reason: reason.to_string(),
            added_at: now,
            expires_at: now + ttl.as_millis() as i64,
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| SeckillError::StoreUnavailable(format!("encode blacklist entry: {e}")))?;
        self.coordination
            .put_with_lease(&keys::blacklist(user_id), &json, ttl)
            .await?;
        info!("User {} blacklisted for {:?}: {}", user_id, ttl, reason);
        Ok(())
    }

    /// Remove a user from the blacklist before its entry expires.
    pub async fn remove_blacklist(&self, admin_token: &str, user_id: i64) -> Result<()> {
        self.require_admin(admin_token)?;
        self.coordination.delete(&keys::blacklist(user_id)).await?;
        Ok(())
    }

    /// List the current blacklist entries.
    pub async fn list_blacklist(&self, admin_token: &str) -> Result<Vec<BlacklistEntry>> {
        self.require_admin(admin_token)?;
        let raw = self.coordination.list_prefix(keys::BLACKLIST_PREFIX).await?;
        let mut entries = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            match serde_json::from_str::<BlacklistEntry>(&value) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping malformed blacklist entry {}: {}", key, e),
            }
        }
        Ok(entries)
    }
}

/// Length-safe comparison that does not leak a prefix match through timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_compares_content() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secrets"));
        assert!(constant_time_eq(b"", b""));
    }
}
