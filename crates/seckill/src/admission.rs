//! Admission gates for purchase attempts
//!
//! A request that clears every gate walks away with a single-use purchase
//! token; everything here is designed to reject losers quickly and cheaply.
//! Flags and blacklist membership come from the watcher cache, the stock
//! peek is advisory, and only the rate-limit gate writes anything.

use crate::error::{Result, SeckillError};
use crate::keys;
use crate::retry::{with_deadline, LEASE_ACQUIRE_DEADLINE, SCRIPT_DEADLINE, TXN_DEADLINE};
use crate::token::TokenService;
use crate::watcher::ConfigCache;
use chrono::Utc;
use coordination_store::{CoordinationStore, LeaseGuard};
use counter_store::CounterStore;
use durable_store::DurableStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// TTL of the per-user-product admission lease
const ATTEMPT_LEASE_TTL: Duration = Duration::from_secs(10);
/// TTL of the administrative preload lease
const PRELOAD_LEASE_TTL: Duration = Duration::from_secs(30);

/// Composes the admission gates in strict order
pub struct AdmissionGate {
    counter: Arc<dyn CounterStore>,
    durable: Arc<dyn DurableStore>,
    coordination: Arc<dyn CoordinationStore>,
    tokens: TokenService,
    cache: Arc<ConfigCache>,
    rate_window: Duration,
}

impl AdmissionGate {
    pub fn new(
        counter: Arc<dyn CounterStore>,
        durable: Arc<dyn DurableStore>,
        coordination: Arc<dyn CoordinationStore>,
        tokens: TokenService,
        cache: Arc<ConfigCache>,
        rate_window: Duration,
    ) -> Self {
        Self {
            counter,
            durable,
            coordination,
            tokens,
            cache,
            rate_window,
        }
    }

    /// Run the gates; success issues a purchase token.
    ///
    /// The per-user-product lease squelches a client hammering the gate with
    /// the same attempt; it is released on every exit path.
    pub async fn authorize_purchase_attempt(
        &self,
        user_id: i64,
        product_id: i64,
    ) -> Result<String> {
        let lease_key = keys::attempt_lease(user_id, product_id);
        let acquired = with_deadline(
            LEASE_ACQUIRE_DEADLINE,
            self.coordination.acquire_lease(&lease_key, ATTEMPT_LEASE_TTL),
        )
        .await?;
        if !acquired {
            debug!(
                "Admission lease held, user={}, product={}",
                user_id, product_id
            );
            return Err(SeckillError::DuplicateAttempt {
                user_id,
                product_id,
            });
        }

        let guard = LeaseGuard::new(self.coordination.clone(), lease_key);
        let result = self.run_gates(user_id, product_id).await;
        guard.release().await;
        result
    }

    async fn run_gates(&self, user_id: i64, product_id: i64) -> Result<String> {
        if !self.cache.seckill_enabled() {
            return Err(SeckillError::Disabled);
        }

        if self.cache.is_blacklisted(user_id) {
            info!("Rejected blacklisted user {}", user_id);
            return Err(SeckillError::Blacklisted(user_id));
        }

        let product = with_deadline(TXN_DEADLINE, self.durable.find_product(product_id)).await?;
        if product.is_none() {
            return Err(SeckillError::NoPromotion(product_id));
        }
        let promotion = with_deadline(
            TXN_DEADLINE,
            self.durable.find_promotion_by_product(product_id),
        )
        .await?
        .ok_or(SeckillError::NoPromotion(product_id))?;

        let now = Utc::now();
        if now < promotion.start_at || now >= promotion.end_at {
            debug!(
                "Outside window for product {}: now={}, start={}, end={}",
                product_id, now, promotion.start_at, promotion.end_at
            );
            return Err(SeckillError::OutOfWindow(product_id));
        }

        // Advisory fast filter; the commit path re-checks atomically.
        let stock = with_deadline(
            SCRIPT_DEADLINE,
            self.counter.get_i64(&keys::stock(product_id)),
        )
        .await?;
        if stock.unwrap_or(0) <= 0 {
            return Err(SeckillError::SoldOut(product_id));
        }

        let limit = self.cache.rate_limit();
        let admitted = with_deadline(
            SCRIPT_DEADLINE,
            self.counter
                .rate_limit(&keys::rate_window(user_id), limit, self.rate_window),
        )
        .await?;
        if !admitted {
            info!("Rate limited user {} (limit {})", user_id, limit);
            return Err(SeckillError::RateLimited(user_id));
        }

        self.tokens.issue_purchase(user_id, product_id).await
    }

    /// Administrative stock preload: copy the promotion's remaining count
    /// into the counter store cell. Required once before the campaign opens.
    pub async fn preload_stock(&self, product_id: i64) -> Result<()> {
        if !self.cache.stock_preload() {
            warn!(
                "Stock preload disabled by config; skipping product {}",
                product_id
            );
            return Ok(());
        }

        let lease_key = keys::preload_lease(product_id);
        let acquired = with_deadline(
            LEASE_ACQUIRE_DEADLINE,
            self.coordination.acquire_lease(&lease_key, PRELOAD_LEASE_TTL),
        )
        .await?;
        if !acquired {
            return Err(SeckillError::Busy(format!(
                "preload already running for product {product_id}"
            )));
        }
        let guard = LeaseGuard::new(self.coordination.clone(), lease_key);

        let result = async {
            let promotion = with_deadline(
                TXN_DEADLINE,
                self.durable.find_promotion_by_product(product_id),
            )
            .await?
            .ok_or(SeckillError::NoPromotion(product_id))?;

            with_deadline(
                SCRIPT_DEADLINE,
                self.counter
                    .set_i64(&keys::stock(product_id), promotion.remaining_count),
            )
            .await?;

            info!(
                "Preloaded stock for product {}: {}",
                product_id, promotion.remaining_count
            );
            Ok(())
        }
        .await;

        guard.release().await;
        result
    }
}
