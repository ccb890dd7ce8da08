//! Two-phase purchase commit
//!
//! The fast path pre-decrements the advisory counter, then commits in the
//! durable store with a versioned compare-and-set plus the unique order key.
//! The counter merely filters; the durable store is authoritative, so a
//! failed commit after a successful pre-decrement restores the counter by
//! exactly one and nothing worse than a transiently pessimistic counter can
//! come of it.

use crate::error::{Result, SeckillError};
use crate::keys;
use crate::messages::{
    OrderId, OrderMessage, PaymentMessage, HEADER_MESSAGE_TYPE, HEADER_ORDER_ID,
    MESSAGE_TYPE_ORDER, MESSAGE_TYPE_PAYMENT,
};
use crate::retry::{retry_with_backoff, with_deadline, LEASE_ACQUIRE_DEADLINE, SCRIPT_DEADLINE, TXN_DEADLINE};
use crate::token::TokenService;
use chrono::Utc;
use coordination_store::{CoordinationStore, LeaseGuard};
use counter_store::{CounterStore, StockDecrement};
use durable_store::{CommittedOrder, DurableStore, OrderState};
use event_bus::EventBus;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// TTL of the per-user commit lease
const USER_LEASE_TTL: Duration = Duration::from_secs(10);
/// Additional attempts after a versioned-update conflict before giving up
const CAS_RETRIES: u32 = 2;
/// Publish attempts for event emission (backoff 0, 1, 4 seconds)
const EMIT_ATTEMPTS: u32 = 3;

/// Restores the advisory counter if the durable commit does not land
///
/// Armed after the pre-decrement succeeds, disarmed once the durable store
/// has taken over. The drop hook covers panic paths; normal failure paths
/// call [`StockGuard::restore`] so compensation completes before the error
/// returns.
struct StockGuard {
    counter: Arc<dyn CounterStore>,
    key: String,
    armed: bool,
}

impl StockGuard {
    fn new(counter: Arc<dyn CounterStore>, key: String) -> Self {
        Self {
            counter,
            key,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Best-effort compensation: put the reserved unit back. A failure here
    /// leaves the counter pessimistic until out-of-band reconciliation.
    async fn restore(mut self) {
        self.armed = false;
        match with_deadline(SCRIPT_DEADLINE, self.counter.incr(&self.key)).await {
            Ok(value) => debug!("Restored stock cell {}, now {}", self.key, value),
            Err(e) => error!(
                "Stock compensation failed for {}: {}; counter left pessimistic",
                self.key, e
            ),
        }
    }
}

impl Drop for StockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let counter = self.counter.clone();
        let key = std::mem::take(&mut self.key);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = with_deadline(SCRIPT_DEADLINE, counter.incr(&key)).await {
                    error!("Stock compensation failed for {} from drop: {}", key, e);
                }
            });
        } else {
            error!(
                "Stock guard for {} dropped outside a runtime; counter left pessimistic",
                key
            );
        }
    }
}

/// Commits purchases and emits the resulting events
pub struct SeckillEngine {
    counter: Arc<dyn CounterStore>,
    durable: Arc<dyn DurableStore>,
    coordination: Arc<dyn CoordinationStore>,
    bus: Arc<dyn EventBus>,
    tokens: TokenService,
    cancel: CancellationToken,
}

impl SeckillEngine {
    pub fn new(
        counter: Arc<dyn CounterStore>,
        durable: Arc<dyn DurableStore>,
        coordination: Arc<dyn CoordinationStore>,
        bus: Arc<dyn EventBus>,
        tokens: TokenService,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            counter,
            durable,
            coordination,
            bus,
            tokens,
            cancel,
        }
    }

    /// Redeem a purchase token for an order.
    ///
    /// The token burns first: a failed commit costs the caller their token,
    /// but nothing else was reserved yet at that point. The per-user lease
    /// then serializes the user's attempts across products, so at most one
    /// commit per user is ever outstanding.
    pub async fn commit_purchase(
        &self,
        user_id: i64,
        product_id: i64,
        purchase_token: &str,
    ) -> Result<String> {
        self.tokens
            .validate_and_consume(purchase_token, user_id, product_id)
            .await?;

        let lease_key = keys::user_lease(user_id);
        let acquired = match tokio::time::timeout(
            LEASE_ACQUIRE_DEADLINE,
            self.coordination.acquire_lease(&lease_key, USER_LEASE_TTL),
        )
        .await
        {
            Err(_) => {
                return Err(SeckillError::Busy(format!(
                    "user {user_id} lease acquisition timed out"
                )))
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(acquired)) => acquired,
        };
        if !acquired {
            return Err(SeckillError::Busy(format!(
                "user {user_id} already has a purchase in flight"
            )));
        }

        let lease = LeaseGuard::new(self.coordination.clone(), lease_key);
        let result = self.reserve_and_commit(user_id, product_id).await;
        lease.release().await;
        result
    }

    async fn reserve_and_commit(&self, user_id: i64, product_id: i64) -> Result<String> {
        let stock_key = keys::stock(product_id);
        let decrement =
            with_deadline(SCRIPT_DEADLINE, self.counter.check_and_decr_stock(&stock_key)).await?;
        match decrement {
            StockDecrement::Uninitialized => {
                warn!("Stock cell missing for product {}; preload required", product_id);
                return Err(SeckillError::StockUninitialized(product_id));
            }
            StockDecrement::SoldOut => return Err(SeckillError::SoldOut(product_id)),
            StockDecrement::Remaining(remaining) => {
                debug!(
                    "Pre-decremented product {}, counter now {}",
                    product_id, remaining
                );
            }
        }

        let mut guard = StockGuard::new(self.counter.clone(), stock_key);

        let committed = match self.commit_durable(user_id, product_id).await {
            Ok(committed) => committed,
            Err(e) => {
                guard.restore().await;
                return Err(e);
            }
        };
        guard.disarm();

        let order_id = OrderId::generate(user_id, product_id);
        info!(
            "Order committed: id={}, user={}, product={}, remaining={}",
            order_id, user_id, product_id, committed.remaining
        );

        self.emit_order_event(&order_id, committed.price).await;
        Ok(order_id.to_string())
    }

    /// Durable commit with bounded retries when the versioned update loses
    /// against a concurrent purchase; persistent conflict means the stock is
    /// gone or going, so it surfaces as sold out.
    async fn commit_durable(&self, user_id: i64, product_id: i64) -> Result<CommittedOrder> {
        let mut conflicts = 0u32;
        loop {
            let attempt =
                with_deadline(TXN_DEADLINE, self.durable.commit_order(user_id, product_id)).await;
            match attempt {
                Ok(committed) => return Ok(committed),
                Err(SeckillError::StockConflict(_)) if conflicts < CAS_RETRIES => {
                    conflicts += 1;
                    debug!(
                        "Version conflict on product {} (attempt {}); retrying",
                        product_id, conflicts
                    );
                }
                Err(SeckillError::StockConflict(_)) => {
                    debug!(
                        "Version conflict on product {} persisted; reporting sold out",
                        product_id
                    );
                    return Err(SeckillError::SoldOut(product_id));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Emission is a notification: loss is logged, the order stands.
    async fn emit_order_event(&self, order_id: &OrderId, price: f64) {
        let message = OrderMessage {
            order_id: order_id.to_string(),
            user_id: order_id.user_id,
            product_id: order_id.product_id,
            price,
            status: OrderState::Created.as_i16() as i32,
            created_at: Utc::now(),
        };
        let payload = match serde_json::to_vec(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode order event for {}: {}", message.order_id, e);
                return;
            }
        };

        let key = message.order_id.clone();
        let publish = retry_with_backoff(EMIT_ATTEMPTS, &self.cancel, || {
            let payload = payload.clone();
            let key = key.clone();
            async move {
                self.bus
                    .publish(
                        key.as_str(),
                        &[
                            (HEADER_MESSAGE_TYPE, MESSAGE_TYPE_ORDER),
                            (HEADER_ORDER_ID, key.as_str()),
                        ],
                        &payload,
                    )
                    .await
            }
        })
        .await;

        if let Err(e) = publish {
            error!(
                "Order event for {} lost after {} attempts: {}",
                key, EMIT_ATTEMPTS, e
            );
        }
    }

    /// Emit a payment outcome for an existing order. The event handlers own
    /// any resulting state transition.
    pub async fn simulate_payment(&self, order_id: &str, success: bool) -> Result<()> {
        let parsed = OrderId::parse(order_id).ok_or_else(|| {
            SeckillError::invalid_parameter("order_id", format!("malformed id {order_id:?}"))
        })?;

        let status = if success {
            OrderState::Paid
        } else {
            OrderState::PaymentFailed
        };
        let message = PaymentMessage {
            order_id: order_id.to_string(),
            status: status.as_i16() as i32,
            time: Utc::now(),
        };
        let payload = serde_json::to_vec(&message)
            .map_err(|e| SeckillError::StoreUnavailable(format!("encode payment event: {e}")))?;

        info!(
            "Payment simulated for order {} (user {}): {:?}",
            order_id, parsed.user_id, status
        );

        retry_with_backoff(EMIT_ATTEMPTS, &self.cancel, || {
            let payload = payload.clone();
            async move {
                self.bus
                    .publish(
                        order_id,
                        &[
                            (HEADER_MESSAGE_TYPE, MESSAGE_TYPE_PAYMENT),
                            (HEADER_ORDER_ID, order_id),
                        ],
                        &payload,
                    )
                    .await
            }
        })
        .await
        .map_err(SeckillError::from)
    }
}
