//! Long-lived event consumers
//!
//! Two consumer groups drain the event stream: the order group observes
//! order lifecycle events, the payment group applies payment outcomes to
//! order rows. Delivery is at-least-once, so every handler compares the
//! order's current state before transitioning; a redelivered event finds the
//! transition already made and does nothing.
//!
//! Stock is intentionally NOT restored when a payment fails: an unpaid order
//! keeps its unit until an administrative cancel or reset. The hook below is
//! where restoration would go if that policy ever changes.

use crate::error::Result;
use crate::messages::{
    OrderId, OrderMessage, PaymentMessage, HEADER_MESSAGE_TYPE, MESSAGE_TYPE_ORDER,
    MESSAGE_TYPE_PAYMENT,
};
use durable_store::{DurableStore, OrderState};
use event_bus::{BusMessage, EventBus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Spawns and runs the two consumer loops
pub struct EventConsumers {
    bus: Arc<dyn EventBus>,
    durable: Arc<dyn DurableStore>,
    group: String,
}

impl EventConsumers {
    pub fn new(bus: Arc<dyn EventBus>, durable: Arc<dyn DurableStore>, group: String) -> Self {
        Self { bus, durable, group }
    }

    /// Drain order events until cancelled.
    pub async fn run_order_consumer(self, cancel: CancellationToken) -> Result<()> {
        info!("Starting order consumer, group={}", self.group);
        let mut rx = self.bus.subscribe(&self.group).await?;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Order consumer stopped");
                    return Ok(());
                }
                message = rx.recv() => {
                    let Some(message) = message else {
                        warn!("Order consumer channel closed");
                        return Ok(());
                    };
                    if message.header(HEADER_MESSAGE_TYPE) != Some(MESSAGE_TYPE_ORDER) {
                        continue;
                    }
                    if let Err(e) = self.handle_order_message(&message).await {
                        // Handler errors are logged, never redelivered.
                        warn!("Order handler failed for key {}: {}", message.key, e);
                    }
                }
            }
        }
    }

    /// Drain payment events until cancelled; runs in the `<group>_payment`
    /// consumer group.
    pub async fn run_payment_consumer(self, cancel: CancellationToken) -> Result<()> {
        let group = format!("{}_payment", self.group);
        info!("Starting payment consumer, group={}", group);
        let mut rx = self.bus.subscribe(&group).await?;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Payment consumer stopped");
                    return Ok(());
                }
                message = rx.recv() => {
                    let Some(message) = message else {
                        warn!("Payment consumer channel closed");
                        return Ok(());
                    };
                    if message.header(HEADER_MESSAGE_TYPE) != Some(MESSAGE_TYPE_PAYMENT) {
                        continue;
                    }
                    if let Err(e) = self.handle_payment_message(&message).await {
                        warn!("Payment handler failed for key {}: {}", message.key, e);
                    }
                }
            }
        }
    }

    async fn handle_order_message(&self, message: &BusMessage) -> Result<()> {
        let order: OrderMessage = match serde_json::from_slice(&message.payload) {
            Ok(order) => order,
            Err(e) => {
                warn!("Skipping undecodable order message, key={}: {}", message.key, e);
                return Ok(());
            }
        };

        match OrderState::from_wire(order.status) {
            Some(OrderState::Created) => {
                // Cross-check that the durable row the event refers to exists.
                let state = self
                    .durable
                    .order_state(order.user_id, order.product_id)
                    .await?;
                match state {
                    Some(_) => info!(
                        "Order recorded: id={}, user={}, product={}, price={}",
                        order.order_id, order.user_id, order.product_id, order.price
                    ),
                    None => warn!(
                        "Order event {} has no durable row; commit may have been rolled back",
                        order.order_id
                    ),
                }
            }
            Some(state) => debug!("Order {} lifecycle event: {:?}", order.order_id, state),
            None => warn!(
                "Order {} carries unknown status {}",
                order.order_id, order.status
            ),
        }
        Ok(())
    }

    async fn handle_payment_message(&self, message: &BusMessage) -> Result<()> {
        let payment: PaymentMessage = match serde_json::from_slice(&message.payload) {
            Ok(payment) => payment,
            Err(e) => {
                warn!(
                    "Skipping undecodable payment message, key={}: {}",
                    message.key, e
                );
                return Ok(());
            }
        };

        let Some(order_id) = OrderId::parse(&payment.order_id) else {
            warn!("Payment event carries malformed order id {:?}", payment.order_id);
            return Ok(());
        };

        match OrderState::from_wire(payment.status) {
            Some(OrderState::Paid) => {
                let transitioned = self
                    .durable
                    .transition_order(
                        order_id.user_id,
                        order_id.product_id,
                        OrderState::Created,
                        OrderState::Paid,
                    )
                    .await?;
                if transitioned {
                    info!("Order {} marked paid", payment.order_id);
                } else {
                    debug!(
                        "Order {} not in CREATED; payment event already applied",
                        payment.order_id
                    );
                }
            }
            Some(OrderState::PaymentFailed) => {
                let transitioned = self
                    .durable
                    .transition_order(
                        order_id.user_id,
                        order_id.product_id,
                        OrderState::Created,
                        OrderState::PaymentFailed,
                    )
                    .await?;
                if transitioned {
                    info!("Order {} marked payment-failed", payment.order_id);
                    // Stock restoration hook: intentionally left inactive.
                    // The unit stays reserved until administrative action.
                } else {
                    debug!(
                        "Order {} not in CREATED; failure event already applied",
                        payment.order_id
                    );
                }
            }
            Some(state) => debug!(
                "Ignoring payment event with status {:?} for order {}",
                state, payment.order_id
            ),
            None => warn!(
                "Payment event for {} carries unknown status {}",
                payment.order_id, payment.status
            ),
        }
        Ok(())
    }
}
