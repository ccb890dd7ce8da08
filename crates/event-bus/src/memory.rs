//! In-memory event bus fanning messages out to per-group channels, used by
//! tests and local development.

use crate::{BusMessage, EventBus, EventBusResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Event bus held in process memory
///
/// Each consumer group owns one channel; a publish delivers the message once
/// to every group subscribed at that moment, which mirrors the per-group
/// delivery of the production bus closely enough for the engine's consumers.
#[derive(Clone, Default)]
pub struct MemoryEventBus {
    groups: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<BusMessage>>>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(
        &self,
        key: &str,
        headers: &[(&str, &str)],
        payload: &[u8],
    ) -> EventBusResult<()> {
        let message = BusMessage {
            key: key.to_string(),
            headers: headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            payload: payload.to_vec(),
        };

        let mut groups = self.groups.lock();
        groups.retain(|_, tx| tx.send(message.clone()).is_ok());
        Ok(())
    }

    async fn subscribe(&self, group: &str) -> EventBusResult<mpsc::UnboundedReceiver<BusMessage>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.groups.lock().insert(group.to_string(), tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn each_group_receives_every_message_once() {
        let bus = MemoryEventBus::new();
        let mut orders = bus.subscribe("orders").await.unwrap();
        let mut payments = bus.subscribe("orders_payment").await.unwrap();

        bus.publish("1-2-3", &[("message_type", "order")], b"{}")
            .await
            .unwrap();

        let for_orders = orders.recv().await.unwrap();
        let for_payments = payments.recv().await.unwrap();
        assert_eq!(for_orders.key, "1-2-3");
        assert_eq!(for_orders.header("message_type"), Some("order"));
        assert_eq!(for_payments.key, "1-2-3");

        assert!(orders.try_recv().is_err());
        assert!(payments.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_groups_are_pruned() {
        let bus = MemoryEventBus::new();
        let rx = bus.subscribe("orders").await.unwrap();
        drop(rx);

        bus.publish("k", &[], b"payload").await.unwrap();
        assert!(bus.groups.lock().is_empty());
    }
}
