//! Event payloads and the order-id format
//!
//! Order ids are `<user_id>-<product_id>-<nanoseconds_since_epoch>`;
//! uniqueness comes from the timestamp plus the `(product_id, user_id)`
//! uniqueness in the durable store. Event payloads are JSON with the order
//! status as a bare integer on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Header naming the message kind
pub const HEADER_MESSAGE_TYPE: &str = "message_type";
/// Header carrying the order id
pub const HEADER_ORDER_ID: &str = "order_id";
/// `message_type` value for order lifecycle events
pub const MESSAGE_TYPE_ORDER: &str = "order";
/// `message_type` value for payment outcome events
pub const MESSAGE_TYPE_PAYMENT: &str = "payment";

/// Order event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderMessage {
    pub order_id: String,
    pub user_id: i64,
    pub product_id: i64,
    pub price: f64,
    /// Order status on the wire: 0=CREATED, 1=PAID, 2=PAYMENT_FAILED,
    /// 3=CANCELLED
    pub status: i32,
    pub created_at: DateTime<Utc>,
}

/// Payment event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMessage {
    pub order_id: String,
    pub status: i32,
    pub time: DateTime<Utc>,
}

/// Structured form of an order id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderId {
    pub user_id: i64,
    pub product_id: i64,
    pub nanos: u128,
}

impl OrderId {
    /// Mint an order id for this instant.
    pub fn generate(user_id: i64, product_id: i64) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Self {
            user_id,
            product_id,
            nanos,
        }
    }

    /// Parse `<user_id>-<product_id>-<nanos>`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, '-');
        let user_id = parts.next()?.parse().ok()?;
        let product_id = parts.next()?.parse().ok()?;
        let nanos = parts.next()?.parse().ok()?;
        Some(Self {
            user_id,
            product_id,
            nanos,
        })
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.user_id, self.product_id, self.nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_ids_round_trip() {
        let id = OrderId::generate(1001, 2002);
        let parsed = OrderId::parse(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn malformed_order_ids_are_rejected() {
        assert!(OrderId::parse("").is_none());
        assert!(OrderId::parse("1001").is_none());
        assert!(OrderId::parse("1001-2002").is_none());
        assert!(OrderId::parse("a-b-c").is_none());
    }

    #[test]
    fn payment_payload_uses_bare_integer_status() {
        let message = PaymentMessage {
            order_id: "7-1001-42".to_string(),
            status: 2,
            time: Utc::now(),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"status\":2"));
    }
}
