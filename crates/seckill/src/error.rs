//! Client-facing error taxonomy of the flash-sale core
//!
//! Every failure carries a kind; adapters' own error types are folded into
//! `StoreUnavailable`/`Timeout` at the engine boundary, while business
//! rejections keep their precise kind so callers can decide whether a retry
//! makes sense.

use std::time::Duration;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, SeckillError>;

/// Every way a purchase attempt or administrative operation can fail
#[derive(Error, Debug)]
pub enum SeckillError {
    /// The campaign is switched off
    #[error("seckill campaign is disabled")]
    Disabled,

    /// The user is on the blacklist
    #[error("user {0} is blacklisted")]
    Blacklisted(i64),

    /// No promotion exists for the product
    #[error("no promotion for product {0}")]
    NoPromotion(i64),

    /// Outside the promotion's activity window
    #[error("product {0} is outside its activity window")]
    OutOfWindow(i64),

    /// The counter or the versioned commit says no stock remains
    #[error("product {0} is sold out")]
    SoldOut(i64),

    /// The per-user tumbling window is full
    #[error("rate limit exceeded for user {0}")]
    RateLimited(i64),

    /// The per-user-product attempt lease is already held
    #[error("attempt already in flight for user {user_id} on product {product_id}")]
    DuplicateAttempt { user_id: i64, product_id: i64 },

    /// A lease could not be acquired in time
    #[error("busy: {0}")]
    Busy(String),

    /// The purchase token is missing, expired, or does not match
    #[error("invalid purchase token")]
    InvalidToken,

    /// The session token is missing or expired
    #[error("session token expired or unknown")]
    TokenExpired,

    /// An order already exists for this user and product
    #[error("duplicate order for user {user_id} on product {product_id}")]
    DuplicateOrder { user_id: i64, product_id: i64 },

    /// The stock cell was never preloaded
    #[error("stock cell not initialized for product {0}")]
    StockUninitialized(i64),

    /// The versioned commit lost against a concurrent purchase
    #[error("concurrent stock commit on product {0}")]
    StockConflict(i64),

    /// A backing store is down or refused the operation
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A deadline was exceeded; treated like a store failure
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The administrative authorization check failed
    #[error("administrative authorization failed")]
    Unauthorized,

    /// An argument failed validation
    #[error("invalid {parameter}: {message}")]
    InvalidParameter { parameter: String, message: String },
}

impl SeckillError {
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Whether the kind is meant for clients; the remaining kinds are
    /// internal and surface only through logs or after mapping.
    pub fn client_visible(&self) -> bool {
        !matches!(self, Self::StockUninitialized(_) | Self::StockConflict(_))
    }

    /// Whether a client retry can reasonably succeed without an operator
    /// acting first.
    pub fn retriable(&self) -> bool {
        matches!(
            self,
            Self::OutOfWindow(_)
                | Self::RateLimited(_)
                | Self::DuplicateAttempt { .. }
                | Self::Busy(_)
                | Self::StoreUnavailable(_)
                | Self::Timeout(_)
        )
    }
}

impl From<counter_store::CounterStoreError> for SeckillError {
    fn from(err: counter_store::CounterStoreError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<coordination_store::CoordinationStoreError> for SeckillError {
    fn from(err: coordination_store::CoordinationStoreError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<event_bus::EventBusError> for SeckillError {
    fn from(err: event_bus::EventBusError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<durable_store::DurableStoreError> for SeckillError {
    fn from(err: durable_store::DurableStoreError) -> Self {
        use durable_store::DurableStoreError as E;
        match err {
            E::PromotionMissing { product_id } => Self::NoPromotion(product_id),
            E::SoldOut { product_id } => Self::SoldOut(product_id),
            E::StockConflict { product_id } => Self::StockConflict(product_id),
            E::DuplicateOrder {
                user_id,
                product_id,
            } => Self::DuplicateOrder {
                user_id,
                product_id,
            },
            E::Unavailable { message } => Self::StoreUnavailable(message),
            E::Db(e) => Self::StoreUnavailable(e.to_string()),
        }
    }
}
