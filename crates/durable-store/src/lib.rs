//! Durable store abstraction: the authoritative side of the two-phase stock
//! deduction
//!
//! The `DurableStore` trait exposes the transactional operations the engine
//! needs: the versioned compare-and-set commit that inserts an order and
//! decrements promotion stock in one transaction, the idempotent order state
//! transition used by event handlers, and the administrative reset. The
//! production implementation runs against MySQL through sea-orm; the
//! in-memory implementation replicates the transactional semantics under a
//! single lock for tests.

use async_trait::async_trait;
use thiserror::Error;

pub mod entity;
pub mod memory;
pub mod mysql;

pub use entity::{order, product, promotion};
pub use memory::MemoryDurableStore;
pub use mysql::MysqlDurableStore;

pub use entity::order::Model as Order;
pub use entity::product::Model as Product;
pub use entity::promotion::Model as Promotion;

/// Result type for durable store operations
pub type DurableResult<T> = Result<T, DurableStoreError>;

/// Errors reported by the durable store
#[derive(Error, Debug)]
pub enum DurableStoreError {
    /// The store cannot be reached or the transaction could not run
    #[error("durable store unavailable: {message}")]
    Unavailable { message: String },

    /// No promotion row exists for the product
    #[error("no promotion for product {product_id}")]
    PromotionMissing { product_id: i64 },

    /// The promotion row shows no remaining stock
    #[error("product {product_id} is sold out")]
    SoldOut { product_id: i64 },

    /// The versioned update matched no row: a concurrent commit won
    #[error("concurrent stock commit on product {product_id}")]
    StockConflict { product_id: i64 },

    /// The unique `(product_id, user_id)` key already has an order
    #[error("duplicate order for user {user_id} on product {product_id}")]
    DuplicateOrder { user_id: i64, product_id: i64 },

    /// Underlying database error
    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),
}

impl DurableStoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Order lifecycle states as persisted in the `state` column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Created,
    Paid,
    PaymentFailed,
    Cancelled,
}

impl OrderState {
    /// Wire and column representation (`0..3`).
    pub fn as_i16(self) -> i16 {
        match self {
            Self::Created => 0,
            Self::Paid => 1,
            Self::PaymentFailed => 2,
            Self::Cancelled => 3,
        }
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Self::Created),
            1 => Some(Self::Paid),
            2 => Some(Self::PaymentFailed),
            3 => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn from_wire(value: i32) -> Option<Self> {
        i16::try_from(value).ok().and_then(Self::from_i16)
    }
}

/// Result of a successful durable commit
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedOrder {
    /// Promotion price at commit time, carried into the order event
    pub price: f64,
    /// Remaining stock after the decrement
    pub remaining: i64,
    /// Promotion version after the increment
    pub version: i64,
}

/// Transactional storage for products, promotions, and orders
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Look up a product. Absent products return `None`.
    async fn find_product(&self, product_id: i64) -> DurableResult<Option<Product>>;

    /// Look up the promotion for a product. Absent promotions return `None`.
    async fn find_promotion_by_product(&self, product_id: i64) -> DurableResult<Option<Promotion>>;

    /// Commit one purchase in a single transaction: read the promotion,
    /// decrement `remaining_count` with a versioned compare-and-set, insert
    /// the order row. This is the authoritative oversell defense.
    async fn commit_order(&self, user_id: i64, product_id: i64) -> DurableResult<CommittedOrder>;

    /// Read the state of an order, if it exists.
    async fn order_state(&self, user_id: i64, product_id: i64)
        -> DurableResult<Option<OrderState>>;

    /// Transition an order's state only when it currently holds `from`.
    /// Returns whether a transition happened, making repeated deliveries of
    /// the same event a no-op.
    async fn transition_order(
        &self,
        user_id: i64,
        product_id: i64,
        from: OrderState,
        to: OrderState,
    ) -> DurableResult<bool>;

    /// Count orders for a product (administrative/verification surface).
    async fn count_orders_for_product(&self, product_id: i64) -> DurableResult<u64>;

    /// Administrative reset in a single transaction: delete the product's
    /// orders, restore `remaining_count`, and zero the version.
    async fn reset_product(&self, product_id: i64, count: i64) -> DurableResult<()>;
}
