//! Counter store abstraction for the hot path of the flash-sale core
//!
//! This crate defines the `CounterStore` trait which provides atomic integer
//! counters, short-lived keyed records, and the server-side atomic operations
//! (stock check-and-decrement, tumbling-window rate limiting, single-use token
//! consumption) the admission and commit paths rely on. The production
//! implementation runs against Redis with the atomic operations as Lua
//! scripts; the in-memory implementation replicates the same observable
//! semantics for tests and local development.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod redis_store;
mod scripts;

pub use memory::MemoryCounterStore;
pub use redis_store::RedisCounterStore;

/// Result type for counter store operations
pub type CounterResult<T> = Result<T, CounterStoreError>;

/// Errors reported by a counter store
///
/// Absent keys are not errors for reads; they surface as `Ok(None)` or as the
/// dedicated outcome variants below.
#[derive(Error, Debug)]
pub enum CounterStoreError {
    /// The store cannot be reached or refused the operation
    #[error("counter store unavailable: {message}")]
    Unavailable { message: String },

    /// The stored value has an unexpected type; indicates corruption
    #[error("type mismatch for key {key}: {message}")]
    TypeMismatch { key: String, message: String },

    /// A server-side atomic script returned an unrecognized result
    #[error("script {name} failed: {message}")]
    Script { name: String, message: String },
}

impl CounterStoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn type_mismatch(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn script(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Script {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Outcome of the atomic stock check-and-decrement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDecrement {
    /// The stock cell does not exist; preload has not run
    Uninitialized,
    /// The cell exists but holds no remaining stock
    SoldOut,
    /// The decrement succeeded; the remaining count after it
    Remaining(i64),
}

/// Outcome of the atomic single-use token consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenConsume {
    /// The record matched and was deleted; this caller owns the token
    Consumed,
    /// No record under the key
    Missing,
    /// The record exists but is past its embedded expiry
    Expired,
    /// The record's user or product does not match the caller
    Mismatch,
}

/// Atomic counters and short-lived keyed records
///
/// Every operation is linearizable with respect to concurrent operations on
/// the same key. Token records are JSON documents carrying `user_id`,
/// `product_id` and `expires_at` (epoch milliseconds) fields, which the
/// consume operation compares server-side.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read an integer counter. Absent keys return `None`.
    async fn get_i64(&self, key: &str) -> CounterResult<Option<i64>>;

    /// Set an integer counter without expiry.
    async fn set_i64(&self, key: &str, value: i64) -> CounterResult<()>;

    /// Atomically increment, returning the new value.
    async fn incr(&self, key: &str) -> CounterResult<i64>;

    /// Atomically decrement, returning the new value.
    async fn decr(&self, key: &str) -> CounterResult<i64>;

    /// Store a record with a TTL, overwriting any previous value.
    async fn set_record(&self, key: &str, value: &str, ttl: Duration) -> CounterResult<()>;

    /// Fetch a record. Absent or expired keys return `None`.
    async fn get_record(&self, key: &str) -> CounterResult<Option<String>>;

    /// Delete a record, returning whether this call removed it.
    ///
    /// Under concurrent deletes exactly one caller observes `true`; that
    /// signal decides which consumer of a single-use record wins.
    async fn delete_record(&self, key: &str) -> CounterResult<bool>;

    /// Atomically check and decrement a stock cell.
    async fn check_and_decr_stock(&self, key: &str) -> CounterResult<StockDecrement>;

    /// Set a stock cell only if it does not exist yet. Returns whether the
    /// cell was written.
    async fn check_and_set_stock(&self, key: &str, count: i64) -> CounterResult<bool>;

    /// Count an attempt against a tumbling rate window.
    ///
    /// Returns `true` when the attempt is admitted. The first increment of a
    /// window attaches the window-length expiry to the counter.
    async fn rate_limit(&self, key: &str, limit: i64, window: Duration) -> CounterResult<bool>;

    /// Atomically validate and consume a single-use token record.
    ///
    /// `now_ms` is the caller's clock in epoch milliseconds, compared against
    /// the record's `expires_at` field inside the atomic operation.
    async fn consume_token(
        &self,
        key: &str,
        user_id: i64,
        product_id: i64,
        now_ms: i64,
    ) -> CounterResult<TokenConsume>;
}
