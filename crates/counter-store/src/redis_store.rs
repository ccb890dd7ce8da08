//! Redis-backed counter store
//!
//! Counters and records map directly onto Redis strings with TTLs; the
//! atomic operations run as Lua scripts so concurrent invocations on the
//! same key serialize server-side.

use crate::scripts;
use crate::{CounterResult, CounterStore, CounterStoreError, StockDecrement, TokenConsume};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ErrorKind, Script};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Counter store backed by a Redis instance or cluster endpoint
pub struct RedisCounterStore {
    conn: ConnectionManager,
    stock_script: Script,
    rate_limit_script: Script,
    consume_token_script: Script,
}

impl RedisCounterStore {
    /// Connect and load the atomic scripts.
    pub async fn connect(url: &str) -> CounterResult<Self> {
        info!("🔄 Connecting to counter store at {}", url);
        let client = redis::Client::open(url)
            .map_err(|e| CounterStoreError::unavailable(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CounterStoreError::unavailable(format!("redis connect failed: {e}")))?;
        info!("✅ Connected to counter store");

        Ok(Self {
            conn,
            stock_script: Script::new(scripts::STOCK_OPERATIONS),
            rate_limit_script: Script::new(scripts::RATE_LIMIT),
            consume_token_script: Script::new(scripts::CONSUME_TOKEN),
        })
    }

    fn map_err(key: &str, err: redis::RedisError) -> CounterStoreError {
        if err.kind() == ErrorKind::TypeError {
            CounterStoreError::type_mismatch(key, err.to_string())
        } else {
            CounterStoreError::unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get_i64(&self, key: &str) -> CounterResult<Option<i64>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| Self::map_err(key, e))
    }

    async fn set_i64(&self, key: &str, value: i64) -> CounterResult<()> {
        let mut conn = self.conn.clone();
        conn.set(key, value).await.map_err(|e| Self::map_err(key, e))
    }

    async fn incr(&self, key: &str) -> CounterResult<i64> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1i64).await.map_err(|e| Self::map_err(key, e))
    }

    async fn decr(&self, key: &str) -> CounterResult<i64> {
        let mut conn = self.conn.clone();
        conn.decr(key, 1i64).await.map_err(|e| Self::map_err(key, e))
    }

    async fn set_record(&self, key: &str, value: &str, ttl: Duration) -> CounterResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| Self::map_err(key, e))
    }

    async fn get_record(&self, key: &str) -> CounterResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| Self::map_err(key, e))
    }

    async fn delete_record(&self, key: &str) -> CounterResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await.map_err(|e| Self::map_err(key, e))?;
        Ok(removed > 0)
    }

    async fn check_and_decr_stock(&self, key: &str) -> CounterResult<StockDecrement> {
        let mut conn = self.conn.clone();
        let result: i64 = self
            .stock_script
            .key(key)
            .arg("check_and_decr")
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Self::map_err(key, e))?;

        match result {
            -1 => Ok(StockDecrement::Uninitialized),
            -2 => Ok(StockDecrement::SoldOut),
            -99 => Err(CounterStoreError::script(
                "stock_operations",
                "unknown command",
            )),
            remaining => {
                debug!("Stock decremented, key={}, remaining={}", key, remaining);
                Ok(StockDecrement::Remaining(remaining))
            }
        }
    }

    async fn check_and_set_stock(&self, key: &str, count: i64) -> CounterResult<bool> {
        let mut conn = self.conn.clone();
        let result: i64 = self
            .stock_script
            .key(key)
            .arg("check_and_set")
            .arg(count)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Self::map_err(key, e))?;
        Ok(result == 1)
    }

    async fn rate_limit(&self, key: &str, limit: i64, window: Duration) -> CounterResult<bool> {
        let mut conn = self.conn.clone();
        let result: i64 = self
            .rate_limit_script
            .key(key)
            .arg(limit)
            .arg(window.as_secs().max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Self::map_err(key, e))?;
        Ok(result == 1)
    }

    async fn consume_token(
        &self,
        key: &str,
        user_id: i64,
        product_id: i64,
        now_ms: i64,
    ) -> CounterResult<TokenConsume> {
        let mut conn = self.conn.clone();
        let result: i64 = self
            .consume_token_script
            .key(key)
            .arg(user_id)
            .arg(product_id)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Self::map_err(key, e))?;

        match result {
            1 => Ok(TokenConsume::Consumed),
            -1 => Ok(TokenConsume::Missing),
            -2 => Ok(TokenConsume::Mismatch),
            -3 => Ok(TokenConsume::Expired),
            -4 => {
                warn!("Token record is not valid JSON, key={}", key);
                Err(CounterStoreError::type_mismatch(key, "malformed token record"))
            }
            other => Err(CounterStoreError::script(
                "consume_token",
                format!("unexpected result {other}"),
            )),
        }
    }
}
