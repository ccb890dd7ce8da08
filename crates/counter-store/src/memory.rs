//! In-memory counter store with the same observable semantics as the Redis
//! implementation, used by tests and local development.

use crate::{CounterResult, CounterStore, CounterStoreError, StockDecrement, TokenConsume};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now < at).unwrap_or(true)
    }
}

/// Counter store held in process memory
///
/// All operations take a single lock, which makes every operation trivially
/// linearizable. TTLs use the tokio clock so tests can drive expiry with
/// paused time.
#[derive(Clone, Default)]
pub struct MemoryCounterStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_live_entry<T>(
        &self,
        key: &str,
        f: impl FnOnce(Option<&mut Entry>, &mut HashMap<String, Entry>) -> T,
    ) -> T {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let stale = entries.get(key).map(|e| !e.live(now)).unwrap_or(false);
        if stale {
            entries.remove(key);
        }
        let mut entry = entries.remove(key);
        let result = f(entry.as_mut(), &mut entries);
        if let Some(entry) = entry {
            entries.entry(key.to_string()).or_insert(entry);
        }
        result
    }

    fn parse_i64(key: &str, raw: &str) -> CounterResult<i64> {
        raw.parse::<i64>()
            .map_err(|_| CounterStoreError::type_mismatch(key, "value is not an integer"))
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get_i64(&self, key: &str) -> CounterResult<Option<i64>> {
        self.with_live_entry(key, |entry, _| match entry {
            Some(entry) => Self::parse_i64(key, &entry.value).map(Some),
            None => Ok(None),
        })
    }

    async fn set_i64(&self, key: &str, value: i64) -> CounterResult<()> {
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> CounterResult<i64> {
        self.with_live_entry(key, |entry, entries| match entry {
            Some(entry) => {
                let value = Self::parse_i64(key, &entry.value)? + 1;
                entry.value = value.to_string();
                Ok(value)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        })
    }

    async fn decr(&self, key: &str) -> CounterResult<i64> {
        self.with_live_entry(key, |entry, entries| match entry {
            Some(entry) => {
                let value = Self::parse_i64(key, &entry.value)? - 1;
                entry.value = value.to_string();
                Ok(value)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "-1".to_string(),
                        expires_at: None,
                    },
                );
                Ok(-1)
            }
        })
    }

    async fn set_record(&self, key: &str, value: &str, ttl: Duration) -> CounterResult<()> {
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get_record(&self, key: &str) -> CounterResult<Option<String>> {
        self.with_live_entry(key, |entry, _| Ok(entry.map(|e| e.value.clone())))
    }

    async fn delete_record(&self, key: &str) -> CounterResult<bool> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.remove(key) {
            Some(entry) => Ok(entry.live(now)),
            None => Ok(false),
        }
    }

    async fn check_and_decr_stock(&self, key: &str) -> CounterResult<StockDecrement> {
        self.with_live_entry(key, |entry, _| match entry {
            None => Ok(StockDecrement::Uninitialized),
            Some(entry) => {
                let stock = Self::parse_i64(key, &entry.value)?;
                if stock <= 0 {
                    return Ok(StockDecrement::SoldOut);
                }
                entry.value = (stock - 1).to_string();
                Ok(StockDecrement::Remaining(stock - 1))
            }
        })
    }

    async fn check_and_set_stock(&self, key: &str, count: i64) -> CounterResult<bool> {
        self.with_live_entry(key, |entry, entries| match entry {
            Some(_) => Ok(false),
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: count.to_string(),
                        expires_at: None,
                    },
                );
                Ok(true)
            }
        })
    }

    async fn rate_limit(&self, key: &str, limit: i64, window: Duration) -> CounterResult<bool> {
        self.with_live_entry(key, |entry, entries| match entry {
            Some(entry) => {
                let current = Self::parse_i64(key, &entry.value)?;
                if current >= limit {
                    return Ok(false);
                }
                entry.value = (current + 1).to_string();
                Ok(true)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: Some(Instant::now() + window),
                    },
                );
                Ok(true)
            }
        })
    }

    async fn consume_token(
        &self,
        key: &str,
        user_id: i64,
        product_id: i64,
        now_ms: i64,
    ) -> CounterResult<TokenConsume> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let raw = match entries.get(key) {
            Some(entry) if entry.live(now) => entry.value.clone(),
            Some(_) => {
                entries.remove(key);
                return Ok(TokenConsume::Missing);
            }
            None => return Ok(TokenConsume::Missing),
        };

        let record: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|_| CounterStoreError::type_mismatch(key, "malformed token record"))?;

        if let Some(expires_at) = record.get("expires_at").and_then(|v| v.as_i64()) {
            if now_ms >= expires_at {
                entries.remove(key);
                return Ok(TokenConsume::Expired);
            }
        }

        let record_user = record.get("user_id").and_then(|v| v.as_i64());
        let record_product = record.get("product_id").and_then(|v| v.as_i64());
        if record_user != Some(user_id) || record_product != Some(product_id) {
            return Ok(TokenConsume::Mismatch);
        }

        entries.remove(key);
        Ok(TokenConsume::Consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counters_start_absent_and_increment() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.get_i64("c").await.unwrap(), None);
        assert_eq!(store.incr("c").await.unwrap(), 1);
        assert_eq!(store.incr("c").await.unwrap(), 2);
        assert_eq!(store.decr("c").await.unwrap(), 1);
        assert_eq!(store.get_i64("c").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn check_and_decr_reports_absent_and_exhausted_cells() {
        let store = MemoryCounterStore::new();
        assert_eq!(
            store.check_and_decr_stock("stock").await.unwrap(),
            StockDecrement::Uninitialized
        );

        store.set_i64("stock", 2).await.unwrap();
        assert_eq!(
            store.check_and_decr_stock("stock").await.unwrap(),
            StockDecrement::Remaining(1)
        );
        assert_eq!(
            store.check_and_decr_stock("stock").await.unwrap(),
            StockDecrement::Remaining(0)
        );
        assert_eq!(
            store.check_and_decr_stock("stock").await.unwrap(),
            StockDecrement::SoldOut
        );
        // The cell is never driven below zero.
        assert_eq!(store.get_i64("stock").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn check_and_set_only_writes_absent_cells() {
        let store = MemoryCounterStore::new();
        assert!(store.check_and_set_stock("stock", 10).await.unwrap());
        assert!(!store.check_and_set_stock("stock", 99).await.unwrap());
        assert_eq!(store.get_i64("stock").await.unwrap(), Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_window_tumbles() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(60);
        for _ in 0..3 {
            assert!(store.rate_limit("rate", 3, window).await.unwrap());
        }
        assert!(!store.rate_limit("rate", 3, window).await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.rate_limit("rate", 3, window).await.unwrap());
    }

    #[tokio::test]
    async fn delete_record_signals_a_single_winner() {
        let store = MemoryCounterStore::new();
        store
            .set_record("token", "{}", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(store.delete_record("token").await.unwrap());
        assert!(!store.delete_record("token").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn records_expire() {
        let store = MemoryCounterStore::new();
        store
            .set_record("token", "data", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(
            store.get_record("token").await.unwrap(),
            Some("data".to_string())
        );

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get_record("token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn consume_token_is_single_use_and_checks_identity() {
        let store = MemoryCounterStore::new();
        let record = r#"{"token_id":"t","user_id":7,"product_id":1001,"issued_at":0,"expires_at":9999999999999}"#;
        store
            .set_record("token:t", record, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(
            store.consume_token("token:t", 8, 1001, 1).await.unwrap(),
            TokenConsume::Mismatch
        );
        assert_eq!(
            store.consume_token("token:t", 7, 2002, 1).await.unwrap(),
            TokenConsume::Mismatch
        );
        assert_eq!(
            store.consume_token("token:t", 7, 1001, 1).await.unwrap(),
            TokenConsume::Consumed
        );
        assert_eq!(
            store.consume_token("token:t", 7, 1001, 1).await.unwrap(),
            TokenConsume::Missing
        );
    }

    #[tokio::test]
    async fn consume_token_rejects_embedded_expiry() {
        let store = MemoryCounterStore::new();
        let record = r#"{"token_id":"t","user_id":7,"product_id":1001,"issued_at":0,"expires_at":1000}"#;
        store
            .set_record("token:t", record, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.consume_token("token:t", 7, 1001, 2000).await.unwrap(),
            TokenConsume::Expired
        );
        // The expired record was dropped as part of the check.
        assert_eq!(store.get_record("token:t").await.unwrap(), None);
    }

    #[tokio::test]
    async fn type_mismatch_is_fatal() {
        let store = MemoryCounterStore::new();
        store
            .set_record("c", "not-a-number", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(matches!(
            store.incr("c").await,
            Err(CounterStoreError::TypeMismatch { .. })
        ));
    }
}
