//! In-memory durable store replicating the transactional semantics of the
//! MySQL implementation under a single lock, used by tests and local
//! development.

use crate::{
    CommittedOrder, DurableResult, DurableStore, DurableStoreError, Order, OrderState, Product,
    Promotion,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct State {
    products: HashMap<i64, Product>,
    promotions: HashMap<i64, Promotion>,
    orders: HashMap<(i64, i64), Order>,
}

/// Durable store held in process memory
///
/// Every operation runs under one lock, which gives each "transaction" the
/// same all-or-nothing behavior as the SQL implementation: checks happen
/// before any mutation.
#[derive(Clone, Default)]
pub struct MemoryDurableStore {
    state: Arc<Mutex<State>>,
    fail_commits: Arc<AtomicBool>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a product row.
    pub fn insert_product(&self, product: Product) {
        self.state.lock().products.insert(product.product_id, product);
    }

    /// Seed a promotion row, keyed by its product.
    pub fn insert_promotion(&self, promotion: Promotion) {
        self.state
            .lock()
            .promotions
            .insert(promotion.product_id, promotion);
    }

    /// Make subsequent `commit_order` calls fail as if the store were down,
    /// for exercising the compensation path.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn find_product(&self, product_id: i64) -> DurableResult<Option<Product>> {
        Ok(self.state.lock().products.get(&product_id).cloned())
    }

    async fn find_promotion_by_product(&self, product_id: i64) -> DurableResult<Option<Promotion>> {
        Ok(self.state.lock().promotions.get(&product_id).cloned())
    }

    async fn commit_order(&self, user_id: i64, product_id: i64) -> DurableResult<CommittedOrder> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(DurableStoreError::unavailable("injected commit failure"));
        }

        let mut state = self.state.lock();

        let remaining = {
            let promo = state
                .promotions
                .get(&product_id)
                .ok_or(DurableStoreError::PromotionMissing { product_id })?;
            if promo.remaining_count <= 0 {
                return Err(DurableStoreError::SoldOut { product_id });
            }
            promo.remaining_count
        };

        if state.orders.contains_key(&(product_id, user_id)) {
            return Err(DurableStoreError::DuplicateOrder {
                user_id,
                product_id,
            });
        }

        let promo = state
            .promotions
            .get_mut(&product_id)
            .ok_or(DurableStoreError::PromotionMissing { product_id })?;
        promo.remaining_count = remaining - 1;
        promo.version += 1;
        let committed = CommittedOrder {
            price: promo.current_price,
            remaining: promo.remaining_count,
            version: promo.version,
        };

        state.orders.insert(
            (product_id, user_id),
            Order {
                product_id,
                user_id,
                state: OrderState::Created.as_i16(),
                created_at: Utc::now(),
            },
        );
        Ok(committed)
    }

    async fn order_state(
        &self,
        user_id: i64,
        product_id: i64,
    ) -> DurableResult<Option<OrderState>> {
        let state = self.state.lock();
        match state.orders.get(&(product_id, user_id)) {
            None => Ok(None),
            Some(order) => OrderState::from_i16(order.state)
                .map(Some)
                .ok_or_else(|| {
                    DurableStoreError::unavailable(format!("unknown order state {}", order.state))
                }),
        }
    }

    async fn transition_order(
        &self,
        user_id: i64,
        product_id: i64,
        from: OrderState,
        to: OrderState,
    ) -> DurableResult<bool> {
        let mut state = self.state.lock();
        match state.orders.get_mut(&(product_id, user_id)) {
            Some(order) if order.state == from.as_i16() => {
                order.state = to.as_i16();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_orders_for_product(&self, product_id: i64) -> DurableResult<u64> {
        let state = self.state.lock();
        Ok(state
            .orders
            .keys()
            .filter(|(pid, _)| *pid == product_id)
            .count() as u64)
    }

    async fn reset_product(&self, product_id: i64, count: i64) -> DurableResult<()> {
        let mut state = self.state.lock();
        state.orders.retain(|(pid, _), _| *pid != product_id);
        if let Some(promo) = state.promotions.get_mut(&product_id) {
            promo.remaining_count = count;
            promo.version = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn promotion(product_id: i64, remaining: i64) -> Promotion {
        let now = Utc::now();
        Promotion {
            promotion_id: product_id,
            product_id,
            remaining_count: remaining,
            start_at: now - Duration::hours(1),
            end_at: now + Duration::hours(1),
            status: 1,
            current_price: 9.9,
            version: 0,
        }
    }

    #[tokio::test]
    async fn commit_decrements_stock_and_bumps_version() {
        let store = MemoryDurableStore::new();
        store.insert_promotion(promotion(1001, 2));

        let committed = store.commit_order(1, 1001).await.unwrap();
        assert_eq!(committed.remaining, 1);
        assert_eq!(committed.version, 1);
        assert_eq!(
            store.order_state(1, 1001).await.unwrap(),
            Some(OrderState::Created)
        );
        assert_eq!(store.count_orders_for_product(1001).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn commit_rejects_duplicates_without_touching_stock() {
        let store = MemoryDurableStore::new();
        store.insert_promotion(promotion(1001, 5));

        store.commit_order(1, 1001).await.unwrap();
        let err = store.commit_order(1, 1001).await.unwrap_err();
        assert!(matches!(err, DurableStoreError::DuplicateOrder { .. }));

        let promo = store.find_promotion_by_product(1001).await.unwrap().unwrap();
        assert_eq!(promo.remaining_count, 4);
        assert_eq!(promo.version, 1);
    }

    #[tokio::test]
    async fn commit_stops_at_zero_stock() {
        let store = MemoryDurableStore::new();
        store.insert_promotion(promotion(1001, 1));

        store.commit_order(1, 1001).await.unwrap();
        let err = store.commit_order(2, 1001).await.unwrap_err();
        assert!(matches!(err, DurableStoreError::SoldOut { .. }));
    }

    #[tokio::test]
    async fn transitions_are_idempotent() {
        let store = MemoryDurableStore::new();
        store.insert_promotion(promotion(1001, 5));
        store.commit_order(1, 1001).await.unwrap();

        assert!(store
            .transition_order(1, 1001, OrderState::Created, OrderState::Paid)
            .await
            .unwrap());
        // A redelivered payment event finds the order already transitioned.
        assert!(!store
            .transition_order(1, 1001, OrderState::Created, OrderState::Paid)
            .await
            .unwrap());
        assert_eq!(
            store.order_state(1, 1001).await.unwrap(),
            Some(OrderState::Paid)
        );
    }

    #[tokio::test]
    async fn reset_clears_orders_and_restores_stock() {
        let store = MemoryDurableStore::new();
        store.insert_promotion(promotion(1001, 2));
        store.commit_order(1, 1001).await.unwrap();
        store.commit_order(2, 1001).await.unwrap();

        store.reset_product(1001, 100).await.unwrap();
        assert_eq!(store.count_orders_for_product(1001).await.unwrap(), 0);
        let promo = store.find_promotion_by_product(1001).await.unwrap().unwrap();
        assert_eq!(promo.remaining_count, 100);
        assert_eq!(promo.version, 0);
    }
}
