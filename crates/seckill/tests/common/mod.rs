//! Shared wiring for the end-to-end tests: the full core running against the
//! in-memory adapters.

use chrono::{Duration as ChronoDuration, Utc};
use coordination_store::{CoordinationStore, MemoryCoordinationStore};
use counter_store::{CounterStore, MemoryCounterStore};
use durable_store::{DurableStore, MemoryDurableStore, Product, Promotion};
use event_bus::{EventBus, MemoryEventBus};
use seckill::{EngineConfig, SeckillService};
use std::sync::Arc;

pub const ADMIN: &str = "test-admin-token";

pub struct TestCore {
    pub service: SeckillService,
    pub counter: Arc<MemoryCounterStore>,
    pub durable: Arc<MemoryDurableStore>,
    pub coordination: Arc<MemoryCoordinationStore>,
    pub bus: Arc<MemoryEventBus>,
}

/// Build the core without starting the background loops, so tests can seed
/// config first.
pub fn build_core() -> TestCore {
    let counter = Arc::new(MemoryCounterStore::new());
    let durable = Arc::new(MemoryDurableStore::new());
    let coordination = Arc::new(MemoryCoordinationStore::new());
    let bus = Arc::new(MemoryEventBus::new());

    let service = SeckillService::new(
        EngineConfig::for_testing(ADMIN),
        counter.clone() as Arc<dyn CounterStore>,
        durable.clone() as Arc<dyn DurableStore>,
        coordination.clone() as Arc<dyn CoordinationStore>,
        bus.clone() as Arc<dyn EventBus>,
    );

    TestCore {
        service,
        counter,
        durable,
        coordination,
        bus,
    }
}

/// Build the core and start the watcher and consumers.
pub async fn start_core() -> TestCore {
    let core = build_core();
    core.service.start().await.unwrap();
    core
}

/// Seed a product with a promotion whose window is open right now.
pub fn seed_product(core: &TestCore, product_id: i64, stock: i64) {
    let now = Utc::now();
    core.durable.insert_product(Product {
        product_id,
        title: format!("product {product_id}"),
        sub_title: "limited offer".to_string(),
        original_cost: 19.9,
        current_price: 9.9,
        discount: 0.5,
        is_free_delivery: 1,
        category_id: 1,
        last_update_time: Some(now),
    });
    core.durable.insert_promotion(Promotion {
        promotion_id: product_id,
        product_id,
        remaining_count: stock,
        start_at: now - ChronoDuration::hours(1),
        end_at: now + ChronoDuration::hours(1),
        status: 1,
        current_price: 9.9,
        version: 0,
    });
}
