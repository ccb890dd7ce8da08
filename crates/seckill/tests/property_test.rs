//! Concurrency and compensation properties of the commit path

mod common;

use common::{seed_product, start_core, ADMIN};
use counter_store::CounterStore;
use durable_store::DurableStore;
use seckill::SeckillError;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oversell_is_impossible_under_contention() {
    let core = start_core().await;
    seed_product(&core, 1001, 5);
    core.service.preload_stock(ADMIN, 1001).await.unwrap();

    // 200 distinct users each pass admission while stock still peeks > 0.
    let mut tokens = Vec::with_capacity(200);
    for user in 1..=200i64 {
        let token = core
            .service
            .authorize_purchase_attempt(user, 1001)
            .await
            .unwrap();
        tokens.push((user, token));
    }

    let service = Arc::new(core.service);
    let mut handles = Vec::with_capacity(200);
    for (user, token) in tokens {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.commit_purchase(user, 1001, &token).await
        }));
    }

    let mut won = 0u32;
    let mut sold_out = 0u32;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(order_id) => {
                assert!(order_id.ends_with(char::is_numeric));
                won += 1;
            }
            Err(SeckillError::SoldOut(1001)) => sold_out += 1,
            Err(other) => panic!("unexpected failure kind: {other:?}"),
        }
    }

    assert_eq!(won, 5);
    assert_eq!(sold_out, 195);
    assert_eq!(core.durable.count_orders_for_product(1001).await.unwrap(), 5);
    assert_eq!(core.counter.get_i64("stock:1001").await.unwrap(), Some(0));
    let promo = core
        .durable
        .find_promotion_by_product(1001)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promo.remaining_count, 0);
    assert_eq!(promo.version, 5);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_purchase_token_buys_at_most_once() {
    let core = start_core().await;
    seed_product(&core, 1001, 100);
    core.service.preload_stock(ADMIN, 1001).await.unwrap();

    let token = core
        .service
        .authorize_purchase_attempt(7, 1001)
        .await
        .unwrap();

    let service = Arc::new(core.service);
    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = service.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            service.commit_purchase(7, 1001, &token).await
        }));
    }

    let mut won = 0u32;
    let mut invalid = 0u32;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(SeckillError::InvalidToken) => invalid += 1,
            Err(other) => panic!("unexpected failure kind: {other:?}"),
        }
    }

    assert_eq!(won, 1);
    assert_eq!(invalid, 9);
    assert_eq!(core.durable.count_orders_for_product(1001).await.unwrap(), 1);
    assert_eq!(core.counter.get_i64("stock:1001").await.unwrap(), Some(99));

    service.shutdown().await;
}

#[tokio::test]
async fn failed_commits_restore_the_counter() {
    let core = start_core().await;
    seed_product(&core, 1001, 5);
    core.service.preload_stock(ADMIN, 1001).await.unwrap();

    core.durable.set_fail_commits(true);
    for round in 0..3 {
        let token = core
            .service
            .authorize_purchase_attempt(7, 1001)
            .await
            .unwrap();
        let err = core
            .service
            .commit_purchase(7, 1001, &token)
            .await
            .unwrap_err();
        assert!(
            matches!(err, SeckillError::StoreUnavailable(_)),
            "round {round}: got {err:?}"
        );
        // Compensation ran before the error surfaced.
        assert_eq!(core.counter.get_i64("stock:1001").await.unwrap(), Some(5));
    }
    assert_eq!(core.durable.count_orders_for_product(1001).await.unwrap(), 0);

    // Once the store recovers the same user can buy.
    core.durable.set_fail_commits(false);
    let token = core
        .service
        .authorize_purchase_attempt(7, 1001)
        .await
        .unwrap();
    core.service.commit_purchase(7, 1001, &token).await.unwrap();
    assert_eq!(core.counter.get_i64("stock:1001").await.unwrap(), Some(4));
    assert_eq!(core.durable.count_orders_for_product(1001).await.unwrap(), 1);

    core.service.shutdown().await;
}

#[tokio::test]
async fn a_user_cannot_order_the_same_product_twice() {
    let core = start_core().await;
    seed_product(&core, 1001, 100);
    core.service.preload_stock(ADMIN, 1001).await.unwrap();

    let token = core
        .service
        .authorize_purchase_attempt(7, 1001)
        .await
        .unwrap();
    core.service.commit_purchase(7, 1001, &token).await.unwrap();
    assert_eq!(core.counter.get_i64("stock:1001").await.unwrap(), Some(99));

    // A second pass through admission hands out a fresh token, but the
    // durable unique key rejects the commit and the pre-decrement is undone.
    let token = core
        .service
        .authorize_purchase_attempt(7, 1001)
        .await
        .unwrap();
    let err = core
        .service
        .commit_purchase(7, 1001, &token)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SeckillError::DuplicateOrder {
            user_id: 7,
            product_id: 1001
        }
    ));
    assert_eq!(core.durable.count_orders_for_product(1001).await.unwrap(), 1);
    assert_eq!(core.counter.get_i64("stock:1001").await.unwrap(), Some(99));

    core.service.shutdown().await;
}

#[tokio::test]
async fn a_missing_stock_cell_reads_as_sold_out_at_admission() {
    let core = start_core().await;
    seed_product(&core, 1001, 100);
    // No preload: admission's advisory peek already reports sold out.
    let err = core
        .service
        .authorize_purchase_attempt(7, 1001)
        .await
        .unwrap_err();
    assert!(matches!(err, SeckillError::SoldOut(1001)));

    core.service.shutdown().await;
}

#[tokio::test]
async fn every_successful_commit_produces_an_order_event() {
    use event_bus::EventBus;
    use seckill::messages::{HEADER_MESSAGE_TYPE, MESSAGE_TYPE_ORDER};

    let core = start_core().await;
    seed_product(&core, 1001, 100);
    core.service.preload_stock(ADMIN, 1001).await.unwrap();

    let mut observer = core.bus.subscribe("observer").await.unwrap();

    for user in 1..=3i64 {
        let token = core
            .service
            .authorize_purchase_attempt(user, 1001)
            .await
            .unwrap();
        core.service.commit_purchase(user, 1001, &token).await.unwrap();
    }

    for _ in 0..3 {
        let event = tokio::time::timeout(std::time::Duration::from_secs(5), observer.recv())
            .await
            .expect("order event not observed")
            .unwrap();
        assert_eq!(event.header(HEADER_MESSAGE_TYPE), Some(MESSAGE_TYPE_ORDER));
        let payload: serde_json::Value = serde_json::from_slice(&event.payload).unwrap();
        assert_eq!(payload["product_id"], 1001);
        assert_eq!(payload["status"], 0);
    }

    core.service.shutdown().await;
}
