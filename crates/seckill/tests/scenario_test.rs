//! End-to-end scenarios against the in-memory adapters

mod common;

use common::{build_core, seed_product, start_core, ADMIN};
use durable_store::{DurableStore, OrderState};
use event_bus::EventBus;
use seckill::messages::{OrderId, HEADER_MESSAGE_TYPE, MESSAGE_TYPE_PAYMENT};
use seckill::SeckillError;
use std::time::Duration;

#[tokio::test]
async fn single_purchase_goes_all_the_way_through() {
    let core = start_core().await;
    seed_product(&core, 1001, 100);
    core.service.preload_stock(ADMIN, 1001).await.unwrap();

    let session = core.service.issue_session_token(1001).await.unwrap();
    assert_eq!(
        core.service.validate_session_token(&session).await.unwrap(),
        1001
    );

    let purchase_token = core
        .service
        .authorize_purchase_attempt(1001, 1001)
        .await
        .unwrap();
    let order_id = core
        .service
        .commit_purchase(1001, 1001, &purchase_token)
        .await
        .unwrap();

    let parsed = OrderId::parse(&order_id).expect("order id must parse");
    assert_eq!(parsed.user_id, 1001);
    assert_eq!(parsed.product_id, 1001);

    // Counter cell and durable row both reflect the single sale.
    use counter_store::CounterStore;
    assert_eq!(
        core.counter.get_i64("stock:1001").await.unwrap(),
        Some(99)
    );
    let promo = core
        .durable
        .find_promotion_by_product(1001)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promo.remaining_count, 99);
    assert_eq!(promo.version, 1);
    assert_eq!(core.durable.count_orders_for_product(1001).await.unwrap(), 1);
    assert_eq!(
        core.durable.order_state(1001, 1001).await.unwrap(),
        Some(OrderState::Created)
    );

    core.service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rate_limit_admits_three_then_rejects_until_the_window_tumbles() {
    let core = build_core();
    // Seed the limit before startup so the snapshot picks it up.
    use coordination_store::CoordinationStore;
    core.coordination
        .put(seckill::keys::CONFIG_RATE_LIMIT, "3")
        .await
        .unwrap();
    core.service.start().await.unwrap();

    seed_product(&core, 1001, 100);
    core.service.preload_stock(ADMIN, 1001).await.unwrap();

    for _ in 0..3 {
        core.service.authorize_purchase_attempt(7, 1001).await.unwrap();
    }
    for _ in 0..2 {
        let err = core
            .service
            .authorize_purchase_attempt(7, 1001)
            .await
            .unwrap_err();
        assert!(matches!(err, SeckillError::RateLimited(7)), "got {err:?}");
    }

    tokio::time::advance(Duration::from_secs(61)).await;
    core.service.authorize_purchase_attempt(7, 1001).await.unwrap();

    core.service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn blacklist_rejects_until_the_entry_expires() {
    let core = start_core().await;
    seed_product(&core, 1001, 100);
    core.service.preload_stock(ADMIN, 1001).await.unwrap();

    core.service
        .add_blacklist(ADMIN, 9999, "fraud", Duration::from_secs(10))
        .await
        .unwrap();

    let mut rejected = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        match core.service.authorize_purchase_attempt(9999, 1001).await {
            Err(SeckillError::Blacklisted(9999)) => {
                rejected = true;
                break;
            }
            _ => {}
        }
    }
    assert!(rejected, "blacklist never took effect");

    let listed = core.service.list_blacklist(ADMIN).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].user_id, 9999);
    assert_eq!(listed[0].reason, "fraud");

    // Past the TTL the entry expires on its own and admissions resume.
    tokio::time::advance(Duration::from_secs(12)).await;
    let mut admitted = false;
    for _ in 0..100 {
        match core.service.authorize_purchase_attempt(9999, 1001).await {
            Ok(_) => {
                admitted = true;
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    assert!(admitted, "blacklist entry never expired");

    core.service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disabling_the_campaign_converges_and_reenabling_resumes() {
    let core = start_core().await;
    seed_product(&core, 1001, 100);
    core.service.preload_stock(ADMIN, 1001).await.unwrap();

    core.service
        .set_config(ADMIN, seckill::keys::CONFIG_ENABLED, "false")
        .await
        .unwrap();

    // Distinct users per probe so the rate gate never interferes.
    let mut disabled = false;
    for user in 100..200 {
        match core.service.authorize_purchase_attempt(user, 1001).await {
            Err(SeckillError::Disabled) => {
                disabled = true;
                break;
            }
            _ => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    assert!(disabled, "disable never converged");

    core.service
        .set_config(ADMIN, seckill::keys::CONFIG_ENABLED, "true")
        .await
        .unwrap();
    let mut resumed = false;
    for user in 200..300 {
        match core.service.authorize_purchase_attempt(user, 1001).await {
            Ok(_) => {
                resumed = true;
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    assert!(resumed, "re-enable never converged");

    core.service.shutdown().await;
}

#[tokio::test]
async fn failed_payment_marks_the_order_and_leaves_stock_reserved() {
    let core = start_core().await;
    seed_product(&core, 1001, 100);
    core.service.preload_stock(ADMIN, 1001).await.unwrap();

    let token = core
        .service
        .authorize_purchase_attempt(1001, 1001)
        .await
        .unwrap();
    let order_id = core.service.commit_purchase(1001, 1001, &token).await.unwrap();

    // Observe the payment event the way a downstream consumer would.
    let mut observer = core.bus.subscribe("observer").await.unwrap();
    core.service.simulate_payment(&order_id, false).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), observer.recv())
        .await
        .expect("payment event not observed")
        .unwrap();
    assert_eq!(event.header(HEADER_MESSAGE_TYPE), Some(MESSAGE_TYPE_PAYMENT));
    let payload: serde_json::Value = serde_json::from_slice(&event.payload).unwrap();
    assert_eq!(payload["status"], 2);
    assert_eq!(payload["order_id"], order_id.as_str());

    // The payment consumer applies the idempotent transition.
    let mut transitioned = false;
    for _ in 0..200 {
        if core.durable.order_state(1001, 1001).await.unwrap()
            == Some(OrderState::PaymentFailed)
        {
            transitioned = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(transitioned, "payment failure never applied");

    // Open question preserved: no automatic stock restoration. The unit
    // stays occupied until administrative action.
    use counter_store::CounterStore;
    assert_eq!(core.counter.get_i64("stock:1001").await.unwrap(), Some(99));
    let promo = core
        .durable
        .find_promotion_by_product(1001)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promo.remaining_count, 99);

    core.service.shutdown().await;
}

#[tokio::test]
async fn successful_payment_marks_the_order_paid_exactly_once() {
    let core = start_core().await;
    seed_product(&core, 1001, 100);
    core.service.preload_stock(ADMIN, 1001).await.unwrap();

    let token = core
        .service
        .authorize_purchase_attempt(42, 1001)
        .await
        .unwrap();
    let order_id = core.service.commit_purchase(42, 1001, &token).await.unwrap();

    core.service.simulate_payment(&order_id, true).await.unwrap();
    let mut paid = false;
    for _ in 0..200 {
        if core.durable.order_state(42, 1001).await.unwrap() == Some(OrderState::Paid) {
            paid = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(paid, "payment success never applied");

    // A redelivered payment event must not change anything further.
    core.service.simulate_payment(&order_id, true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        core.durable.order_state(42, 1001).await.unwrap(),
        Some(OrderState::Paid)
    );

    core.service.shutdown().await;
}

#[tokio::test]
async fn out_of_window_and_missing_promotions_are_rejected() {
    let core = start_core().await;

    let err = core
        .service
        .authorize_purchase_attempt(1, 4242)
        .await
        .unwrap_err();
    assert!(matches!(err, SeckillError::NoPromotion(4242)));

    // A promotion whose window closed an hour ago.
    use chrono::{Duration as ChronoDuration, Utc};
    let now = Utc::now();
    seed_product(&core, 2002, 10);
    core.durable.insert_promotion(durable_store::Promotion {
        promotion_id: 2002,
        product_id: 2002,
        remaining_count: 10,
        start_at: now - ChronoDuration::hours(3),
        end_at: now - ChronoDuration::hours(1),
        status: 2,
        current_price: 9.9,
        version: 0,
    });
    let err = core
        .service
        .authorize_purchase_attempt(1, 2002)
        .await
        .unwrap_err();
    assert!(matches!(err, SeckillError::OutOfWindow(2002)));

    core.service.shutdown().await;
}

#[tokio::test]
async fn admin_surface_requires_the_configured_token() {
    let core = start_core().await;
    seed_product(&core, 1001, 100);

    let err = core
        .service
        .preload_stock("wrong-token", 1001)
        .await
        .unwrap_err();
    assert!(matches!(err, SeckillError::Unauthorized));
    let err = core
        .service
        .set_config("wrong-token", seckill::keys::CONFIG_ENABLED, "false")
        .await
        .unwrap_err();
    assert!(matches!(err, SeckillError::Unauthorized));

    // Valid token, invalid values.
    let err = core
        .service
        .set_config(ADMIN, seckill::keys::CONFIG_ENABLED, "maybe")
        .await
        .unwrap_err();
    assert!(matches!(err, SeckillError::InvalidParameter { .. }));
    let err = core
        .service
        .set_config(ADMIN, seckill::keys::CONFIG_RATE_LIMIT, "0")
        .await
        .unwrap_err();
    assert!(matches!(err, SeckillError::InvalidParameter { .. }));
    let err = core
        .service
        .set_config(ADMIN, "/config/unknown", "1")
        .await
        .unwrap_err();
    assert!(matches!(err, SeckillError::InvalidParameter { .. }));

    core.service.shutdown().await;
}

#[tokio::test]
async fn reset_clears_orders_and_restores_promotion_stock() {
    let core = start_core().await;
    seed_product(&core, 1001, 5);
    core.service.preload_stock(ADMIN, 1001).await.unwrap();

    let token = core
        .service
        .authorize_purchase_attempt(7, 1001)
        .await
        .unwrap();
    core.service.commit_purchase(7, 1001, &token).await.unwrap();
    assert_eq!(core.durable.count_orders_for_product(1001).await.unwrap(), 1);

    core.service.reset_product(ADMIN, 1001).await.unwrap();
    assert_eq!(core.durable.count_orders_for_product(1001).await.unwrap(), 0);
    let promo = core
        .durable
        .find_promotion_by_product(1001)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promo.remaining_count, 100);
    assert_eq!(promo.version, 0);

    core.service.shutdown().await;
}
