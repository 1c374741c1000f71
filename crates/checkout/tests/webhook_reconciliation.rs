//! Webhook ingestion, deduplication and out-of-order reconciliation.

mod common;

use chrono::{Duration, Utc};
use serde_json::json;

use surgecart_checkout::{CheckoutError, ProcessOutcome};
use surgecart_core::{HoldId, Money, OrderId};
use surgecart_domain::{Hold, HoldStatus, Order, OrderStatus, WebhookOutcome};
use surgecart_jobs::TaskQueue;
use surgecart_store::{Store, StoreTx};

use common::TestStack;

#[tokio::test]
async fn ingestion_requires_a_status_field() {
    let stack = TestStack::new();
    let err = stack
        .checkout
        .webhooks
        .ingest("evt_1", json!({ "order_id": OrderId::new().to_string() }))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::MissingRequiredField("status")));
    assert_eq!(stack.queue.pending(), 0);
}

#[tokio::test]
async fn replayed_idempotency_key_returns_the_stored_event() {
    let stack = TestStack::new();
    let payload = json!({ "order_id": OrderId::new().to_string(), "status": "succeeded" });

    let first = stack
        .checkout
        .webhooks
        .ingest("evt_1", payload.clone())
        .await
        .unwrap();
    let replay = stack
        .checkout
        .webhooks
        .ingest("evt_1", payload)
        .await
        .unwrap();

    assert_eq!(replay.id, first.id);
    assert_eq!(stack.queue.pending(), 1, "replay schedules nothing");
    assert_eq!(stack.sink.count("webhook_received"), 1);
}

#[tokio::test]
async fn success_webhook_finalizes_the_order() {
    let stack = TestStack::new();
    let product = stack.seed_product(10).await;
    let hold = stack
        .checkout
        .holds
        .create_hold(product.id, 2, None)
        .await
        .unwrap();
    let order = stack
        .checkout
        .orders
        .create_order_from_hold(hold.id, None)
        .await
        .unwrap();

    let event = stack
        .checkout
        .webhooks
        .ingest(
            "evt_1",
            json!({
                "order_id": order.id.to_string(),
                "payment_id": "pay_1",
                "status": "succeeded",
            }),
        )
        .await
        .unwrap();

    let outcome = stack.checkout.webhooks.process(event.id).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Applied);

    let order = stack.checkout.orders.order(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.external_payment_id.as_deref(), Some("pay_1"));
    assert_eq!(stack.product_counters(&product).await, (8, 0, 2));

    let event = stack
        .checkout
        .webhooks
        .webhook_event(event.id)
        .await
        .unwrap()
        .unwrap();
    assert!(event.processed);
    assert_eq!(event.outcome, Some(WebhookOutcome::Applied));
    assert!(event.processed_at.is_some());
}

#[tokio::test]
async fn reprocessing_a_processed_event_is_skipped() {
    let stack = TestStack::new();
    let product = stack.seed_product(10).await;
    let hold = stack
        .checkout
        .holds
        .create_hold(product.id, 2, None)
        .await
        .unwrap();
    let order = stack
        .checkout
        .orders
        .create_order_from_hold(hold.id, None)
        .await
        .unwrap();
    let event = stack
        .checkout
        .webhooks
        .ingest(
            "evt_1",
            json!({ "order_id": order.id.to_string(), "status": "succeeded" }),
        )
        .await
        .unwrap();

    assert_eq!(
        stack.checkout.webhooks.process(event.id).await.unwrap(),
        ProcessOutcome::Applied
    );
    assert_eq!(
        stack.checkout.webhooks.process(event.id).await.unwrap(),
        ProcessOutcome::Skipped
    );
    assert_eq!(stack.product_counters(&product).await, (8, 0, 2));
    assert_eq!(stack.sink.count("webhook_applied"), 1);
}

#[tokio::test]
async fn distinct_success_events_for_one_order_commit_stock_once() {
    let stack = TestStack::new();
    let product = stack.seed_product(10).await;
    let hold = stack
        .checkout
        .holds
        .create_hold(product.id, 2, None)
        .await
        .unwrap();
    let order = stack
        .checkout
        .orders
        .create_order_from_hold(hold.id, None)
        .await
        .unwrap();
    let payload = json!({ "order_id": order.id.to_string(), "status": "succeeded" });

    let first = stack
        .checkout
        .webhooks
        .ingest("evt_1", payload.clone())
        .await
        .unwrap();
    let second = stack
        .checkout
        .webhooks
        .ingest("evt_2", payload)
        .await
        .unwrap();

    assert_eq!(
        stack.checkout.webhooks.process(first.id).await.unwrap(),
        ProcessOutcome::Applied
    );
    // The second event applies against an already-paid order: no error,
    // no second stock commit.
    assert_eq!(
        stack.checkout.webhooks.process(second.id).await.unwrap(),
        ProcessOutcome::Applied
    );
    assert_eq!(stack.product_counters(&product).await, (8, 0, 2));
    assert_eq!(stack.sink.count("order_finalized_paid"), 1);
}

#[tokio::test]
async fn failed_webhook_closes_the_order_and_releases_stock() {
    let stack = TestStack::new();
    let product = stack.seed_product(10).await;
    let hold = stack
        .checkout
        .holds
        .create_hold(product.id, 2, None)
        .await
        .unwrap();
    let order = stack
        .checkout
        .orders
        .create_order_from_hold(hold.id, None)
        .await
        .unwrap();
    let event = stack
        .checkout
        .webhooks
        .ingest(
            "evt_1",
            json!({ "order_id": order.id.to_string(), "status": "failed" }),
        )
        .await
        .unwrap();

    assert_eq!(
        stack.checkout.webhooks.process(event.id).await.unwrap(),
        ProcessOutcome::Applied
    );
    let order = stack.checkout.orders.order(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    assert_eq!(stack.product_counters(&product).await, (10, 0, 0));
}

#[tokio::test]
async fn success_after_failure_is_a_terminal_conflict() {
    let stack = TestStack::new();
    let product = stack.seed_product(10).await;
    let hold = stack
        .checkout
        .holds
        .create_hold(product.id, 2, None)
        .await
        .unwrap();
    let order = stack
        .checkout
        .orders
        .create_order_from_hold(hold.id, None)
        .await
        .unwrap();

    let failed = stack
        .checkout
        .webhooks
        .ingest(
            "evt_failed",
            json!({ "order_id": order.id.to_string(), "status": "failed" }),
        )
        .await
        .unwrap();
    let succeeded = stack
        .checkout
        .webhooks
        .ingest(
            "evt_succeeded",
            json!({ "order_id": order.id.to_string(), "status": "succeeded" }),
        )
        .await
        .unwrap();

    assert_eq!(
        stack.checkout.webhooks.process(failed.id).await.unwrap(),
        ProcessOutcome::Applied
    );
    assert_eq!(
        stack.checkout.webhooks.process(succeeded.id).await.unwrap(),
        ProcessOutcome::Failed
    );

    // The order stays failed and the late success is closed for good.
    let order = stack.checkout.orders.order(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    let succeeded = stack
        .checkout
        .webhooks
        .webhook_event(succeeded.id)
        .await
        .unwrap()
        .unwrap();
    assert!(succeeded.processed);
    assert_eq!(succeeded.outcome, Some(WebhookOutcome::Failed));
    assert_eq!(stack.product_counters(&product).await, (10, 0, 0));
}

#[tokio::test]
async fn failure_after_payment_never_unwinds_a_sale() {
    let stack = TestStack::new();
    let product = stack.seed_product(10).await;
    let hold = stack
        .checkout
        .holds
        .create_hold(product.id, 2, None)
        .await
        .unwrap();
    let order = stack
        .checkout
        .orders
        .create_order_from_hold(hold.id, None)
        .await
        .unwrap();
    stack
        .checkout
        .orders
        .finalize_paid(order.id, None)
        .await
        .unwrap();

    let event = stack
        .checkout
        .webhooks
        .ingest(
            "evt_late_failure",
            json!({ "order_id": order.id.to_string(), "status": "failed" }),
        )
        .await
        .unwrap();
    assert_eq!(
        stack.checkout.webhooks.process(event.id).await.unwrap(),
        ProcessOutcome::Failed
    );

    let order = stack.checkout.orders.order(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(stack.product_counters(&product).await, (8, 0, 2));
}

#[tokio::test]
async fn unknown_status_is_closed_as_failed() {
    let stack = TestStack::new();
    let product = stack.seed_product(10).await;
    let hold = stack
        .checkout
        .holds
        .create_hold(product.id, 1, None)
        .await
        .unwrap();
    let order = stack
        .checkout
        .orders
        .create_order_from_hold(hold.id, None)
        .await
        .unwrap();
    let event = stack
        .checkout
        .webhooks
        .ingest(
            "evt_1",
            json!({ "order_id": order.id.to_string(), "status": "on_hold" }),
        )
        .await
        .unwrap();

    assert_eq!(
        stack.checkout.webhooks.process(event.id).await.unwrap(),
        ProcessOutcome::Failed
    );
    let event = stack
        .checkout
        .webhooks
        .webhook_event(event.id)
        .await
        .unwrap()
        .unwrap();
    assert!(event.processed);
    assert_eq!(event.outcome, Some(WebhookOutcome::Failed));

    // The order itself is untouched.
    let order = stack.checkout.orders.order(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn early_webhook_waits_and_applies_on_retry() {
    let stack = TestStack::new();
    let product = stack.seed_product(10).await;
    let order_id = OrderId::new();

    // The notification outruns order creation.
    let event = stack
        .checkout
        .webhooks
        .ingest(
            "evt_early",
            json!({
                "order_id": order_id.to_string(),
                "payment_id": "pay_9",
                "status": "succeeded",
            }),
        )
        .await
        .unwrap();
    assert_eq!(
        stack.checkout.webhooks.process(event.id).await.unwrap(),
        ProcessOutcome::WaitingForOrder
    );
    let stored = stack
        .checkout
        .webhooks
        .webhook_event(event.id)
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.processed);
    assert_eq!(stored.outcome, Some(WebhookOutcome::WaitingForOrder));

    // The order lands, with its stock reserved through a consumed hold.
    let now = Utc::now();
    let hold = {
        let mut hold = Hold::new(
            HoldId::new(),
            product.id,
            2,
            now + Duration::minutes(2),
            "tok_early".into(),
            now,
        );
        hold.status = HoldStatus::Consumed;
        hold.used_at = Some(now);
        hold
    };
    let order = Order::new(order_id, hold.id, None, Money::from_minor(3_998), now);
    let mut tx = stack.store.begin().await.unwrap();
    assert!(tx.try_reserve_stock(product.id, 2).await.unwrap());
    tx.insert_hold(&hold).await.unwrap();
    tx.insert_order(&order).await.unwrap();
    tx.commit().await.unwrap();

    // The sweep picks the waiting event up and applies it.
    let applied = stack
        .checkout
        .webhooks
        .batch_retry_waiting(stack.config.sweep_batch)
        .await
        .unwrap();
    assert_eq!(applied, 1);

    let order = stack.checkout.orders.order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.external_payment_id.as_deref(), Some("pay_9"));
    assert_eq!(stack.product_counters(&product).await, (8, 0, 2));
    assert_eq!(stack.sink.count("webhook_waiting_for_order"), 1);
    assert_eq!(stack.sink.count("webhook_applied"), 1);
}

#[tokio::test]
async fn webhook_without_order_reference_waits() {
    let stack = TestStack::new();
    let event = stack
        .checkout
        .webhooks
        .ingest("evt_no_ref", json!({ "status": "succeeded" }))
        .await
        .unwrap();
    assert_eq!(
        stack.checkout.webhooks.process(event.id).await.unwrap(),
        ProcessOutcome::WaitingForOrder
    );
}
