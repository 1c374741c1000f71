//! End-to-end flash sale against the in-memory store.
//!
//! Run with `cargo run --example flash_sale`; set `RUST_LOG` for more
//! detail (`RUST_LOG=debug` shows retry and dispatch decisions).

use std::sync::Arc;

use serde_json::json;

use surgecart_checkout::{Checkout, CheckoutConfig, CheckoutError};
use surgecart_core::Money;
use surgecart_jobs::InMemoryTaskQueue;
use surgecart_store::InMemoryStore;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    surgecart_observability::init();

    let checkout = Checkout::with_defaults(
        InMemoryStore::arc(),
        Arc::new(InMemoryTaskQueue::new()),
        CheckoutConfig::default(),
    );
    let worker = checkout.worker();

    let product = checkout
        .catalog
        .create_product("DROP-001", "Limited Sneaker", Money::from_minor(14_999), 10)
        .await?;

    // Twelve buyers race for ten units, two at a time.
    let mut holds = Vec::new();
    for buyer in 0..12 {
        match checkout.holds.create_hold(product.id, 2, None).await {
            Ok(hold) => holds.push(hold),
            Err(CheckoutError::NotEnoughStock { available, .. }) => {
                tracing::info!(buyer, available, "buyer turned away");
            }
            Err(e) => return Err(e.into()),
        }
    }

    // The first three check out and their payments settle.
    for hold in &holds[..3] {
        let order = checkout.orders.create_order_from_hold(hold.id, None).await?;
        checkout
            .webhooks
            .ingest(
                &format!("evt_{}", order.id),
                json!({
                    "order_id": order.id.to_string(),
                    "payment_id": format!("pay_{}", order.id),
                    "status": "succeeded",
                }),
            )
            .await?;
    }
    let ran = worker.tick().await;
    tracing::info!(ran, "settlement tasks dispatched");

    let row = checkout
        .catalog
        .product(product.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("product row disappeared"))?;
    tracing::info!(
        sold = row.stock_sold,
        reserved = row.stock_reserved,
        available = row.stock_available(),
        "sale snapshot"
    );
    Ok(())
}
