use std::sync::Arc;

use surgecart_checkout::{Checkout, CheckoutConfig};
use surgecart_core::{CollectingSink, ManualClock, Money};
use surgecart_domain::Product;
use surgecart_jobs::InMemoryTaskQueue;
use surgecart_store::InMemoryStore;

/// Fully wired in-memory stack with a manual clock and a collecting sink.
pub struct TestStack {
    pub checkout: Checkout<InMemoryStore>,
    pub store: Arc<InMemoryStore>,
    pub queue: Arc<InMemoryTaskQueue>,
    pub sink: Arc<CollectingSink>,
    pub clock: Arc<ManualClock>,
    pub config: CheckoutConfig,
}

impl TestStack {
    pub fn new() -> Self {
        Self::with_config(CheckoutConfig::default())
    }

    pub fn with_config(config: CheckoutConfig) -> Self {
        let store = InMemoryStore::arc();
        let queue = Arc::new(InMemoryTaskQueue::new());
        let sink = Arc::new(CollectingSink::new());
        let clock = Arc::new(ManualClock::starting_now());
        let checkout = Checkout::new(
            Arc::clone(&store),
            queue.clone(),
            sink.clone(),
            clock.clone(),
            config.clone(),
        );
        Self {
            checkout,
            store,
            queue,
            sink,
            clock,
            config,
        }
    }

    pub async fn seed_product(&self, stock_total: i64) -> Product {
        self.checkout
            .catalog
            .create_product("SKU-1", "Limited Widget", Money::from_minor(1_999), stock_total)
            .await
            .expect("seed product")
    }

    pub async fn product_counters(&self, product: &Product) -> (i64, i64, i64) {
        let row = self
            .checkout
            .catalog
            .product(product.id)
            .await
            .expect("read product")
            .expect("product exists");
        (row.stock_available(), row.stock_reserved, row.stock_sold)
    }
}
