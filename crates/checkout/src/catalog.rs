//! Product catalog: seeding and lookup.

use std::sync::Arc;

use surgecart_core::{Clock, Money, ProductId};
use surgecart_domain::Product;
use surgecart_store::{Store, StoreTx};

use crate::error::{CheckoutError, CheckoutResult};

pub struct Catalog<S: Store> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> Catalog<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create a product with its full stock available.
    pub async fn create_product(
        &self,
        sku: impl Into<String>,
        name: impl Into<String>,
        price: Money,
        stock_total: i64,
    ) -> CheckoutResult<Product> {
        if stock_total < 0 {
            return Err(CheckoutError::InvalidQuantity(stock_total));
        }
        let product = Product::new(
            ProductId::new(),
            sku,
            name,
            price,
            stock_total,
            self.clock.now(),
        );
        let mut tx = self.store.begin().await?;
        tx.insert_product(&product).await?;
        tx.commit().await?;
        tracing::info!(product_id = %product.id, sku = %product.sku, "product created");
        Ok(product)
    }

    /// Fetch a product by id.
    pub async fn product(&self, id: ProductId) -> CheckoutResult<Option<Product>> {
        let mut tx = self.store.begin().await?;
        let product = tx.product(id).await?;
        tx.rollback().await?;
        Ok(product)
    }
}

impl<S: Store> Clone for Catalog<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}
