//! In-memory store.
//!
//! Intended for tests/dev. Not optimized for performance: a single mutex
//! serializes transactions, which makes every transaction trivially
//! isolated; rollback restores a snapshot taken at `begin`. The guarded
//! counter updates behave exactly as the Postgres statements do, so the
//! service layer exercises the same predicates in both stores.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use surgecart_core::{HoldId, OrderId, ProductId, WebhookEventId};
use surgecart_domain::{Hold, Order, Product, WebhookEvent};

use super::{IngestOutcome, Store, StoreError, StoreTx};

#[derive(Debug, Clone, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    holds: HashMap<HoldId, Hold>,
    hold_tokens: HashSet<String>,
    orders: HashMap<OrderId, Order>,
    orders_by_hold: HashMap<HoldId, OrderId>,
    webhooks: HashMap<WebhookEventId, WebhookEvent>,
    webhooks_by_key: HashMap<String, WebhookEventId>,
}

/// In-memory implementation of [`Store`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let snapshot = Some(guard.clone());
        Ok(InMemoryTx { guard, snapshot })
    }
}

/// Transaction over [`InMemoryStore`].
pub struct InMemoryTx {
    guard: OwnedMutexGuard<State>,
    /// State as of `begin`; restored on drop unless committed.
    snapshot: Option<State>,
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        if self.guard.products.contains_key(&product.id) {
            return Err(StoreError::Duplicate("products_pkey".into()));
        }
        self.guard.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.guard.products.get(&id).cloned())
    }

    async fn product_for_update(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        // Transactions are fully serialized here, so the plain read already
        // holds the strongest possible lock.
        Ok(self.guard.products.get(&id).cloned())
    }

    async fn try_reserve_stock(&mut self, id: ProductId, qty: i64) -> Result<bool, StoreError> {
        let Some(product) = self.guard.products.get_mut(&id) else {
            return Ok(false);
        };
        if product.stock_total - product.stock_reserved - product.stock_sold < qty {
            return Ok(false);
        }
        product.stock_reserved += qty;
        Ok(true)
    }

    async fn try_commit_stock(&mut self, id: ProductId, qty: i64) -> Result<bool, StoreError> {
        let Some(product) = self.guard.products.get_mut(&id) else {
            return Ok(false);
        };
        if product.stock_reserved < qty {
            return Ok(false);
        }
        product.stock_reserved -= qty;
        product.stock_sold += qty;
        Ok(true)
    }

    async fn release_stock(
        &mut self,
        id: ProductId,
        qty: i64,
    ) -> Result<Option<i64>, StoreError> {
        let Some(product) = self.guard.products.get_mut(&id) else {
            return Ok(None);
        };
        let released = qty.min(product.stock_reserved).max(0);
        product.stock_reserved -= released;
        Ok(Some(released))
    }

    async fn insert_hold(&mut self, hold: &Hold) -> Result<(), StoreError> {
        if self.guard.holds.contains_key(&hold.id) {
            return Err(StoreError::Duplicate("holds_pkey".into()));
        }
        if !self.guard.hold_tokens.insert(hold.token.clone()) {
            return Err(StoreError::Duplicate("holds_token_key".into()));
        }
        self.guard.holds.insert(hold.id, hold.clone());
        Ok(())
    }

    async fn hold(&mut self, id: HoldId) -> Result<Option<Hold>, StoreError> {
        Ok(self.guard.holds.get(&id).cloned())
    }

    async fn hold_for_update(&mut self, id: HoldId) -> Result<Option<Hold>, StoreError> {
        Ok(self.guard.holds.get(&id).cloned())
    }

    async fn update_hold(&mut self, hold: &Hold) -> Result<(), StoreError> {
        match self.guard.holds.get_mut(&hold.id) {
            Some(row) => {
                *row = hold.clone();
                Ok(())
            }
            None => Err(StoreError::Missing("holds")),
        }
    }

    async fn due_hold_ids(
        &mut self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HoldId>, StoreError> {
        let mut due: Vec<&Hold> = self
            .guard
            .holds
            .values()
            .filter(|h| h.is_due_for_expiry(now))
            .collect();
        due.sort_by_key(|h| (h.expires_at, h.id));
        Ok(due.into_iter().take(limit).map(|h| h.id).collect())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        if self.guard.orders.contains_key(&order.id) {
            return Err(StoreError::Duplicate("orders_pkey".into()));
        }
        if self.guard.orders_by_hold.contains_key(&order.hold_id) {
            return Err(StoreError::Duplicate("orders_hold_id_key".into()));
        }
        self.guard.orders_by_hold.insert(order.hold_id, order.id);
        self.guard.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.guard.orders.get(&id).cloned())
    }

    async fn order_for_update(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.guard.orders.get(&id).cloned())
    }

    async fn order_by_hold(&mut self, hold_id: HoldId) -> Result<Option<Order>, StoreError> {
        Ok(self
            .guard
            .orders_by_hold
            .get(&hold_id)
            .and_then(|id| self.guard.orders.get(id))
            .cloned())
    }

    async fn update_order(&mut self, order: &Order) -> Result<(), StoreError> {
        match self.guard.orders.get_mut(&order.id) {
            Some(row) => {
                *row = order.clone();
                Ok(())
            }
            None => Err(StoreError::Missing("orders")),
        }
    }

    async fn insert_webhook_event(
        &mut self,
        event: &WebhookEvent,
    ) -> Result<IngestOutcome, StoreError> {
        if let Some(existing_id) = self.guard.webhooks_by_key.get(&event.idempotency_key) {
            let existing = self
                .guard
                .webhooks
                .get(existing_id)
                .cloned()
                .ok_or(StoreError::Missing("webhook_events"))?;
            return Ok(IngestOutcome::Existing(existing));
        }
        self.guard
            .webhooks_by_key
            .insert(event.idempotency_key.clone(), event.id);
        self.guard.webhooks.insert(event.id, event.clone());
        Ok(IngestOutcome::Created)
    }

    async fn webhook_event(
        &mut self,
        id: WebhookEventId,
    ) -> Result<Option<WebhookEvent>, StoreError> {
        Ok(self.guard.webhooks.get(&id).cloned())
    }

    async fn webhook_event_for_update(
        &mut self,
        id: WebhookEventId,
    ) -> Result<Option<WebhookEvent>, StoreError> {
        Ok(self.guard.webhooks.get(&id).cloned())
    }

    async fn update_webhook_event(&mut self, event: &WebhookEvent) -> Result<(), StoreError> {
        match self.guard.webhooks.get_mut(&event.id) {
            Some(row) => {
                *row = event.clone();
                Ok(())
            }
            None => Err(StoreError::Missing("webhook_events")),
        }
    }

    async fn waiting_webhook_ids(
        &mut self,
        limit: usize,
    ) -> Result<Vec<WebhookEventId>, StoreError> {
        let mut waiting: Vec<&WebhookEvent> = self
            .guard
            .webhooks
            .values()
            .filter(|w| w.is_waiting_for_order())
            .collect();
        waiting.sort_by_key(|w| (w.received_at, w.id));
        Ok(waiting.into_iter().take(limit).map(|w| w.id).collect())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        // Drop restores the snapshot.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surgecart_core::Money;

    fn product_with_stock(total: i64) -> Product {
        Product::new(
            ProductId::new(),
            "SKU-1",
            "Widget",
            Money::from_minor(500),
            total,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn reserve_is_guarded_by_availability() {
        let store = InMemoryStore::new();
        let product = product_with_stock(10);
        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&product).await.unwrap();
        assert!(tx.try_reserve_stock(product.id, 10).await.unwrap());
        assert!(!tx.try_reserve_stock(product.id, 1).await.unwrap());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn release_clamps_at_zero() {
        let store = InMemoryStore::new();
        let product = product_with_stock(10);
        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&product).await.unwrap();
        tx.try_reserve_stock(product.id, 4).await.unwrap();
        assert_eq!(tx.release_stock(product.id, 9).await.unwrap(), Some(4));
        let row = tx.product(product.id).await.unwrap().unwrap();
        assert_eq!(row.stock_reserved, 0);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = InMemoryStore::new();
        let product = product_with_stock(10);
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_product(&product).await.unwrap();
            tx.commit().await.unwrap();
        }
        {
            let mut tx = store.begin().await.unwrap();
            assert!(tx.try_reserve_stock(product.id, 5).await.unwrap());
            // dropped without commit
        }
        let mut tx = store.begin().await.unwrap();
        let row = tx.product(product.id).await.unwrap().unwrap();
        assert_eq!(row.stock_reserved, 0);
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn second_order_for_same_hold_is_rejected() {
        let store = InMemoryStore::new();
        let hold_id = HoldId::new();
        let mut tx = store.begin().await.unwrap();
        let first = Order::new(OrderId::new(), hold_id, None, Money::from_minor(100), Utc::now());
        let second = Order::new(OrderId::new(), hold_id, None, Money::from_minor(100), Utc::now());
        tx.insert_order(&first).await.unwrap();
        let err = tx.insert_order(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn webhook_insert_is_create_or_fetch() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let payload = serde_json::json!({ "status": "succeeded" });
        let first = WebhookEvent::new(WebhookEventId::new(), "key", payload.clone(), Utc::now());
        let dup = WebhookEvent::new(WebhookEventId::new(), "key", payload, Utc::now());
        assert!(matches!(
            tx.insert_webhook_event(&first).await.unwrap(),
            IngestOutcome::Created
        ));
        match tx.insert_webhook_event(&dup).await.unwrap() {
            IngestOutcome::Existing(existing) => assert_eq!(existing.id, first.id),
            IngestOutcome::Created => panic!("duplicate key created a second row"),
        }
    }
}
