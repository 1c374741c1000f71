//! `surgecart-store`: the data-access layer.
//!
//! Entities are plain records; every read-modify-write goes through an
//! explicit transaction ([`StoreTx`]) obtained from a [`Store`]. The trait
//! surface encodes the two correctness mechanisms the checkout services
//! rely on:
//!
//! - **Pessimistic row locks**: the `*_for_update` reads block concurrent
//!   transactions touching the same row until commit/rollback.
//! - **Guarded single-statement counter updates**: `try_reserve_stock`,
//!   `try_commit_stock` and `release_stock` carry their own conditional
//!   predicate, so the stock invariant holds even if a caller's locking is
//!   imperfect.
//!
//! Two implementations: [`InMemoryStore`] (tests/dev, serializable) and
//! [`PostgresStore`] (sqlx, `SELECT ... FOR UPDATE`).

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use surgecart_core::{HoldId, OrderId, ProductId, WebhookEventId};
use surgecart_domain::{Hold, Order, Product, WebhookEvent};

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Storage-layer error.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// A uniqueness constraint rejected a write.
    #[error("unique constraint violated: {0}")]
    Duplicate(String),

    /// Serialization/deadlock conflict; safe to retry the whole transaction.
    #[error("serialization conflict: {0}")]
    Serialization(String),

    /// An update targeted a row that does not exist.
    #[error("row not found: {0}")]
    Missing(&'static str),

    /// Backend failure (connection, protocol, unexpected data).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the enclosing transaction can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Serialization(_))
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Result of the create-or-fetch webhook insert.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// The event row was created by this call.
    Created,
    /// A row with this idempotency key already existed; here it is.
    Existing(WebhookEvent),
}

/// A handle that can open transactions.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: StoreTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// An open transaction over the four row-sets.
///
/// Dropping a transaction without calling [`StoreTx::commit`] rolls it back.
#[async_trait]
pub trait StoreTx: Send {
    // -- products ---------------------------------------------------------

    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError>;

    async fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Read the product row under an exclusive lock.
    async fn product_for_update(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Guarded reserve: succeeds only if
    /// `stock_total - stock_reserved - stock_sold >= qty`.
    /// Returns whether the counter moved.
    async fn try_reserve_stock(&mut self, id: ProductId, qty: i64) -> Result<bool, StoreError>;

    /// Guarded commit: succeeds only if `stock_reserved >= qty`; moves the
    /// quantity from reserved to sold in a single statement.
    async fn try_commit_stock(&mut self, id: ProductId, qty: i64) -> Result<bool, StoreError>;

    /// Clamped release: decrements `stock_reserved` by at most `qty`,
    /// never below zero. Returns the units actually released, or `None`
    /// if the product row does not exist.
    async fn release_stock(&mut self, id: ProductId, qty: i64)
        -> Result<Option<i64>, StoreError>;

    // -- holds ------------------------------------------------------------

    async fn insert_hold(&mut self, hold: &Hold) -> Result<(), StoreError>;

    async fn hold(&mut self, id: HoldId) -> Result<Option<Hold>, StoreError>;

    async fn hold_for_update(&mut self, id: HoldId) -> Result<Option<Hold>, StoreError>;

    async fn update_hold(&mut self, hold: &Hold) -> Result<(), StoreError>;

    /// Active holds whose TTL has elapsed, oldest expiry first, bounded.
    async fn due_hold_ids(
        &mut self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<HoldId>, StoreError>;

    // -- orders -----------------------------------------------------------

    /// Insert; fails with [`StoreError::Duplicate`] if an order for the
    /// same hold already exists (`orders.hold_id` unique).
    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError>;

    async fn order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError>;

    async fn order_for_update(&mut self, id: OrderId) -> Result<Option<Order>, StoreError>;

    async fn order_by_hold(&mut self, hold_id: HoldId) -> Result<Option<Order>, StoreError>;

    async fn update_order(&mut self, order: &Order) -> Result<(), StoreError>;

    // -- webhook events ---------------------------------------------------

    /// Create-or-fetch keyed by `idempotency_key`.
    async fn insert_webhook_event(
        &mut self,
        event: &WebhookEvent,
    ) -> Result<IngestOutcome, StoreError>;

    async fn webhook_event(
        &mut self,
        id: WebhookEventId,
    ) -> Result<Option<WebhookEvent>, StoreError>;

    async fn webhook_event_for_update(
        &mut self,
        id: WebhookEventId,
    ) -> Result<Option<WebhookEvent>, StoreError>;

    async fn update_webhook_event(&mut self, event: &WebhookEvent) -> Result<(), StoreError>;

    /// Unprocessed events waiting for their order, oldest first, bounded.
    async fn waiting_webhook_ids(
        &mut self,
        limit: usize,
    ) -> Result<Vec<WebhookEventId>, StoreError>;

    // -- transaction boundary ---------------------------------------------

    async fn commit(self) -> Result<(), StoreError>
    where
        Self: Sized;

    async fn rollback(self) -> Result<(), StoreError>
    where
        Self: Sized;
}
