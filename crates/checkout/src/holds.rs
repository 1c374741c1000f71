//! Hold lifecycle: create, expire, sweep.

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use uuid::Uuid;

use surgecart_core::{Clock, EventRecord, EventSink, HoldId, ProductId};
use surgecart_domain::{Hold, HoldStatus};
use surgecart_jobs::{TaskKind, TaskQueue};
use surgecart_store::{Store, StoreTx};

use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, CheckoutResult};
use crate::ledger::StockLedger;
use crate::retry::backoff;

/// Creates and expires time-boxed stock reservations.
pub struct HoldManager<S: Store> {
    store: Arc<S>,
    queue: Arc<dyn TaskQueue>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    ledger: StockLedger,
    config: CheckoutConfig,
}

impl<S: Store> HoldManager<S> {
    pub fn new(
        store: Arc<S>,
        queue: Arc<dyn TaskQueue>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        config: CheckoutConfig,
    ) -> Self {
        let ledger = StockLedger::new(Arc::clone(&sink), Arc::clone(&clock));
        Self {
            store,
            queue,
            sink,
            clock,
            ledger,
            config,
        }
    }

    /// Reserve `qty` units of a product for the configured TTL (or the
    /// caller's override) and schedule the one-shot expiry task.
    ///
    /// The reservation is taken through the guarded counter update under
    /// the product row lock, so concurrent callers can never drive the
    /// reserved count past availability.
    pub async fn create_hold(
        &self,
        product_id: ProductId,
        qty: i64,
        ttl: Option<Duration>,
    ) -> CheckoutResult<Hold> {
        if qty <= 0 {
            return Err(CheckoutError::InvalidQuantity(qty));
        }
        let ttl = ttl.unwrap_or_else(|| self.config.hold_ttl());
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_create_hold(product_id, qty, ttl).await {
                Err(e) if e.is_transient() && attempt < self.config.max_tx_attempts => {
                    tracing::debug!(attempt, error = %e, "retrying hold creation");
                    tokio::time::sleep(backoff(attempt)).await;
                }
                other => return other,
            }
        }
    }

    async fn try_create_hold(
        &self,
        product_id: ProductId,
        qty: i64,
        ttl: Duration,
    ) -> CheckoutResult<Hold> {
        let mut tx = self.store.begin().await?;
        let product = tx
            .product_for_update(product_id)
            .await?
            .ok_or(CheckoutError::MissingProduct(product_id))?;

        if !self.ledger.reserve(&mut tx, product_id, qty).await? {
            let available = product.stock_available();
            tx.rollback().await?;
            self.sink.emit(EventRecord::new(
                "hold_rejected",
                self.clock.now(),
                json!({
                    "product_id": product_id,
                    "requested": qty,
                    "available": available,
                }),
            ));
            return Err(CheckoutError::NotEnoughStock {
                product_id,
                requested: qty,
                available,
            });
        }

        let now = self.clock.now();
        let hold = Hold::new(
            HoldId::new(),
            product_id,
            qty,
            now + ttl,
            Uuid::new_v4().simple().to_string(),
            now,
        );
        tx.insert_hold(&hold).await?;
        tx.commit().await?;

        // Scheduled past the TTL so the trigger fires only once the hold
        // is genuinely due; the sweep covers a lost task.
        self.queue.schedule(
            hold.expires_at + self.config.expiry_grace(),
            TaskKind::ExpireHold(hold.id),
        );
        self.sink.emit(EventRecord::new(
            "hold_created",
            now,
            json!({
                "hold_id": hold.id,
                "product_id": product_id,
                "qty": qty,
                "expires_at": hold.expires_at,
            }),
        ));
        tracing::info!(hold_id = %hold.id, product_id = %product_id, qty, "hold created");
        Ok(hold)
    }

    /// Expire a hold and return its units to the pool.
    ///
    /// Idempotent: returns `Ok(false)` when the hold is missing or already
    /// terminal, so the one-shot task, the sweep and a manual invocation
    /// can all race without double-releasing.
    pub async fn expire_hold(&self, hold_id: HoldId) -> CheckoutResult<bool> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_expire_hold(hold_id).await {
                Err(e) if e.is_transient() && attempt < self.config.max_tx_attempts => {
                    tracing::debug!(attempt, error = %e, "retrying hold expiry");
                    tokio::time::sleep(backoff(attempt)).await;
                }
                other => return other,
            }
        }
    }

    async fn try_expire_hold(&self, hold_id: HoldId) -> CheckoutResult<bool> {
        let mut tx = self.store.begin().await?;
        let Some(mut hold) = tx.hold_for_update(hold_id).await? else {
            return Ok(false);
        };
        if hold.status != HoldStatus::Active {
            return Ok(false);
        }

        self.ledger.release(&mut tx, hold.product_id, hold.qty).await?;
        hold.status = HoldStatus::Expired;
        tx.update_hold(&hold).await?;
        tx.commit().await?;

        self.sink.emit(EventRecord::new(
            "hold_expired",
            self.clock.now(),
            json!({
                "hold_id": hold.id,
                "product_id": hold.product_id,
                "qty": hold.qty,
            }),
        ));
        tracing::info!(hold_id = %hold.id, "hold expired");
        Ok(true)
    }

    /// Periodic sweep: expire every active hold whose TTL has elapsed,
    /// bounded by the configured batch size. Returns how many were
    /// actually expired.
    ///
    /// Per-hold failures are logged and skipped; one poisoned hold must
    /// not stall the rest of the batch.
    pub async fn expire_due(&self) -> CheckoutResult<usize> {
        let now = self.clock.now();
        let due = {
            let mut tx = self.store.begin().await?;
            let due = tx.due_hold_ids(now, self.config.sweep_batch).await?;
            tx.rollback().await?;
            due
        };

        let mut expired = 0;
        for hold_id in due {
            match self.expire_hold(hold_id).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(hold_id = %hold_id, error = %e, "hold expiry sweep failed");
                }
            }
        }
        Ok(expired)
    }

    /// Fetch a hold by id.
    pub async fn hold(&self, hold_id: HoldId) -> CheckoutResult<Option<Hold>> {
        let mut tx = self.store.begin().await?;
        let hold = tx.hold(hold_id).await?;
        tx.rollback().await?;
        Ok(hold)
    }
}

impl<S: Store> Clone for HoldManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            queue: Arc::clone(&self.queue),
            sink: Arc::clone(&self.sink),
            clock: Arc::clone(&self.clock),
            ledger: self.ledger.clone(),
            config: self.config.clone(),
        }
    }
}
