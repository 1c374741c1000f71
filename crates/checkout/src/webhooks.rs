//! Webhook ingestion and reconciliation.
//!
//! Ingestion is a create-or-fetch keyed by the caller's idempotency key;
//! processing applies at most one effect per event and tolerates
//! notifications that arrive before their order exists.

use std::sync::Arc;

use serde_json::json;

use surgecart_core::{Clock, EventRecord, EventSink, WebhookEventId};
use surgecart_domain::{payload, WebhookEvent, WebhookOutcome};
use surgecart_jobs::{TaskKind, TaskQueue};
use surgecart_store::{IngestOutcome, Store, StoreTx};

use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, CheckoutResult};
use crate::orders::{FailureKind, OrderLifecycle};
use crate::retry::backoff;

/// What processing an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The event's effect was applied to its order (or had already been
    /// applied by an equivalent earlier event).
    Applied,
    /// The referenced order does not exist yet; the event stays unprocessed
    /// and the retry sweep will pick it up.
    WaitingForOrder,
    /// The event was already processed; nothing was done.
    Skipped,
    /// The event can never apply (unknown status, or it conflicts with the
    /// order's terminal state). Recorded as processed.
    Failed,
}

/// Applies payment notifications to orders, exactly once each.
pub struct WebhookReconciler<S: Store> {
    store: Arc<S>,
    queue: Arc<dyn TaskQueue>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    orders: OrderLifecycle<S>,
    config: CheckoutConfig,
}

impl<S: Store> WebhookReconciler<S> {
    pub fn new(
        store: Arc<S>,
        queue: Arc<dyn TaskQueue>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        orders: OrderLifecycle<S>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            store,
            queue,
            sink,
            clock,
            orders,
            config,
        }
    }

    /// Record an incoming notification and schedule its processing.
    ///
    /// Deduplicated by `idempotency_key`: a replay returns the stored event
    /// untouched and schedules nothing. The payload must carry a `status`
    /// field; everything else is stored opaquely.
    pub async fn ingest(
        &self,
        idempotency_key: &str,
        payload: serde_json::Value,
    ) -> CheckoutResult<WebhookEvent> {
        if payload::status(&payload).is_none() {
            return Err(CheckoutError::MissingRequiredField("status"));
        }
        let event = WebhookEvent::new(
            WebhookEventId::new(),
            idempotency_key,
            payload,
            self.clock.now(),
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_ingest(&event).await {
                Err(e) if e.is_transient() && attempt < self.config.max_tx_attempts => {
                    tracing::debug!(attempt, error = %e, "retrying webhook ingestion");
                    tokio::time::sleep(backoff(attempt)).await;
                }
                other => return other,
            }
        }
    }

    async fn try_ingest(&self, event: &WebhookEvent) -> CheckoutResult<WebhookEvent> {
        let mut tx = self.store.begin().await?;
        match tx.insert_webhook_event(event).await? {
            IngestOutcome::Created => {
                tx.commit().await?;
                self.queue
                    .schedule(self.clock.now(), TaskKind::ProcessWebhook(event.id));
                self.sink.emit(EventRecord::new(
                    "webhook_received",
                    event.received_at,
                    json!({
                        "webhook_event_id": event.id,
                        "idempotency_key": event.idempotency_key,
                        "order_id": event.order_id,
                    }),
                ));
                Ok(event.clone())
            }
            IngestOutcome::Existing(existing) => {
                tx.rollback().await?;
                tracing::debug!(
                    idempotency_key = %event.idempotency_key,
                    webhook_event_id = %existing.id,
                    "duplicate webhook ignored"
                );
                Ok(existing)
            }
        }
    }

    /// Process one ingested event.
    ///
    /// The processed flag is checked under the event's row lock, so two
    /// concurrent deliveries of the same event apply its effect once.
    /// Conflicts with the order's terminal state (for example a success
    /// notification for an order already failed) close the event as
    /// [`ProcessOutcome::Failed`] rather than erroring.
    pub async fn process(&self, event_id: WebhookEventId) -> CheckoutResult<ProcessOutcome> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_process(event_id).await {
                Err(e) if e.is_transient() && attempt < self.config.max_tx_attempts => {
                    tracing::debug!(attempt, error = %e, "retrying webhook processing");
                    tokio::time::sleep(backoff(attempt)).await;
                }
                Err(e) if e.is_business_conflict() => {
                    tracing::warn!(
                        webhook_event_id = %event_id,
                        error = %e,
                        "webhook conflicts with order state, closing as failed"
                    );
                    self.record_failure(event_id, true).await?;
                    return Ok(ProcessOutcome::Failed);
                }
                Err(e) => {
                    // Integrity or backend failure. Record the attempt but
                    // leave the event unprocessed for a manual re-drive.
                    self.record_failure(event_id, false).await?;
                    return Err(e);
                }
                Ok(outcome) => return Ok(outcome),
            }
        }
    }

    async fn try_process(&self, event_id: WebhookEventId) -> CheckoutResult<ProcessOutcome> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let Some(mut event) = tx.webhook_event_for_update(event_id).await? else {
            return Err(CheckoutError::MissingWebhookEvent(event_id));
        };
        if event.processed {
            tx.rollback().await?;
            return Ok(ProcessOutcome::Skipped);
        }

        let order_id = event.order_id.or_else(|| payload::order_id(&event.payload));
        let order = match order_id {
            Some(id) => tx.order(id).await?,
            None => None,
        };
        let Some(order) = order else {
            event.outcome = Some(WebhookOutcome::WaitingForOrder);
            tx.update_webhook_event(&event).await?;
            tx.commit().await?;
            self.sink.emit(EventRecord::new(
                "webhook_waiting_for_order",
                now,
                json!({
                    "webhook_event_id": event_id,
                    "order_id": order_id,
                }),
            ));
            return Ok(ProcessOutcome::WaitingForOrder);
        };

        let payment_id = payload::payment_id(&event.payload).map(str::to_owned);
        match payload::status(&event.payload) {
            Some("succeeded") => {
                self.orders
                    .finalize_paid_tx(&mut tx, order.id, payment_id)
                    .await?;
            }
            Some("failed") | Some("declined") | Some("cancelled") => {
                self.orders
                    .mark_as_failed_tx(&mut tx, order.id, FailureKind::Failed)
                    .await?;
            }
            other => {
                let status = other.map(str::to_owned);
                event.processed = true;
                event.outcome = Some(WebhookOutcome::Failed);
                event.processed_at = Some(now);
                event.order_id = Some(order.id);
                tx.update_webhook_event(&event).await?;
                tx.commit().await?;
                tracing::warn!(
                    webhook_event_id = %event_id,
                    status = status.as_deref().unwrap_or("<missing>"),
                    "webhook carries unknown payment status"
                );
                self.sink.emit(EventRecord::new(
                    "webhook_failed",
                    now,
                    json!({
                        "webhook_event_id": event_id,
                        "order_id": order.id,
                        "status": status,
                    }),
                ));
                return Ok(ProcessOutcome::Failed);
            }
        }

        event.processed = true;
        event.outcome = Some(WebhookOutcome::Applied);
        event.processed_at = Some(now);
        event.order_id = Some(order.id);
        tx.update_webhook_event(&event).await?;
        tx.commit().await?;

        self.sink.emit(EventRecord::new(
            "webhook_applied",
            now,
            json!({
                "webhook_event_id": event_id,
                "order_id": order.id,
            }),
        ));
        tracing::info!(webhook_event_id = %event_id, order_id = %order.id, "webhook applied");
        Ok(ProcessOutcome::Applied)
    }

    /// Record a failed attempt in its own transaction, after the processing
    /// transaction has rolled back. `terminal` marks the event processed so
    /// it is never retried.
    async fn record_failure(
        &self,
        event_id: WebhookEventId,
        terminal: bool,
    ) -> CheckoutResult<()> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let Some(mut event) = tx.webhook_event_for_update(event_id).await? else {
            return Err(CheckoutError::MissingWebhookEvent(event_id));
        };
        if event.processed {
            tx.rollback().await?;
            return Ok(());
        }
        event.outcome = Some(WebhookOutcome::Failed);
        if terminal {
            event.processed = true;
            event.processed_at = Some(now);
        }
        tx.update_webhook_event(&event).await?;
        tx.commit().await?;
        self.sink.emit(EventRecord::new(
            "webhook_failed",
            now,
            json!({
                "webhook_event_id": event_id,
                "terminal": terminal,
            }),
        ));
        Ok(())
    }

    /// Retry up to `limit` events still waiting for their order. Returns
    /// how many were applied.
    ///
    /// Per-event failures are logged and skipped so one poisoned event
    /// cannot stall the sweep.
    pub async fn batch_retry_waiting(&self, limit: usize) -> CheckoutResult<usize> {
        let waiting = {
            let mut tx = self.store.begin().await?;
            let waiting = tx.waiting_webhook_ids(limit).await?;
            tx.rollback().await?;
            waiting
        };

        let mut applied = 0;
        for event_id in waiting {
            match self.process(event_id).await {
                Ok(ProcessOutcome::Applied) => applied += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        webhook_event_id = %event_id,
                        error = %e,
                        "waiting-webhook retry failed"
                    );
                }
            }
        }
        Ok(applied)
    }

    /// Fetch an event by id.
    pub async fn webhook_event(
        &self,
        event_id: WebhookEventId,
    ) -> CheckoutResult<Option<WebhookEvent>> {
        let mut tx = self.store.begin().await?;
        let event = tx.webhook_event(event_id).await?;
        tx.rollback().await?;
        Ok(event)
    }
}

impl<S: Store> Clone for WebhookReconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            queue: Arc::clone(&self.queue),
            sink: Arc::clone(&self.sink),
            clock: Arc::clone(&self.clock),
            orders: self.orders.clone(),
            config: self.config.clone(),
        }
    }
}
