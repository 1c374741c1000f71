//! `surgecart-checkout`: flash-sale checkout services.
//!
//! Four services over a shared [`Store`]:
//!
//! - [`Catalog`]: product seeding and lookup.
//! - [`HoldManager`]: time-boxed stock reservations, expiry, sweep.
//! - [`OrderLifecycle`]: pending orders from holds, finalize paid,
//!   mark failed.
//! - [`WebhookReconciler`]: idempotent payment-notification ingestion and
//!   out-of-order-tolerant application.
//!
//! [`Checkout`] wires them together with one store, task queue, event sink
//! and clock. [`TaskWorker`] drives the scheduled side.

pub mod catalog;
pub mod config;
pub mod error;
pub mod holds;
pub mod ledger;
pub mod orders;
mod retry;
pub mod webhooks;
pub mod worker;

use std::sync::Arc;

use surgecart_core::{Clock, EventSink, SystemClock, TracingSink};
use surgecart_jobs::TaskQueue;
use surgecart_store::Store;

pub use catalog::Catalog;
pub use config::CheckoutConfig;
pub use error::{CheckoutError, CheckoutResult};
pub use holds::HoldManager;
pub use ledger::StockLedger;
pub use orders::{FailureKind, OrderLifecycle};
pub use webhooks::{ProcessOutcome, WebhookReconciler};
pub use worker::TaskWorker;

/// The wired-up checkout stack.
pub struct Checkout<S: Store> {
    pub catalog: Catalog<S>,
    pub holds: HoldManager<S>,
    pub orders: OrderLifecycle<S>,
    pub webhooks: WebhookReconciler<S>,
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
    config: CheckoutConfig,
}

impl<S: Store> Checkout<S> {
    /// Wire the services over one store, queue, sink and clock.
    pub fn new(
        store: Arc<S>,
        queue: Arc<dyn TaskQueue>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        config: CheckoutConfig,
    ) -> Self {
        let catalog = Catalog::new(Arc::clone(&store), Arc::clone(&clock));
        let holds = HoldManager::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&sink),
            Arc::clone(&clock),
            config.clone(),
        );
        let orders = OrderLifecycle::new(
            Arc::clone(&store),
            Arc::clone(&sink),
            Arc::clone(&clock),
            config.clone(),
        );
        let webhooks = WebhookReconciler::new(
            store,
            Arc::clone(&queue),
            sink,
            Arc::clone(&clock),
            orders.clone(),
            config.clone(),
        );
        Self {
            catalog,
            holds,
            orders,
            webhooks,
            queue,
            clock,
            config,
        }
    }

    /// Wire with the system clock and the tracing event sink.
    pub fn with_defaults(
        store: Arc<S>,
        queue: Arc<dyn TaskQueue>,
        config: CheckoutConfig,
    ) -> Self {
        Self::new(
            store,
            queue,
            Arc::new(TracingSink),
            Arc::new(SystemClock),
            config,
        )
    }

    /// Build the worker that drives this stack's scheduled tasks.
    pub fn worker(&self) -> TaskWorker<S> {
        TaskWorker::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.clock),
            self.holds.clone(),
            self.webhooks.clone(),
            self.config.clone(),
        )
    }
}
