//! Task worker: claims due tasks and runs the periodic sweeps.
//!
//! The one-shot tasks are an optimization for promptness; the sweeps are
//! the correctness backstop. Losing every queued task only delays expiry
//! and reconciliation until the next sweep.

use std::sync::Arc;
use std::time::Duration;

use surgecart_core::Clock;
use surgecart_jobs::{Task, TaskKind, TaskQueue};
use surgecart_store::Store;

use crate::config::CheckoutConfig;
use crate::error::CheckoutResult;
use crate::holds::HoldManager;
use crate::webhooks::WebhookReconciler;

/// Single-process driver for scheduled work.
pub struct TaskWorker<S: Store> {
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
    holds: HoldManager<S>,
    webhooks: WebhookReconciler<S>,
    config: CheckoutConfig,
}

impl<S: Store> TaskWorker<S> {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        clock: Arc<dyn Clock>,
        holds: HoldManager<S>,
        webhooks: WebhookReconciler<S>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            queue,
            clock,
            holds,
            webhooks,
            config,
        }
    }

    /// Claim and dispatch every task due now. Returns how many ran.
    ///
    /// Dispatch failures are logged, not propagated; every task targets an
    /// idempotent entry point that the sweeps will reach again.
    pub async fn tick(&self) -> usize {
        let due = self
            .queue
            .claim_due(self.clock.now(), self.config.sweep_batch);
        let count = due.len();
        for task in due {
            self.dispatch(task).await;
        }
        count
    }

    async fn dispatch(&self, task: Task) {
        match task.kind {
            TaskKind::ExpireHold(hold_id) => {
                if let Err(e) = self.holds.expire_hold(hold_id).await {
                    tracing::error!(hold_id = %hold_id, error = %e, "expiry task failed");
                }
            }
            TaskKind::ProcessWebhook(event_id) => {
                if let Err(e) = self.webhooks.process(event_id).await {
                    tracing::error!(
                        webhook_event_id = %event_id,
                        error = %e,
                        "webhook task failed"
                    );
                }
            }
        }
    }

    /// Run both periodic sweeps once: overdue holds, then waiting webhooks.
    /// Returns (holds expired, webhooks applied).
    pub async fn sweep(&self) -> CheckoutResult<(usize, usize)> {
        let expired = self.holds.expire_due().await?;
        let applied = self
            .webhooks
            .batch_retry_waiting(self.config.sweep_batch)
            .await?;
        Ok((expired, applied))
    }

    /// Poll loop: tick, sweep, sleep. Runs until the enclosing task is
    /// cancelled.
    pub async fn run(&self, poll_interval: Duration) {
        loop {
            self.tick().await;
            if let Err(e) = self.sweep().await {
                tracing::error!(error = %e, "sweep failed");
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
