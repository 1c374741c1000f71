//! Order lifecycle: create from hold, finalize paid, mark failed.
//!
//! Lock ordering is order row, then hold row, then product row, in every
//! path that touches more than one. Keeping the order fixed rules out
//! lock cycles between the payment path and the expiry path.

use std::sync::Arc;

use serde_json::json;

use surgecart_core::{Clock, EventRecord, EventSink, HoldId, OrderId};
use surgecart_domain::{HoldStatus, Order, OrderStatus};
use surgecart_store::{Store, StoreError, StoreTx};

use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, CheckoutResult};
use crate::ledger::StockLedger;
use crate::retry::backoff;

/// Which failure status a non-payment closes the order with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Payment declined or errored at the gateway.
    Failed,
    /// Buyer or operator abandoned the order.
    Cancelled,
}

impl FailureKind {
    pub fn status(self) -> OrderStatus {
        match self {
            FailureKind::Failed => OrderStatus::Failed,
            FailureKind::Cancelled => OrderStatus::Cancelled,
        }
    }
}

/// Drives orders from pending to their terminal state.
pub struct OrderLifecycle<S: Store> {
    store: Arc<S>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    ledger: StockLedger,
    config: CheckoutConfig,
}

impl<S: Store> OrderLifecycle<S> {
    pub fn new(
        store: Arc<S>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        config: CheckoutConfig,
    ) -> Self {
        let ledger = StockLedger::new(Arc::clone(&sink), Arc::clone(&clock));
        Self {
            store,
            sink,
            clock,
            ledger,
            config,
        }
    }

    /// Consume a usable hold into a pending order, snapshotting the amount
    /// from the product's current price. A gateway reference already known
    /// at checkout time is stamped onto the order here.
    ///
    /// Idempotent per hold: if an order for this hold already exists, it is
    /// returned unchanged. The unique constraint on `orders.hold_id` backs
    /// this up against concurrent submissions.
    pub async fn create_order_from_hold(
        &self,
        hold_id: HoldId,
        external_payment_id: Option<String>,
    ) -> CheckoutResult<Order> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .try_create_order_from_hold(hold_id, external_payment_id.clone())
                .await
            {
                Err(e) if e.is_transient() && attempt < self.config.max_tx_attempts => {
                    tracing::debug!(attempt, error = %e, "retrying order creation");
                    tokio::time::sleep(backoff(attempt)).await;
                }
                other => return other,
            }
        }
    }

    async fn try_create_order_from_hold(
        &self,
        hold_id: HoldId,
        external_payment_id: Option<String>,
    ) -> CheckoutResult<Order> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let Some(mut hold) = tx.hold_for_update(hold_id).await? else {
            return Err(CheckoutError::MissingHold(hold_id));
        };

        match hold.status {
            HoldStatus::Consumed => {
                // A consumed hold normally has its order; if the order is
                // gone we fall through and create it under the same tx.
                if let Some(existing) = tx.order_by_hold(hold_id).await? {
                    tx.rollback().await?;
                    return Ok(existing);
                }
            }
            HoldStatus::Expired => {
                return Err(CheckoutError::InvalidHoldState {
                    hold_id,
                    status: hold.status,
                });
            }
            HoldStatus::Active => {
                if hold.is_past_ttl(now) {
                    return Err(CheckoutError::HoldExpired(hold_id));
                }
            }
        }

        let product = tx
            .product(hold.product_id)
            .await?
            .ok_or(CheckoutError::MissingProduct(hold.product_id))?;
        let amount = product.price.checked_mul_qty(hold.qty)?;

        if hold.status == HoldStatus::Active {
            hold.status = HoldStatus::Consumed;
            hold.used_at = Some(now);
            tx.update_hold(&hold).await?;
        }

        let order = Order::new(OrderId::new(), hold_id, external_payment_id, amount, now);
        match tx.insert_order(&order).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => {
                // A concurrent submission won the unique constraint race.
                // The tx is aborted; re-read the winner in a fresh one.
                drop(tx);
                let mut tx = self.store.begin().await?;
                let existing = tx
                    .order_by_hold(hold_id)
                    .await?
                    .ok_or(CheckoutError::MissingHold(hold_id))?;
                tx.rollback().await?;
                return Ok(existing);
            }
            Err(e) => return Err(e.into()),
        }
        tx.commit().await?;

        self.sink.emit(EventRecord::new(
            "hold_consumed",
            now,
            json!({ "hold_id": hold_id, "order_id": order.id }),
        ));
        self.sink.emit(EventRecord::new(
            "order_created",
            now,
            json!({
                "order_id": order.id,
                "hold_id": hold_id,
                "amount": order.amount,
            }),
        ));
        tracing::info!(order_id = %order.id, hold_id = %hold_id, "order created");
        Ok(order)
    }

    /// Mark an order paid and commit its reserved stock to sold.
    ///
    /// Returns `true` when this call performed the transition, `false` when
    /// the order was already paid (a duplicate success notification).
    pub async fn finalize_paid(
        &self,
        order_id: OrderId,
        external_payment_id: Option<String>,
    ) -> CheckoutResult<bool> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result: CheckoutResult<bool> = async {
                let mut tx = self.store.begin().await?;
                let transitioned = self
                    .finalize_paid_tx(&mut tx, order_id, external_payment_id.clone())
                    .await?;
                tx.commit().await?;
                Ok(transitioned)
            }
            .await;
            match result {
                Err(e) if e.is_transient() && attempt < self.config.max_tx_attempts => {
                    tracing::debug!(attempt, error = %e, "retrying order finalization");
                    tokio::time::sleep(backoff(attempt)).await;
                }
                other => return other,
            }
        }
    }

    /// Transactional body of [`Self::finalize_paid`], composable inside a
    /// caller-owned transaction (the webhook reconciler uses this).
    pub async fn finalize_paid_tx(
        &self,
        tx: &mut S::Tx,
        order_id: OrderId,
        external_payment_id: Option<String>,
    ) -> CheckoutResult<bool> {
        let Some(mut order) = tx.order_for_update(order_id).await? else {
            return Err(CheckoutError::MissingOrder(order_id));
        };
        match order.status {
            OrderStatus::Paid => return Ok(false),
            OrderStatus::Failed | OrderStatus::Cancelled => {
                return Err(CheckoutError::CannotPayClosedOrder {
                    order_id,
                    status: order.status,
                });
            }
            OrderStatus::Pending => {}
        }

        let Some(mut hold) = tx.hold_for_update(order.hold_id).await? else {
            return Err(CheckoutError::MissingHold(order.hold_id));
        };
        if tx.product_for_update(hold.product_id).await?.is_none() {
            return Err(CheckoutError::MissingProduct(hold.product_id));
        }
        if !self.ledger.commit(tx, hold.product_id, hold.qty).await? {
            return Err(CheckoutError::CommitStockFailed {
                order_id,
                product_id: hold.product_id,
                qty: hold.qty,
            });
        }

        let now = self.clock.now();
        order.status = OrderStatus::Paid;
        if order.external_payment_id.is_none() {
            order.external_payment_id = external_payment_id;
        }
        tx.update_order(&order).await?;

        // Normally already consumed at order creation; heal it if not so
        // the expiry sweep cannot release stock that is now sold.
        if hold.status != HoldStatus::Consumed {
            hold.status = HoldStatus::Consumed;
            hold.used_at = hold.used_at.or(Some(now));
            tx.update_hold(&hold).await?;
        }

        self.sink.emit(EventRecord::new(
            "order_finalized_paid",
            now,
            json!({
                "order_id": order_id,
                "product_id": hold.product_id,
                "qty": hold.qty,
                "amount": order.amount,
            }),
        ));
        tracing::info!(order_id = %order_id, "order finalized as paid");
        Ok(true)
    }

    /// Close an order as failed or cancelled and return its reserved units
    /// to the pool.
    ///
    /// Returns `true` when this call performed the transition, `false` when
    /// the order was already closed with a failure status.
    pub async fn mark_as_failed(
        &self,
        order_id: OrderId,
        kind: FailureKind,
    ) -> CheckoutResult<bool> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result: CheckoutResult<bool> = async {
                let mut tx = self.store.begin().await?;
                let transitioned = self.mark_as_failed_tx(&mut tx, order_id, kind).await?;
                tx.commit().await?;
                Ok(transitioned)
            }
            .await;
            match result {
                Err(e) if e.is_transient() && attempt < self.config.max_tx_attempts => {
                    tracing::debug!(attempt, error = %e, "retrying order failure");
                    tokio::time::sleep(backoff(attempt)).await;
                }
                other => return other,
            }
        }
    }

    /// Transactional body of [`Self::mark_as_failed`].
    pub async fn mark_as_failed_tx(
        &self,
        tx: &mut S::Tx,
        order_id: OrderId,
        kind: FailureKind,
    ) -> CheckoutResult<bool> {
        let Some(mut order) = tx.order_for_update(order_id).await? else {
            return Err(CheckoutError::MissingOrder(order_id));
        };
        if order.status.is_failure() {
            return Ok(false);
        }
        if order.status == OrderStatus::Paid {
            return Err(CheckoutError::CannotFailPaidOrder(order_id));
        }

        let Some(mut hold) = tx.hold_for_update(order.hold_id).await? else {
            return Err(CheckoutError::MissingHold(order.hold_id));
        };

        // An already-expired hold has released its units; releasing again
        // here would hand the pool stock that was never reserved.
        if hold.status != HoldStatus::Expired {
            self.ledger.release(tx, hold.product_id, hold.qty).await?;
            hold.status = HoldStatus::Expired;
            tx.update_hold(&hold).await?;
        }

        order.status = kind.status();
        tx.update_order(&order).await?;

        self.sink.emit(EventRecord::new(
            "order_marked_failed",
            self.clock.now(),
            json!({
                "order_id": order_id,
                "status": order.status.as_str(),
                "product_id": hold.product_id,
                "qty": hold.qty,
            }),
        ));
        tracing::info!(order_id = %order_id, status = order.status.as_str(), "order closed");
        Ok(true)
    }

    /// Fetch an order by id.
    pub async fn order(&self, order_id: OrderId) -> CheckoutResult<Option<Order>> {
        let mut tx = self.store.begin().await?;
        let order = tx.order(order_id).await?;
        tx.rollback().await?;
        Ok(order)
    }

    /// Fetch the order created from a hold, if any.
    pub async fn order_by_hold(&self, hold_id: HoldId) -> CheckoutResult<Option<Order>> {
        let mut tx = self.store.begin().await?;
        let order = tx.order_by_hold(hold_id).await?;
        tx.rollback().await?;
        Ok(order)
    }
}

impl<S: Store> Clone for OrderLifecycle<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            sink: Arc::clone(&self.sink),
            clock: Arc::clone(&self.clock),
            ledger: self.ledger.clone(),
            config: self.config.clone(),
        }
    }
}
