//! Atomic stock counter moves: reserve, commit, release.
//!
//! Every method runs inside a transaction owned by the caller, who is
//! expected to hold the product row lock. The store's guarded updates are
//! a second, independent guard: the invariant
//! `stock_reserved + stock_sold <= stock_total` holds even if a caller's
//! locking is imperfect.

use std::sync::Arc;

use serde_json::json;

use surgecart_core::{Clock, EventRecord, EventSink, ProductId};
use surgecart_store::StoreTx;

use crate::error::{CheckoutError, CheckoutResult};

pub struct StockLedger {
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl StockLedger {
    pub fn new(sink: Arc<dyn EventSink>, clock: Arc<dyn Clock>) -> Self {
        Self { sink, clock }
    }

    /// Move `qty` from available to reserved.
    ///
    /// Returns `false` when availability is insufficient. That is a normal
    /// business outcome, not an error.
    pub async fn reserve<T: StoreTx>(
        &self,
        tx: &mut T,
        product_id: ProductId,
        qty: i64,
    ) -> CheckoutResult<bool> {
        Ok(tx.try_reserve_stock(product_id, qty).await?)
    }

    /// Move `qty` from reserved to sold, in one statement.
    ///
    /// Returns `false` when fewer than `qty` units are reserved; callers
    /// must treat that as an integrity failure, never ignore it.
    pub async fn commit<T: StoreTx>(
        &self,
        tx: &mut T,
        product_id: ProductId,
        qty: i64,
    ) -> CheckoutResult<bool> {
        Ok(tx.try_commit_stock(product_id, qty).await?)
    }

    /// Return `qty` reserved units to the pool, clamped at zero.
    ///
    /// A clamp that actually truncates is surfaced as an event so operators
    /// can spot a double release.
    pub async fn release<T: StoreTx>(
        &self,
        tx: &mut T,
        product_id: ProductId,
        qty: i64,
    ) -> CheckoutResult<i64> {
        let released = tx
            .release_stock(product_id, qty)
            .await?
            .ok_or(CheckoutError::ReleaseStockFailed { product_id, qty })?;
        if released < qty {
            tracing::warn!(
                product_id = %product_id,
                requested = qty,
                released,
                "stock release clamped at zero"
            );
            self.sink.emit(EventRecord::new(
                "stock_release_clamped",
                self.clock.now(),
                json!({
                    "product_id": product_id,
                    "requested": qty,
                    "released": released,
                }),
            ));
        }
        Ok(released)
    }
}

impl Clone for StockLedger {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            clock: Arc::clone(&self.clock),
        }
    }
}
