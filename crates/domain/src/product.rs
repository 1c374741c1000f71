//! Product record and stock counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use surgecart_core::{Money, ProductId};

/// A product with three stock counters.
///
/// Invariant (enforced by the store's guarded updates, checked here for
/// observability): `stock_reserved + stock_sold <= stock_total`, all three
/// non-negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    /// Unit price, snapshotted into order amounts at creation.
    pub price: Money,
    pub stock_total: i64,
    pub stock_reserved: i64,
    pub stock_sold: i64,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn new(
        id: ProductId,
        sku: impl Into<String>,
        name: impl Into<String>,
        price: Money,
        stock_total: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sku: sku.into(),
            name: name.into(),
            price,
            stock_total,
            stock_reserved: 0,
            stock_sold: 0,
            created_at,
        }
    }

    /// Units still available for reservation.
    pub fn stock_available(&self) -> i64 {
        self.stock_total - self.stock_reserved - self.stock_sold
    }

    /// Whether the counters satisfy the reservation invariant.
    pub fn counters_consistent(&self) -> bool {
        self.stock_reserved >= 0
            && self.stock_sold >= 0
            && self.stock_reserved + self.stock_sold <= self.stock_total
    }
}
