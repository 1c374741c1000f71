//! Orders created from consumed holds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use surgecart_core::{HoldId, Money, OrderId};

/// Order lifecycle status.
///
/// `pending --> paid` (stock committed) or `pending --> failed|cancelled`
/// (stock released). No transition leaves paid, failed or cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    /// Terminal without a sale (stock went back to the pool).
    pub fn is_failure(&self) -> bool {
        matches!(self, OrderStatus::Failed | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

/// An order; exactly one exists per hold (unique constraint on `hold_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub hold_id: HoldId,
    pub external_payment_id: Option<String>,
    pub status: OrderStatus,
    /// qty × unit price, snapshotted at creation, immutable thereafter.
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        id: OrderId,
        hold_id: HoldId,
        external_payment_id: Option<String>,
        amount: Money,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            hold_id,
            external_payment_id,
            status: OrderStatus::Pending,
            amount,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Paid.is_terminal());
        assert!(OrderStatus::Failed.is_failure());
        assert!(OrderStatus::Cancelled.is_failure());
        assert!(!OrderStatus::Paid.is_failure());
    }
}
