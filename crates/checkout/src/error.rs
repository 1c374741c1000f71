//! Checkout error model.
//!
//! Three families, with different handling obligations:
//!
//! - **Business conflicts**: expected outcomes returned to the caller
//!   (insufficient stock, expired hold, paid-order protection). Never
//!   logged as errors.
//! - **Integrity failures**: the reservation accounting has already
//!   diverged somewhere (a guarded counter update refused, a referenced
//!   row is gone). Surfaced loudly, never swallowed or auto-retried.
//! - **Transient storage failures**: serialization/deadlock conflicts,
//!   retried by the service layer up to a bounded attempt count.

use thiserror::Error;

use surgecart_core::{CoreError, HoldId, OrderId, ProductId, WebhookEventId};
use surgecart_domain::{HoldStatus, OrderStatus};
use surgecart_store::StoreError;

pub type CheckoutResult<T> = Result<T, CheckoutError>;

#[derive(Debug, Error, Clone)]
pub enum CheckoutError {
    // -- business conflicts ----------------------------------------------
    #[error("not enough stock for product {product_id}: requested {requested}, available {available}")]
    NotEnoughStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    #[error("hold {0} has expired")]
    HoldExpired(HoldId),

    #[error("hold {hold_id} is {status:?}, not usable for this operation")]
    InvalidHoldState { hold_id: HoldId, status: HoldStatus },

    #[error("order {0} is already paid and cannot be failed")]
    CannotFailPaidOrder(OrderId),

    #[error("order {order_id} is already {status:?} and cannot be paid")]
    CannotPayClosedOrder {
        order_id: OrderId,
        status: OrderStatus,
    },

    #[error("payload is missing required field '{0}'")]
    MissingRequiredField(&'static str),

    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(i64),

    // -- integrity failures ----------------------------------------------
    #[error("stock commit failed for order {order_id}: product {product_id} has fewer than {qty} reserved")]
    CommitStockFailed {
        order_id: OrderId,
        product_id: ProductId,
        qty: i64,
    },

    #[error("stock release failed: product {product_id} not found while releasing {qty}")]
    ReleaseStockFailed { product_id: ProductId, qty: i64 },

    #[error("product {0} not found")]
    MissingProduct(ProductId),

    #[error("hold {0} not found")]
    MissingHold(HoldId),

    #[error("order {0} not found")]
    MissingOrder(OrderId),

    #[error("webhook event {0} not found")]
    MissingWebhookEvent(WebhookEventId),

    // -- propagated ------------------------------------------------------
    #[error(transparent)]
    Amount(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CheckoutError {
    /// Expected business outcome; safe to hand back to the caller as-is.
    pub fn is_business_conflict(&self) -> bool {
        matches!(
            self,
            CheckoutError::NotEnoughStock { .. }
                | CheckoutError::HoldExpired(_)
                | CheckoutError::InvalidHoldState { .. }
                | CheckoutError::CannotFailPaidOrder(_)
                | CheckoutError::CannotPayClosedOrder { .. }
                | CheckoutError::MissingRequiredField(_)
                | CheckoutError::InvalidQuantity(_)
        )
    }

    /// Reservation accounting has diverged; requires operator attention.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            CheckoutError::CommitStockFailed { .. }
                | CheckoutError::ReleaseStockFailed { .. }
                | CheckoutError::MissingProduct(_)
                | CheckoutError::MissingHold(_)
                | CheckoutError::MissingOrder(_)
                | CheckoutError::MissingWebhookEvent(_)
        )
    }

    /// Whether retrying the enclosing transaction can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CheckoutError::Store(e) if e.is_transient())
    }
}
