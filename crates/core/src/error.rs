//! Foundation error model.

use thiserror::Error;

/// Result type for core primitives.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the core primitives themselves.
///
/// Keep this focused on deterministic, local failures (parsing, arithmetic).
/// Business and storage failures belong to the service and store layers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An identifier failed to parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A money computation overflowed its fixed-point representation.
    #[error("amount overflow: {0}")]
    AmountOverflow(String),
}

impl CoreError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn amount_overflow(msg: impl Into<String>) -> Self {
        Self::AmountOverflow(msg.into())
    }
}
