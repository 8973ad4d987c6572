use thiserror::Error;

use crate::types::StockKey;

/// Hard failures of the stock core.
///
/// Missing rows and lost reconciliation races are not errors: they resolve to
/// zero levels and [`crate::ReconcileOutcome::Conflict`] respectively.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("stock store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("quantity for {0} does not fit in i64")]
    QuantityOverflow(StockKey),
}

impl StockError {
    pub fn invalid(message: impl Into<String>) -> Self {
        StockError::InvalidInput(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        StockError::StoreUnavailable(message.into())
    }
}

/// Adds two quantities of `key`, failing instead of wrapping.
pub(crate) fn add_quantity(key: StockKey, a: i64, b: i64) -> Result<i64> {
    a.checked_add(b).ok_or(StockError::QuantityOverflow(key))
}

pub type Result<T> = std::result::Result<T, StockError>;
