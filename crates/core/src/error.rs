//! Domain error model.

use thiserror::Error;

use crate::money::Money;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Storage and transport failures belong to infra.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input failed validation before any state was consulted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A business rule or state-machine invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A sale asked for more units than are on hand.
    #[error("Insufficient stock for {product}. Available: {available}")]
    InsufficientStock {
        product: String,
        requested: i64,
        available: i64,
    },

    /// A payment would take the paid amount past the order total.
    #[error("Payment amount ({amount}) exceeds pending amount ({pending})")]
    Overpayment { amount: Money, pending: Money },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced record does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The record exists but is in a state that forbids the request.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn insufficient_stock(product: impl Into<String>, requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            product: product.into(),
            requested,
            available,
        }
    }

    /// Whether the error is a rejection of the request's content (as opposed
    /// to a rejection based on current ledger state).
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvalidId(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_message_names_available_quantity() {
        let err = DomainError::insufficient_stock("Widget", 8, 7);
        assert_eq!(err.to_string(), "Insufficient stock for Widget. Available: 7");
    }

    #[test]
    fn overpayment_message_carries_both_amounts() {
        let err = DomainError::Overpayment {
            amount: Money::from_cents(1),
            pending: Money::ZERO,
        };
        assert_eq!(
            err.to_string(),
            "Payment amount (0.01) exceeds pending amount (0.00)"
        );
    }
}
