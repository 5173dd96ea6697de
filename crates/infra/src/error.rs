//! Engine outcome taxonomy and the caller-facing error envelope.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::DomainError;

use crate::store::StoreError;

/// Why a ledger operation did not commit.
///
/// Every variant means nothing was written. Only `Infrastructure` is worth
/// retrying; the others are final answers about the request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The request itself is malformed; rejected before any transaction opened.
    #[error("{0}")]
    Validation(DomainError),

    /// A business rule rejected the request against current ledger state.
    #[error("{0}")]
    Rejected(DomainError),

    /// A referenced record does not exist.
    #[error("{0}")]
    NotFound(DomainError),

    /// Storage or transaction failure; the unit of work was rolled back.
    #[error(transparent)]
    Infrastructure(#[from] StoreError),
}

impl From<DomainError> for LedgerError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(_) | DomainError::InvalidId(_) => LedgerError::Validation(err),
            DomainError::NotFound(_) => LedgerError::NotFound(err),
            DomainError::InvariantViolation(_)
            | DomainError::InsufficientStock { .. }
            | DomainError::Overpayment { .. }
            | DomainError::Conflict(_) => LedgerError::Rejected(err),
        }
    }
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::Rejected(_) => ErrorKind::Rejected,
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Infrastructure(e) if e.is_retryable())
    }

    /// The domain reason, for business outcomes.
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            LedgerError::Validation(e) | LedgerError::Rejected(e) | LedgerError::NotFound(e) => {
                Some(e)
            }
            LedgerError::Infrastructure(_) => None,
        }
    }

    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope::from(self)
    }
}

/// Coarse outcome tag an HTTP layer maps to a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Rejected,
    NotFound,
    Infrastructure,
}

impl ErrorKind {
    /// Client errors are the caller's to fix; the rest are ours.
    pub fn is_client_error(self) -> bool {
        !matches!(self, ErrorKind::Infrastructure)
    }
}

/// `{ "success": false, "message": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub message: String,
    pub kind: ErrorKind,
}

impl From<&LedgerError> for ErrorEnvelope {
    fn from(err: &LedgerError) -> Self {
        let message = match err {
            LedgerError::Validation(DomainError::Validation(msg)) => msg.clone(),
            LedgerError::Infrastructure(_) => {
                "The ledger is temporarily unavailable; nothing was changed. Please retry.".to_string()
            }
            other => other.to_string(),
        };
        Self {
            success: false,
            message,
            kind: err.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::Money;

    #[test]
    fn domain_errors_are_tagged() {
        let stock: LedgerError = DomainError::insufficient_stock("Widget", 8, 7).into();
        assert_eq!(stock.kind(), ErrorKind::Rejected);
        assert!(!stock.is_retryable());

        let missing: LedgerError = DomainError::not_found("Product with ID 42").into();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let bad: LedgerError = DomainError::validation("Valid payment amount is required").into();
        assert_eq!(bad.kind(), ErrorKind::Validation);
    }

    #[test]
    fn envelope_carries_the_numeric_shortfall() {
        let err: LedgerError = DomainError::Overpayment {
            amount: Money::from_cents(1),
            pending: Money::ZERO,
        }
        .into();
        let envelope = err.to_envelope();
        assert!(!envelope.success);
        assert!(envelope.message.contains("0.01"), "{}", envelope.message);
        assert!(envelope.kind.is_client_error());

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["success"], false);
    }

    #[test]
    fn infrastructure_failures_are_generic_and_retryable() {
        let err = LedgerError::from(StoreError::Conflict("deadlock detected".into()));
        assert!(err.is_retryable());
        let envelope = err.to_envelope();
        assert!(!envelope.kind.is_client_error());
        assert!(!envelope.message.contains("deadlock"));

        assert!(!LedgerError::from(StoreError::Corrupt("bad row".into())).is_retryable());
    }
}
