//! Purchase order lifecycle, independent of payment status.

use core::fmt;

use serde::{Deserialize, Serialize};

use stockledger_core::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    Ordered,
    PartiallyReceived,
    Received,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Draft,
        OrderStatus::Ordered,
        OrderStatus::PartiallyReceived,
        OrderStatus::Received,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Ordered => "ordered",
            OrderStatus::PartiallyReceived => "partially_received",
            OrderStatus::Received => "received",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// `received` is the only terminal state; stock has been applied.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Received)
    }

    /// Whether stock may be applied from this state.
    pub fn ensure_receivable(self) -> Result<(), DomainError> {
        match self {
            OrderStatus::Received => Err(DomainError::conflict("Purchase already received")),
            OrderStatus::Cancelled => Err(DomainError::conflict("Cannot receive a cancelled purchase")),
            _ => Ok(()),
        }
    }

    /// Validate a generic status update. `received` can only be reached by
    /// receiving the purchase, so it is never a valid target here.
    pub fn ensure_can_set(self, target: OrderStatus) -> Result<(), DomainError> {
        if target == OrderStatus::Received {
            return Err(DomainError::validation(
                "status 'received' can only be set by receiving the purchase",
            ));
        }
        if self.is_terminal() {
            return Err(DomainError::conflict(format!(
                "Purchase is {} and can no longer change status",
                self.as_str()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
