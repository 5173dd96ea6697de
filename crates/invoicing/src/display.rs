use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stockledger_payments::PaymentStatus;

/// Invoice status as shown to users: the stored payment status, except that
/// an unpaid invoice past its due date reads as `overdue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceDisplayStatus {
    Paid,
    Overdue,
    Partial,
    Pending,
}

impl InvoiceDisplayStatus {
    pub fn derive(status: PaymentStatus, due_date: Option<NaiveDate>, today: NaiveDate) -> Self {
        match status {
            PaymentStatus::Paid => InvoiceDisplayStatus::Paid,
            _ if due_date.is_some_and(|due| due < today) => InvoiceDisplayStatus::Overdue,
            PaymentStatus::Partial => InvoiceDisplayStatus::Partial,
            PaymentStatus::Pending => InvoiceDisplayStatus::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceDisplayStatus::Paid => "paid",
            InvoiceDisplayStatus::Overdue => "overdue",
            InvoiceDisplayStatus::Partial => "partial",
            InvoiceDisplayStatus::Pending => "pending",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_date_is_exclusive() {
        let due = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let next = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert_eq!(
            InvoiceDisplayStatus::derive(PaymentStatus::Partial, Some(due), due),
            InvoiceDisplayStatus::Partial
        );
        assert_eq!(
            InvoiceDisplayStatus::derive(PaymentStatus::Partial, Some(due), next),
            InvoiceDisplayStatus::Overdue
        );
        assert_eq!(
            InvoiceDisplayStatus::derive(PaymentStatus::Pending, None, next),
            InvoiceDisplayStatus::Pending
        );
    }
}
