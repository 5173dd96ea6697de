//! Paid amount and payment status derivation.
//!
//! The paid amount of an order is always recomputed as the sum of its payment
//! rows; the status is a pure function of that sum and the order total.

use core::fmt;

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Money};

use crate::payment::{Payment, PaymentMode};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Partial,
    Paid,
}

impl PaymentStatus {
    /// `paid` iff `paid >= total`, `partial` iff `0 < paid < total`, else `pending`.
    pub fn derive(amount_paid: Money, total_amount: Money) -> Self {
        if amount_paid >= total_amount {
            PaymentStatus::Paid
        } else if amount_paid.is_positive() {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Pending
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "partial" => Some(PaymentStatus::Partial),
            "paid" => Some(PaymentStatus::Paid),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which path changed an order's payment fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSource {
    /// Recomputed from the payment rows after a payment was recorded.
    Recorded,
    /// Set directly by an administrator, with no backing payment row.
    Override,
}

/// The payment-derived fields an order persists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentState {
    pub amount_paid: Money,
    pub status: PaymentStatus,
}

impl PaymentState {
    pub fn unpaid(total_amount: Money) -> Self {
        Self::from_amount(Money::ZERO, total_amount)
    }

    pub fn from_amount(amount_paid: Money, total_amount: Money) -> Self {
        Self {
            amount_paid,
            status: PaymentStatus::derive(amount_paid, total_amount),
        }
    }

    /// Recompute from the payment rows, ignoring any previously stored sum.
    pub fn from_payments<'a>(
        total_amount: Money,
        payments: impl IntoIterator<Item = &'a Payment>,
    ) -> Self {
        let paid = payments
            .into_iter()
            .fold(Money::ZERO, |acc, p| acc.saturating_add(p.amount));
        Self::from_amount(paid, total_amount)
    }

    /// `total - paid`, floored at zero.
    pub fn pending(&self, total_amount: Money) -> Money {
        total_amount.saturating_sub_floor(self.amount_paid)
    }
}

/// Reject a payment that would take the paid amount past the order total by
/// more than `tolerance`.
pub fn ensure_within_pending(
    amount: Money,
    total_amount: Money,
    amount_paid: Money,
    tolerance: Money,
) -> DomainResult<()> {
    let pending = total_amount.saturating_sub_floor(amount_paid);
    if amount > pending.saturating_add(tolerance) {
        return Err(DomainError::Overpayment { amount, pending });
    }
    Ok(())
}

/// Administrative override of the stored payment fields.
///
/// Bypasses the payment rows entirely; the engine audits every use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOverride {
    pub amount_paid: Money,
    pub mode: Option<PaymentMode>,
    pub status: Option<PaymentStatus>,
}

impl PaymentOverride {
    /// The state to persist; the status is derived unless given explicitly.
    pub fn resolve(&self, total_amount: Money) -> DomainResult<PaymentState> {
        if self.amount_paid.is_negative() {
            return Err(DomainError::validation("amount paid cannot be negative"));
        }
        Ok(PaymentState {
            amount_paid: self.amount_paid,
            status: self
                .status
                .unwrap_or_else(|| PaymentStatus::derive(self.amount_paid, total_amount)),
        })
    }
}

/// Record-payment response shape: `{total_amount, total_paid, pending}` plus the rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub total_amount: Money,
    pub total_paid: Money,
    pub pending: Money,
    pub payments: Vec<Payment>,
}

impl PaymentSummary {
    pub fn new(total_amount: Money, mut payments: Vec<Payment>) -> Self {
        // Newest first.
        payments.sort_by(|a, b| {
            b.payment_date
                .cmp(&a.payment_date)
                .then(b.created_at.cmp(&a.created_at))
        });
        let state = PaymentState::from_payments(total_amount, &payments);
        Self {
            total_amount,
            total_paid: state.amount_paid,
            pending: state.pending(total_amount),
            payments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::NewPayment;
    use chrono::{NaiveDate, Utc};
    use proptest::prelude::*;
    use stockledger_core::{AggregateId, DocumentKind, UserId};

    fn payment(order_id: AggregateId, cents: i64) -> Payment {
        Payment::record(
            DocumentKind::Invoice,
            order_id,
            &NewPayment {
                payment_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                amount: Money::from_cents(cents),
                mode: PaymentMode::Cash,
                reference_no: None,
                notes: None,
            },
            UserId::new(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn status_derivation() {
        let total = Money::from_units(100);
        assert_eq!(PaymentStatus::derive(Money::ZERO, total), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::derive(Money::from_units(1), total), PaymentStatus::Partial);
        assert_eq!(PaymentStatus::derive(total, total), PaymentStatus::Paid);
    }

    #[test]
    fn scenario_b_partial_then_paid_then_rejected() {
        let total = Money::from_units(1000);
        let order = AggregateId::new();
        let mut rows: Vec<Payment> = Vec::new();

        for cents in [40_000, 60_000] {
            let state = PaymentState::from_payments(total, &rows);
            ensure_within_pending(Money::from_cents(cents), total, state.amount_paid, Money::ZERO)
                .unwrap();
            rows.push(payment(order, cents));
        }
        let state = PaymentState::from_payments(total, &rows);
        assert_eq!(state.amount_paid, total);
        assert_eq!(state.status, PaymentStatus::Paid);

        let err = ensure_within_pending(Money::from_cents(1), total, state.amount_paid, Money::ZERO)
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::Overpayment {
                amount: Money::from_cents(1),
                pending: Money::ZERO
            }
        );
    }

    #[test]
    fn tolerance_admits_a_rounding_cent() {
        let total = Money::from_units(10);
        assert!(ensure_within_pending(Money::from_cents(1001), total, Money::ZERO, Money::from_cents(1)).is_ok());
        assert!(ensure_within_pending(Money::from_cents(1002), total, Money::ZERO, Money::from_cents(1)).is_err());
    }

    #[test]
    fn tolerance_on_a_huge_total_saturates() {
        let total = Money::from_cents(i64::MAX);
        let amount = Money::from_cents(i64::MAX);
        assert!(ensure_within_pending(amount, total, Money::ZERO, Money::from_cents(1)).is_ok());
    }

    #[test]
    fn override_derives_status_unless_given() {
        let total = Money::from_units(50);
        let derived = PaymentOverride {
            amount_paid: Money::from_units(20),
            mode: None,
            status: None,
        }
        .resolve(total)
        .unwrap();
        assert_eq!(derived.status, PaymentStatus::Partial);

        let forced = PaymentOverride {
            amount_paid: Money::from_units(20),
            mode: Some(PaymentMode::Bank),
            status: Some(PaymentStatus::Paid),
        }
        .resolve(total)
        .unwrap();
        assert_eq!(forced.status, PaymentStatus::Paid);

        assert!(PaymentOverride {
            amount_paid: Money::from_cents(-1),
            mode: None,
            status: None,
        }
        .resolve(total)
        .is_err());
    }

    #[test]
    fn summary_reports_pending() {
        let order = AggregateId::new();
        let summary = PaymentSummary::new(
            Money::from_units(100),
            vec![payment(order, 2_500), payment(order, 1_000)],
        );
        assert_eq!(summary.total_paid, Money::from_units(35));
        assert_eq!(summary.pending, Money::from_units(65));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        /// Property: whatever sequence of payments is attempted, the accepted
        /// rows sum exactly to the stored paid amount, it never exceeds the
        /// total, and the status is `paid` iff paid >= total.
        #[test]
        fn paid_is_sum_of_accepted_rows(
            total_cents in 0i64..1_000_000,
            attempts in prop::collection::vec(1i64..400_000, 0..20),
        ) {
            let total = Money::from_cents(total_cents);
            let order = AggregateId::new();
            let mut rows: Vec<Payment> = Vec::new();
            let mut stored = PaymentState::unpaid(total);

            for cents in attempts {
                let amount = Money::from_cents(cents);
                if ensure_within_pending(amount, total, stored.amount_paid, Money::ZERO).is_ok() {
                    rows.push(payment(order, cents));
                    stored = PaymentState::from_payments(total, &rows);
                }
                let sum: i64 = rows.iter().map(|p| p.amount.cents()).sum();
                prop_assert_eq!(stored.amount_paid.cents(), sum);
                prop_assert!(stored.amount_paid <= total);
                prop_assert_eq!(stored.status == PaymentStatus::Paid, stored.amount_paid >= total);
            }
        }
    }
}
