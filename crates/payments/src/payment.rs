use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::{AggregateId, DocumentKind, DomainError, Money, UserId};

stockledger_core::typed_id!(
    /// Payment row identifier.
    PaymentId
);

/// How a payment was made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMode {
    #[default]
    Cash,
    Bank,
    Upi,
    Cheque,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown payment mode: {0:?}")]
pub struct UnknownPaymentMode(pub String);

impl PaymentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMode::Cash => "cash",
            PaymentMode::Bank => "bank",
            PaymentMode::Upi => "upi",
            PaymentMode::Cheque => "cheque",
        }
    }
}

impl fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMode {
    type Err = UnknownPaymentMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cash" => Ok(PaymentMode::Cash),
            "bank" => Ok(PaymentMode::Bank),
            "upi" => Ok(PaymentMode::Upi),
            "cheque" => Ok(PaymentMode::Cheque),
            _ => Err(UnknownPaymentMode(s.to_string())),
        }
    }
}

/// Record-payment input: `{payment_date, amount, mode, reference_no?, notes?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPayment {
    pub payment_date: NaiveDate,
    pub amount: Money,
    pub mode: PaymentMode,
    pub reference_no: Option<String>,
    pub notes: Option<String>,
}

impl NewPayment {
    pub fn validate(&self) -> Result<(), DomainError> {
        if !self.amount.is_positive() {
            return Err(DomainError::validation("Valid payment amount is required"));
        }
        Ok(())
    }
}

/// One append-only payment row against a purchase or an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_kind: DocumentKind,
    pub order_id: AggregateId,
    pub payment_date: NaiveDate,
    pub amount: Money,
    pub mode: PaymentMode,
    pub reference_no: Option<String>,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn record(
        order_kind: DocumentKind,
        order_id: AggregateId,
        input: &NewPayment,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        input.validate()?;
        Ok(Self {
            id: PaymentId::generate(),
            order_kind,
            order_id,
            payment_date: input.payment_date,
            amount: input.amount,
            mode: input.mode,
            reference_no: input.reference_no.clone().filter(|s| !s.trim().is_empty()),
            notes: input.notes.clone().filter(|s| !s.trim().is_empty()),
            created_by,
            created_at,
        })
    }
}
