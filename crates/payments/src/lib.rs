//! Payments context: append-only payment rows and the rules that derive an
//! order's paid amount and payment status from them.
//!
//! Shared by purchases and invoices; an order is identified by its
//! [`DocumentKind`](stockledger_core::DocumentKind) and aggregate id.

pub mod payment;
pub mod status;

pub use payment::{NewPayment, Payment, PaymentId, PaymentMode, UnknownPaymentMode};
pub use status::{
    ensure_within_pending, PaymentOverride, PaymentSource, PaymentState, PaymentStatus, PaymentSummary,
};
