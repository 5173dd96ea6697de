//! Invoicing context: sales invoices, their totals, and the read-time
//! presentation status.
//!
//! This crate contains business rules only (no IO, no storage).

pub mod display;
pub mod invoice;

pub use display::InvoiceDisplayStatus;
pub use invoice::{
    DeleteInvoice, Invoice, InvoiceCommand, InvoiceDeleted, InvoiceEvent, InvoiceId, InvoiceIssued,
    InvoiceItem, InvoiceLine, InvoiceSnapshot, IssueInvoice, PaymentStateChanged, SetPaymentState,
};
