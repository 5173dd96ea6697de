//! Sales: invoice issue with synchronous stock decrement, and its reversal.

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{Span, instrument};

use stockledger_core::{Adjustments, Aggregate, DocumentKind, DocumentNumber, DomainError, Money};
use stockledger_inventory::{
    InventoryMovement, IssueStock, MovementReference, ProductCommand, ReceiveStock,
};
use stockledger_invoicing::{
    DeleteInvoice, Invoice, InvoiceCommand, InvoiceEvent, InvoiceId, InvoiceLine,
    InvoiceSnapshot, IssueInvoice, SetPaymentState,
};
use stockledger_parties::{BalanceChangeReason, CustomerId};
use stockledger_payments::{
    NewPayment, Payment, PaymentMode, PaymentSource, PaymentState, ensure_within_pending,
};

use super::catalog::adjust_customer_balance;
use super::stock::LockedProducts;
use super::{LedgerEngine, Outcome, RequestContext, decided};
use crate::audit::AuditNotifier;
use crate::error::LedgerError;
use crate::store::{LedgerStore, LedgerTx};

/// A proposed sale.
///
/// `amount_paid` is taken at the counter and becomes the invoice's first
/// payment row; a sale with a payment can no longer be reversed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleDraft {
    /// `None` is a walk-in sale.
    pub customer_id: Option<CustomerId>,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub lines: Vec<InvoiceLine>,
    #[serde(default)]
    pub adjustments: Adjustments,
    #[serde(default)]
    pub amount_paid: Money,
    pub payment_mode: Option<PaymentMode>,
    pub notes: Option<String>,
}

impl SaleDraft {
    /// Request-shape checks; no ledger state is consulted.
    fn validate(&self, tolerance: Money) -> Result<(), DomainError> {
        let (_, totals) = Invoice::price_lines(&self.lines, &self.adjustments)?;
        if self.due_date < self.invoice_date {
            return Err(DomainError::validation("due date cannot precede invoice date"));
        }
        if self.amount_paid.is_negative() {
            return Err(DomainError::validation("amount paid cannot be negative"));
        }
        ensure_within_pending(self.amount_paid, totals.total_amount, Money::ZERO, tolerance)
    }
}

impl<S, N> LedgerEngine<S, N>
where
    S: LedgerStore,
    N: AuditNotifier,
{
    /// Issue an invoice and take every line out of stock, or do nothing.
    #[instrument(
        skip(self, ctx, draft),
        fields(
            lines = draft.lines.len(),
            customer_id = ?draft.customer_id,
            invoice_number = tracing::field::Empty
        ),
        err
    )]
    pub async fn record_sale(
        &self,
        ctx: &RequestContext,
        draft: SaleDraft,
    ) -> Result<InvoiceSnapshot, LedgerError> {
        draft.validate(self.config.overpayment_tolerance)?;
        let payment_mode = draft.payment_mode.unwrap_or(self.config.default_payment_mode);

        let mut tx = self.begin().await?;
        let outcome = record_sale_in(&mut tx, ctx, draft, payment_mode).await;
        self.settle(tx, outcome).await
    }

    /// Delete an unpaid invoice and put its items back on the shelf.
    #[instrument(skip(self, ctx, invoice_id), fields(invoice_id = %invoice_id), err)]
    pub async fn reverse_sale(
        &self,
        ctx: &RequestContext,
        invoice_id: InvoiceId,
    ) -> Result<Vec<InventoryMovement>, LedgerError> {
        let mut tx = self.begin().await?;
        let outcome = reverse_sale_in(&mut tx, ctx, invoice_id).await;
        self.settle(tx, outcome).await
    }
}

async fn record_sale_in<T>(
    tx: &mut T,
    ctx: &RequestContext,
    draft: SaleDraft,
    payment_mode: PaymentMode,
) -> Result<Outcome<InvoiceSnapshot>, LedgerError>
where
    T: LedgerTx,
{
    let now = Utc::now();
    let invoice_id = InvoiceId::generate();

    let mut stock = LockedProducts::lock(tx, draft.lines.iter().map(|l| l.product_id)).await?;
    for line in &draft.lines {
        stock.execute(&ProductCommand::IssueStock(IssueStock {
            product_id: line.product_id,
            quantity: line.quantity,
            reference: MovementReference::invoice(invoice_id.0),
            notes: None,
            actor: ctx.actor,
            occurred_at: now,
        }))?;
    }

    let year = draft.invoice_date.year();
    let sequence = tx.next_document_sequence(DocumentKind::Invoice, year).await?;
    let invoice_number = DocumentNumber::new(DocumentKind::Invoice, year, sequence)?;
    Span::current().record("invoice_number", tracing::field::display(&invoice_number));

    let mut invoice = Invoice::empty(invoice_id);
    let issued = invoice.execute(&InvoiceCommand::IssueInvoice(IssueInvoice {
        invoice_id,
        invoice_number,
        customer_id: draft.customer_id,
        invoice_date: draft.invoice_date,
        due_date: draft.due_date,
        lines: draft.lines,
        adjustments: draft.adjustments,
        payment_mode,
        notes: draft.notes,
        actor: ctx.actor,
        occurred_at: now,
    }))?;

    let mut payment = None;
    if draft.amount_paid.is_positive() {
        let row = Payment::record(
            DocumentKind::Invoice,
            invoice_id.0,
            &NewPayment {
                payment_date: draft.invoice_date,
                amount: draft.amount_paid,
                mode: payment_mode,
                reference_no: None,
                notes: Some("paid at sale".to_string()),
            },
            ctx.actor,
            now,
        )?;
        let total = invoice.total_amount();
        invoice.execute(&InvoiceCommand::SetPaymentState(SetPaymentState {
            invoice_id,
            state: PaymentState::from_payments(total, [&row]),
            mode: None,
            source: PaymentSource::Recorded,
            actor: ctx.actor,
            occurred_at: now,
        }))?;
        payment = Some(row);
    }

    if let Some(customer_id) = draft.customer_id {
        adjust_customer_balance(
            tx,
            customer_id,
            invoice.outstanding(),
            BalanceChangeReason::InvoiceIssued,
        )
        .await?;
    }

    let snapshot = invoice
        .snapshot()
        .ok_or_else(|| DomainError::invariant("issued invoice has no snapshot"))?;
    stock.persist(tx).await?;
    tx.insert_invoice(&snapshot).await?;
    if let Some(payment) = &payment {
        tx.insert_payment(payment).await?;
    }

    let entry = ctx
        .audit(decided(&issued)?, "invoice", invoice_id.0)
        .with_new(&snapshot);
    Ok(Outcome::new(snapshot).audited(entry))
}

async fn reverse_sale_in<T>(
    tx: &mut T,
    ctx: &RequestContext,
    invoice_id: InvoiceId,
) -> Result<Outcome<Vec<InventoryMovement>>, LedgerError>
where
    T: LedgerTx,
{
    let now = Utc::now();
    let before = tx
        .lock_invoice(invoice_id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("Invoice with ID {invoice_id}")))?;
    let payment_count = tx
        .payments_for(DocumentKind::Invoice, invoice_id.0)
        .await?
        .len();

    let mut invoice = Invoice::from_snapshot(before.clone());
    let deleted = invoice
        .execute(&InvoiceCommand::DeleteInvoice(DeleteInvoice {
            invoice_id,
            payment_count,
            actor: ctx.actor,
            occurred_at: now,
        }))?
        .into_iter()
        .find_map(|event| match event {
            InvoiceEvent::InvoiceDeleted(deleted) => Some(deleted),
            _ => None,
        })
        .ok_or_else(|| DomainError::invariant("invoice delete emitted no event"))?;

    let mut stock = LockedProducts::lock(tx, deleted.items.iter().map(|i| i.product_id)).await?;
    for item in &deleted.items {
        stock.execute(&ProductCommand::ReceiveStock(ReceiveStock {
            product_id: item.product_id,
            quantity: item.quantity,
            unit_cost: None,
            reference: MovementReference::reversal(invoice_id.0),
            notes: Some("reversal".to_string()),
            actor: ctx.actor,
            occurred_at: now,
        }))?;
    }

    if let Some(customer_id) = deleted.customer_id {
        adjust_customer_balance(
            tx,
            customer_id,
            -deleted.outstanding,
            BalanceChangeReason::InvoiceReversed,
        )
        .await?;
    }

    let movements = stock.persist(tx).await?;
    tx.delete_invoice(invoice_id).await?;

    let entry = ctx
        .audit(&InvoiceEvent::InvoiceDeleted(deleted), "invoice", invoice_id.0)
        .with_old(&before);
    Ok(Outcome::new(movements).audited(entry))
}
