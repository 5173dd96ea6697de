use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    line_total, Adjustments, Aggregate, AggregateRoot, DocumentKind, DocumentNumber, DomainError,
    Event, Money, OrderTotals, UserId,
};
use stockledger_inventory::ProductId;
use stockledger_parties::CustomerId;
use stockledger_payments::{PaymentMode, PaymentSource, PaymentState, PaymentStatus};

use crate::display::InvoiceDisplayStatus;

stockledger_core::typed_id!(
    /// Invoice identifier.
    InvoiceId
);

/// A line as submitted: `{product_id, quantity, unit_price, discount?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
    pub discount: Money,
}

/// An accepted invoice line: price and discount at the time of sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
    pub discount: Money,
    pub total: Money,
}

/// Persisted shape of an invoice with its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSnapshot {
    pub id: InvoiceId,
    pub invoice_number: DocumentNumber,
    pub customer_id: Option<CustomerId>,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub items: Vec<InvoiceItem>,
    pub totals: OrderTotals,
    pub payment: PaymentState,
    pub payment_mode: PaymentMode,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl InvoiceSnapshot {
    /// What this invoice contributes to the customer balance.
    pub fn outstanding(&self) -> Money {
        outstanding(&self.totals, self.payment)
    }
}

/// `total - paid`, floored at zero; a `paid` invoice owes nothing even when
/// its paid amount falls short of the total.
fn outstanding(totals: &OrderTotals, payment: PaymentState) -> Money {
    if payment.status == PaymentStatus::Paid {
        return Money::ZERO;
    }
    totals.total_amount.saturating_sub_floor(payment.amount_paid)
}

/// Aggregate root: Invoice.
///
/// Stock is issued for every item in the same transaction that issues the
/// invoice; the aggregate itself only fixes items and totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    invoice_number: Option<DocumentNumber>,
    customer_id: Option<CustomerId>,
    invoice_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    items: Vec<InvoiceItem>,
    totals: OrderTotals,
    payment: PaymentState,
    payment_mode: PaymentMode,
    notes: Option<String>,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
    deleted: bool,
}

impl Invoice {
    /// Create an empty, not-yet-issued aggregate instance.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            invoice_number: None,
            customer_id: None,
            invoice_date: None,
            due_date: None,
            items: Vec::new(),
            totals: OrderTotals::default(),
            payment: PaymentState::default(),
            payment_mode: PaymentMode::default(),
            notes: None,
            created_by: None,
            created_at: None,
            version: 0,
            created: false,
            deleted: false,
        }
    }

    pub fn from_snapshot(s: InvoiceSnapshot) -> Self {
        Self {
            id: s.id,
            invoice_number: Some(s.invoice_number),
            customer_id: s.customer_id,
            invoice_date: Some(s.invoice_date),
            due_date: Some(s.due_date),
            items: s.items,
            totals: s.totals,
            payment: s.payment,
            payment_mode: s.payment_mode,
            notes: s.notes,
            created_by: Some(s.created_by),
            created_at: Some(s.created_at),
            version: s.version,
            created: true,
            deleted: false,
        }
    }

    /// `None` until issued, or once deleted.
    pub fn snapshot(&self) -> Option<InvoiceSnapshot> {
        if !self.created || self.deleted {
            return None;
        }
        Some(InvoiceSnapshot {
            id: self.id,
            invoice_number: self.invoice_number.clone()?,
            customer_id: self.customer_id,
            invoice_date: self.invoice_date?,
            due_date: self.due_date?,
            items: self.items.clone(),
            totals: self.totals,
            payment: self.payment,
            payment_mode: self.payment_mode,
            notes: self.notes.clone(),
            created_by: self.created_by?,
            created_at: self.created_at?,
            version: self.version,
        })
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn invoice_number(&self) -> Option<&DocumentNumber> {
        self.invoice_number.as_ref()
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn items(&self) -> &[InvoiceItem] {
        &self.items
    }

    pub fn totals(&self) -> &OrderTotals {
        &self.totals
    }

    pub fn total_amount(&self) -> Money {
        self.totals.total_amount
    }

    pub fn payment(&self) -> PaymentState {
        self.payment
    }

    pub fn payment_mode(&self) -> PaymentMode {
        self.payment_mode
    }

    /// What this invoice contributes to the customer balance.
    pub fn outstanding(&self) -> Money {
        outstanding(&self.totals, self.payment)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Presentation status as of `today`; never stored.
    pub fn display_status(&self, today: NaiveDate) -> InvoiceDisplayStatus {
        InvoiceDisplayStatus::derive(self.payment.status, self.due_date, today)
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: IssueInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInvoice {
    pub invoice_id: InvoiceId,
    pub invoice_number: DocumentNumber,
    pub customer_id: Option<CustomerId>,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub lines: Vec<InvoiceLine>,
    pub adjustments: Adjustments,
    pub payment_mode: PaymentMode,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetPaymentState.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPaymentState {
    pub invoice_id: InvoiceId,
    pub state: PaymentState,
    pub mode: Option<PaymentMode>,
    pub source: PaymentSource,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteInvoice {
    pub invoice_id: InvoiceId,
    pub payment_count: usize,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    IssueInvoice(IssueInvoice),
    SetPaymentState(SetPaymentState),
    DeleteInvoice(DeleteInvoice),
}

/// Event: InvoiceIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub invoice_id: InvoiceId,
    pub invoice_number: DocumentNumber,
    pub customer_id: Option<CustomerId>,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub items: Vec<InvoiceItem>,
    pub totals: OrderTotals,
    pub payment_mode: PaymentMode,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentStateChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStateChanged {
    pub invoice_id: InvoiceId,
    pub customer_id: Option<CustomerId>,
    pub previous: PaymentState,
    pub current: PaymentState,
    pub mode: Option<PaymentMode>,
    pub source: PaymentSource,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceDeleted.
///
/// `outstanding` is what the invoice contributed to the customer balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDeleted {
    pub invoice_id: InvoiceId,
    pub invoice_number: DocumentNumber,
    pub customer_id: Option<CustomerId>,
    pub outstanding: Money,
    pub items: Vec<InvoiceItem>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceIssued(InvoiceIssued),
    PaymentStateChanged(PaymentStateChanged),
    InvoiceDeleted(InvoiceDeleted),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceIssued(_) => "invoicing.invoice.issued",
            InvoiceEvent::PaymentStateChanged(e) => match e.source {
                PaymentSource::Recorded => "invoicing.invoice.payment_recorded",
                PaymentSource::Override => "payment.override",
            },
            InvoiceEvent::InvoiceDeleted(_) => "invoicing.invoice.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceIssued(e) => e.occurred_at,
            InvoiceEvent::PaymentStateChanged(e) => e.occurred_at,
            InvoiceEvent::InvoiceDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceIssued(e) => {
                self.id = e.invoice_id;
                self.invoice_number = Some(e.invoice_number.clone());
                self.customer_id = e.customer_id;
                self.invoice_date = Some(e.invoice_date);
                self.due_date = Some(e.due_date);
                self.items = e.items.clone();
                self.totals = e.totals;
                self.payment = PaymentState::unpaid(e.totals.total_amount);
                self.payment_mode = e.payment_mode;
                self.notes = e.notes.clone();
                self.created_by = Some(e.actor);
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            InvoiceEvent::PaymentStateChanged(e) => {
                self.payment = e.current;
                if let Some(mode) = e.mode {
                    self.payment_mode = mode;
                }
            }
            InvoiceEvent::InvoiceDeleted(_) => {
                self.deleted = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::IssueInvoice(cmd) => self.handle_issue(cmd),
            InvoiceCommand::SetPaymentState(cmd) => self.handle_set_payment(cmd),
            InvoiceCommand::DeleteInvoice(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Invoice {
    /// Price submitted lines into items and order totals.
    ///
    /// Pure; lets callers reject bad input before opening a transaction.
    pub fn price_lines(
        lines: &[InvoiceLine],
        adjustments: &Adjustments,
    ) -> Result<(Vec<InvoiceItem>, OrderTotals), DomainError> {
        if lines.is_empty() {
            return Err(DomainError::validation(
                "Invoice date, due date, and at least one item are required",
            ));
        }
        let mut items = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            let total = line_total(line.quantity, line.unit_price, line.discount)
                .map_err(|e| DomainError::validation(format!("item {}: {e}", idx + 1)))?;
            items.push(InvoiceItem {
                line_no: (idx + 1) as u32,
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                discount: line.discount,
                total,
            });
        }
        let subtotal = Money::checked_sum(items.iter().map(|i| i.total))
            .ok_or_else(|| DomainError::validation("order subtotal overflows"))?;
        let totals = OrderTotals::compute(subtotal, adjustments)?;
        Ok((items, totals))
    }

    fn ensure_live(&self, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if !self.created || self.deleted {
            return Err(DomainError::not_found(format!("Invoice {invoice_id}")));
        }
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    fn handle_issue(&self, cmd: &IssueInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }
        if cmd.invoice_number.kind() != DocumentKind::Invoice {
            return Err(DomainError::invariant("invoice number must use the INV series"));
        }
        if cmd.due_date < cmd.invoice_date {
            return Err(DomainError::validation("due date cannot precede invoice date"));
        }
        let (items, totals) = Invoice::price_lines(&cmd.lines, &cmd.adjustments)?;

        Ok(vec![InvoiceEvent::InvoiceIssued(InvoiceIssued {
            invoice_id: cmd.invoice_id,
            invoice_number: cmd.invoice_number.clone(),
            customer_id: cmd.customer_id,
            invoice_date: cmd.invoice_date,
            due_date: cmd.due_date,
            items,
            totals,
            payment_mode: cmd.payment_mode,
            notes: cmd.notes.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_payment(&self, cmd: &SetPaymentState) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_live(cmd.invoice_id)?;
        if cmd.state.amount_paid.is_negative() {
            return Err(DomainError::validation("amount paid cannot be negative"));
        }

        Ok(vec![InvoiceEvent::PaymentStateChanged(PaymentStateChanged {
            invoice_id: cmd.invoice_id,
            customer_id: self.customer_id,
            previous: self.payment,
            current: cmd.state,
            mode: cmd.mode,
            source: cmd.source,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_live(cmd.invoice_id)?;
        if cmd.payment_count > 0 {
            return Err(DomainError::conflict(
                "Cannot delete invoice with recorded payments. Remove payments first.",
            ));
        }
        let invoice_number = self
            .invoice_number
            .clone()
            .ok_or_else(|| DomainError::invariant("invoice has no number"))?;

        Ok(vec![InvoiceEvent::InvoiceDeleted(InvoiceDeleted {
            invoice_id: cmd.invoice_id,
            invoice_number,
            customer_id: self.customer_id,
            outstanding: self.outstanding(),
            items: self.items.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}
