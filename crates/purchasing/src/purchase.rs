use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    line_total, Adjustments, Aggregate, AggregateRoot, DocumentKind, DocumentNumber, DomainError,
    Event, Money, OrderTotals, UserId,
};
use stockledger_inventory::ProductId;
use stockledger_parties::VendorId;
use stockledger_payments::{PaymentMode, PaymentSource, PaymentState};

use crate::status::OrderStatus;

stockledger_core::typed_id!(
    /// Purchase identifier.
    PurchaseId
);

/// A line as submitted: `{product_id, quantity, purchase_price}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub purchase_price: Money,
}

/// An accepted purchase line. Immutable once the purchase exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseItem {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    pub purchase_price: Money,
    pub total: Money,
}

/// Persisted shape of a purchase with its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseSnapshot {
    pub id: PurchaseId,
    pub purchase_number: DocumentNumber,
    pub vendor_id: VendorId,
    pub vendor_invoice_number: Option<String>,
    pub purchase_date: NaiveDate,
    pub payment_due_date: Option<NaiveDate>,
    pub items: Vec<PurchaseItem>,
    pub totals: OrderTotals,
    pub payment: PaymentState,
    pub payment_mode: Option<PaymentMode>,
    pub order_status: OrderStatus,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

/// Aggregate root: Purchase.
///
/// Owns its items. Creating a purchase has no stock effect; stock is applied
/// exactly once, when the purchase is received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    id: PurchaseId,
    purchase_number: Option<DocumentNumber>,
    vendor_id: Option<VendorId>,
    vendor_invoice_number: Option<String>,
    purchase_date: Option<NaiveDate>,
    payment_due_date: Option<NaiveDate>,
    items: Vec<PurchaseItem>,
    totals: OrderTotals,
    payment: PaymentState,
    payment_mode: Option<PaymentMode>,
    order_status: OrderStatus,
    notes: Option<String>,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
    deleted: bool,
}

impl Purchase {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: PurchaseId) -> Self {
        Self {
            id,
            purchase_number: None,
            vendor_id: None,
            vendor_invoice_number: None,
            purchase_date: None,
            payment_due_date: None,
            items: Vec::new(),
            totals: OrderTotals::default(),
            payment: PaymentState::default(),
            payment_mode: None,
            order_status: OrderStatus::Draft,
            notes: None,
            created_by: None,
            created_at: None,
            version: 0,
            created: false,
            deleted: false,
        }
    }

    pub fn from_snapshot(s: PurchaseSnapshot) -> Self {
        Self {
            id: s.id,
            purchase_number: Some(s.purchase_number),
            vendor_id: Some(s.vendor_id),
            vendor_invoice_number: s.vendor_invoice_number,
            purchase_date: Some(s.purchase_date),
            payment_due_date: s.payment_due_date,
            items: s.items,
            totals: s.totals,
            payment: s.payment,
            payment_mode: s.payment_mode,
            order_status: s.order_status,
            notes: s.notes,
            created_by: Some(s.created_by),
            created_at: Some(s.created_at),
            version: s.version,
            created: true,
            deleted: false,
        }
    }

    /// `None` until the purchase has been created, or once it is deleted.
    pub fn snapshot(&self) -> Option<PurchaseSnapshot> {
        if !self.created || self.deleted {
            return None;
        }
        Some(PurchaseSnapshot {
            id: self.id,
            purchase_number: self.purchase_number.clone()?,
            vendor_id: self.vendor_id?,
            vendor_invoice_number: self.vendor_invoice_number.clone(),
            purchase_date: self.purchase_date?,
            payment_due_date: self.payment_due_date,
            items: self.items.clone(),
            totals: self.totals,
            payment: self.payment,
            payment_mode: self.payment_mode,
            order_status: self.order_status,
            notes: self.notes.clone(),
            created_by: self.created_by?,
            created_at: self.created_at?,
            version: self.version,
        })
    }

    pub fn id_typed(&self) -> PurchaseId {
        self.id
    }

    pub fn purchase_number(&self) -> Option<&DocumentNumber> {
        self.purchase_number.as_ref()
    }

    pub fn vendor_id(&self) -> Option<VendorId> {
        self.vendor_id
    }

    pub fn items(&self) -> &[PurchaseItem] {
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

    pub fn order_status(&self) -> OrderStatus {
        self.order_status
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

impl AggregateRoot for Purchase {
    type Id = PurchaseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchase.
///
/// `purchase_number` is drawn from the store's counter by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchase {
    pub purchase_id: PurchaseId,
    pub purchase_number: DocumentNumber,
    pub vendor_id: VendorId,
    pub vendor_invoice_number: Option<String>,
    pub purchase_date: NaiveDate,
    pub payment_due_date: Option<NaiveDate>,
    pub lines: Vec<PurchaseLine>,
    pub adjustments: Adjustments,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceivePurchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivePurchase {
    pub purchase_id: PurchaseId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateOrderStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOrderStatus {
    pub purchase_id: PurchaseId,
    pub status: OrderStatus,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetPaymentState.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPaymentState {
    pub purchase_id: PurchaseId,
    pub state: PaymentState,
    pub mode: Option<PaymentMode>,
    pub source: PaymentSource,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeletePurchase.
///
/// `payment_count` is the number of payment rows the caller found under lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePurchase {
    pub purchase_id: PurchaseId,
    pub payment_count: usize,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseCommand {
    CreatePurchase(CreatePurchase),
    ReceivePurchase(ReceivePurchase),
    UpdateOrderStatus(UpdateOrderStatus),
    SetPaymentState(SetPaymentState),
    DeletePurchase(DeletePurchase),
}

/// Event: PurchaseCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseCreated {
    pub purchase_id: PurchaseId,
    pub purchase_number: DocumentNumber,
    pub vendor_id: VendorId,
    pub vendor_invoice_number: Option<String>,
    pub purchase_date: NaiveDate,
    pub payment_due_date: Option<NaiveDate>,
    pub items: Vec<PurchaseItem>,
    pub totals: OrderTotals,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseReceived. Carries the items whose stock must now be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceived {
    pub purchase_id: PurchaseId,
    pub previous_status: OrderStatus,
    pub items: Vec<PurchaseItem>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChanged {
    pub purchase_id: PurchaseId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentStateChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStateChanged {
    pub purchase_id: PurchaseId,
    pub previous: PaymentState,
    pub current: PaymentState,
    pub mode: Option<PaymentMode>,
    pub source: PaymentSource,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseDeleted. `stock_applied` tells the caller whether stock
/// must be withdrawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseDeleted {
    pub purchase_id: PurchaseId,
    pub purchase_number: DocumentNumber,
    pub stock_applied: bool,
    pub items: Vec<PurchaseItem>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseEvent {
    PurchaseCreated(PurchaseCreated),
    PurchaseReceived(PurchaseReceived),
    OrderStatusChanged(OrderStatusChanged),
    PaymentStateChanged(PaymentStateChanged),
    PurchaseDeleted(PurchaseDeleted),
}

impl Event for PurchaseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseEvent::PurchaseCreated(_) => "purchasing.purchase.created",
            PurchaseEvent::PurchaseReceived(_) => "purchasing.purchase.received",
            PurchaseEvent::OrderStatusChanged(_) => "purchasing.purchase.status_changed",
            PurchaseEvent::PaymentStateChanged(e) => match e.source {
                PaymentSource::Recorded => "purchasing.purchase.payment_recorded",
                PaymentSource::Override => "payment.override",
            },
            PurchaseEvent::PurchaseDeleted(_) => "purchasing.purchase.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseEvent::PurchaseCreated(e) => e.occurred_at,
            PurchaseEvent::PurchaseReceived(e) => e.occurred_at,
            PurchaseEvent::OrderStatusChanged(e) => e.occurred_at,
            PurchaseEvent::PaymentStateChanged(e) => e.occurred_at,
            PurchaseEvent::PurchaseDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Purchase {
    type Command = PurchaseCommand;
    type Event = PurchaseEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseEvent::PurchaseCreated(e) => {
                self.id = e.purchase_id;
                self.purchase_number = Some(e.purchase_number.clone());
                self.vendor_id = Some(e.vendor_id);
                self.vendor_invoice_number = e.vendor_invoice_number.clone();
                self.purchase_date = Some(e.purchase_date);
                self.payment_due_date = e.payment_due_date;
                self.items = e.items.clone();
                self.totals = e.totals;
                self.payment = PaymentState::unpaid(e.totals.total_amount);
                self.order_status = OrderStatus::Ordered;
                self.notes = e.notes.clone();
                self.created_by = Some(e.actor);
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            PurchaseEvent::PurchaseReceived(_) => {
                self.order_status = OrderStatus::Received;
            }
            PurchaseEvent::OrderStatusChanged(e) => {
                self.order_status = e.to;
            }
            PurchaseEvent::PaymentStateChanged(e) => {
                self.payment = e.current;
                if e.mode.is_some() {
                    self.payment_mode = e.mode;
                }
            }
            PurchaseEvent::PurchaseDeleted(_) => {
                self.deleted = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseCommand::CreatePurchase(cmd) => self.handle_create(cmd),
            PurchaseCommand::ReceivePurchase(cmd) => self.handle_receive(cmd),
            PurchaseCommand::UpdateOrderStatus(cmd) => self.handle_update_status(cmd),
            PurchaseCommand::SetPaymentState(cmd) => self.handle_set_payment(cmd),
            PurchaseCommand::DeletePurchase(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Purchase {
    /// Price submitted lines into items and order totals.
    ///
    /// Pure; lets callers reject bad input before opening a transaction.
    pub fn price_lines(
        lines: &[PurchaseLine],
        adjustments: &Adjustments,
    ) -> Result<(Vec<PurchaseItem>, OrderTotals), DomainError> {
        if lines.is_empty() {
            return Err(DomainError::validation(
                "Vendor, purchase date, and at least one item are required",
            ));
        }
        let mut items = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            let total = line_total(line.quantity, line.purchase_price, Money::ZERO)
                .map_err(|e| DomainError::validation(format!("item {}: {e}", idx + 1)))?;
            items.push(PurchaseItem {
                line_no: (idx + 1) as u32,
                product_id: line.product_id,
                quantity: line.quantity,
                purchase_price: line.purchase_price,
                total,
            });
        }
        let subtotal = Money::checked_sum(items.iter().map(|i| i.total))
            .ok_or_else(|| DomainError::validation("order subtotal overflows"))?;
        let totals = OrderTotals::compute(subtotal, adjustments)?;
        Ok((items, totals))
    }

    fn ensure_live(&self, purchase_id: PurchaseId) -> Result<(), DomainError> {
        if !self.created || self.deleted {
            return Err(DomainError::not_found(format!("Purchase {purchase_id}")));
        }
        if self.id != purchase_id {
            return Err(DomainError::invariant("purchase_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreatePurchase) -> Result<Vec<PurchaseEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase already exists"));
        }
        if cmd.purchase_number.kind() != DocumentKind::Purchase {
            return Err(DomainError::invariant("purchase number must use the PO series"));
        }
        let (items, totals) = Purchase::price_lines(&cmd.lines, &cmd.adjustments)?;

        Ok(vec![PurchaseEvent::PurchaseCreated(PurchaseCreated {
            purchase_id: cmd.purchase_id,
            purchase_number: cmd.purchase_number.clone(),
            vendor_id: cmd.vendor_id,
            vendor_invoice_number: cmd
                .vendor_invoice_number
                .clone()
                .filter(|s| !s.trim().is_empty()),
            purchase_date: cmd.purchase_date,
            payment_due_date: cmd.payment_due_date,
            items,
            totals,
            notes: cmd.notes.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceivePurchase) -> Result<Vec<PurchaseEvent>, DomainError> {
        self.ensure_live(cmd.purchase_id)?;
        self.order_status.ensure_receivable()?;

        Ok(vec![PurchaseEvent::PurchaseReceived(PurchaseReceived {
            purchase_id: cmd.purchase_id,
            previous_status: self.order_status,
            items: self.items.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_status(
        &self,
        cmd: &UpdateOrderStatus,
    ) -> Result<Vec<PurchaseEvent>, DomainError> {
        self.ensure_live(cmd.purchase_id)?;
        self.order_status.ensure_can_set(cmd.status)?;
        if self.order_status == cmd.status {
            return Ok(Vec::new());
        }

        Ok(vec![PurchaseEvent::OrderStatusChanged(OrderStatusChanged {
            purchase_id: cmd.purchase_id,
            from: self.order_status,
            to: cmd.status,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_payment(&self, cmd: &SetPaymentState) -> Result<Vec<PurchaseEvent>, DomainError> {
        self.ensure_live(cmd.purchase_id)?;
        if cmd.state.amount_paid.is_negative() {
            return Err(DomainError::validation("amount paid cannot be negative"));
        }

        Ok(vec![PurchaseEvent::PaymentStateChanged(PaymentStateChanged {
            purchase_id: cmd.purchase_id,
            previous: self.payment,
            current: cmd.state,
            mode: cmd.mode,
            source: cmd.source,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeletePurchase) -> Result<Vec<PurchaseEvent>, DomainError> {
        self.ensure_live(cmd.purchase_id)?;
        if cmd.payment_count > 0 {
            return Err(DomainError::conflict(
                "Cannot delete purchase with recorded payments",
            ));
        }
        let purchase_number = self
            .purchase_number
            .clone()
            .ok_or_else(|| DomainError::invariant("purchase has no number"))?;

        Ok(vec![PurchaseEvent::PurchaseDeleted(PurchaseDeleted {
            purchase_id: cmd.purchase_id,
            purchase_number,
            stock_applied: self.order_status == OrderStatus::Received,
            items: self.items.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_payments::PaymentStatus;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 2).unwrap()
    }

    fn actor() -> UserId {
        UserId::new()
    }

    fn create_cmd(id: PurchaseId, lines: Vec<PurchaseLine>) -> PurchaseCommand {
        PurchaseCommand::CreatePurchase(CreatePurchase {
            purchase_id: id,
            purchase_number: DocumentNumber::new(DocumentKind::Purchase, 2024, 1).unwrap(),
            vendor_id: VendorId::generate(),
            vendor_invoice_number: None,
            purchase_date: test_date(),
            payment_due_date: None,
            lines,
            adjustments: Adjustments::default(),
            notes: None,
            actor: actor(),
            occurred_at: test_time(),
        })
    }

    fn scenario_c_purchase() -> Purchase {
        let id = PurchaseId::generate();
        let mut purchase = Purchase::empty(id);
        purchase
            .execute(&create_cmd(
                id,
                vec![
                    PurchaseLine {
                        product_id: ProductId::generate(),
                        quantity: 5,
                        purchase_price: Money::from_units(10),
                    },
                    PurchaseLine {
                        product_id: ProductId::generate(),
                        quantity: 3,
                        purchase_price: Money::from_units(20),
                    },
                ],
            ))
            .unwrap();
        purchase
    }

    fn receive(purchase: &Purchase) -> PurchaseCommand {
        PurchaseCommand::ReceivePurchase(ReceivePurchase {
            purchase_id: purchase.id_typed(),
            actor: actor(),
            occurred_at: test_time(),
        })
    }

    fn set_status(purchase: &Purchase, status: OrderStatus) -> PurchaseCommand {
        PurchaseCommand::UpdateOrderStatus(UpdateOrderStatus {
            purchase_id: purchase.id_typed(),
            status,
            actor: actor(),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn scenario_c_create_is_ordered_and_pending() {
        let purchase = scenario_c_purchase();
        assert_eq!(purchase.totals().subtotal, Money::from_units(110));
        assert_eq!(purchase.order_status(), OrderStatus::Ordered);
        assert_eq!(purchase.payment().status, PaymentStatus::Pending);
        assert_eq!(purchase.items().len(), 2);
        assert_eq!(purchase.items()[1].line_no, 2);
    }

    #[test]
    fn scenario_c_receive_once() {
        let mut purchase = scenario_c_purchase();
        let events = purchase.execute(&receive(&purchase)).unwrap();
        match &events[0] {
            PurchaseEvent::PurchaseReceived(e) => {
                assert_eq!(e.previous_status, OrderStatus::Ordered);
                assert_eq!(e.items.len(), 2);
            }
            _ => panic!("Expected PurchaseReceived event"),
        }
        assert_eq!(purchase.order_status(), OrderStatus::Received);

        let err = purchase.handle(&receive(&purchase)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn cancelled_purchase_cannot_be_received() {
        let mut purchase = scenario_c_purchase();
        purchase
            .execute(&set_status(&purchase, OrderStatus::Cancelled))
            .unwrap();
        assert!(purchase.handle(&receive(&purchase)).is_err());
    }

    #[test]
    fn generic_update_cannot_force_received() {
        let purchase = scenario_c_purchase();
        let err = purchase
            .handle(&set_status(&purchase, OrderStatus::Received))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn same_status_update_is_a_noop() {
        let purchase = scenario_c_purchase();
        assert!(purchase
            .handle(&set_status(&purchase, OrderStatus::Ordered))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn empty_lines_are_rejected() {
        let id = PurchaseId::generate();
        let purchase = Purchase::empty(id);
        let err = purchase.handle(&create_cmd(id, Vec::new())).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn subtotal_overflow_is_a_validation_error() {
        let huge = PurchaseLine {
            product_id: ProductId::generate(),
            quantity: 1,
            purchase_price: Money::from_cents(i64::MAX - 1),
        };
        let err = Purchase::price_lines(&[huge.clone(), huge], &Adjustments::default()).unwrap_err();
        assert_eq!(err, DomainError::validation("order subtotal overflows"));
    }

    #[test]
    fn delete_with_payments_is_rejected_and_reports_stock_state() {
        let mut purchase = scenario_c_purchase();
        let delete = |p: &Purchase, payment_count| {
            PurchaseCommand::DeletePurchase(DeletePurchase {
                purchase_id: p.id_typed(),
                payment_count,
                actor: actor(),
                occurred_at: test_time(),
            })
        };
        assert!(purchase.handle(&delete(&purchase, 1)).is_err());

        let events = purchase.handle(&delete(&purchase, 0)).unwrap();
        match &events[0] {
            PurchaseEvent::PurchaseDeleted(e) => assert!(!e.stock_applied),
            _ => panic!("Expected PurchaseDeleted event"),
        }

        purchase.execute(&receive(&purchase)).unwrap();
        let events = purchase.execute(&delete(&purchase, 0)).unwrap();
        match &events[0] {
            PurchaseEvent::PurchaseDeleted(e) => assert!(e.stock_applied),
            _ => panic!("Expected PurchaseDeleted event"),
        }
        assert!(purchase.is_deleted());
        assert!(purchase.snapshot().is_none());
    }

    #[test]
    fn override_is_audited_under_its_own_action() {
        let purchase = scenario_c_purchase();
        let events = purchase
            .handle(&PurchaseCommand::SetPaymentState(SetPaymentState {
                purchase_id: purchase.id_typed(),
                state: PaymentState::from_amount(Money::from_units(5), purchase.total_amount()),
                mode: Some(PaymentMode::Bank),
                source: PaymentSource::Override,
                actor: actor(),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(events[0].event_type(), "payment.override");
    }

    #[test]
    fn snapshot_round_trip_preserves_state() {
        let purchase = scenario_c_purchase();
        let snapshot = purchase.snapshot().unwrap();
        assert_eq!(Purchase::from_snapshot(snapshot), purchase);
    }
}
