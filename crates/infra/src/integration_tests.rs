//! Engine scenarios against the in-memory store.
//!
//! Verifies:
//! - Sales, receipts, reversals and adjustments keep quantity and the
//!   movement trail in step
//! - Payments recompute the paid amount from the rows
//! - A failed operation leaves no trace; audit failures never fail an operation
//! - Concurrent sales of the same product serialize on the product row

use std::sync::Arc;

use chrono::NaiveDate;
use proptest::prelude::*;

use stockledger_core::{Adjustments, DomainError, Money, Percent, UserId};
use stockledger_inventory::{
    InventoryMovement, MovementFilter, MovementType, ProductChanges, ProductId, ProductSnapshot,
    ReferenceType,
};
use stockledger_invoicing::{InvoiceDisplayStatus, InvoiceId, InvoiceLine};
use stockledger_parties::{CustomerId, VendorId};
use stockledger_payments::{NewPayment, PaymentMode, PaymentOverride, PaymentStatus};
use stockledger_purchasing::{OrderStatus, PurchaseLine};

use crate::audit::InMemoryAuditLog;
use crate::config::LedgerConfig;
use crate::engine::{
    LedgerEngine, NewCustomer, NewProduct, NewVendor, OrderRef, PurchaseDraft, RequestContext,
    SaleDraft,
};
use crate::error::{ErrorKind, LedgerError};
use crate::store::{InMemoryLedgerStore, LedgerStore, LedgerTx, Pagination};

type Engine = LedgerEngine<InMemoryLedgerStore, Arc<InMemoryAuditLog>>;

struct Harness {
    engine: Arc<Engine>,
    store: InMemoryLedgerStore,
    audit: Arc<InMemoryAuditLog>,
    ctx: RequestContext,
}

fn harness() -> Harness {
    harness_with(Arc::new(InMemoryAuditLog::new()))
}

fn harness_with(audit: Arc<InMemoryAuditLog>) -> Harness {
    harness_configured(audit, LedgerConfig::default())
}

fn harness_configured(audit: Arc<InMemoryAuditLog>, config: LedgerConfig) -> Harness {
    let store = InMemoryLedgerStore::new();
    let engine = LedgerEngine::new(store.clone(), audit.clone(), config);
    Harness {
        engine: Arc::new(engine),
        store,
        audit,
        ctx: RequestContext::new(UserId::new()),
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn line(product_id: ProductId, quantity: i64, unit_price: i64) -> InvoiceLine {
    InvoiceLine {
        product_id,
        quantity,
        unit_price: Money::from_units(unit_price),
        discount: Money::ZERO,
    }
}

fn sale(customer_id: Option<CustomerId>, lines: Vec<InvoiceLine>) -> SaleDraft {
    SaleDraft {
        customer_id,
        invoice_date: date(2024, 3, 1),
        due_date: date(2024, 3, 31),
        lines,
        adjustments: Adjustments::default(),
        amount_paid: Money::ZERO,
        payment_mode: None,
        notes: None,
    }
}

fn payment(amount: Money) -> NewPayment {
    NewPayment {
        payment_date: date(2024, 3, 10),
        amount,
        mode: PaymentMode::Bank,
        reference_no: None,
        notes: None,
    }
}

impl Harness {
    async fn product(&self, sku: &str, quantity: i64, reorder_level: i64) -> ProductSnapshot {
        self.engine
            .register_product(
                &self.ctx,
                NewProduct {
                    sku: sku.to_string(),
                    name: format!("Product {sku}"),
                    opening_quantity: quantity,
                    purchase_price: Money::from_units(5),
                    selling_price: Money::from_units(10),
                    reorder_level: Some(reorder_level),
                    max_stock: None,
                    vendor_id: None,
                    active: true,
                },
            )
            .await
            .unwrap()
    }

    async fn customer(&self, name: &str) -> CustomerId {
        self.engine
            .register_customer(
                &self.ctx,
                NewCustomer {
                    name: name.to_string(),
                    contact: Default::default(),
                },
            )
            .await
            .unwrap()
            .id
    }

    async fn vendor(&self) -> VendorId {
        self.engine
            .register_vendor(
                &self.ctx,
                NewVendor {
                    name: "Acme Supplies".to_string(),
                    contact: Default::default(),
                },
            )
            .await
            .unwrap()
            .id
    }

    async fn quantity(&self, id: ProductId) -> i64 {
        self.engine.product(id).await.unwrap().quantity
    }

    async fn balance(&self, id: CustomerId) -> Money {
        self.engine.customer(id).await.unwrap().outstanding_balance
    }

    async fn movements_for(&self, id: ProductId) -> Vec<InventoryMovement> {
        self.store
            .movements()
            .await
            .into_iter()
            .filter(|m| m.product_id == id)
            .collect()
    }
}

#[tokio::test]
async fn scenario_a_sale_decrements_and_oversell_is_rejected() {
    let h = harness();
    let p = h.product("P", 10, 5).await;

    h.engine
        .record_sale(&h.ctx, sale(None, vec![line(p.id, 3, 10)]))
        .await
        .unwrap();
    assert_eq!(h.quantity(p.id).await, 7);

    let outs: Vec<_> = h
        .movements_for(p.id)
        .await
        .into_iter()
        .filter(|m| m.movement_type == MovementType::StockOut)
        .collect();
    assert_eq!(outs.len(), 1);
    assert_eq!((outs[0].previous_quantity, outs[0].new_quantity), (10, 7));
    assert_eq!(outs[0].reference_type, ReferenceType::Invoice);

    let err = h
        .engine
        .record_sale(&h.ctx, sale(None, vec![line(p.id, 8, 10)]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rejected);
    assert!(matches!(
        err.domain(),
        Some(DomainError::InsufficientStock { available: 7, requested: 8, .. })
    ));
    assert!(err.to_envelope().message.contains("Available: 7"));
    assert_eq!(h.quantity(p.id).await, 7);
}

#[tokio::test]
async fn scenario_b_payments_recompute_from_rows() {
    let h = harness();
    let p = h.product("P", 10, 2).await;
    let invoice = h
        .engine
        .record_sale(&h.ctx, sale(None, vec![line(p.id, 10, 100)]))
        .await
        .unwrap();
    assert_eq!(invoice.totals.total_amount, Money::from_units(1000));
    let order = OrderRef::Invoice(invoice.id);

    let summary = h
        .engine
        .record_payment(&h.ctx, order, payment(Money::from_units(400)))
        .await
        .unwrap();
    assert_eq!(summary.total_paid, Money::from_units(400));
    assert_eq!(summary.pending, Money::from_units(600));
    let stored = h.engine.invoice(invoice.id).await.unwrap();
    assert_eq!(stored.payment.status, PaymentStatus::Partial);

    h.engine
        .record_payment(&h.ctx, order, payment(Money::from_units(600)))
        .await
        .unwrap();
    let stored = h.engine.invoice(invoice.id).await.unwrap();
    assert_eq!(stored.payment.amount_paid, Money::from_units(1000));
    assert_eq!(stored.payment.status, PaymentStatus::Paid);

    let err = h
        .engine
        .record_payment(&h.ctx, order, payment(Money::from_cents(1)))
        .await
        .unwrap_err();
    assert!(matches!(
        err.domain(),
        Some(DomainError::Overpayment { pending, .. }) if pending.is_zero()
    ));
    let stored = h.engine.invoice(invoice.id).await.unwrap();
    assert_eq!(stored.payment.amount_paid, Money::from_units(1000));

    let summary = h.engine.payment_summary(order).await.unwrap();
    assert_eq!(summary.payments.len(), 2);
    let row_sum: Money = summary.payments.iter().map(|p| p.amount).sum();
    assert_eq!(row_sum, stored.payment.amount_paid);
}

#[tokio::test]
async fn scenario_c_purchase_applies_stock_only_on_receive() {
    let h = harness();
    let vendor = h.vendor().await;
    let a = h.product("A", 0, 1).await;
    let b = h.product("B", 0, 1).await;

    let purchase = h
        .engine
        .create_purchase(
            &h.ctx,
            PurchaseDraft {
                vendor_id: vendor,
                vendor_invoice_number: Some("V-77".to_string()),
                purchase_date: date(2024, 2, 1),
                payment_due_date: None,
                lines: vec![
                    PurchaseLine {
                        product_id: a.id,
                        quantity: 5,
                        purchase_price: Money::from_units(10),
                    },
                    PurchaseLine {
                        product_id: b.id,
                        quantity: 3,
                        purchase_price: Money::from_units(20),
                    },
                ],
                adjustments: Adjustments::default(),
                notes: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(purchase.totals.subtotal, Money::from_units(110));
    assert_eq!(purchase.order_status, OrderStatus::Ordered);
    assert_eq!(purchase.payment.status, PaymentStatus::Pending);
    assert_eq!(purchase.purchase_number.to_string(), "PO-2024-001");
    assert_eq!((h.quantity(a.id).await, h.quantity(b.id).await), (0, 0));

    let received = h.engine.receive_purchase(&h.ctx, purchase.id).await.unwrap();
    assert_eq!(received.order_status, OrderStatus::Received);
    assert_eq!((h.quantity(a.id).await, h.quantity(b.id).await), (5, 3));
    assert_eq!(
        h.engine.product(b.id).await.unwrap().purchase_price,
        Money::from_units(20)
    );

    let err = h.engine.receive_purchase(&h.ctx, purchase.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rejected);
    assert_eq!((h.quantity(a.id).await, h.quantity(b.id).await), (5, 3));

    let receipts = h
        .engine
        .list_movements(
            &MovementFilter {
                reference_type: Some(ReferenceType::Purchase),
                ..MovementFilter::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(receipts.total, 2);
}

#[tokio::test]
async fn scenario_d_customer_balance_nets_to_zero_after_reversal() {
    let h = harness();
    let c = h.customer("Corner Shop").await;
    let p = h.product("P", 20, 5).await;

    let invoice = h
        .engine
        .record_sale(&h.ctx, sale(Some(c), vec![line(p.id, 5, 100)]))
        .await
        .unwrap();
    assert_eq!(invoice.totals.total_amount, Money::from_units(500));
    assert_eq!(h.balance(c).await, Money::from_units(500));

    let movements = h.engine.reverse_sale(&h.ctx, invoice.id).await.unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].reference_type, ReferenceType::Return);
    assert_eq!(movements[0].notes.as_deref(), Some("reversal"));
    assert_eq!(h.balance(c).await, Money::ZERO);
    assert_eq!(h.quantity(p.id).await, 20);

    let err = h.engine.invoice(invoice.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn sale_with_payment_at_counter_records_a_row_and_cannot_be_reversed() {
    let h = harness();
    let c = h.customer("Regular").await;
    let p = h.product("P", 10, 2).await;

    let mut draft = sale(Some(c), vec![line(p.id, 2, 50)]);
    draft.amount_paid = Money::from_units(40);
    let invoice = h.engine.record_sale(&h.ctx, draft).await.unwrap();
    assert_eq!(invoice.payment.amount_paid, Money::from_units(40));
    assert_eq!(invoice.payment.status, PaymentStatus::Partial);
    assert_eq!(h.balance(c).await, Money::from_units(60));

    let summary = h.engine.payment_summary(OrderRef::Invoice(invoice.id)).await.unwrap();
    assert_eq!(summary.payments.len(), 1);
    assert_eq!(summary.payments[0].mode, PaymentMode::Cash);

    let err = h.engine.reverse_sale(&h.ctx, invoice.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rejected);
    assert_eq!(h.quantity(p.id).await, 8);
}

#[tokio::test]
async fn payment_to_customer_invoice_reduces_the_balance() {
    let h = harness();
    let c = h.customer("Trade").await;
    let p = h.product("P", 10, 2).await;
    let invoice = h
        .engine
        .record_sale(&h.ctx, sale(Some(c), vec![line(p.id, 3, 100)]))
        .await
        .unwrap();

    h.engine
        .record_payment(&h.ctx, OrderRef::Invoice(invoice.id), payment(Money::from_units(120)))
        .await
        .unwrap();
    assert_eq!(h.balance(c).await, Money::from_units(180));
}

#[tokio::test]
async fn failing_line_rolls_back_the_whole_sale() {
    let h = harness();
    let a = h.product("A", 5, 1).await;
    let b = h.product("B", 1, 1).await;
    let before = h.store.movements().await.len();

    let err = h
        .engine
        .record_sale(&h.ctx, sale(None, vec![line(a.id, 2, 10), line(b.id, 3, 10)]))
        .await
        .unwrap_err();
    assert!(matches!(err.domain(), Some(DomainError::InsufficientStock { .. })));
    assert_eq!(h.quantity(a.id).await, 5);
    assert_eq!(h.quantity(b.id).await, 1);
    assert_eq!(h.store.movements().await.len(), before);

    // The failed attempt did not consume a document number.
    let invoice = h
        .engine
        .record_sale(&h.ctx, sale(None, vec![line(a.id, 2, 10)]))
        .await
        .unwrap();
    assert_eq!(invoice.invoice_number.to_string(), "INV-2024-001");
}

#[tokio::test]
async fn duplicate_lines_are_checked_against_the_running_quantity() {
    let h = harness();
    let p = h.product("P", 5, 1).await;

    let err = h
        .engine
        .record_sale(&h.ctx, sale(None, vec![line(p.id, 3, 10), line(p.id, 3, 10)]))
        .await
        .unwrap_err();
    assert!(matches!(
        err.domain(),
        Some(DomainError::InsufficientStock { available: 2, .. })
    ));
    assert_eq!(h.quantity(p.id).await, 5);
}

#[tokio::test]
async fn validation_happens_before_any_transaction() {
    let h = harness();
    let err = h.engine.record_sale(&h.ctx, sale(None, vec![])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        err.to_envelope().message,
        "Invoice date, due date, and at least one item are required"
    );

    let p = h.product("P", 5, 1).await;
    let mut draft = sale(None, vec![line(p.id, 1, 10)]);
    draft.due_date = date(2024, 2, 1);
    let err = h.engine.record_sale(&h.ctx, draft).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = h
        .engine
        .record_payment(
            &h.ctx,
            OrderRef::Invoice(InvoiceId::generate()),
            payment(Money::ZERO),
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_envelope().message, "Valid payment amount is required");
}

#[tokio::test]
async fn unknown_records_are_not_found() {
    let h = harness();
    let missing = ProductId::generate();
    let err = h
        .engine
        .record_sale(&h.ctx, sale(None, vec![line(missing, 1, 10)]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains(&missing.to_string()));

    let p = h.product("P", 5, 1).await;
    let err = h
        .engine
        .record_sale(&h.ctx, sale(Some(CustomerId::generate()), vec![line(p.id, 1, 10)]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.quantity(p.id).await, 5);
}

#[tokio::test]
async fn injected_commit_failure_is_retryable_and_leaves_no_trace() {
    let h = harness();
    let p = h.product("P", 5, 1).await;
    let audited = h.audit.entries().len();

    h.store.fail_next_commit();
    let err = h
        .engine
        .record_sale(&h.ctx, sale(None, vec![line(p.id, 2, 10)]))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Infrastructure(_)));
    assert!(err.is_retryable());
    assert!(!err.to_envelope().kind.is_client_error());
    assert_eq!(h.quantity(p.id).await, 5);
    assert_eq!(h.audit.entries().len(), audited);

    h.engine
        .record_sale(&h.ctx, sale(None, vec![line(p.id, 2, 10)]))
        .await
        .unwrap();
    assert_eq!(h.quantity(p.id).await, 3);
}

#[tokio::test]
async fn audit_failure_never_fails_the_operation() {
    let h = harness_with(Arc::new(InMemoryAuditLog::failing()));
    let p = h.product("P", 5, 1).await;

    h.engine
        .record_sale(&h.ctx, sale(None, vec![line(p.id, 1, 10)]))
        .await
        .unwrap();
    assert_eq!(h.quantity(p.id).await, 4);
    assert!(h.audit.entries().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sales_never_oversell() {
    let h = harness();
    let p = h.product("P", 5, 1).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = h.engine.clone();
        let ctx = h.ctx.clone();
        let product_id = p.id;
        handles.push(tokio::spawn(async move {
            engine
                .record_sale(&ctx, sale(None, vec![line(product_id, 3, 10)]))
                .await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(err) => assert_eq!(err.kind(), ErrorKind::Rejected),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(h.quantity(p.id).await, 2);
    assert!(h.movements_for(p.id).await.iter().all(|m| m.is_consistent()));
}

#[tokio::test]
async fn document_numbers_are_sequential_per_year() {
    let h = harness();
    let p = h.product("P", 10, 1).await;

    let first = h
        .engine
        .record_sale(&h.ctx, sale(None, vec![line(p.id, 1, 10)]))
        .await
        .unwrap();
    let second = h
        .engine
        .record_sale(&h.ctx, sale(None, vec![line(p.id, 1, 10)]))
        .await
        .unwrap();
    let mut next_year = sale(None, vec![line(p.id, 1, 10)]);
    next_year.invoice_date = date(2025, 1, 2);
    next_year.due_date = date(2025, 1, 30);
    let third = h.engine.record_sale(&h.ctx, next_year).await.unwrap();

    assert_eq!(first.invoice_number.to_string(), "INV-2024-001");
    assert_eq!(second.invoice_number.to_string(), "INV-2024-002");
    assert_eq!(third.invoice_number.to_string(), "INV-2025-001");
}

#[tokio::test]
async fn adjust_stock_writes_one_movement_or_nothing() {
    let h = harness();
    let p = h.product("P", 10, 1).await;

    let movement = h
        .engine
        .adjust_stock(&h.ctx, p.id, 4, Some("cycle count".to_string()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(movement.movement_type, MovementType::StockOut);
    assert_eq!(movement.quantity, 6);
    assert_eq!(movement.reference_type, ReferenceType::Adjustment);
    assert!(movement.is_consistent());

    let audited = h.audit.entries().len();
    assert!(h.engine.adjust_stock(&h.ctx, p.id, 4, None).await.unwrap().is_none());
    assert_eq!(h.audit.entries().len(), audited);

    let err = h.engine.adjust_stock(&h.ctx, p.id, -1, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn reversing_a_consumed_receipt_floors_at_zero() {
    let h = harness();
    let vendor = h.vendor().await;
    let p = h.product("P", 0, 1).await;
    let purchase = h
        .engine
        .create_purchase(
            &h.ctx,
            PurchaseDraft {
                vendor_id: vendor,
                vendor_invoice_number: None,
                purchase_date: date(2024, 2, 1),
                payment_due_date: Some(date(2024, 3, 1)),
                lines: vec![PurchaseLine {
                    product_id: p.id,
                    quantity: 5,
                    purchase_price: Money::from_units(4),
                }],
                adjustments: Adjustments::default(),
                notes: None,
            },
        )
        .await
        .unwrap();
    h.engine.receive_purchase(&h.ctx, purchase.id).await.unwrap();
    h.engine
        .record_sale(&h.ctx, sale(None, vec![line(p.id, 4, 10)]))
        .await
        .unwrap();

    let movements = h.engine.reverse_purchase(&h.ctx, purchase.id).await.unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].quantity, 1);
    assert_eq!(movements[0].reference_type, ReferenceType::Return);
    assert_eq!(h.quantity(p.id).await, 0);
    assert_eq!(
        h.engine.purchase(purchase.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn purchase_with_payments_cannot_be_deleted() {
    let h = harness();
    let vendor = h.vendor().await;
    let p = h.product("P", 0, 1).await;
    let purchase = h
        .engine
        .create_purchase(
            &h.ctx,
            PurchaseDraft {
                vendor_id: vendor,
                vendor_invoice_number: None,
                purchase_date: date(2024, 2, 1),
                payment_due_date: None,
                lines: vec![PurchaseLine {
                    product_id: p.id,
                    quantity: 2,
                    purchase_price: Money::from_units(30),
                }],
                adjustments: Adjustments {
                    shipping_cost: Some(Money::from_units(5)),
                    ..Adjustments::default()
                },
                notes: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(purchase.totals.total_amount, Money::from_units(65));

    let summary = h
        .engine
        .record_payment(&h.ctx, OrderRef::Purchase(purchase.id), payment(Money::from_units(65)))
        .await
        .unwrap();
    assert!(summary.pending.is_zero());
    let stored = h.engine.purchase(purchase.id).await.unwrap();
    assert_eq!(stored.payment.status, PaymentStatus::Paid);
    assert_eq!(stored.payment_mode, Some(PaymentMode::Bank));

    let err = h.engine.reverse_purchase(&h.ctx, purchase.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rejected);
}

#[tokio::test]
async fn order_status_updates_cannot_reach_received() {
    let h = harness();
    let vendor = h.vendor().await;
    let p = h.product("P", 0, 1).await;
    let purchase = h
        .engine
        .create_purchase(
            &h.ctx,
            PurchaseDraft {
                vendor_id: vendor,
                vendor_invoice_number: None,
                purchase_date: date(2024, 2, 1),
                payment_due_date: None,
                lines: vec![PurchaseLine {
                    product_id: p.id,
                    quantity: 2,
                    purchase_price: Money::from_units(3),
                }],
                adjustments: Adjustments::default(),
                notes: None,
            },
        )
        .await
        .unwrap();

    let err = h
        .engine
        .update_order_status(&h.ctx, purchase.id, OrderStatus::Received)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let cancelled = h
        .engine
        .update_order_status(&h.ctx, purchase.id, OrderStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(cancelled.order_status, OrderStatus::Cancelled);

    let err = h.engine.receive_purchase(&h.ctx, purchase.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rejected);
    assert_eq!(h.quantity(p.id).await, 0);
}

#[tokio::test]
async fn payment_override_is_audited_and_moves_the_balance() {
    let h = harness();
    let c = h.customer("Override").await;
    let p = h.product("P", 10, 1).await;
    let invoice = h
        .engine
        .record_sale(&h.ctx, sale(Some(c), vec![line(p.id, 2, 100)]))
        .await
        .unwrap();
    assert_eq!(h.balance(c).await, Money::from_units(200));

    let state = h
        .engine
        .set_payment_status_direct(
            &h.ctx,
            OrderRef::Invoice(invoice.id),
            PaymentOverride {
                amount_paid: Money::from_units(200),
                mode: Some(PaymentMode::Cheque),
                status: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(state.status, PaymentStatus::Paid);
    assert_eq!(h.balance(c).await, Money::ZERO);
    assert!(h.audit.actions().contains(&"payment.override".to_string()));

    // No payment row backs the override.
    let summary = h.engine.payment_summary(OrderRef::Invoice(invoice.id)).await.unwrap();
    assert!(summary.payments.is_empty());
}

#[tokio::test]
async fn reconciliation_reports_and_repairs_drift() {
    let h = harness();
    let c = h.customer("Drifted").await;
    let p = h.product("P", 10, 1).await;
    h.engine
        .record_sale(&h.ctx, sale(Some(c), vec![line(p.id, 3, 100)]))
        .await
        .unwrap();

    let report = h.engine.reconcile_customer_balances(&h.ctx, false).await.unwrap();
    assert!(report.is_clean());

    // Corrupt the cache behind the engine's back.
    let mut tx = h.store.begin().await.unwrap();
    let mut customer = tx.lock_customer(c).await.unwrap().unwrap();
    customer.outstanding_balance = Money::from_units(1);
    tx.update_customer(&customer).await.unwrap();
    tx.commit().await.unwrap();

    let report = h.engine.reconcile_customer_balances(&h.ctx, false).await.unwrap();
    assert_eq!(report.drifts.len(), 1);
    assert_eq!(report.drifts[0].expected, Money::from_units(300));
    assert_eq!(report.drifts[0].drift, Money::from_units(-299));
    assert!(!report.rewritten);
    assert_eq!(h.balance(c).await, Money::from_units(1));

    let report = h.engine.reconcile_customer_balances(&h.ctx, true).await.unwrap();
    assert!(report.rewritten);
    assert_eq!(h.balance(c).await, Money::from_units(300));
    assert!(
        h.engine
            .reconcile_customer_balances(&h.ctx, false)
            .await
            .unwrap()
            .is_clean()
    );
}

#[tokio::test]
async fn low_stock_lists_most_depleted_first() {
    let h = harness();
    h.product("FULL", 50, 10).await;
    let half = h.product("HALF", 5, 10).await;
    let empty = h.product("EMPTY", 0, 4).await;

    let low = h.engine.low_stock().await.unwrap();
    let ids: Vec<_> = low.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![empty.id, half.id]);
}

#[tokio::test]
async fn movement_listing_is_filtered_and_paginated() {
    let h = harness();
    let p = h.product("P", 10, 1).await;
    let other = h.product("Q", 10, 1).await;
    for _ in 0..3 {
        h.engine
            .record_sale(&h.ctx, sale(None, vec![line(p.id, 1, 10)]))
            .await
            .unwrap();
    }

    let page = h
        .engine
        .list_movements(&MovementFilter::for_product(p.id), Pagination::new(Some(1), Some(2)))
        .await
        .unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.rows.len(), 2);
    assert!(page.rows.iter().all(|r| r.sku == "P"));
    // Newest first: the last sale left 7 on hand.
    assert_eq!(page.rows[0].movement.new_quantity, 7);

    let outs = h
        .engine
        .list_movements(
            &MovementFilter {
                movement_type: Some(MovementType::StockOut),
                ..MovementFilter::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(outs.total, 3);
    assert!(outs.rows.iter().all(|r| r.movement.product_id != other.id));
}

#[tokio::test]
async fn display_status_reads_overdue_after_the_due_date() {
    let h = harness();
    let p = h.product("P", 10, 1).await;
    let invoice = h
        .engine
        .record_sale(&h.ctx, sale(None, vec![line(p.id, 1, 10)]))
        .await
        .unwrap();

    let status = |today| h.engine.invoice_display_status(invoice.id, today);
    assert_eq!(status(date(2024, 3, 15)).await.unwrap(), InvoiceDisplayStatus::Pending);
    assert_eq!(status(date(2024, 4, 1)).await.unwrap(), InvoiceDisplayStatus::Overdue);
}

#[tokio::test]
async fn duplicate_sku_is_rejected() {
    let h = harness();
    h.product("DUP", 1, 1).await;
    let err = h
        .engine
        .register_product(
            &h.ctx,
            NewProduct {
                sku: "DUP".to_string(),
                name: "Again".to_string(),
                opening_quantity: 0,
                purchase_price: Money::ZERO,
                selling_price: Money::ZERO,
                reorder_level: None,
                max_stock: None,
                vendor_id: None,
                active: true,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rejected);
}

#[tokio::test]
async fn taxed_sale_totals_follow_the_rate() {
    let h = harness();
    let p = h.product("P", 10, 1).await;
    let mut draft = sale(None, vec![line(p.id, 2, 50)]);
    draft.adjustments = Adjustments {
        tax_rate: Some(Percent::whole(18)),
        discount_rate: Some(Percent::whole(10)),
        ..Adjustments::default()
    };
    let invoice = h.engine.record_sale(&h.ctx, draft).await.unwrap();
    assert_eq!(invoice.totals.tax_amount, Money::from_units(18));
    assert_eq!(invoice.totals.discount_amount, Money::from_units(10));
    assert_eq!(invoice.totals.total_amount, Money::from_units(108));
}

#[tokio::test]
async fn oversized_sale_totals_are_rejected_before_any_stock_moves() {
    let h = harness();
    let p = h.product("P", 10, 1).await;
    let q = h.product("Q", 10, 1).await;

    let mut draft = sale(None, vec![line(p.id, 1, 10)]);
    draft.adjustments.shipping_cost = Some(Money::from_cents(i64::MAX));
    let err = h.engine.record_sale(&h.ctx, draft).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.to_envelope().message, "order total overflows");

    let huge = |product_id| InvoiceLine {
        product_id,
        quantity: 1,
        unit_price: Money::from_cents(i64::MAX - 1),
        discount: Money::ZERO,
    };
    let err = h
        .engine
        .record_sale(&h.ctx, sale(None, vec![huge(p.id), huge(q.id)]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.to_envelope().message, "order subtotal overflows");
    assert_eq!((h.quantity(p.id).await, h.quantity(q.id).await), (10, 10));

    let vendor = h.vendor().await;
    let huge_line = |product_id| PurchaseLine {
        product_id,
        quantity: 1,
        purchase_price: Money::from_cents(i64::MAX - 1),
    };
    let err = h
        .engine
        .create_purchase(
            &h.ctx,
            PurchaseDraft {
                vendor_id: vendor,
                vendor_invoice_number: None,
                purchase_date: date(2024, 2, 1),
                payment_due_date: None,
                lines: vec![huge_line(p.id), huge_line(q.id)],
                adjustments: Adjustments::default(),
                notes: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn payments_within_tolerance_never_leave_a_negative_balance() {
    let config = LedgerConfig {
        overpayment_tolerance: Money::from_cents(1),
        ..LedgerConfig::default()
    };
    let h = harness_configured(Arc::new(InMemoryAuditLog::new()), config);
    let c = h.customer("Rounding").await;
    let p = h.product("P", 10, 1).await;

    let mut draft = sale(Some(c), vec![line(p.id, 1, 10)]);
    draft.amount_paid = Money::from_cents(1001);
    let paid_at_counter = h.engine.record_sale(&h.ctx, draft).await.unwrap();
    assert_eq!(paid_at_counter.payment.status, PaymentStatus::Paid);
    assert_eq!(h.balance(c).await, Money::ZERO);

    let later = h
        .engine
        .record_sale(&h.ctx, sale(Some(c), vec![line(p.id, 1, 10)]))
        .await
        .unwrap();
    assert_eq!(h.balance(c).await, Money::from_units(10));
    h.engine
        .record_payment(&h.ctx, OrderRef::Invoice(later.id), payment(Money::from_cents(1001)))
        .await
        .unwrap();
    assert_eq!(h.balance(c).await, Money::ZERO);

    let report = h.engine.reconcile_customer_balances(&h.ctx, false).await.unwrap();
    assert!(report.is_clean());
}

#[tokio::test]
async fn audit_actions_name_the_decided_events() {
    let h = harness();
    let p = h.product("P", 10, 1).await;
    let c = h.customer("Audited").await;
    let invoice = h
        .engine
        .record_sale(&h.ctx, sale(Some(c), vec![line(p.id, 2, 10)]))
        .await
        .unwrap();
    h.engine
        .record_payment(&h.ctx, OrderRef::Invoice(invoice.id), payment(Money::from_units(5)))
        .await
        .unwrap();
    h.engine.adjust_stock(&h.ctx, p.id, 20, None).await.unwrap();
    h.engine
        .update_product(
            &h.ctx,
            p.id,
            ProductChanges {
                name: Some("Renamed".to_string()),
                ..ProductChanges::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(
        h.audit.actions(),
        vec![
            "inventory.product.registered",
            "parties.customer.registered",
            "invoicing.invoice.issued",
            "invoicing.invoice.payment_recorded",
            "inventory.stock.adjusted",
            "inventory.product.updated",
        ]
    );
}

#[tokio::test]
async fn product_update_keeps_quantity_and_sku_unique() {
    let h = harness();
    let p = h.product("P", 7, 1).await;
    h.product("TAKEN", 0, 1).await;

    let err = h
        .engine
        .update_product(
            &h.ctx,
            p.id,
            ProductChanges {
                sku: Some("TAKEN".to_string()),
                ..ProductChanges::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rejected);

    let err = h
        .engine
        .update_product(
            &h.ctx,
            p.id,
            ProductChanges {
                vendor_id: Some(Some(VendorId::generate())),
                ..ProductChanges::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let vendor = h.vendor().await;
    let updated = h
        .engine
        .update_product(
            &h.ctx,
            p.id,
            ProductChanges {
                sku: Some("P".to_string()),
                selling_price: Some(Money::from_units(14)),
                reorder_level: Some(8),
                vendor_id: Some(Some(vendor)),
                ..ProductChanges::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.quantity, 7);
    assert_eq!(updated.selling_price, Money::from_units(14));
    assert_eq!(updated.vendor_id, Some(vendor));
    assert_eq!(h.engine.product(p.id).await.unwrap(), updated);
    assert_eq!(h.movements_for(p.id).await.len(), 1);

    let entry = h.audit.entries().pop().unwrap();
    assert_eq!(entry.action, "inventory.product.updated");
    assert!(entry.old_value.is_some() && entry.new_value.is_some());

    // Reorder level 8 with 7 on hand now reads as low stock.
    let low = h.engine.low_stock().await.unwrap();
    assert!(low.iter().any(|l| l.id == p.id));

    let audited = h.audit.entries().len();
    let same = h
        .engine
        .update_product(&h.ctx, p.id, ProductChanges::default())
        .await
        .unwrap();
    assert_eq!(same, updated);
    assert_eq!(h.audit.entries().len(), audited);
}

#[tokio::test]
async fn product_delete_is_refused_while_orders_name_it() {
    let h = harness();
    let p = h.product("P", 5, 1).await;
    let invoice = h
        .engine
        .record_sale(&h.ctx, sale(None, vec![line(p.id, 1, 10)]))
        .await
        .unwrap();

    let err = h.engine.delete_product(&h.ctx, p.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rejected);
    assert_eq!(h.quantity(p.id).await, 4);

    h.engine.reverse_sale(&h.ctx, invoice.id).await.unwrap();
    let deleted = h.engine.delete_product(&h.ctx, p.id).await.unwrap();
    assert_eq!(deleted.sku, "P");
    assert_eq!(h.engine.product(p.id).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert!(h.movements_for(p.id).await.is_empty());

    let entry = h.audit.entries().pop().unwrap();
    assert_eq!(entry.action, "inventory.product.deleted");
    assert!(entry.old_value.is_some() && entry.new_value.is_none());

    let err = h.engine.delete_product(&h.ctx, p.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 24, .. ProptestConfig::default() })]

    /// Reversing a sale restores every product it touched; a rejected sale
    /// touches nothing.
    #[test]
    fn reverse_sale_is_the_inverse_of_record_sale(
        stock in proptest::collection::vec(0i64..8, 3),
        lines in proptest::collection::vec((0usize..3, 1i64..5), 1..5),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let h = harness();
            let mut products = Vec::new();
            for (i, qty) in stock.iter().enumerate() {
                products.push(h.product(&format!("SKU{i}"), *qty, 1).await);
            }
            let draft = sale(
                None,
                lines.iter().map(|(idx, qty)| line(products[*idx].id, *qty, 3)).collect(),
            );

            match h.engine.record_sale(&h.ctx, draft).await {
                Ok(invoice) => {
                    h.engine.reverse_sale(&h.ctx, invoice.id).await.unwrap();
                }
                Err(err) => assert_eq!(err.kind(), ErrorKind::Rejected),
            }

            for (product, qty) in products.iter().zip(&stock) {
                assert_eq!(h.quantity(product.id).await, *qty);
                assert!(h.movements_for(product.id).await.iter().all(|m| m.is_consistent()));
            }
        });
    }
}
