//! Purchase orders: creation without stock effect, the receive step that
//! applies stock, status corrections and deletion.

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{Span, instrument};

use stockledger_core::{Adjustments, Aggregate, DocumentKind, DocumentNumber, DomainError};
use stockledger_inventory::{
    InventoryMovement, MovementReference, ProductCommand, ReceiveStock, WithdrawStock,
};
use stockledger_parties::VendorId;
use stockledger_purchasing::{
    CreatePurchase, DeletePurchase, OrderStatus, Purchase, PurchaseCommand, PurchaseEvent,
    PurchaseId, PurchaseLine, PurchaseSnapshot, ReceivePurchase, UpdateOrderStatus,
};

use super::stock::LockedProducts;
use super::{LedgerEngine, Outcome, RequestContext, decided};
use crate::audit::AuditNotifier;
use crate::error::LedgerError;
use crate::store::{LedgerStore, LedgerTx};

/// A proposed purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseDraft {
    pub vendor_id: VendorId,
    pub vendor_invoice_number: Option<String>,
    pub purchase_date: NaiveDate,
    pub payment_due_date: Option<NaiveDate>,
    pub lines: Vec<PurchaseLine>,
    #[serde(default)]
    pub adjustments: Adjustments,
    pub notes: Option<String>,
}

impl<S, N> LedgerEngine<S, N>
where
    S: LedgerStore,
    N: AuditNotifier,
{
    /// Record a purchase order. Stock is untouched until it is received.
    #[instrument(
        skip(self, ctx, draft),
        fields(
            vendor_id = %draft.vendor_id,
            lines = draft.lines.len(),
            purchase_number = tracing::field::Empty
        ),
        err
    )]
    pub async fn create_purchase(
        &self,
        ctx: &RequestContext,
        draft: PurchaseDraft,
    ) -> Result<PurchaseSnapshot, LedgerError> {
        Purchase::price_lines(&draft.lines, &draft.adjustments)?;

        let mut tx = self.begin().await?;
        let outcome = create_purchase_in(&mut tx, ctx, draft).await;
        self.settle(tx, outcome).await
    }

    /// Apply a purchase's items to stock, exactly once.
    #[instrument(skip(self, ctx, purchase_id), fields(purchase_id = %purchase_id), err)]
    pub async fn receive_purchase(
        &self,
        ctx: &RequestContext,
        purchase_id: PurchaseId,
    ) -> Result<PurchaseSnapshot, LedgerError> {
        let mut tx = self.begin().await?;
        let outcome = receive_purchase_in(&mut tx, ctx, purchase_id).await;
        self.settle(tx, outcome).await
    }

    /// Move a purchase to any status except `received`.
    #[instrument(
        skip(self, ctx, purchase_id, status),
        fields(purchase_id = %purchase_id, status = %status),
        err
    )]
    pub async fn update_order_status(
        &self,
        ctx: &RequestContext,
        purchase_id: PurchaseId,
        status: OrderStatus,
    ) -> Result<PurchaseSnapshot, LedgerError> {
        if status == OrderStatus::Received {
            return Err(DomainError::validation(
                "status 'received' can only be set by receiving the purchase",
            )
            .into());
        }

        let mut tx = self.begin().await?;
        let outcome = async {
            let before = lock_purchase(&mut tx, purchase_id).await?;
            let mut purchase = Purchase::from_snapshot(before.clone());
            let events = purchase.execute(&PurchaseCommand::UpdateOrderStatus(UpdateOrderStatus {
                purchase_id,
                status,
                actor: ctx.actor,
                occurred_at: Utc::now(),
            }))?;
            if events.is_empty() {
                return Ok(Outcome::new(before));
            }

            let after = live_snapshot(&purchase)?;
            tx.update_purchase(&after).await?;
            let entry = ctx
                .audit(decided(&events)?, "purchase", purchase_id.0)
                .with_old(&before)
                .with_new(&after);
            Ok::<_, LedgerError>(Outcome::new(after).audited(entry))
        }
        .await;
        self.settle(tx, outcome).await
    }

    /// Delete a purchase with no payments, taking back any stock it applied.
    ///
    /// Stock consumed since receipt is not taken back twice: each product is
    /// floored at zero and its movement records what was actually removed.
    #[instrument(skip(self, ctx, purchase_id), fields(purchase_id = %purchase_id), err)]
    pub async fn reverse_purchase(
        &self,
        ctx: &RequestContext,
        purchase_id: PurchaseId,
    ) -> Result<Vec<InventoryMovement>, LedgerError> {
        let mut tx = self.begin().await?;
        let outcome = reverse_purchase_in(&mut tx, ctx, purchase_id).await;
        self.settle(tx, outcome).await
    }
}

async fn lock_purchase<T>(
    tx: &mut T,
    purchase_id: PurchaseId,
) -> Result<PurchaseSnapshot, LedgerError>
where
    T: LedgerTx,
{
    tx.lock_purchase(purchase_id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("Purchase with ID {purchase_id}")).into())
}

fn live_snapshot(purchase: &Purchase) -> Result<PurchaseSnapshot, LedgerError> {
    purchase
        .snapshot()
        .ok_or_else(|| DomainError::invariant("purchase has no live state").into())
}

async fn create_purchase_in<T>(
    tx: &mut T,
    ctx: &RequestContext,
    draft: PurchaseDraft,
) -> Result<Outcome<PurchaseSnapshot>, LedgerError>
where
    T: LedgerTx,
{
    if tx.vendor(draft.vendor_id).await?.is_none() {
        return Err(DomainError::not_found(format!("Vendor with ID {}", draft.vendor_id)).into());
    }
    // Existence only; creating an order does not touch quantities.
    LockedProducts::lock(tx, draft.lines.iter().map(|l| l.product_id)).await?;

    let year = draft.purchase_date.year();
    let sequence = tx.next_document_sequence(DocumentKind::Purchase, year).await?;
    let purchase_number = DocumentNumber::new(DocumentKind::Purchase, year, sequence)?;
    Span::current().record("purchase_number", tracing::field::display(&purchase_number));

    let purchase_id = PurchaseId::generate();
    let mut purchase = Purchase::empty(purchase_id);
    let events = purchase.execute(&PurchaseCommand::CreatePurchase(CreatePurchase {
        purchase_id,
        purchase_number,
        vendor_id: draft.vendor_id,
        vendor_invoice_number: draft.vendor_invoice_number,
        purchase_date: draft.purchase_date,
        payment_due_date: draft.payment_due_date,
        lines: draft.lines,
        adjustments: draft.adjustments,
        notes: draft.notes,
        actor: ctx.actor,
        occurred_at: Utc::now(),
    }))?;

    let snapshot = live_snapshot(&purchase)?;
    tx.insert_purchase(&snapshot).await?;

    let entry = ctx
        .audit(decided(&events)?, "purchase", purchase_id.0)
        .with_new(&snapshot);
    Ok(Outcome::new(snapshot).audited(entry))
}

async fn receive_purchase_in<T>(
    tx: &mut T,
    ctx: &RequestContext,
    purchase_id: PurchaseId,
) -> Result<Outcome<PurchaseSnapshot>, LedgerError>
where
    T: LedgerTx,
{
    let now = Utc::now();
    let before = lock_purchase(tx, purchase_id).await?;
    let mut purchase = Purchase::from_snapshot(before.clone());
    let received = purchase
        .execute(&PurchaseCommand::ReceivePurchase(ReceivePurchase {
            purchase_id,
            actor: ctx.actor,
            occurred_at: now,
        }))?
        .into_iter()
        .find_map(|event| match event {
            PurchaseEvent::PurchaseReceived(received) => Some(received),
            _ => None,
        })
        .ok_or_else(|| DomainError::invariant("purchase receive emitted no event"))?;

    let mut stock = LockedProducts::lock(tx, received.items.iter().map(|i| i.product_id)).await?;
    for item in &received.items {
        stock.execute(&ProductCommand::ReceiveStock(ReceiveStock {
            product_id: item.product_id,
            quantity: item.quantity,
            unit_cost: Some(item.purchase_price),
            reference: MovementReference::purchase(purchase_id.0),
            notes: None,
            actor: ctx.actor,
            occurred_at: now,
        }))?;
    }

    let after = live_snapshot(&purchase)?;
    stock.persist(tx).await?;
    tx.update_purchase(&after).await?;

    let entry = ctx
        .audit(&PurchaseEvent::PurchaseReceived(received), "purchase", purchase_id.0)
        .with_old(&before)
        .with_new(&after);
    Ok(Outcome::new(after).audited(entry))
}

async fn reverse_purchase_in<T>(
    tx: &mut T,
    ctx: &RequestContext,
    purchase_id: PurchaseId,
) -> Result<Outcome<Vec<InventoryMovement>>, LedgerError>
where
    T: LedgerTx,
{
    let now = Utc::now();
    let before = lock_purchase(tx, purchase_id).await?;
    let payment_count = tx
        .payments_for(DocumentKind::Purchase, purchase_id.0)
        .await?
        .len();

    let mut purchase = Purchase::from_snapshot(before.clone());
    let deleted = purchase
        .execute(&PurchaseCommand::DeletePurchase(DeletePurchase {
            purchase_id,
            payment_count,
            actor: ctx.actor,
            occurred_at: now,
        }))?
        .into_iter()
        .find_map(|event| match event {
            PurchaseEvent::PurchaseDeleted(deleted) => Some(deleted),
            _ => None,
        })
        .ok_or_else(|| DomainError::invariant("purchase delete emitted no event"))?;

    let mut movements = Vec::new();
    if deleted.stock_applied {
        let mut stock =
            LockedProducts::lock(tx, deleted.items.iter().map(|i| i.product_id)).await?;
        for item in &deleted.items {
            stock.execute(&ProductCommand::WithdrawStock(WithdrawStock {
                product_id: item.product_id,
                quantity: item.quantity,
                reference: MovementReference::reversal(purchase_id.0),
                notes: Some("reversal".to_string()),
                actor: ctx.actor,
                occurred_at: now,
            }))?;
        }
        movements = stock.persist(tx).await?;
    }
    tx.delete_purchase(purchase_id).await?;

    let entry = ctx
        .audit(&PurchaseEvent::PurchaseDeleted(deleted), "purchase", purchase_id.0)
        .with_old(&before);
    Ok(Outcome::new(movements).audited(entry))
}
