//! Payment reconciliation.
//!
//! `record_payment` is the routine path: it appends a payment row and then
//! recomputes the order's paid amount from every row it has, so a retried or
//! duplicated request can never leave the stored sum out of step with the
//! rows. `set_payment_status_direct` is the administrative override: it
//! writes the paid amount and status without a backing row and is always
//! audited as `payment.override`.

use chrono::Utc;
use tracing::{Span, instrument};

use stockledger_core::{Aggregate, DomainError, Money};
use stockledger_invoicing::{self as invoicing, Invoice, InvoiceCommand, InvoiceId};
use stockledger_parties::BalanceChangeReason;
use stockledger_payments::{
    NewPayment, Payment, PaymentOverride, PaymentSource, PaymentState, PaymentSummary,
    ensure_within_pending,
};
use stockledger_purchasing::{self as purchasing, Purchase, PurchaseCommand, PurchaseId};

use super::catalog::adjust_customer_balance;
use super::{LedgerEngine, OrderRef, Outcome, RequestContext, decided};
use crate::audit::AuditNotifier;
use crate::error::LedgerError;
use crate::store::{LedgerStore, LedgerTx};

impl<S, N> LedgerEngine<S, N>
where
    S: LedgerStore,
    N: AuditNotifier,
{
    /// Append a payment and recompute the order's paid amount from its rows.
    #[instrument(
        skip(self, ctx, order, input),
        fields(order = ?order, amount = %input.amount, total_paid = tracing::field::Empty),
        err
    )]
    pub async fn record_payment(
        &self,
        ctx: &RequestContext,
        order: OrderRef,
        input: NewPayment,
    ) -> Result<PaymentSummary, LedgerError> {
        input.validate()?;
        let tolerance = self.config.overpayment_tolerance;

        let mut tx = self.begin().await?;
        let outcome = match order {
            OrderRef::Invoice(id) => {
                record_invoice_payment(&mut tx, ctx, id, &input, tolerance).await
            }
            OrderRef::Purchase(id) => {
                record_purchase_payment(&mut tx, ctx, id, &input, tolerance).await
            }
        };
        let summary = self.settle(tx, outcome).await?;
        Span::current().record("total_paid", tracing::field::display(summary.total_paid));
        Ok(summary)
    }

    /// Administrative override of an order's paid amount and status.
    ///
    /// No payment row is written, so the stored amount may disagree with the
    /// sum of rows afterwards; the next recorded payment recomputes from the
    /// rows again.
    #[instrument(
        skip(self, ctx, order, input),
        fields(order = ?order, amount_paid = %input.amount_paid),
        err
    )]
    pub async fn set_payment_status_direct(
        &self,
        ctx: &RequestContext,
        order: OrderRef,
        input: PaymentOverride,
    ) -> Result<PaymentState, LedgerError> {
        if input.amount_paid.is_negative() {
            return Err(DomainError::validation("amount paid cannot be negative").into());
        }

        let mut tx = self.begin().await?;
        let outcome = match order {
            OrderRef::Invoice(id) => override_invoice_payment(&mut tx, ctx, id, &input).await,
            OrderRef::Purchase(id) => override_purchase_payment(&mut tx, ctx, id, &input).await,
        };
        self.settle(tx, outcome).await
    }

    /// `{ total_amount, total_paid, pending }` plus the rows, newest first.
    #[instrument(skip(self), err)]
    pub async fn payment_summary(&self, order: OrderRef) -> Result<PaymentSummary, LedgerError> {
        let total = match order {
            OrderRef::Invoice(id) => self
                .store
                .invoice(id)
                .await?
                .map(|i| i.totals.total_amount)
                .ok_or_else(|| DomainError::not_found(format!("Invoice with ID {id}")))?,
            OrderRef::Purchase(id) => self
                .store
                .purchase(id)
                .await?
                .map(|p| p.totals.total_amount)
                .ok_or_else(|| DomainError::not_found(format!("Purchase with ID {id}")))?,
        };
        let payments = self.store.payments(order.kind(), order.aggregate_id()).await?;
        Ok(PaymentSummary::new(total, payments))
    }
}

/// Check the amount against the rows already recorded, then append the new row.
async fn append_payment<T>(
    tx: &mut T,
    ctx: &RequestContext,
    order: OrderRef,
    total: Money,
    input: &NewPayment,
    tolerance: Money,
) -> Result<(Payment, Vec<Payment>), LedgerError>
where
    T: LedgerTx,
{
    let mut rows = tx.payments_for(order.kind(), order.aggregate_id()).await?;
    let paid = PaymentState::from_payments(total, &rows).amount_paid;
    ensure_within_pending(input.amount, total, paid, tolerance)?;

    let payment = Payment::record(order.kind(), order.aggregate_id(), input, ctx.actor, Utc::now())?;
    tx.insert_payment(&payment).await?;
    rows.push(payment.clone());
    Ok((payment, rows))
}

async fn record_invoice_payment<T>(
    tx: &mut T,
    ctx: &RequestContext,
    invoice_id: InvoiceId,
    input: &NewPayment,
    tolerance: Money,
) -> Result<Outcome<PaymentSummary>, LedgerError>
where
    T: LedgerTx,
{
    let snapshot = tx
        .lock_invoice(invoice_id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("Invoice with ID {invoice_id}")))?;
    let owed_before = snapshot.outstanding();
    let mut invoice = Invoice::from_snapshot(snapshot);
    let total = invoice.total_amount();

    let (payment, rows) = append_payment(
        tx,
        ctx,
        OrderRef::Invoice(invoice_id),
        total,
        input,
        tolerance,
    )
    .await?;
    let events = invoice.execute(&InvoiceCommand::SetPaymentState(invoicing::SetPaymentState {
        invoice_id,
        state: PaymentState::from_payments(total, &rows),
        mode: None,
        source: PaymentSource::Recorded,
        actor: ctx.actor,
        occurred_at: payment.created_at,
    }))?;
    let after = invoice
        .snapshot()
        .ok_or_else(|| DomainError::invariant("invoice has no live state"))?;
    tx.update_invoice(&after).await?;

    if let Some(customer_id) = after.customer_id {
        adjust_customer_balance(
            tx,
            customer_id,
            after.outstanding() - owed_before,
            BalanceChangeReason::PaymentRecorded,
        )
        .await?;
    }

    let entry = ctx
        .audit(decided(&events)?, "invoice", invoice_id.0)
        .with_new(&payment);
    Ok(Outcome::new(PaymentSummary::new(total, rows)).audited(entry))
}

async fn record_purchase_payment<T>(
    tx: &mut T,
    ctx: &RequestContext,
    purchase_id: PurchaseId,
    input: &NewPayment,
    tolerance: Money,
) -> Result<Outcome<PaymentSummary>, LedgerError>
where
    T: LedgerTx,
{
    let snapshot = tx
        .lock_purchase(purchase_id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("Purchase with ID {purchase_id}")))?;
    let mut purchase = Purchase::from_snapshot(snapshot);
    let total = purchase.total_amount();

    let (payment, rows) = append_payment(
        tx,
        ctx,
        OrderRef::Purchase(purchase_id),
        total,
        input,
        tolerance,
    )
    .await?;
    let events = purchase.execute(&PurchaseCommand::SetPaymentState(purchasing::SetPaymentState {
        purchase_id,
        state: PaymentState::from_payments(total, &rows),
        mode: Some(payment.mode),
        source: PaymentSource::Recorded,
        actor: ctx.actor,
        occurred_at: payment.created_at,
    }))?;
    let after = purchase
        .snapshot()
        .ok_or_else(|| DomainError::invariant("purchase has no live state"))?;
    tx.update_purchase(&after).await?;

    let entry = ctx
        .audit(decided(&events)?, "purchase", purchase_id.0)
        .with_new(&payment);
    Ok(Outcome::new(PaymentSummary::new(total, rows)).audited(entry))
}

async fn override_invoice_payment<T>(
    tx: &mut T,
    ctx: &RequestContext,
    invoice_id: InvoiceId,
    input: &PaymentOverride,
) -> Result<Outcome<PaymentState>, LedgerError>
where
    T: LedgerTx,
{
    let before = tx
        .lock_invoice(invoice_id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("Invoice with ID {invoice_id}")))?;
    let mut invoice = Invoice::from_snapshot(before.clone());
    let state = input.resolve(invoice.total_amount())?;

    let events = invoice.execute(&InvoiceCommand::SetPaymentState(invoicing::SetPaymentState {
        invoice_id,
        state,
        mode: input.mode,
        source: PaymentSource::Override,
        actor: ctx.actor,
        occurred_at: Utc::now(),
    }))?;
    let after = invoice
        .snapshot()
        .ok_or_else(|| DomainError::invariant("invoice has no live state"))?;
    tx.update_invoice(&after).await?;

    if let Some(customer_id) = after.customer_id {
        adjust_customer_balance(
            tx,
            customer_id,
            after.outstanding() - before.outstanding(),
            BalanceChangeReason::PaymentOverride,
        )
        .await?;
    }

    let entry = ctx
        .audit(decided(&events)?, "invoice", invoice_id.0)
        .with_old(&before)
        .with_new(&after);
    Ok(Outcome::new(state).audited(entry))
}

async fn override_purchase_payment<T>(
    tx: &mut T,
    ctx: &RequestContext,
    purchase_id: PurchaseId,
    input: &PaymentOverride,
) -> Result<Outcome<PaymentState>, LedgerError>
where
    T: LedgerTx,
{
    let before = tx
        .lock_purchase(purchase_id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("Purchase with ID {purchase_id}")))?;
    let mut purchase = Purchase::from_snapshot(before.clone());
    let state = input.resolve(purchase.total_amount())?;

    let events = purchase.execute(&PurchaseCommand::SetPaymentState(purchasing::SetPaymentState {
        purchase_id,
        state,
        mode: input.mode,
        source: PaymentSource::Override,
        actor: ctx.actor,
        occurred_at: Utc::now(),
    }))?;
    let after = purchase
        .snapshot()
        .ok_or_else(|| DomainError::invariant("purchase has no live state"))?;
    tx.update_purchase(&after).await?;

    let entry = ctx
        .audit(decided(&events)?, "purchase", purchase_id.0)
        .with_old(&before)
        .with_new(&after);
    Ok(Outcome::new(state).audited(entry))
}
