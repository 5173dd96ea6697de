//! Customer balance reconciliation.
//!
//! `outstanding_balance` is a cache maintained incrementally by sales,
//! payments and reversals. This job recomputes it from the invoices
//! (SUM(total - paid) over invoices not yet paid) and reports, and optionally
//! rewrites, every customer whose cache has drifted.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use stockledger_core::{Aggregate, Money};
use stockledger_parties::{
    AdjustOutstandingBalance, BalanceChangeReason, Customer, CustomerCommand, CustomerId,
};

use super::{LedgerEngine, Outcome, RequestContext, decided};
use crate::audit::AuditNotifier;
use crate::error::LedgerError;
use crate::store::{LedgerStore, LedgerTx};

/// One customer whose cached balance disagrees with its invoices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDrift {
    pub customer_id: CustomerId,
    pub name: String,
    pub cached: Money,
    pub expected: Money,
    /// `cached - expected`.
    pub drift: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub customers_checked: usize,
    pub drifts: Vec<BalanceDrift>,
    /// Whether the drifted caches were overwritten with the expected values.
    pub rewritten: bool,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.drifts.is_empty()
    }
}

impl<S, N> LedgerEngine<S, N>
where
    S: LedgerStore,
    N: AuditNotifier,
{
    /// Compare every cached balance against its invoices; with `rewrite`,
    /// correct the drifted ones in the same transaction.
    #[instrument(skip(self, ctx), err)]
    pub async fn reconcile_customer_balances(
        &self,
        ctx: &RequestContext,
        rewrite: bool,
    ) -> Result<ReconciliationReport, LedgerError> {
        let mut tx = self.begin().await?;
        let outcome = reconcile_in(&mut tx, ctx, rewrite).await;
        let report = self.settle(tx, outcome).await?;

        if report.is_clean() {
            info!(customers = report.customers_checked, "customer balances consistent");
        } else {
            warn!(
                customers = report.customers_checked,
                drifted = report.drifts.len(),
                rewritten = report.rewritten,
                "customer balance drift detected"
            );
        }
        Ok(report)
    }
}

async fn reconcile_in<T>(
    tx: &mut T,
    ctx: &RequestContext,
    rewrite: bool,
) -> Result<Outcome<ReconciliationReport>, LedgerError>
where
    T: LedgerTx,
{
    let customers = tx.lock_all_customers().await?;
    let expected_by_customer = tx.outstanding_by_customer().await?;

    let mut report = ReconciliationReport {
        customers_checked: customers.len(),
        drifts: Vec::new(),
        rewritten: false,
    };
    let mut audit = Vec::new();

    for snapshot in customers {
        let expected = expected_by_customer
            .get(&snapshot.id)
            .copied()
            .unwrap_or(Money::ZERO);
        let cached = snapshot.outstanding_balance;
        if cached == expected {
            continue;
        }

        report.drifts.push(BalanceDrift {
            customer_id: snapshot.id,
            name: snapshot.name.clone(),
            cached,
            expected,
            drift: cached - expected,
        });
        if !rewrite {
            continue;
        }

        let customer_id = snapshot.id;
        let mut customer = Customer::from_snapshot(snapshot.clone());
        let events = customer.execute(&CustomerCommand::AdjustOutstandingBalance(
            AdjustOutstandingBalance {
                customer_id,
                delta: expected - cached,
                reason: BalanceChangeReason::Reconciliation,
                occurred_at: Utc::now(),
            },
        ))?;
        let after = customer.snapshot();
        tx.update_customer(&after).await?;
        audit.push(
            ctx.audit(decided(&events)?, "customer", customer_id.0)
                .with_old(&snapshot)
                .with_new(&after),
        );
    }

    report.rewritten = rewrite && !report.drifts.is_empty();
    let mut outcome = Outcome::new(report);
    for entry in audit {
        outcome = outcome.audited(entry);
    }
    Ok(outcome)
}
