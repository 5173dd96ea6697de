//! Stock ledger engine and payment reconciliation.
//!
//! Every operation is one unit of work against a [`LedgerStore`]:
//!
//! ```text
//! request
//!   ↓
//! 1. Validate the request shape (no transaction yet)
//!   ↓
//! 2. Begin a transaction
//!   ↓
//! 3. Lock rows: order, then products in ascending id order, then customer
//!   ↓
//! 4. Ask the aggregates to decide; apply the decided events in memory
//!   ↓
//! 5. Write rows and append movements / payments
//!   ↓
//! 6. Commit (or roll back on any error)
//!   ↓
//! 7. Hand audit entries to the notifier; failures are logged and dropped
//! ```
//!
//! Business rejections surface as [`LedgerError::Rejected`] or
//! [`LedgerError::NotFound`]; storage failures as
//! [`LedgerError::Infrastructure`]. In every error case nothing was written.

mod catalog;
mod payments;
mod purchases;
mod queries;
mod reconcile;
mod sales;
mod stock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use stockledger_core::{AggregateId, DocumentKind, DomainError, Event, UserId};
use stockledger_invoicing::InvoiceId;
use stockledger_purchasing::PurchaseId;

use crate::audit::{AuditEntry, AuditNotifier, RequestMeta};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::store::{LedgerStore, LedgerTx};

pub use catalog::{NewCustomer, NewProduct, NewVendor};
pub use purchases::PurchaseDraft;
pub use reconcile::{BalanceDrift, ReconciliationReport};
pub use sales::SaleDraft;

/// Who is asking, and from where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub actor: UserId,
    pub request: Option<RequestMeta>,
}

impl RequestContext {
    pub fn new(actor: UserId) -> Self {
        Self {
            actor,
            request: None,
        }
    }

    pub fn with_request(mut self, request: RequestMeta) -> Self {
        self.request = Some(request);
        self
    }

    /// Audit entry for a decided event; the event's type is the action name.
    pub(crate) fn audit<E: Event>(
        &self,
        event: &E,
        entity_type: &str,
        entity_id: AggregateId,
    ) -> AuditEntry {
        AuditEntry::new(self.actor, event.event_type(), entity_type, entity_id)
            .with_request(self.request.clone())
    }
}

/// The first event a command decided, which names the operation.
pub(crate) fn decided<E>(events: &[E]) -> Result<&E, LedgerError> {
    events
        .first()
        .ok_or_else(|| LedgerError::from(DomainError::invariant("command decided no events")))
}

/// An order that payments are recorded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum OrderRef {
    Purchase(PurchaseId),
    Invoice(InvoiceId),
}

impl OrderRef {
    pub fn kind(&self) -> DocumentKind {
        match self {
            OrderRef::Purchase(_) => DocumentKind::Purchase,
            OrderRef::Invoice(_) => DocumentKind::Invoice,
        }
    }

    pub fn aggregate_id(&self) -> AggregateId {
        match self {
            OrderRef::Purchase(id) => id.0,
            OrderRef::Invoice(id) => id.0,
        }
    }
}

/// What a unit of work produced: the caller's value plus the audit entries to
/// publish once it has committed.
pub(crate) struct Outcome<T> {
    value: T,
    audit: Vec<AuditEntry>,
}

impl<T> Outcome<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            value,
            audit: Vec::new(),
        }
    }

    pub(crate) fn audited(mut self, entry: AuditEntry) -> Self {
        self.audit.push(entry);
        self
    }
}

/// The ledger's command surface.
pub struct LedgerEngine<S, N> {
    store: S,
    audit: N,
    config: LedgerConfig,
}

impl<S, N> LedgerEngine<S, N>
where
    S: LedgerStore,
    N: AuditNotifier,
{
    pub fn new(store: S, audit: N, config: LedgerConfig) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    async fn begin(&self) -> Result<S::Tx, LedgerError> {
        Ok(self.store.begin().await?)
    }

    /// Commit on success, roll back on failure, then publish audit entries.
    async fn settle<T>(
        &self,
        tx: S::Tx,
        outcome: Result<Outcome<T>, LedgerError>,
    ) -> Result<T, LedgerError> {
        match outcome {
            Ok(Outcome { value, audit }) => {
                tx.commit().await?;
                self.publish(audit).await;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed; transaction discarded");
                }
                Err(err)
            }
        }
    }

    async fn publish(&self, entries: Vec<AuditEntry>) {
        for entry in entries {
            let action = entry.action.clone();
            if let Err(err) = self.audit.notify(entry).await {
                warn!(%action, error = %err, "audit notifier failed; entry dropped");
            }
        }
    }
}
