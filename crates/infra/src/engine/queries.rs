//! Read paths. Non-locking snapshots; nothing here opens a transaction.

use std::cmp::Ordering;

use chrono::NaiveDate;
use tracing::instrument;

use stockledger_core::DomainError;
use stockledger_inventory::{MovementFilter, ProductId, ProductSnapshot};
use stockledger_invoicing::{Invoice, InvoiceDisplayStatus, InvoiceId, InvoiceSnapshot};
use stockledger_parties::{CustomerId, CustomerSnapshot};
use stockledger_purchasing::{PurchaseId, PurchaseSnapshot};

use super::LedgerEngine;
use crate::audit::AuditNotifier;
use crate::error::LedgerError;
use crate::store::{LedgerStore, MovementPage, Pagination};

impl<S, N> LedgerEngine<S, N>
where
    S: LedgerStore,
    N: AuditNotifier,
{
    pub async fn product(&self, id: ProductId) -> Result<ProductSnapshot, LedgerError> {
        self.store
            .product(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Product with ID {id}")).into())
    }

    pub async fn purchase(&self, id: PurchaseId) -> Result<PurchaseSnapshot, LedgerError> {
        self.store
            .purchase(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Purchase with ID {id}")).into())
    }

    pub async fn invoice(&self, id: InvoiceId) -> Result<InvoiceSnapshot, LedgerError> {
        self.store
            .invoice(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Invoice with ID {id}")).into())
    }

    pub async fn customer(&self, id: CustomerId) -> Result<CustomerSnapshot, LedgerError> {
        self.store
            .customer(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Customer with ID {id}")).into())
    }

    /// Movements matching `filter`, newest first, one page at a time.
    #[instrument(skip(self, filter), fields(page = pagination.page, limit = pagination.limit), err)]
    pub async fn list_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, LedgerError> {
        Ok(self.store.list_movements(filter, pagination).await?)
    }

    /// Active products at or below their reorder level, most depleted first.
    #[instrument(skip(self), err)]
    pub async fn low_stock(&self) -> Result<Vec<ProductSnapshot>, LedgerError> {
        let mut products = self.store.low_stock().await?;
        products.sort_by(|a, b| depletion(a, b).then_with(|| a.name.cmp(&b.name)));
        Ok(products)
    }

    /// `paid | overdue | partial | pending` as of `today`.
    pub async fn invoice_display_status(
        &self,
        id: InvoiceId,
        today: NaiveDate,
    ) -> Result<InvoiceDisplayStatus, LedgerError> {
        let snapshot = self.invoice(id).await?;
        Ok(Invoice::from_snapshot(snapshot).display_status(today))
    }
}

/// Compare `quantity / reorder_level` without dividing.
///
/// A zero reorder level only reaches here with zero quantity, which ranks as
/// fully depleted.
fn depletion(a: &ProductSnapshot, b: &ProductSnapshot) -> Ordering {
    fn ratio(p: &ProductSnapshot) -> (i128, i128) {
        if p.reorder_level <= 0 {
            (0, 1)
        } else {
            (i128::from(p.quantity.max(0)), i128::from(p.reorder_level))
        }
    }
    let (qa, ra) = ratio(a);
    let (qb, rb) = ratio(b);
    (qa * rb).cmp(&(qb * ra))
}
