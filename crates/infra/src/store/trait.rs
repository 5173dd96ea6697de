use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::{AggregateId, DocumentKind, Money};
use stockledger_inventory::{InventoryMovement, MovementFilter, ProductId, ProductSnapshot};
use stockledger_invoicing::{InvoiceId, InvoiceSnapshot};
use stockledger_parties::{CustomerId, CustomerSnapshot, Vendor, VendorId};
use stockledger_payments::Payment;
use stockledger_purchasing::{PurchaseId, PurchaseSnapshot};

/// Storage-level failure.
///
/// None of these are business rejections; the engine surfaces all of them as
/// infrastructure failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded into its domain shape.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Serialization failure, deadlock, or a lost race on a unique key.
    #[error("transaction conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Whether retrying the whole unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Unavailable(_))
    }
}

/// Page request for list queries. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: 50 }
    }
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 500;

    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(50).clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// A movement row resolved with the product it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRow {
    #[serde(flatten)]
    pub movement: InventoryMovement,
    pub product_name: String,
    pub sku: String,
}

/// One page of movements, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPage {
    pub rows: Vec<MovementRow>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
}

impl MovementPage {
    pub fn new(rows: Vec<MovementRow>, pagination: Pagination, total: u64) -> Self {
        let limit = u64::from(pagination.limit.max(1));
        let total_pages = u32::try_from(total.div_ceil(limit)).unwrap_or(u32::MAX);
        Self {
            rows,
            page: pagination.page,
            limit: pagination.limit,
            total,
            total_pages,
        }
    }
}

/// The relational store the ledger engine runs against.
///
/// Reads on the store itself are non-locking snapshots for query paths. Every
/// mutation goes through a [`LedgerTx`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTx;

    /// Open a unit of work.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn product(&self, id: ProductId) -> Result<Option<ProductSnapshot>, StoreError>;

    async fn purchase(&self, id: PurchaseId) -> Result<Option<PurchaseSnapshot>, StoreError>;

    async fn invoice(&self, id: InvoiceId) -> Result<Option<InvoiceSnapshot>, StoreError>;

    async fn customer(&self, id: CustomerId) -> Result<Option<CustomerSnapshot>, StoreError>;

    /// Payment rows for one order, in insertion order.
    async fn payments(
        &self,
        kind: DocumentKind,
        order_id: AggregateId,
    ) -> Result<Vec<Payment>, StoreError>;

    /// Filtered movements, newest first.
    async fn list_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError>;

    /// Active products with `quantity <= reorder_level`, in no particular order.
    async fn low_stock(&self) -> Result<Vec<ProductSnapshot>, StoreError>;
}

/// One atomic unit of work.
///
/// `lock_*` reads take a row lock (or equivalent) held until `commit` or
/// `rollback`. Nothing written through a transaction is visible to other
/// transactions before `commit`; dropping a transaction without committing
/// discards its writes.
#[async_trait]
pub trait LedgerTx: Send {
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<ProductSnapshot>, StoreError>;

    async fn product_id_by_sku(&mut self, sku: &str) -> Result<Option<ProductId>, StoreError>;

    async fn insert_product(&mut self, product: &ProductSnapshot) -> Result<(), StoreError>;

    async fn update_product(&mut self, product: &ProductSnapshot) -> Result<(), StoreError>;

    /// Delete the product together with its movement history.
    async fn delete_product(&mut self, id: ProductId) -> Result<(), StoreError>;

    /// Invoice and purchase line items that name this product.
    async fn product_line_references(&mut self, id: ProductId) -> Result<u64, StoreError>;

    /// Movements are append-only.
    async fn append_movement(&mut self, movement: &InventoryMovement) -> Result<(), StoreError>;

    async fn lock_purchase(&mut self, id: PurchaseId) -> Result<Option<PurchaseSnapshot>, StoreError>;

    /// Insert the purchase header and its items.
    async fn insert_purchase(&mut self, purchase: &PurchaseSnapshot) -> Result<(), StoreError>;

    /// Update the mutable header fields; items never change.
    async fn update_purchase(&mut self, purchase: &PurchaseSnapshot) -> Result<(), StoreError>;

    /// Delete the purchase together with its items.
    async fn delete_purchase(&mut self, id: PurchaseId) -> Result<(), StoreError>;

    async fn lock_invoice(&mut self, id: InvoiceId) -> Result<Option<InvoiceSnapshot>, StoreError>;

    async fn insert_invoice(&mut self, invoice: &InvoiceSnapshot) -> Result<(), StoreError>;

    async fn update_invoice(&mut self, invoice: &InvoiceSnapshot) -> Result<(), StoreError>;

    async fn delete_invoice(&mut self, id: InvoiceId) -> Result<(), StoreError>;

    async fn lock_customer(&mut self, id: CustomerId) -> Result<Option<CustomerSnapshot>, StoreError>;

    /// Every customer, locked, ordered by id.
    async fn lock_all_customers(&mut self) -> Result<Vec<CustomerSnapshot>, StoreError>;

    async fn insert_customer(&mut self, customer: &CustomerSnapshot) -> Result<(), StoreError>;

    async fn update_customer(&mut self, customer: &CustomerSnapshot) -> Result<(), StoreError>;

    /// SUM(total - paid, floored at zero) per customer over invoices not yet `paid`.
    async fn outstanding_by_customer(&mut self) -> Result<HashMap<CustomerId, Money>, StoreError>;

    async fn vendor(&mut self, id: VendorId) -> Result<Option<Vendor>, StoreError>;

    async fn insert_vendor(&mut self, vendor: &Vendor) -> Result<(), StoreError>;

    async fn payments_for(
        &mut self,
        kind: DocumentKind,
        order_id: AggregateId,
    ) -> Result<Vec<Payment>, StoreError>;

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError>;

    /// Atomically advance the per-(series, year) counter and return the new value.
    async fn next_document_sequence(
        &mut self,
        kind: DocumentKind,
        year: i32,
    ) -> Result<u32, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
