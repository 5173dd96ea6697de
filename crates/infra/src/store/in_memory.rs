use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use stockledger_core::{AggregateId, DocumentKind, Money};
use stockledger_inventory::{InventoryMovement, MovementFilter, ProductId, ProductSnapshot};
use stockledger_invoicing::{InvoiceId, InvoiceSnapshot};
use stockledger_parties::{CustomerId, CustomerSnapshot, Vendor, VendorId};
use stockledger_payments::Payment;
use stockledger_purchasing::{PurchaseId, PurchaseSnapshot};

use super::r#trait::{LedgerStore, LedgerTx, MovementPage, MovementRow, Pagination, StoreError};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    products: BTreeMap<ProductId, ProductSnapshot>,
    purchases: HashMap<PurchaseId, PurchaseSnapshot>,
    invoices: HashMap<InvoiceId, InvoiceSnapshot>,
    customers: BTreeMap<CustomerId, CustomerSnapshot>,
    vendors: HashMap<VendorId, Vendor>,
    payments: Vec<Payment>,
    movements: Vec<InventoryMovement>,
    counters: HashMap<(DocumentKind, i32), u32>,
}

impl LedgerState {
    fn payments_for(&self, kind: DocumentKind, order_id: AggregateId) -> Vec<Payment> {
        self.payments
            .iter()
            .filter(|p| p.order_kind == kind && p.order_id == order_id)
            .cloned()
            .collect()
    }
}

/// In-memory ledger store.
///
/// Intended for tests/dev. A transaction holds the store-wide lock for its
/// whole lifetime, which makes every unit of work serializable, and writes
/// into a private copy that replaces the committed state only on `commit`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit` fail with [`StoreError::Unavailable`].
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Every movement ever appended, oldest first.
    pub async fn movements(&self) -> Vec<InventoryMovement> {
        self.state.lock().await.movements.clone()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let work = guard.clone();
        Ok(InMemoryTx {
            guard,
            work,
            fail_commit: Arc::clone(&self.fail_next_commit),
        })
    }

    async fn product(&self, id: ProductId) -> Result<Option<ProductSnapshot>, StoreError> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn purchase(&self, id: PurchaseId) -> Result<Option<PurchaseSnapshot>, StoreError> {
        Ok(self.state.lock().await.purchases.get(&id).cloned())
    }

    async fn invoice(&self, id: InvoiceId) -> Result<Option<InvoiceSnapshot>, StoreError> {
        Ok(self.state.lock().await.invoices.get(&id).cloned())
    }

    async fn customer(&self, id: CustomerId) -> Result<Option<CustomerSnapshot>, StoreError> {
        Ok(self.state.lock().await.customers.get(&id).cloned())
    }

    async fn payments(
        &self,
        kind: DocumentKind,
        order_id: AggregateId,
    ) -> Result<Vec<Payment>, StoreError> {
        Ok(self.state.lock().await.payments_for(kind, order_id))
    }

    async fn list_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        let state = self.state.lock().await;

        let mut matching: Vec<&InventoryMovement> =
            state.movements.iter().filter(|m| filter.matches(m)).collect();
        // Newest first; ties keep the later append first.
        matching.reverse();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let offset = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);
        let rows = matching
            .into_iter()
            .skip(offset)
            .take(pagination.limit as usize)
            .map(|m| {
                let product = state.products.get(&m.product_id);
                MovementRow {
                    movement: m.clone(),
                    product_name: product.map(|p| p.name.clone()).unwrap_or_default(),
                    sku: product.map(|p| p.sku.clone()).unwrap_or_default(),
                }
            })
            .collect();

        Ok(MovementPage::new(rows, pagination, total))
    }

    async fn low_stock(&self) -> Result<Vec<ProductSnapshot>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .products
            .values()
            .filter(|p| p.active && p.quantity <= p.reorder_level)
            .cloned()
            .collect())
    }
}

/// Unit of work over [`InMemoryLedgerStore`].
pub struct InMemoryTx {
    guard: OwnedMutexGuard<LedgerState>,
    work: LedgerState,
    fail_commit: Arc<AtomicBool>,
}

fn missing(what: &str, id: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("{what} {id} does not exist"))
}

#[async_trait]
impl LedgerTx for InMemoryTx {
    async fn lock_product(&mut self, id: ProductId) -> Result<Option<ProductSnapshot>, StoreError> {
        Ok(self.work.products.get(&id).cloned())
    }

    async fn product_id_by_sku(&mut self, sku: &str) -> Result<Option<ProductId>, StoreError> {
        Ok(self
            .work
            .products
            .values()
            .find(|p| p.sku == sku)
            .map(|p| p.id))
    }

    async fn insert_product(&mut self, product: &ProductSnapshot) -> Result<(), StoreError> {
        if self.work.products.values().any(|p| p.sku == product.sku) {
            return Err(StoreError::Conflict(format!("sku {} already exists", product.sku)));
        }
        if self.work.products.contains_key(&product.id) {
            return Err(StoreError::Conflict(format!("product {} already exists", product.id)));
        }
        self.work.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn update_product(&mut self, product: &ProductSnapshot) -> Result<(), StoreError> {
        let row = self
            .work
            .products
            .get_mut(&product.id)
            .ok_or_else(|| missing("product", product.id))?;
        *row = product.clone();
        Ok(())
    }

    async fn delete_product(&mut self, id: ProductId) -> Result<(), StoreError> {
        self.work
            .products
            .remove(&id)
            .ok_or_else(|| missing("product", id))?;
        self.work.movements.retain(|m| m.product_id != id);
        Ok(())
    }

    async fn product_line_references(&mut self, id: ProductId) -> Result<u64, StoreError> {
        let invoice_lines = self
            .work
            .invoices
            .values()
            .flat_map(|i| &i.items)
            .filter(|item| item.product_id == id)
            .count();
        let purchase_lines = self
            .work
            .purchases
            .values()
            .flat_map(|p| &p.items)
            .filter(|item| item.product_id == id)
            .count();
        Ok((invoice_lines + purchase_lines) as u64)
    }

    async fn append_movement(&mut self, movement: &InventoryMovement) -> Result<(), StoreError> {
        if !self.work.products.contains_key(&movement.product_id) {
            return Err(missing("product", movement.product_id));
        }
        self.work.movements.push(movement.clone());
        Ok(())
    }

    async fn lock_purchase(&mut self, id: PurchaseId) -> Result<Option<PurchaseSnapshot>, StoreError> {
        Ok(self.work.purchases.get(&id).cloned())
    }

    async fn insert_purchase(&mut self, purchase: &PurchaseSnapshot) -> Result<(), StoreError> {
        if self
            .work
            .purchases
            .values()
            .any(|p| p.purchase_number == purchase.purchase_number)
        {
            return Err(StoreError::Conflict(format!(
                "purchase number {} already exists",
                purchase.purchase_number
            )));
        }
        self.work.purchases.insert(purchase.id, purchase.clone());
        Ok(())
    }

    async fn update_purchase(&mut self, purchase: &PurchaseSnapshot) -> Result<(), StoreError> {
        let row = self
            .work
            .purchases
            .get_mut(&purchase.id)
            .ok_or_else(|| missing("purchase", purchase.id))?;
        *row = purchase.clone();
        Ok(())
    }

    async fn delete_purchase(&mut self, id: PurchaseId) -> Result<(), StoreError> {
        self.work
            .purchases
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| missing("purchase", id))
    }

    async fn lock_invoice(&mut self, id: InvoiceId) -> Result<Option<InvoiceSnapshot>, StoreError> {
        Ok(self.work.invoices.get(&id).cloned())
    }

    async fn insert_invoice(&mut self, invoice: &InvoiceSnapshot) -> Result<(), StoreError> {
        if self
            .work
            .invoices
            .values()
            .any(|i| i.invoice_number == invoice.invoice_number)
        {
            return Err(StoreError::Conflict(format!(
                "invoice number {} already exists",
                invoice.invoice_number
            )));
        }
        self.work.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn update_invoice(&mut self, invoice: &InvoiceSnapshot) -> Result<(), StoreError> {
        let row = self
            .work
            .invoices
            .get_mut(&invoice.id)
            .ok_or_else(|| missing("invoice", invoice.id))?;
        *row = invoice.clone();
        Ok(())
    }

    async fn delete_invoice(&mut self, id: InvoiceId) -> Result<(), StoreError> {
        self.work
            .invoices
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| missing("invoice", id))
    }

    async fn lock_customer(&mut self, id: CustomerId) -> Result<Option<CustomerSnapshot>, StoreError> {
        Ok(self.work.customers.get(&id).cloned())
    }

    async fn lock_all_customers(&mut self) -> Result<Vec<CustomerSnapshot>, StoreError> {
        Ok(self.work.customers.values().cloned().collect())
    }

    async fn insert_customer(&mut self, customer: &CustomerSnapshot) -> Result<(), StoreError> {
        if self.work.customers.contains_key(&customer.id) {
            return Err(StoreError::Conflict(format!("customer {} already exists", customer.id)));
        }
        self.work.customers.insert(customer.id, customer.clone());
        Ok(())
    }

    async fn update_customer(&mut self, customer: &CustomerSnapshot) -> Result<(), StoreError> {
        let row = self
            .work
            .customers
            .get_mut(&customer.id)
            .ok_or_else(|| missing("customer", customer.id))?;
        *row = customer.clone();
        Ok(())
    }

    async fn outstanding_by_customer(&mut self) -> Result<HashMap<CustomerId, Money>, StoreError> {
        let mut sums: HashMap<CustomerId, Money> = HashMap::new();
        for invoice in self.work.invoices.values() {
            let Some(customer_id) = invoice.customer_id else {
                continue;
            };
            let sum = sums.entry(customer_id).or_default();
            *sum = sum.saturating_add(invoice.outstanding());
        }
        Ok(sums)
    }

    async fn vendor(&mut self, id: VendorId) -> Result<Option<Vendor>, StoreError> {
        Ok(self.work.vendors.get(&id).cloned())
    }

    async fn insert_vendor(&mut self, vendor: &Vendor) -> Result<(), StoreError> {
        if self.work.vendors.contains_key(&vendor.id) {
            return Err(StoreError::Conflict(format!("vendor {} already exists", vendor.id)));
        }
        self.work.vendors.insert(vendor.id, vendor.clone());
        Ok(())
    }

    async fn payments_for(
        &mut self,
        kind: DocumentKind,
        order_id: AggregateId,
    ) -> Result<Vec<Payment>, StoreError> {
        Ok(self.work.payments_for(kind, order_id))
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.work.payments.push(payment.clone());
        Ok(())
    }

    async fn next_document_sequence(
        &mut self,
        kind: DocumentKind,
        year: i32,
    ) -> Result<u32, StoreError> {
        let counter = self.work.counters.entry((kind, year)).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn commit(self) -> Result<(), StoreError> {
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }
        let InMemoryTx { mut guard, work, .. } = self;
        *guard = work;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = InMemoryLedgerStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            assert_eq!(tx.next_document_sequence(DocumentKind::Invoice, 2024).await.unwrap(), 1);
        }
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_document_sequence(DocumentKind::Invoice, 2024).await.unwrap(), 1);
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_document_sequence(DocumentKind::Invoice, 2024).await.unwrap(), 2);
        assert_eq!(tx.next_document_sequence(DocumentKind::Invoice, 2025).await.unwrap(), 1);
        assert_eq!(tx.next_document_sequence(DocumentKind::Purchase, 2024).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn injected_commit_failure_discards_writes_once() {
        let store = InMemoryLedgerStore::new();
        store.fail_next_commit();

        let mut tx = store.begin().await.unwrap();
        tx.next_document_sequence(DocumentKind::Purchase, 2024).await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(err.is_retryable());

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_document_sequence(DocumentKind::Purchase, 2024).await.unwrap(), 1);
        tx.commit().await.unwrap();
    }
}
