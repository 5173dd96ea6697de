//! Catalog entry: products, customers and vendors the orders reference.
//!
//! Product edits never touch quantity; that only moves through the stock
//! commands. A product can be deleted only while no order line names it, and
//! its movement history is deleted with it in the same transaction.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{Span, instrument};

use stockledger_core::{Aggregate, DomainError, Money};
use stockledger_inventory::{
    DeleteProduct, InventoryMovement, Product, ProductChanges, ProductCommand, ProductEvent,
    ProductId, ProductSnapshot, RegisterProduct, UpdateProduct,
};
use stockledger_parties::{
    AdjustOutstandingBalance, BalanceChangeReason, ContactInfo, Customer, CustomerCommand,
    CustomerId, CustomerSnapshot, RegisterCustomer, RegisterVendor, Vendor, VendorId,
};

use super::{LedgerEngine, Outcome, RequestContext, decided};
use crate::audit::AuditNotifier;
use crate::error::LedgerError;
use crate::store::{LedgerStore, LedgerTx};

/// Catalog entry for a product. Unset thresholds take the configured defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub opening_quantity: i64,
    pub purchase_price: Money,
    pub selling_price: Money,
    pub reorder_level: Option<i64>,
    pub max_stock: Option<i64>,
    pub vendor_id: Option<VendorId>,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCustomer {
    pub name: String,
    #[serde(default)]
    pub contact: ContactInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVendor {
    pub name: String,
    #[serde(default)]
    pub contact: ContactInfo,
}

impl<S, N> LedgerEngine<S, N>
where
    S: LedgerStore,
    N: AuditNotifier,
{
    /// Add a product; a non-zero opening quantity is written as one
    /// `stock_in` adjustment movement.
    #[instrument(skip(self, ctx, input), fields(sku = %input.sku), err)]
    pub async fn register_product(
        &self,
        ctx: &RequestContext,
        input: NewProduct,
    ) -> Result<ProductSnapshot, LedgerError> {
        let product_id = ProductId::generate();
        let mut product = Product::empty(product_id);
        let events = product.execute(&ProductCommand::RegisterProduct(RegisterProduct {
            product_id,
            sku: input.sku,
            name: input.name,
            opening_quantity: input.opening_quantity,
            purchase_price: input.purchase_price,
            selling_price: input.selling_price,
            reorder_level: input.reorder_level.unwrap_or(self.config.default_reorder_level),
            max_stock: input.max_stock.unwrap_or(self.config.default_max_stock),
            vendor_id: input.vendor_id,
            active: input.active,
            actor: ctx.actor,
            occurred_at: Utc::now(),
        }))?;
        let snapshot = product.snapshot();

        let mut tx = self.begin().await?;
        let outcome = register_product_in(&mut tx, ctx, snapshot, events).await;
        self.settle(tx, outcome).await
    }

    /// Edit a product's catalog fields. A changed SKU must stay unique.
    ///
    /// Returns the product as it now stands; an edit that changes nothing is
    /// neither written nor audited.
    #[instrument(skip(self, ctx, product_id, changes), fields(product_id = %product_id), err)]
    pub async fn update_product(
        &self,
        ctx: &RequestContext,
        product_id: ProductId,
        changes: ProductChanges,
    ) -> Result<ProductSnapshot, LedgerError> {
        let mut tx = self.begin().await?;
        let outcome = update_product_in(&mut tx, ctx, product_id, changes).await;
        self.settle(tx, outcome).await
    }

    /// Delete a product and its movement history.
    ///
    /// Refused while any invoice or purchase line names the product; reverse
    /// those orders first.
    #[instrument(
        skip(self, ctx, product_id),
        fields(product_id = %product_id, sku = tracing::field::Empty),
        err
    )]
    pub async fn delete_product(
        &self,
        ctx: &RequestContext,
        product_id: ProductId,
    ) -> Result<ProductSnapshot, LedgerError> {
        let mut tx = self.begin().await?;
        let outcome = delete_product_in(&mut tx, ctx, product_id).await;
        self.settle(tx, outcome).await
    }

    #[instrument(skip(self, ctx, input), err)]
    pub async fn register_customer(
        &self,
        ctx: &RequestContext,
        input: NewCustomer,
    ) -> Result<CustomerSnapshot, LedgerError> {
        let customer_id = CustomerId::generate();
        let mut customer = Customer::empty(customer_id);
        let events = customer.execute(&CustomerCommand::RegisterCustomer(RegisterCustomer {
            customer_id,
            name: input.name,
            contact: input.contact,
            actor: ctx.actor,
            occurred_at: Utc::now(),
        }))?;
        let snapshot = customer.snapshot();

        let mut tx = self.begin().await?;
        let outcome = async {
            tx.insert_customer(&snapshot).await?;
            let entry = ctx
                .audit(decided(&events)?, "customer", customer_id.0)
                .with_new(&snapshot);
            Ok::<_, LedgerError>(Outcome::new(snapshot).audited(entry))
        }
        .await;
        self.settle(tx, outcome).await
    }

    #[instrument(skip(self, ctx, input), err)]
    pub async fn register_vendor(
        &self,
        ctx: &RequestContext,
        input: NewVendor,
    ) -> Result<Vendor, LedgerError> {
        let registered = Vendor::register(&RegisterVendor {
            vendor_id: VendorId::generate(),
            name: input.name,
            contact: input.contact,
            actor: ctx.actor,
            occurred_at: Utc::now(),
        })?;

        let mut tx = self.begin().await?;
        let outcome = async {
            let vendor = registered.vendor.clone();
            tx.insert_vendor(&vendor).await?;
            let entry = ctx
                .audit(&registered, "vendor", vendor.id.0)
                .with_new(&vendor);
            Ok::<_, LedgerError>(Outcome::new(vendor).audited(entry))
        }
        .await;
        self.settle(tx, outcome).await
    }
}

async fn register_product_in<T>(
    tx: &mut T,
    ctx: &RequestContext,
    product: ProductSnapshot,
    events: Vec<ProductEvent>,
) -> Result<Outcome<ProductSnapshot>, LedgerError>
where
    T: LedgerTx,
{
    ensure_sku_free(tx, &product.sku, None).await?;
    ensure_vendor_exists(tx, product.vendor_id).await?;

    tx.insert_product(&product).await?;
    for moved in events.iter().filter_map(ProductEvent::as_stock_moved) {
        tx.append_movement(&InventoryMovement::from_event(moved)).await?;
    }

    let entry = ctx
        .audit(decided(&events)?, "product", product.id.0)
        .with_new(&product);
    Ok(Outcome::new(product).audited(entry))
}

async fn update_product_in<T>(
    tx: &mut T,
    ctx: &RequestContext,
    product_id: ProductId,
    changes: ProductChanges,
) -> Result<Outcome<ProductSnapshot>, LedgerError>
where
    T: LedgerTx,
{
    let before = lock_product(tx, product_id).await?;
    if let Some(sku) = &changes.sku {
        ensure_sku_free(tx, sku.trim(), Some(product_id)).await?;
    }
    if let Some(vendor_id) = changes.vendor_id {
        ensure_vendor_exists(tx, vendor_id).await?;
    }

    let mut product = Product::from_snapshot(before.clone());
    let events = product.execute(&ProductCommand::UpdateProduct(UpdateProduct {
        product_id,
        changes,
        actor: ctx.actor,
        occurred_at: Utc::now(),
    }))?;
    if events.is_empty() {
        return Ok(Outcome::new(before));
    }

    let after = product.snapshot();
    tx.update_product(&after).await?;

    let entry = ctx
        .audit(decided(&events)?, "product", product_id.0)
        .with_old(&before)
        .with_new(&after);
    Ok(Outcome::new(after).audited(entry))
}

async fn delete_product_in<T>(
    tx: &mut T,
    ctx: &RequestContext,
    product_id: ProductId,
) -> Result<Outcome<ProductSnapshot>, LedgerError>
where
    T: LedgerTx,
{
    let before = lock_product(tx, product_id).await?;
    let line_references = tx.product_line_references(product_id).await?;

    let mut product = Product::from_snapshot(before.clone());
    let events = product.execute(&ProductCommand::DeleteProduct(DeleteProduct {
        product_id,
        line_references,
        actor: ctx.actor,
        occurred_at: Utc::now(),
    }))?;
    Span::current().record("sku", before.sku.as_str());
    tx.delete_product(product_id).await?;

    let entry = ctx
        .audit(decided(&events)?, "product", product_id.0)
        .with_old(&before);
    Ok(Outcome::new(before).audited(entry))
}

async fn lock_product<T>(tx: &mut T, product_id: ProductId) -> Result<ProductSnapshot, LedgerError>
where
    T: LedgerTx,
{
    tx.lock_product(product_id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("Product with ID {product_id}")).into())
}

/// `Conflict` when another product already holds `sku`.
async fn ensure_sku_free<T>(
    tx: &mut T,
    sku: &str,
    owner: Option<ProductId>,
) -> Result<(), LedgerError>
where
    T: LedgerTx,
{
    match tx.product_id_by_sku(sku).await? {
        Some(holder) if Some(holder) != owner => {
            Err(DomainError::conflict(format!("Product with SKU {sku} already exists")).into())
        }
        _ => Ok(()),
    }
}

async fn ensure_vendor_exists<T>(tx: &mut T, vendor_id: Option<VendorId>) -> Result<(), LedgerError>
where
    T: LedgerTx,
{
    if let Some(vendor_id) = vendor_id {
        if tx.vendor(vendor_id).await?.is_none() {
            return Err(DomainError::not_found(format!("Vendor with ID {vendor_id}")).into());
        }
    }
    Ok(())
}

/// Move a customer's cached outstanding balance inside the current transaction.
///
/// Returns the balance after the change. A zero delta writes nothing.
pub(crate) async fn adjust_customer_balance<T>(
    tx: &mut T,
    customer_id: CustomerId,
    delta: Money,
    reason: BalanceChangeReason,
) -> Result<Money, LedgerError>
where
    T: LedgerTx,
{
    let snapshot = tx
        .lock_customer(customer_id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("Customer with ID {customer_id}")))?;
    let mut customer = Customer::from_snapshot(snapshot);
    let events = customer.execute(&CustomerCommand::AdjustOutstandingBalance(
        AdjustOutstandingBalance {
            customer_id,
            delta,
            reason,
            occurred_at: Utc::now(),
        },
    ))?;
    if !events.is_empty() {
        tx.update_customer(&customer.snapshot()).await?;
    }
    Ok(customer.outstanding_balance())
}
