use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::{Span, instrument};

use stockledger_core::{Aggregate, DomainError};
use stockledger_inventory::{
    AdjustStock, InventoryMovement, Product, ProductCommand, ProductEvent, ProductId,
    ProductSnapshot,
};

use super::{LedgerEngine, Outcome, RequestContext, decided};
use crate::audit::AuditNotifier;
use crate::error::LedgerError;
use crate::store::{LedgerStore, LedgerTx};

/// Products locked for one unit of work.
///
/// Rows are locked in ascending id order so two operations over overlapping
/// product sets can never wait on each other in a cycle. Commands run against
/// the locked rows one after another, so a later line sees the quantity the
/// earlier lines left behind.
pub(crate) struct LockedProducts {
    products: BTreeMap<ProductId, Product>,
    touched: BTreeSet<ProductId>,
    movements: Vec<InventoryMovement>,
}

impl LockedProducts {
    pub(crate) async fn lock<T>(
        tx: &mut T,
        ids: impl IntoIterator<Item = ProductId>,
    ) -> Result<Self, LedgerError>
    where
        T: LedgerTx,
    {
        let ids: BTreeSet<ProductId> = ids.into_iter().collect();
        let mut products = BTreeMap::new();
        for id in ids {
            let snapshot = tx
                .lock_product(id)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("Product with ID {id}")))?;
            products.insert(id, Product::from_snapshot(snapshot));
        }
        Ok(Self {
            products,
            touched: BTreeSet::new(),
            movements: Vec::new(),
        })
    }

    pub(crate) fn get(&self, id: ProductId) -> Option<&Product> {
        self.products.get(&id)
    }

    /// Run one command against a locked product and record its movements.
    pub(crate) fn execute(
        &mut self,
        command: &ProductCommand,
    ) -> Result<Vec<ProductEvent>, LedgerError> {
        let id = command.product_id();
        let product = self
            .products
            .get_mut(&id)
            .ok_or_else(|| DomainError::invariant(format!("product {id} was not locked")))?;
        let events = product.execute(command)?;
        for event in &events {
            if let Some(moved) = event.as_stock_moved() {
                self.movements.push(InventoryMovement::from_event(moved));
            }
        }
        if !events.is_empty() {
            self.touched.insert(id);
        }
        Ok(events)
    }

    /// Write back every changed product and append the movements, returning them.
    pub(crate) async fn persist<T>(self, tx: &mut T) -> Result<Vec<InventoryMovement>, LedgerError>
    where
        T: LedgerTx,
    {
        for id in &self.touched {
            if let Some(product) = self.products.get(id) {
                tx.update_product(&product.snapshot()).await?;
            }
        }
        for movement in &self.movements {
            tx.append_movement(movement).await?;
        }
        Ok(self.movements)
    }
}

impl<S, N> LedgerEngine<S, N>
where
    S: LedgerStore,
    N: AuditNotifier,
{
    /// Set a product's quantity by manual correction.
    ///
    /// Returns the movement written, or `None` when the quantity already
    /// matched (nothing is written or audited).
    #[instrument(
        skip(self, ctx, product_id, notes),
        fields(product_id = %product_id, delta = tracing::field::Empty),
        err
    )]
    pub async fn adjust_stock(
        &self,
        ctx: &RequestContext,
        product_id: ProductId,
        new_quantity: i64,
        notes: Option<String>,
    ) -> Result<Option<InventoryMovement>, LedgerError> {
        if new_quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative").into());
        }

        let mut tx = self.begin().await?;
        let outcome = adjust_in(&mut tx, ctx, product_id, new_quantity, notes).await;
        self.settle(tx, outcome).await
    }
}

async fn adjust_in<T>(
    tx: &mut T,
    ctx: &RequestContext,
    product_id: ProductId,
    new_quantity: i64,
    notes: Option<String>,
) -> Result<Outcome<Option<InventoryMovement>>, LedgerError>
where
    T: LedgerTx,
{
    let mut stock = LockedProducts::lock(tx, [product_id]).await?;
    let before: Option<ProductSnapshot> = stock.get(product_id).map(Product::snapshot);

    let events = stock.execute(&ProductCommand::AdjustStock(AdjustStock {
        product_id,
        new_quantity,
        notes,
        actor: ctx.actor,
        occurred_at: Utc::now(),
    }))?;
    let after = stock.get(product_id).map(Product::snapshot);

    let movement = stock.persist(tx).await?.into_iter().next();
    let Some(movement) = movement else {
        return Ok(Outcome::new(None));
    };
    Span::current().record("delta", movement.movement_type.signed(movement.quantity));

    let entry = ctx
        .audit(decided(&events)?, "product", product_id.0)
        .with_old(&before)
        .with_new(&after);
    Ok(Outcome::new(Some(movement)).audited(entry))
}
