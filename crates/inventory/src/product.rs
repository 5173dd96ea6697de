use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{Aggregate, AggregateRoot, DomainError, Event, Money, UserId};
use stockledger_parties::VendorId;

use crate::movement::{MovementReference, MovementType};

stockledger_core::typed_id!(
    /// Product identifier.
    ProductId
);

/// Persisted shape of a product row.
///
/// Stores load and save products through this struct; the aggregate keeps its
/// fields private so that quantity only changes through [`StockMoved`] events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub quantity: i64,
    pub purchase_price: Money,
    pub selling_price: Money,
    pub reorder_level: i64,
    pub max_stock: i64,
    pub vendor_id: Option<VendorId>,
    pub active: bool,
    pub version: u64,
}

/// Aggregate root: Product.
///
/// The only owner of `quantity`. Every quantity change is decided here and
/// described by a `StockMoved` event, which the engine persists as an
/// inventory movement row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    sku: String,
    name: String,
    quantity: i64,
    purchase_price: Money,
    selling_price: Money,
    reorder_level: i64,
    max_stock: i64,
    vendor_id: Option<VendorId>,
    active: bool,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-registered aggregate instance.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            sku: String::new(),
            name: String::new(),
            quantity: 0,
            purchase_price: Money::ZERO,
            selling_price: Money::ZERO,
            reorder_level: 0,
            max_stock: 0,
            vendor_id: None,
            active: false,
            version: 0,
            created: false,
        }
    }

    pub fn from_snapshot(s: ProductSnapshot) -> Self {
        Self {
            id: s.id,
            sku: s.sku,
            name: s.name,
            quantity: s.quantity,
            purchase_price: s.purchase_price,
            selling_price: s.selling_price,
            reorder_level: s.reorder_level,
            max_stock: s.max_stock,
            vendor_id: s.vendor_id,
            active: s.active,
            version: s.version,
            created: true,
        }
    }

    pub fn snapshot(&self) -> ProductSnapshot {
        ProductSnapshot {
            id: self.id,
            sku: self.sku.clone(),
            name: self.name.clone(),
            quantity: self.quantity,
            purchase_price: self.purchase_price,
            selling_price: self.selling_price,
            reorder_level: self.reorder_level,
            max_stock: self.max_stock,
            vendor_id: self.vendor_id,
            active: self.active,
            version: self.version,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn purchase_price(&self) -> Money {
        self.purchase_price
    }

    pub fn selling_price(&self) -> Money {
        self.selling_price
    }

    pub fn reorder_level(&self) -> i64 {
        self.reorder_level
    }

    pub fn max_stock(&self) -> i64 {
        self.max_stock
    }

    pub fn vendor_id(&self) -> Option<VendorId> {
        self.vendor_id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_registered(&self) -> bool {
        self.created
    }

    /// `quantity <= reorder_level` for an active product.
    pub fn is_low_stock(&self) -> bool {
        self.active && self.quantity <= self.reorder_level
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterProduct {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub opening_quantity: i64,
    pub purchase_price: Money,
    pub selling_price: Money,
    pub reorder_level: i64,
    pub max_stock: i64,
    pub vendor_id: Option<VendorId>,
    pub active: bool,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: IssueStock (sale). Rejected when it would take stock below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueStock {
    pub product_id: ProductId,
    pub quantity: i64,
    pub reference: MovementReference,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveStock (purchase receipt or sale reversal).
///
/// A `unit_cost` refreshes the product's purchase price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_cost: Option<Money>,
    pub reference: MovementReference,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: WithdrawStock (purchase reversal). Floors at zero instead of failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawStock {
    pub product_id: ProductId,
    pub quantity: i64,
    pub reference: MovementReference,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock (manual correction to an absolute quantity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub product_id: ProductId,
    pub new_quantity: i64,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Edits to a product's catalog fields. `None` keeps the current value.
///
/// Quantity is deliberately absent: it only moves through stock commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductChanges {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub purchase_price: Option<Money>,
    pub selling_price: Option<Money>,
    pub reorder_level: Option<i64>,
    pub max_stock: Option<i64>,
    /// `Some(None)` detaches the vendor.
    pub vendor_id: Option<Option<VendorId>>,
    pub active: Option<bool>,
}

/// Command: UpdateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProduct {
    pub product_id: ProductId,
    pub changes: ProductChanges,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteProduct.
///
/// `line_references` is the number of invoice and purchase lines naming the
/// product; those belong to other orders, so any reference refuses the delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteProduct {
    pub product_id: ProductId,
    pub line_references: u64,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    RegisterProduct(RegisterProduct),
    UpdateProduct(UpdateProduct),
    IssueStock(IssueStock),
    ReceiveStock(ReceiveStock),
    WithdrawStock(WithdrawStock),
    AdjustStock(AdjustStock),
    DeleteProduct(DeleteProduct),
}

impl ProductCommand {
    /// The product this command targets.
    pub fn product_id(&self) -> ProductId {
        match self {
            ProductCommand::RegisterProduct(cmd) => cmd.product_id,
            ProductCommand::UpdateProduct(cmd) => cmd.product_id,
            ProductCommand::IssueStock(cmd) => cmd.product_id,
            ProductCommand::ReceiveStock(cmd) => cmd.product_id,
            ProductCommand::WithdrawStock(cmd) => cmd.product_id,
            ProductCommand::AdjustStock(cmd) => cmd.product_id,
            ProductCommand::DeleteProduct(cmd) => cmd.product_id,
        }
    }
}

/// Event: ProductRegistered. Always registers with zero quantity; opening
/// stock follows as a separate `StockMoved`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRegistered {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub purchase_price: Money,
    pub selling_price: Money,
    pub reorder_level: i64,
    pub max_stock: i64,
    pub vendor_id: Option<VendorId>,
    pub active: bool,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductUpdated. Carries the resolved catalog fields after the edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUpdated {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub purchase_price: Money,
    pub selling_price: Money,
    pub reorder_level: i64,
    pub max_stock: i64,
    pub vendor_id: Option<VendorId>,
    pub active: bool,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductDeleted. The product's movement history goes with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDeleted {
    pub product_id: ProductId,
    pub sku: String,
    pub quantity: i64,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockMoved.
///
/// `previous_quantity` is the quantity the aggregate held when the command was
/// decided, i.e. the locked row state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMoved {
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub reference: MovementReference,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    pub unit_cost: Option<Money>,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductRegistered(ProductRegistered),
    ProductUpdated(ProductUpdated),
    StockMoved(StockMoved),
    ProductDeleted(ProductDeleted),
}

impl ProductEvent {
    pub fn as_stock_moved(&self) -> Option<&StockMoved> {
        match self {
            ProductEvent::StockMoved(e) => Some(e),
            _ => None,
        }
    }
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductRegistered(_) => "inventory.product.registered",
            ProductEvent::ProductUpdated(_) => "inventory.product.updated",
            ProductEvent::ProductDeleted(_) => "inventory.product.deleted",
            ProductEvent::StockMoved(e) => match e.reference.kind {
                crate::movement::ReferenceType::Adjustment => "inventory.stock.adjusted",
                _ => "inventory.stock.moved",
            },
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductRegistered(e) => e.occurred_at,
            ProductEvent::ProductUpdated(e) => e.occurred_at,
            ProductEvent::StockMoved(e) => e.occurred_at,
            ProductEvent::ProductDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductRegistered(e) => {
                self.id = e.product_id;
                self.sku = e.sku.clone();
                self.name = e.name.clone();
                self.quantity = 0;
                self.purchase_price = e.purchase_price;
                self.selling_price = e.selling_price;
                self.reorder_level = e.reorder_level;
                self.max_stock = e.max_stock;
                self.vendor_id = e.vendor_id;
                self.active = e.active;
                self.created = true;
            }
            ProductEvent::ProductUpdated(e) => {
                self.sku = e.sku.clone();
                self.name = e.name.clone();
                self.purchase_price = e.purchase_price;
                self.selling_price = e.selling_price;
                self.reorder_level = e.reorder_level;
                self.max_stock = e.max_stock;
                self.vendor_id = e.vendor_id;
                self.active = e.active;
            }
            ProductEvent::StockMoved(e) => {
                self.quantity = e.new_quantity;
                if let Some(cost) = e.unit_cost {
                    self.purchase_price = cost;
                }
            }
            ProductEvent::ProductDeleted(_) => {
                self.created = false;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::RegisterProduct(cmd) => self.handle_register(cmd),
            ProductCommand::UpdateProduct(cmd) => self.handle_update(cmd),
            ProductCommand::IssueStock(cmd) => self.handle_issue(cmd),
            ProductCommand::ReceiveStock(cmd) => self.handle_receive(cmd),
            ProductCommand::WithdrawStock(cmd) => self.handle_withdraw(cmd),
            ProductCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
            ProductCommand::DeleteProduct(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Product {
    fn ensure_registered(&self, product_id: ProductId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("Product {product_id}")));
        }
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn ensure_positive(quantity: i64) -> Result<(), DomainError> {
        if quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        if cmd.sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.opening_quantity < 0 {
            return Err(DomainError::validation("opening quantity cannot be negative"));
        }
        if cmd.purchase_price.is_negative() || cmd.selling_price.is_negative() {
            return Err(DomainError::validation("prices cannot be negative"));
        }
        if cmd.reorder_level < 0 || cmd.max_stock < 0 {
            return Err(DomainError::validation(
                "reorder level and max stock cannot be negative",
            ));
        }

        let mut events = vec![ProductEvent::ProductRegistered(ProductRegistered {
            product_id: cmd.product_id,
            sku: cmd.sku.trim().to_string(),
            name: cmd.name.trim().to_string(),
            purchase_price: cmd.purchase_price,
            selling_price: cmd.selling_price,
            reorder_level: cmd.reorder_level,
            max_stock: cmd.max_stock,
            vendor_id: cmd.vendor_id,
            active: cmd.active,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })];

        if cmd.opening_quantity > 0 {
            events.push(ProductEvent::StockMoved(StockMoved {
                product_id: cmd.product_id,
                movement_type: MovementType::StockIn,
                quantity: cmd.opening_quantity,
                reference: MovementReference::adjustment(),
                previous_quantity: 0,
                new_quantity: cmd.opening_quantity,
                unit_cost: None,
                notes: Some("opening stock".to_string()),
                actor: cmd.actor,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_update(&self, cmd: &UpdateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_registered(cmd.product_id)?;
        let changes = &cmd.changes;

        let sku = changes.sku.as_deref().map_or(self.sku.as_str(), str::trim);
        let name = changes.name.as_deref().map_or(self.name.as_str(), str::trim);
        if sku.is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        let purchase_price = changes.purchase_price.unwrap_or(self.purchase_price);
        let selling_price = changes.selling_price.unwrap_or(self.selling_price);
        if purchase_price.is_negative() || selling_price.is_negative() {
            return Err(DomainError::validation("prices cannot be negative"));
        }
        let reorder_level = changes.reorder_level.unwrap_or(self.reorder_level);
        let max_stock = changes.max_stock.unwrap_or(self.max_stock);
        if reorder_level < 0 || max_stock < 0 {
            return Err(DomainError::validation(
                "reorder level and max stock cannot be negative",
            ));
        }

        let updated = ProductUpdated {
            product_id: cmd.product_id,
            sku: sku.to_string(),
            name: name.to_string(),
            purchase_price,
            selling_price,
            reorder_level,
            max_stock,
            vendor_id: changes.vendor_id.unwrap_or(self.vendor_id),
            active: changes.active.unwrap_or(self.active),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        };
        let unchanged = updated.sku == self.sku
            && updated.name == self.name
            && updated.purchase_price == self.purchase_price
            && updated.selling_price == self.selling_price
            && updated.reorder_level == self.reorder_level
            && updated.max_stock == self.max_stock
            && updated.vendor_id == self.vendor_id
            && updated.active == self.active;
        if unchanged {
            return Ok(Vec::new());
        }

        Ok(vec![ProductEvent::ProductUpdated(updated)])
    }

    fn handle_delete(&self, cmd: &DeleteProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_registered(cmd.product_id)?;
        if cmd.line_references > 0 {
            return Err(DomainError::conflict(format!(
                "Cannot delete product {}: it appears on {} order line(s)",
                self.sku, cmd.line_references
            )));
        }

        Ok(vec![ProductEvent::ProductDeleted(ProductDeleted {
            product_id: cmd.product_id,
            sku: self.sku.clone(),
            quantity: self.quantity,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_issue(&self, cmd: &IssueStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_registered(cmd.product_id)?;
        Self::ensure_positive(cmd.quantity)?;

        if cmd.quantity > self.quantity {
            return Err(DomainError::insufficient_stock(
                self.name.clone(),
                cmd.quantity,
                self.quantity,
            ));
        }

        Ok(vec![ProductEvent::StockMoved(StockMoved {
            product_id: cmd.product_id,
            movement_type: MovementType::StockOut,
            quantity: cmd.quantity,
            reference: cmd.reference,
            previous_quantity: self.quantity,
            new_quantity: self.quantity - cmd.quantity,
            unit_cost: None,
            notes: cmd.notes.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_registered(cmd.product_id)?;
        Self::ensure_positive(cmd.quantity)?;
        if cmd.unit_cost.is_some_and(Money::is_negative) {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }

        let new_quantity = self
            .quantity
            .checked_add(cmd.quantity)
            .ok_or_else(|| DomainError::validation("quantity overflows"))?;

        Ok(vec![ProductEvent::StockMoved(StockMoved {
            product_id: cmd.product_id,
            movement_type: MovementType::StockIn,
            quantity: cmd.quantity,
            reference: cmd.reference,
            previous_quantity: self.quantity,
            new_quantity,
            unit_cost: cmd.unit_cost,
            notes: cmd.notes.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_withdraw(&self, cmd: &WithdrawStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_registered(cmd.product_id)?;
        Self::ensure_positive(cmd.quantity)?;

        // Stock consumed since receipt cannot be withdrawn again.
        let removed = cmd.quantity.min(self.quantity);
        if removed == 0 {
            return Ok(Vec::new());
        }

        Ok(vec![ProductEvent::StockMoved(StockMoved {
            product_id: cmd.product_id,
            movement_type: MovementType::StockOut,
            quantity: removed,
            reference: cmd.reference,
            previous_quantity: self.quantity,
            new_quantity: self.quantity - removed,
            unit_cost: None,
            notes: cmd.notes.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_registered(cmd.product_id)?;
        if cmd.new_quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }

        let delta = cmd.new_quantity - self.quantity;
        if delta == 0 {
            return Ok(Vec::new());
        }
        let movement_type = if delta > 0 {
            MovementType::StockIn
        } else {
            MovementType::StockOut
        };

        Ok(vec![ProductEvent::StockMoved(StockMoved {
            product_id: cmd.product_id,
            movement_type,
            quantity: delta.abs(),
            reference: MovementReference::adjustment(),
            previous_quantity: self.quantity,
            new_quantity: cmd.new_quantity,
            unit_cost: None,
            notes: cmd.notes.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}
