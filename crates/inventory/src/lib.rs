//! Inventory context: the product aggregate that owns on-hand quantity and the
//! movement records that explain every change to it.

pub mod movement;
pub mod product;

pub use movement::{InventoryMovement, MovementFilter, MovementReference, MovementType, ReferenceType};
pub use product::{
    AdjustStock, DeleteProduct, IssueStock, Product, ProductChanges, ProductCommand,
    ProductDeleted, ProductEvent, ProductId, ProductRegistered, ProductSnapshot, ProductUpdated,
    ReceiveStock, RegisterProduct, StockMoved, UpdateProduct, WithdrawStock,
};
