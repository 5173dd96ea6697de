//! Purchasing context: purchase orders, their totals, and the order status
//! machine that gates when a purchase's stock is applied.
//!
//! Pure domain logic; the stock ledger engine drives these aggregates inside a
//! storage transaction.

pub mod purchase;
pub mod status;

pub use purchase::{
    CreatePurchase, DeletePurchase, OrderStatusChanged, PaymentStateChanged, Purchase,
    PurchaseCommand, PurchaseCreated, PurchaseDeleted, PurchaseEvent, PurchaseId, PurchaseItem,
    PurchaseLine, PurchaseReceived, PurchaseSnapshot, ReceivePurchase, SetPaymentState,
    UpdateOrderStatus,
};
pub use status::OrderStatus;
