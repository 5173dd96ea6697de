//! Inventory movements: the append-only history of every quantity change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::{AggregateId, UserId};

use crate::product::{ProductId, StockMoved};

/// Direction of a quantity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    StockIn,
    StockOut,
}

impl MovementType {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::StockIn => "stock_in",
            MovementType::StockOut => "stock_out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stock_in" => Some(MovementType::StockIn),
            "stock_out" => Some(MovementType::StockOut),
            _ => None,
        }
    }

    /// Signed effect of `quantity` units moving in this direction.
    pub fn signed(self, quantity: i64) -> i64 {
        match self {
            MovementType::StockIn => quantity,
            MovementType::StockOut => -quantity,
        }
    }
}

/// What caused a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    Purchase,
    Invoice,
    Adjustment,
    Return,
}

impl ReferenceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferenceType::Purchase => "purchase",
            ReferenceType::Invoice => "invoice",
            ReferenceType::Adjustment => "adjustment",
            ReferenceType::Return => "return",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(ReferenceType::Purchase),
            "invoice" => Some(ReferenceType::Invoice),
            "adjustment" => Some(ReferenceType::Adjustment),
            "return" => Some(ReferenceType::Return),
            _ => None,
        }
    }
}

/// Cause of a movement plus the document it belongs to (none for manual adjustments).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReference {
    pub kind: ReferenceType,
    pub id: Option<AggregateId>,
}

impl MovementReference {
    pub fn purchase(id: AggregateId) -> Self {
        Self {
            kind: ReferenceType::Purchase,
            id: Some(id),
        }
    }

    pub fn invoice(id: AggregateId) -> Self {
        Self {
            kind: ReferenceType::Invoice,
            id: Some(id),
        }
    }

    pub fn reversal(id: AggregateId) -> Self {
        Self {
            kind: ReferenceType::Return,
            id: Some(id),
        }
    }

    pub fn adjustment() -> Self {
        Self {
            kind: ReferenceType::Adjustment,
            id: None,
        }
    }
}

/// One immutable row of the movement ledger.
///
/// Invariant: `new_quantity = previous_quantity ± quantity` matching
/// `movement_type`, with `quantity > 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub id: Uuid,
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub reference_type: ReferenceType,
    pub reference_id: Option<AggregateId>,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl InventoryMovement {
    /// Materialize the movement row a `StockMoved` event describes.
    pub fn from_event(event: &StockMoved) -> Self {
        Self {
            id: Uuid::now_v7(),
            product_id: event.product_id,
            movement_type: event.movement_type,
            quantity: event.quantity,
            reference_type: event.reference.kind,
            reference_id: event.reference.id,
            previous_quantity: event.previous_quantity,
            new_quantity: event.new_quantity,
            notes: event.notes.clone(),
            created_by: event.actor,
            created_at: event.occurred_at,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.quantity > 0
            && self.new_quantity >= 0
            && self.new_quantity - self.previous_quantity == self.movement_type.signed(self.quantity)
    }
}

/// Filter for the movement query surface.
///
/// All fields are optional; `created_to` is inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub movement_type: Option<MovementType>,
    pub reference_type: Option<ReferenceType>,
    pub reference_id: Option<AggregateId>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl MovementFilter {
    pub fn for_product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, movement: &InventoryMovement) -> bool {
        self.product_id.is_none_or(|p| p == movement.product_id)
            && self.movement_type.is_none_or(|t| t == movement.movement_type)
            && self.reference_type.is_none_or(|r| r == movement.reference_type)
            && self
                .reference_id
                .is_none_or(|r| movement.reference_id == Some(r))
            && self.created_from.is_none_or(|from| movement.created_at >= from)
            && self.created_to.is_none_or(|to| movement.created_at <= to)
    }
}
