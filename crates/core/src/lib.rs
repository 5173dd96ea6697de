//! `stockledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model, fixed-point money, order totals and
//! the aggregate/event traits the domain crates implement.

pub mod aggregate;
pub mod document;
pub mod error;
pub mod event;
pub mod id;
pub mod money;
pub mod totals;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot};
pub use document::{DocumentKind, DocumentNumber};
pub use error::{DomainError, DomainResult};
pub use event::Event;
pub use id::{AggregateId, UserId};
pub use money::{Money, Percent};
pub use totals::{line_total, Adjustments, OrderTotals};
pub use value_object::ValueObject;

#[doc(hidden)]
pub use uuid;
