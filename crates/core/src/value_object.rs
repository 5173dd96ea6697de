//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values
/// (`Money`, `Percent`). Two amounts of 10.00 are the same amount.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
