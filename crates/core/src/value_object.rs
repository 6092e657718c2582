//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have **no identity**; two instances with the same attributes are
/// the same value (an indicator code, a geographic point, a measurement key).
/// They are immutable: "changing" one means building a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
