//! Entity identifiers.
//!
//! Ids are allocated from a monotonic 64-bit counter and are never reused,
//! even after the entity is destroyed. Id 0 is reserved as the null id.

use std::fmt;

/// A unique identifier for an entity.
///
/// An id is "allocated" once the manager's counter has passed it, and
/// "active" while the entity is live in some pool. Active ids are always a
/// subset of allocated ids.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntityId(u64);

impl EntityId {
    /// The reserved null id. Never assigned to an entity.
    pub const NULL: EntityId = EntityId(0);

    /// Create an id from a raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Whether this is the reserved null id.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u64> for EntityId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_zero() {
        assert!(EntityId::NULL.is_null());
        assert_eq!(EntityId::NULL.as_raw(), 0);
        assert!(!EntityId::from_raw(1).is_null());
    }

    #[test]
    fn display() {
        assert_eq!(EntityId::NULL.to_string(), "null");
        assert_eq!(EntityId::from_raw(42).to_string(), "42");
    }
}
