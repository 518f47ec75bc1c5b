//! Identifier types for graph objects.
//!
//! Entities and relationships are addressed by stable, niche-optimized ids.
//! Relationships hold id pairs rather than references, so the cyclic structure
//! of the graph never turns into an ownership cycle. The [`IdAllocator`]
//! produces monotonically increasing ids; one allocator per id space lives
//! inside the graph store.

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Unique, niche-optimized identifier for an entity.
///
/// Uses `NonZeroU64` so that `Option<EntityId>` is the same size as `EntityId`
/// (the niche optimization lets the compiler use 0 as the `None` discriminant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct EntityId(NonZeroU64);

impl EntityId {
    /// Create an `EntityId` from a raw `u64`. Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(EntityId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ent:{}", self.0)
    }
}

/// Unique identifier for a relationship. Same representation as [`EntityId`],
/// separate type so the two id spaces cannot be confused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct RelationshipId(NonZeroU64);

impl RelationshipId {
    /// Create a `RelationshipId` from a raw `u64`. Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(RelationshipId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rel:{}", self.0)
    }
}

/// Monotonic id allocator starting from 1.
///
/// The simulation is single-threaded by design, so a plain counter suffices;
/// the graph store owns one allocator per id space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    /// Create a new allocator that starts from id 1.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the next raw id.
    ///
    /// Returns an error if the id space is exhausted (after 2^64 - 1 allocations).
    pub fn next_raw(&mut self) -> Result<NonZeroU64, GraphError> {
        let raw = self.next;
        self.next = self.next.wrapping_add(1);
        NonZeroU64::new(raw).ok_or(GraphError::IdsExhausted)
    }

    /// Return the next id that *would* be allocated, without consuming it.
    pub fn peek_next(&self) -> u64 {
        self.next
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_niche_optimization() {
        // Option<EntityId> should be the same size as EntityId thanks to NonZeroU64.
        assert_eq!(
            std::mem::size_of::<Option<EntityId>>(),
            std::mem::size_of::<EntityId>()
        );
    }

    #[test]
    fn zero_is_none() {
        assert!(EntityId::new(0).is_none());
        assert!(RelationshipId::new(0).is_none());
        assert_eq!(EntityId::new(42).unwrap().get(), 42);
    }

    #[test]
    fn allocator_produces_sequential_ids() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.next_raw().unwrap().get(), 1);
        assert_eq!(alloc.next_raw().unwrap().get(), 2);
        assert_eq!(alloc.next_raw().unwrap().get(), 3);
        assert_eq!(alloc.peek_next(), 4);
    }

    #[test]
    fn display_forms() {
        assert_eq!(EntityId::new(7).unwrap().to_string(), "ent:7");
        assert_eq!(RelationshipId::new(7).unwrap().to_string(), "rel:7");
    }

    #[test]
    fn id_ordering() {
        let a = EntityId::new(1).unwrap();
        let b = EntityId::new(2).unwrap();
        assert!(a < b);
    }
}
