//! Partitioned 64-bit ids.
//!
//! Every id in the store packs a partition tag into its top byte:
//! `id = (partition << 56) | sequence`. Partitioning lets a bare `u64`
//! be classified (entity vs. temp vs. transaction) with a single shift,
//! and gives each id family a contiguous, order-preserving range.
//!
//! | Partition | Tag | Holds |
//! |-----------|-----|-------|
//! | Attribute | 0   | attribute handles |
//! | Tx        | 1   | transaction ids |
//! | Entity    | 2   | permanent entity ids |
//! | Temp      | 3   | transaction-scoped temp ids |
//! | TxLog     | 4   | node-store keys for tx-log blocks |
//! | Index     | 5   | node-store keys for index nodes |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bits reserved for the sequence portion of an id.
pub const SEQUENCE_BITS: u32 = 56;

/// Mask selecting the sequence portion of an id.
pub const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Id partitions, stored in the top byte of every 64-bit id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Partition {
    /// Attribute handles.
    Attribute = 0,
    /// Transaction ids.
    Tx = 1,
    /// Permanent entity ids.
    Entity = 2,
    /// Transaction-scoped temporary entity ids.
    Temp = 3,
    /// Node-store keys for transaction-log blocks.
    TxLog = 4,
    /// Node-store keys for index nodes.
    Index = 5,
}

impl Partition {
    /// Classify a raw id by its partition tag. Returns `None` for tags
    /// outside the known set.
    #[inline]
    pub fn of(raw: u64) -> Option<Partition> {
        match (raw >> SEQUENCE_BITS) as u8 {
            0 => Some(Partition::Attribute),
            1 => Some(Partition::Tx),
            2 => Some(Partition::Entity),
            3 => Some(Partition::Temp),
            4 => Some(Partition::TxLog),
            5 => Some(Partition::Index),
            _ => None,
        }
    }

    /// Build an id in this partition from a sequence number.
    ///
    /// The sequence must fit in 56 bits; the high byte is the partition tag.
    #[inline]
    pub fn make(self, sequence: u64) -> u64 {
        debug_assert!(sequence <= SEQUENCE_MASK, "sequence overflows partition");
        ((self as u64) << SEQUENCE_BITS) | (sequence & SEQUENCE_MASK)
    }

    /// Smallest id in this partition.
    #[inline]
    pub fn min_id(self) -> u64 {
        self.make(0)
    }

    /// Largest id in this partition.
    #[inline]
    pub fn max_id(self) -> u64 {
        self.make(SEQUENCE_MASK)
    }
}

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A 64-bit entity id: partition tag in the top byte, 56-bit sequence below.
///
/// Ids in the `Temp` partition are transaction-scoped and must be remapped
/// to `Entity`-partition ids before a transaction publishes.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_u64(v: u64) -> Self {
        Self(v)
    }

    /// Build an entity id in the given partition.
    #[inline]
    pub fn new(partition: Partition, sequence: u64) -> Self {
        Self(partition.make(sequence))
    }

    /// The partition tag, if it is one of the known partitions.
    #[inline]
    pub fn partition(self) -> Option<Partition> {
        Partition::of(self.0)
    }

    /// The sequence portion (partition stripped).
    #[inline]
    pub fn sequence(self) -> u64 {
        self.0 & SEQUENCE_MASK
    }

    /// True for ids in the `Temp` partition.
    #[inline]
    pub fn is_temp(self) -> bool {
        self.partition() == Some(Partition::Temp)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({:x})", self.0)
    }
}

// ---------------------------------------------------------------------------
// AttributeId
// ---------------------------------------------------------------------------

/// A small stable attribute handle.
///
/// Assigned once per attribute symbol and never reused or moved; schema
/// growth only ever adds new ids. Two bytes bound the system to 65k
/// attributes, which also keeps the sortable key prefix compact.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[repr(transparent)]
pub struct AttributeId(pub u16);

impl AttributeId {
    pub const MIN: AttributeId = AttributeId(0);
    pub const MAX: AttributeId = AttributeId(u16::MAX);

    #[inline]
    pub fn as_u16(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn from_u16(v: u16) -> Self {
        Self(v)
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// TxId
// ---------------------------------------------------------------------------

/// A monotonically increasing transaction id in the `Tx` partition.
///
/// `TxId(n+1) > TxId(n)` for every committed transaction; readers never
/// observe gaps other than aborted attempts.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TxId(pub u64);

impl TxId {
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_u64(v: u64) -> Self {
        Self(v)
    }

    /// Build a tx id from a sequence number.
    #[inline]
    pub fn from_sequence(sequence: u64) -> Self {
        Self(Partition::Tx.make(sequence))
    }

    /// The sequence portion (partition stripped).
    #[inline]
    pub fn sequence(self) -> u64 {
        self.0 & SEQUENCE_MASK
    }

    /// Smallest possible tx id.
    #[inline]
    pub fn min() -> Self {
        Self(Partition::Tx.min_id())
    }

    /// Largest possible tx id.
    #[inline]
    pub fn max() -> Self {
        Self(Partition::Tx.max_id())
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.sequence())
    }
}

// ---------------------------------------------------------------------------
// StoreKey
// ---------------------------------------------------------------------------

/// Opaque handle to a persisted node blob.
///
/// Keys are allocated by the node store from the `Index` partition (tree
/// nodes) or the `TxLog` partition (transaction-log blocks), so a key also
/// identifies which append stream produced it.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[repr(transparent)]
pub struct StoreKey(pub u64);

impl StoreKey {
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_u64(v: u64) -> Self {
        Self(v)
    }

    /// Build a key in the given partition.
    #[inline]
    pub fn new(partition: Partition, sequence: u64) -> Self {
        Self(partition.make(sequence))
    }

    /// The partition tag, if known.
    #[inline]
    pub fn partition(self) -> Option<Partition> {
        Partition::of(self.0)
    }

    /// The sequence portion (partition stripped).
    #[inline]
    pub fn sequence(self) -> u64 {
        self.0 & SEQUENCE_MASK
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreKey({:x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_round_trip() {
        for p in [
            Partition::Attribute,
            Partition::Tx,
            Partition::Entity,
            Partition::Temp,
            Partition::TxLog,
            Partition::Index,
        ] {
            let id = p.make(42);
            assert_eq!(Partition::of(id), Some(p));
            assert_eq!(id & SEQUENCE_MASK, 42);
        }
    }

    #[test]
    fn test_partition_bounds() {
        assert!(Partition::Entity.min_id() < Partition::Entity.max_id());
        // Partitions are disjoint and ordered by tag.
        assert!(Partition::Tx.max_id() < Partition::Entity.min_id());
        assert!(Partition::Entity.max_id() < Partition::Temp.min_id());
    }

    #[test]
    fn test_entity_id_temp_detection() {
        let temp = EntityId::new(Partition::Temp, 7);
        let perm = EntityId::new(Partition::Entity, 7);
        assert!(temp.is_temp());
        assert!(!perm.is_temp());
        assert_eq!(temp.sequence(), 7);
    }

    #[test]
    fn test_tx_id_monotonic_in_sequence() {
        let a = TxId::from_sequence(1);
        let b = TxId::from_sequence(2);
        assert!(a < b);
        assert!(TxId::min() <= a);
        assert!(b <= TxId::max());
    }

    #[test]
    fn test_unknown_partition_tag() {
        assert_eq!(Partition::of(0xFF00_0000_0000_0000), None);
    }
}
