//! Index comparators for datoms.
//!
//! The store keeps nine indexes, each a sorted tree over the same fact set
//! under a different total ordering:
//!
//! | Ordering | Order               | Use case |
//! |----------|---------------------|----------|
//! | EAVT     | e, a, v, t desc     | all facts about an entity |
//! | AEVT     | a, e, v, t desc     | all entities with an attribute |
//! | AVET     | a, v, t desc, e     | entities with attribute = value |
//! | VAET     | v, a, e, t desc     | reverse references (refs only) |
//! | TxLog    | t asc, e, a, v      | append/replay order |
//!
//! Each ordering exists in a Current and a History variant (TxLog has one).
//! The variants share the ordering and differ only in membership: Current
//! indexes hold live asserts, History indexes keep retracted and superseded
//! datoms too.
//!
//! ## Tie-breaks
//!
//! Every comparator applies the same rule once its ordering-defining fields
//! compare equal: transaction id **descending** (so the most recent fact
//! sorts first within a key), then the flag byte, making the full key a
//! strict total order with no duplicates.
//!
//! Value comparison delegates to the attribute registry's per-type byte
//! comparator; comparators never fail, because datoms with unregistered
//! attributes are rejected at transact validation.

use crate::datom::{Datom, DatomRef};
use crate::registry::AttributeRegistry;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Field permutation shared by a Current/History index pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyOrder {
    Eavt,
    Aevt,
    Avet,
    Vaet,
    TxLog,
}

/// The closed set of indexes, each owning an independent root node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum IndexType {
    TxLog = 0,
    EavtCurrent = 1,
    EavtHistory = 2,
    AevtCurrent = 3,
    AevtHistory = 4,
    AvetCurrent = 5,
    AvetHistory = 6,
    VaetCurrent = 7,
    VaetHistory = 8,
}

impl IndexType {
    /// Number of indexes.
    pub const COUNT: usize = 9;

    /// All nine indexes, in stable wire order.
    pub fn all() -> &'static [IndexType; IndexType::COUNT] {
        &[
            IndexType::TxLog,
            IndexType::EavtCurrent,
            IndexType::EavtHistory,
            IndexType::AevtCurrent,
            IndexType::AevtHistory,
            IndexType::AvetCurrent,
            IndexType::AvetHistory,
            IndexType::VaetCurrent,
            IndexType::VaetHistory,
        ]
    }

    /// The field permutation this index sorts by.
    pub fn ordering(self) -> KeyOrder {
        match self {
            IndexType::TxLog => KeyOrder::TxLog,
            IndexType::EavtCurrent | IndexType::EavtHistory => KeyOrder::Eavt,
            IndexType::AevtCurrent | IndexType::AevtHistory => KeyOrder::Aevt,
            IndexType::AvetCurrent | IndexType::AvetHistory => KeyOrder::Avet,
            IndexType::VaetCurrent | IndexType::VaetHistory => KeyOrder::Vaet,
        }
    }

    /// True for indexes that expose only the live value per key.
    pub fn is_current(self) -> bool {
        matches!(
            self,
            IndexType::EavtCurrent
                | IndexType::AevtCurrent
                | IndexType::AvetCurrent
                | IndexType::VaetCurrent
        )
    }

    /// True for indexes restricted to reference-typed datoms.
    pub fn refs_only(self) -> bool {
        matches!(self, IndexType::VaetCurrent | IndexType::VaetHistory)
    }

    pub fn name(self) -> &'static str {
        match self {
            IndexType::TxLog => "txlog",
            IndexType::EavtCurrent => "eavt-current",
            IndexType::EavtHistory => "eavt-history",
            IndexType::AevtCurrent => "aevt-current",
            IndexType::AevtHistory => "aevt-history",
            IndexType::AvetCurrent => "avet-current",
            IndexType::AvetHistory => "avet-history",
            IndexType::VaetCurrent => "vaet-current",
            IndexType::VaetHistory => "vaet-history",
        }
    }

    /// Stable wire discriminant.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a wire discriminant.
    pub fn from_u8(v: u8) -> Option<IndexType> {
        IndexType::all().get(v as usize).copied()
    }

    /// Comparator for this index, bound to the registry that supplies
    /// per-value-type byte comparison.
    pub fn comparator(self, registry: Arc<AttributeRegistry>) -> DatomOrd {
        DatomOrd {
            order: self.ordering(),
            registry,
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndexType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IndexType::all()
            .iter()
            .copied()
            .find(|ix| ix.name() == s.to_lowercase())
            .ok_or_else(|| format!("unknown index type: {}", s))
    }
}

/// A total order over datoms for one index family.
///
/// Cheap to clone; carries the registry so AVET value comparison can use
/// each attribute's registered type.
#[derive(Clone)]
pub struct DatomOrd {
    order: KeyOrder,
    registry: Arc<AttributeRegistry>,
}

impl DatomOrd {
    pub fn new(order: KeyOrder, registry: Arc<AttributeRegistry>) -> Self {
        Self { order, registry }
    }

    pub fn order(&self) -> KeyOrder {
        self.order
    }

    /// Compare two datoms under this index's full ordering.
    #[inline]
    pub fn cmp(&self, a: &Datom, b: &Datom) -> Ordering {
        self.cmp_ref(&a.as_ref(), &b.as_ref())
    }

    /// Compare two borrowed views under the full ordering, including the
    /// tx-descending and flag-byte tie-breaks.
    pub fn cmp_ref(&self, a: &DatomRef<'_>, b: &DatomRef<'_>) -> Ordering {
        self.cmp_key(a, b)
            .then_with(|| b.t.cmp(&a.t)) // tx descending
            .then_with(|| a.flags.as_u8().cmp(&b.flags.as_u8()))
    }

    /// Compare only the ordering-defining fields (no tx, no flags).
    ///
    /// Equality here is the "exact key tie" merge rule: two datoms with
    /// equal keys describe the same logical slot, and the newer input wins.
    pub fn cmp_key(&self, a: &DatomRef<'_>, b: &DatomRef<'_>) -> Ordering {
        match self.order {
            KeyOrder::Eavt => a
                .e
                .cmp(&b.e)
                .then_with(|| a.a.cmp(&b.a))
                .then_with(|| self.cmp_value(a, b)),
            KeyOrder::Aevt => a
                .a
                .cmp(&b.a)
                .then_with(|| a.e.cmp(&b.e))
                .then_with(|| self.cmp_value(a, b)),
            // AVET ranks tx above entity: for a fixed (a, v) the newest
            // claimant sorts first.
            KeyOrder::Avet => a
                .a
                .cmp(&b.a)
                .then_with(|| self.cmp_value(a, b))
                .then_with(|| b.t.cmp(&a.t))
                .then_with(|| a.e.cmp(&b.e)),
            KeyOrder::Vaet => self
                .cmp_value(a, b)
                .then_with(|| a.a.cmp(&b.a))
                .then_with(|| a.e.cmp(&b.e)),
            // TxLog is the one ascending-tx ordering: replay order.
            KeyOrder::TxLog => a
                .t
                .cmp(&b.t)
                .then_with(|| a.e.cmp(&b.e))
                .then_with(|| a.a.cmp(&b.a))
                .then_with(|| self.cmp_value(a, b)),
        }
    }

    fn cmp_value(&self, a: &DatomRef<'_>, b: &DatomRef<'_>) -> Ordering {
        if a.tag != b.tag {
            return (a.tag as u8).cmp(&(b.tag as u8));
        }
        let fallback = a.tag;
        if a.a == b.a {
            self.registry.compare_values_as(a.a, fallback, a.v, b.v)
        } else {
            crate::value::compare_tagged(fallback, a.v, b.v)
        }
    }
}

impl fmt::Debug for DatomOrd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatomOrd({:?})", self.order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{AttributeId, EntityId, Partition, TxId};
    use crate::registry::{AttributeDef, AttributeRegistry};
    use crate::value::{Value, ValueTag};

    fn registry() -> Arc<AttributeRegistry> {
        Arc::new(
            AttributeRegistry::new()
                .with(AttributeDef::new(AttributeId(1), ValueTag::I64))
                .with(AttributeDef::new(AttributeId(2), ValueTag::Ref)),
        )
    }

    fn make(e: u64, a: u16, v: i64, t: u64) -> Datom {
        Datom::new(
            EntityId::new(Partition::Entity, e),
            AttributeId(a),
            TxId::from_sequence(t),
            true,
            Value::i64(v),
        )
    }

    #[test]
    fn test_eavt_field_priority() {
        let ord = IndexType::EavtCurrent.comparator(registry());
        let base = make(1, 1, 1, 1);
        assert_eq!(ord.cmp(&base, &make(2, 1, 1, 1)), Ordering::Less); // e first
        assert_eq!(ord.cmp(&base, &make(1, 2, 1, 1)), Ordering::Less); // then a
        assert_eq!(ord.cmp(&base, &make(1, 1, 2, 1)), Ordering::Less); // then v
    }

    #[test]
    fn test_tx_descending_tie_break() {
        let ord = IndexType::EavtHistory.comparator(registry());
        let newer = make(1, 1, 1, 5);
        let older = make(1, 1, 1, 2);
        // Same (e, a, v): the newer transaction sorts first.
        assert_eq!(ord.cmp(&newer, &older), Ordering::Less);
    }

    #[test]
    fn test_txlog_is_tx_ascending() {
        let ord = IndexType::TxLog.comparator(registry());
        assert_eq!(ord.cmp(&make(9, 9, 9, 1), &make(1, 1, 1, 2)), Ordering::Less);
    }

    #[test]
    fn test_aevt_groups_by_attribute() {
        let ord = IndexType::AevtCurrent.comparator(registry());
        // Attribute dominates entity.
        assert_eq!(ord.cmp(&make(9, 1, 1, 1), &make(1, 2, 1, 1)), Ordering::Less);
        // Same attribute: entity decides.
        assert_eq!(ord.cmp(&make(1, 1, 1, 1), &make(2, 1, 1, 1)), Ordering::Less);
    }

    #[test]
    fn test_avet_value_before_entity() {
        let ord = IndexType::AvetCurrent.comparator(registry());
        // Smaller value wins even against a smaller entity id.
        assert_eq!(ord.cmp(&make(9, 1, 1, 1), &make(1, 1, 2, 1)), Ordering::Less);
    }

    #[test]
    fn test_vaet_orders_by_target() {
        let ord = IndexType::VaetCurrent.comparator(registry());
        let t1 = EntityId::new(Partition::Entity, 10);
        let t2 = EntityId::new(Partition::Entity, 20);
        let r1 = Datom::new(
            EntityId::new(Partition::Entity, 5),
            AttributeId(2),
            TxId::from_sequence(1),
            true,
            Value::reference(t1),
        );
        let r2 = Datom::new(
            EntityId::new(Partition::Entity, 1),
            AttributeId(2),
            TxId::from_sequence(1),
            true,
            Value::reference(t2),
        );
        assert_eq!(ord.cmp(&r1, &r2), Ordering::Less);
    }

    #[test]
    fn test_key_equality_ignores_tx_and_op() {
        let ord = IndexType::EavtCurrent.comparator(registry());
        let assert_d = make(1, 1, 1, 1);
        let mut retract_d = make(1, 1, 1, 7);
        retract_d = Datom::new(retract_d.e, retract_d.a, retract_d.t, false, retract_d.v);
        assert_eq!(
            ord.cmp_key(&assert_d.as_ref(), &retract_d.as_ref()),
            Ordering::Equal
        );
        assert_ne!(ord.cmp(&assert_d, &retract_d), Ordering::Equal);
    }

    #[test]
    fn test_full_order_is_total() {
        let ord = IndexType::EavtHistory.comparator(registry());
        let a = make(1, 1, 1, 1);
        let b = Datom::new(a.e, a.a, a.t, false, a.v.clone());
        // Same key and tx, differing only in the flag byte: still ordered.
        assert_ne!(ord.cmp(&a, &b), Ordering::Equal);
    }

    #[test]
    fn test_index_type_round_trips() {
        for ix in IndexType::all() {
            assert_eq!(IndexType::from_u8(ix.as_u8()), Some(*ix));
            assert_eq!(ix.name().parse::<IndexType>().unwrap(), *ix);
        }
        assert!("bogus".parse::<IndexType>().is_err());
    }
}
