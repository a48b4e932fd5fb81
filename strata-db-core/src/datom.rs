//! Datom - the fundamental fact unit.
//!
//! A datom records one assertion or retraction with 5 components:
//! - `e`: the entity the fact is about
//! - `a`: the attribute handle
//! - `t`: the transaction that produced it
//! - `flags`: assert/retract bit, inline-value bit, value-type tag
//! - `v`: the value payload
//!
//! Datoms don't implement `Ord` directly because ordering depends on the
//! index; use the comparators in [`crate::comparator`].
//!
//! `Datom::min_for_*` constructors provide lower bounds for range scans on
//! specific indexes; scans terminate by testing the bound fields of the
//! current datom rather than by composing an upper sentinel.

use crate::ids::{AttributeId, EntityId, TxId};
use crate::value::{Value, ValueTag};
use std::fmt;

/// Per-datom flag byte.
///
/// Layout: bit 0 = added (clear means retraction), bit 1 = value stored
/// inline in the key tail (a storage detail set by the codec), bits 4..8 =
/// the value-type tag.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct DatomFlags(pub u8);

impl DatomFlags {
    pub const ADDED: u8 = 0b0000_0001;
    pub const INLINED: u8 = 0b0000_0010;

    /// Compose a flag byte from the assert bit and a value tag.
    #[inline]
    pub fn new(added: bool, tag: ValueTag) -> Self {
        let mut bits = (tag as u8) << 4;
        if added {
            bits |= Self::ADDED;
        }
        Self(bits)
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn from_u8(v: u8) -> Self {
        Self(v)
    }

    #[inline]
    pub fn is_added(self) -> bool {
        self.0 & Self::ADDED != 0
    }

    #[inline]
    pub fn is_retraction(self) -> bool {
        !self.is_added()
    }

    #[inline]
    pub fn is_inlined(self) -> bool {
        self.0 & Self::INLINED != 0
    }

    #[inline]
    pub fn with_inlined(self, inlined: bool) -> Self {
        if inlined {
            Self(self.0 | Self::INLINED)
        } else {
            Self(self.0 & !Self::INLINED)
        }
    }

    /// The value-type tag carried in the high nibble.
    #[inline]
    pub fn value_tag(self) -> Option<ValueTag> {
        ValueTag::from_u8(self.0 >> 4)
    }
}

/// A single fact: assertion or retraction of (entity, attribute, value).
///
/// Retractions are datoms too - history is append-only, nothing is ever
/// deleted from the log or the history indexes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Datom {
    pub e: EntityId,
    pub a: AttributeId,
    pub t: TxId,
    pub flags: DatomFlags,
    pub v: Value,
}

impl Datom {
    /// Create a datom. The flag byte's tag nibble is derived from the value.
    pub fn new(e: EntityId, a: AttributeId, t: TxId, added: bool, v: Value) -> Self {
        Self {
            e,
            a,
            t,
            flags: DatomFlags::new(added, v.tag),
            v,
        }
    }

    /// An assertion at an as-yet-unassigned transaction time.
    ///
    /// The pipeline stamps `t` with the real tx id at commit.
    pub fn add(e: EntityId, a: AttributeId, v: Value) -> Self {
        Self::new(e, a, TxId::min(), true, v)
    }

    /// A retraction of the given (entity, attribute, value).
    pub fn retract(e: EntityId, a: AttributeId, v: Value) -> Self {
        Self::new(e, a, TxId::min(), false, v)
    }

    #[inline]
    pub fn is_added(&self) -> bool {
        self.flags.is_added()
    }

    #[inline]
    pub fn is_retraction(&self) -> bool {
        self.flags.is_retraction()
    }

    /// Borrowed view for comparison without cloning the value payload.
    #[inline]
    pub fn as_ref(&self) -> DatomRef<'_> {
        DatomRef {
            e: self.e,
            a: self.a,
            t: self.t,
            flags: self.flags,
            tag: self.v.tag,
            v: &self.v.bytes,
        }
    }

    // -- range-scan lower bounds --------------------------------------------

    /// Lower bound of the EAVT run for one entity.
    pub fn min_for_entity(e: EntityId) -> Self {
        Self::new(e, AttributeId::MIN, TxId::max(), false, Value::null())
    }

    /// Lower bound of the EAVT run for one (entity, attribute) pair.
    pub fn min_for_entity_attr(e: EntityId, a: AttributeId) -> Self {
        Self::new(e, a, TxId::max(), false, Value::null())
    }

    /// Lower bound of the AEVT run for one attribute.
    pub fn min_for_attr(a: AttributeId) -> Self {
        Self::new(EntityId(0), a, TxId::max(), false, Value::null())
    }

    /// Lower bound of the AVET run for one (attribute, value) pair.
    pub fn min_for_attr_value(a: AttributeId, v: Value) -> Self {
        Self::new(EntityId(0), a, TxId::max(), false, v)
    }

    /// Lower bound of the VAET run for references to one entity.
    pub fn min_for_ref(target: EntityId) -> Self {
        Self::new(
            EntityId(0),
            AttributeId::MIN,
            TxId::max(),
            false,
            Value::reference(target),
        )
    }

    /// Lower bound of the TxLog run for one transaction.
    pub fn min_for_tx(t: TxId) -> Self {
        Self::new(EntityId(0), AttributeId::MIN, t, false, Value::null())
    }
}

impl fmt::Debug for Datom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = if self.is_added() { "+" } else { "-" };
        write!(
            f,
            "[{op} e:{:x} a:{} {:?} t:{}]",
            self.e.as_u64(),
            self.a.as_u16(),
            self.v,
            self.t.sequence()
        )
    }
}

/// Borrowed datom view: the comparison-relevant fields plus a value span.
///
/// Node binary searches compare rows against targets through this view so
/// no row is materialized during a lookup.
#[derive(Copy, Clone)]
pub struct DatomRef<'a> {
    pub e: EntityId,
    pub a: AttributeId,
    pub t: TxId,
    pub flags: DatomFlags,
    pub tag: ValueTag,
    pub v: &'a [u8],
}

impl DatomRef<'_> {
    /// Materialize an owned datom from this view.
    pub fn to_datom(&self) -> Datom {
        Datom {
            e: self.e,
            a: self.a,
            t: self.t,
            flags: self.flags,
            v: Value::from_parts(self.tag, self.v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Partition;

    #[test]
    fn test_flags_round_trip() {
        let f = DatomFlags::new(true, ValueTag::Str);
        assert!(f.is_added());
        assert!(!f.is_inlined());
        assert_eq!(f.value_tag(), Some(ValueTag::Str));

        let g = f.with_inlined(true);
        assert!(g.is_inlined());
        assert_eq!(g.with_inlined(false), f);
    }

    #[test]
    fn test_retraction_keeps_value() {
        let e = EntityId::new(Partition::Entity, 1);
        let d = Datom::retract(e, AttributeId(3), Value::str("gone"));
        assert!(d.is_retraction());
        assert_eq!(d.v.as_str(), Some("gone"));
    }

    #[test]
    fn test_datom_ref_round_trip() {
        let e = EntityId::new(Partition::Entity, 5);
        let d = Datom::new(e, AttributeId(2), TxId::from_sequence(9), true, Value::i64(-4));
        assert_eq!(d.as_ref().to_datom(), d);
    }
}
