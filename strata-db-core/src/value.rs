//! Datom values: a type tag plus a canonical byte encoding.
//!
//! Values are stored and compared as bytes so index nodes never need to
//! materialize typed objects. Each tag defines a canonical encoding whose
//! byte comparison (after tag-aware decoding) yields the natural order for
//! that type. Numeric payloads are big-endian so their encoded form sorts
//! the same way the decoded number does.

use crate::ids::EntityId;
use std::cmp::Ordering;
use std::fmt;

/// Closed set of value types carried by a datom.
///
/// The discriminant participates in ordering: values of different tags
/// compare by tag first, so mixed-type index runs still have a total order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueTag {
    /// Absent / sentinel value. Sorts before everything.
    Null = 0,
    /// Unsigned 64-bit integer, 8 bytes big-endian.
    U64 = 1,
    /// Signed 64-bit integer, 8 bytes big-endian with the sign bit flipped
    /// at comparison time.
    I64 = 2,
    /// IEEE-754 double, 8 bytes big-endian, compared with `f64::total_cmp`.
    F64 = 3,
    /// Boolean, 1 byte.
    Bool = 4,
    /// UTF-8 string, variable length.
    Str = 5,
    /// Opaque bytes, variable length, bytewise order.
    Blob = 6,
    /// Reference to another entity, 8 bytes big-endian. Sorts last so the
    /// all-ones ref doubles as the maximum value sentinel.
    Ref = 7,
}

impl ValueTag {
    /// Decode a tag from its wire discriminant.
    #[inline]
    pub fn from_u8(v: u8) -> Option<ValueTag> {
        match v {
            0 => Some(ValueTag::Null),
            1 => Some(ValueTag::U64),
            2 => Some(ValueTag::I64),
            3 => Some(ValueTag::F64),
            4 => Some(ValueTag::Bool),
            5 => Some(ValueTag::Str),
            6 => Some(ValueTag::Blob),
            7 => Some(ValueTag::Ref),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueTag::Null => "null",
            ValueTag::U64 => "u64",
            ValueTag::I64 => "i64",
            ValueTag::F64 => "f64",
            ValueTag::Bool => "bool",
            ValueTag::Str => "str",
            ValueTag::Blob => "blob",
            ValueTag::Ref => "ref",
        }
    }
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compare two value payloads under a tag's canonical order.
///
/// Both spans must be encodings produced for `tag`; short or malformed
/// spans fall back to bytewise comparison rather than panicking, since
/// comparators cannot fail mid-sort.
pub fn compare_tagged(tag: ValueTag, a: &[u8], b: &[u8]) -> Ordering {
    match tag {
        ValueTag::Null => Ordering::Equal,
        ValueTag::U64 | ValueTag::Ref => match (read_u64(a), read_u64(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => a.cmp(b),
        },
        ValueTag::I64 => match (read_u64(a), read_u64(b)) {
            (Some(x), Some(y)) => (x as i64).cmp(&(y as i64)),
            _ => a.cmp(b),
        },
        ValueTag::F64 => match (read_u64(a), read_u64(b)) {
            (Some(x), Some(y)) => f64::from_bits(x).total_cmp(&f64::from_bits(y)),
            _ => a.cmp(b),
        },
        ValueTag::Bool | ValueTag::Str | ValueTag::Blob => a.cmp(b),
    }
}

#[inline]
fn read_u64(span: &[u8]) -> Option<u64> {
    span.try_into().ok().map(u64::from_be_bytes)
}

/// A datom value: tag plus canonical byte payload.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Value {
    pub tag: ValueTag,
    pub bytes: Box<[u8]>,
}

impl Value {
    /// The null sentinel; sorts before every other value.
    pub fn null() -> Self {
        Self {
            tag: ValueTag::Null,
            bytes: Box::new([]),
        }
    }

    /// The maximum sentinel: an all-ones reference, which sorts after
    /// every other value (`Ref` is the highest tag).
    pub fn max_sentinel() -> Self {
        Self {
            tag: ValueTag::Ref,
            bytes: Box::new([0xFF; 8]),
        }
    }

    pub fn u64(v: u64) -> Self {
        Self {
            tag: ValueTag::U64,
            bytes: Box::new(v.to_be_bytes()),
        }
    }

    pub fn i64(v: i64) -> Self {
        Self {
            tag: ValueTag::I64,
            bytes: Box::new((v as u64).to_be_bytes()),
        }
    }

    pub fn f64(v: f64) -> Self {
        Self {
            tag: ValueTag::F64,
            bytes: Box::new(v.to_bits().to_be_bytes()),
        }
    }

    pub fn bool(v: bool) -> Self {
        Self {
            tag: ValueTag::Bool,
            bytes: Box::new([v as u8]),
        }
    }

    pub fn str(v: impl AsRef<str>) -> Self {
        Self {
            tag: ValueTag::Str,
            bytes: v.as_ref().as_bytes().into(),
        }
    }

    pub fn blob(v: impl Into<Box<[u8]>>) -> Self {
        Self {
            tag: ValueTag::Blob,
            bytes: v.into(),
        }
    }

    /// A reference to another entity.
    pub fn reference(e: EntityId) -> Self {
        Self {
            tag: ValueTag::Ref,
            bytes: Box::new(e.as_u64().to_be_bytes()),
        }
    }

    /// Rebuild a value from a tag and a raw payload span.
    pub fn from_parts(tag: ValueTag, bytes: &[u8]) -> Self {
        Self {
            tag,
            bytes: bytes.into(),
        }
    }

    #[inline]
    pub fn is_ref(&self) -> bool {
        self.tag == ValueTag::Ref
    }

    /// Decode a reference payload back to an entity id.
    pub fn as_entity_id(&self) -> Option<EntityId> {
        if self.tag != ValueTag::Ref {
            return None;
        }
        read_u64(&self.bytes).map(EntityId::from_u64)
    }

    pub fn as_u64(&self) -> Option<u64> {
        (self.tag == ValueTag::U64)
            .then(|| read_u64(&self.bytes))
            .flatten()
    }

    pub fn as_i64(&self) -> Option<i64> {
        (self.tag == ValueTag::I64)
            .then(|| read_u64(&self.bytes).map(|v| v as i64))
            .flatten()
    }

    pub fn as_str(&self) -> Option<&str> {
        (self.tag == ValueTag::Str)
            .then(|| std::str::from_utf8(&self.bytes).ok())
            .flatten()
    }

    /// Compare two values: tag discriminant first, then payload under the
    /// shared tag's canonical order.
    pub fn compare(&self, other: &Value) -> Ordering {
        (self.tag as u8)
            .cmp(&(other.tag as u8))
            .then_with(|| compare_tagged(self.tag, &self.bytes, &other.bytes))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag {
            ValueTag::Null => write!(f, "null"),
            ValueTag::U64 => write!(f, "{:?}u64", self.as_u64()),
            ValueTag::I64 => write!(f, "{:?}i64", self.as_i64()),
            ValueTag::F64 => write!(
                f,
                "{:?}f64",
                read_u64(&self.bytes).map(f64::from_bits)
            ),
            ValueTag::Bool => write!(f, "{:?}", self.bytes.first().map(|b| *b != 0)),
            ValueTag::Str => write!(f, "{:?}", self.as_str()),
            ValueTag::Blob => write!(f, "blob[{}]", self.bytes.len()),
            ValueTag::Ref => write!(f, "ref({:?})", self.as_entity_id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Partition;

    #[test]
    fn test_numeric_order_matches_encoding_order() {
        assert_eq!(Value::u64(1).compare(&Value::u64(2)), Ordering::Less);
        assert_eq!(Value::i64(-5).compare(&Value::i64(3)), Ordering::Less);
        assert_eq!(Value::f64(-1.5).compare(&Value::f64(0.25)), Ordering::Less);
        assert_eq!(Value::u64(9).compare(&Value::u64(9)), Ordering::Equal);
    }

    #[test]
    fn test_cross_tag_order_is_by_discriminant() {
        assert_eq!(Value::null().compare(&Value::u64(0)), Ordering::Less);
        assert_eq!(
            Value::str("zzz").compare(&Value::reference(EntityId(1))),
            Ordering::Less
        );
    }

    #[test]
    fn test_string_order() {
        assert_eq!(Value::str("abc").compare(&Value::str("abd")), Ordering::Less);
        assert_eq!(Value::str("ab").compare(&Value::str("abc")), Ordering::Less);
    }

    #[test]
    fn test_max_sentinel_dominates() {
        let max = Value::max_sentinel();
        for v in [
            Value::null(),
            Value::u64(u64::MAX),
            Value::str("\u{10FFFF}"),
            Value::reference(EntityId(u64::MAX - 1)),
        ] {
            assert_eq!(v.compare(&max), Ordering::Less);
        }
    }

    #[test]
    fn test_reference_round_trip() {
        let e = EntityId::new(Partition::Entity, 99);
        let v = Value::reference(e);
        assert!(v.is_ref());
        assert_eq!(v.as_entity_id(), Some(e));
    }
}
