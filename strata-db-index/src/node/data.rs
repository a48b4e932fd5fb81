//! Packed data node: an immutable columnar run of sorted datoms.

use std::cmp::Ordering;
use strata_db_core::comparator::DatomOrd;
use strata_db_core::datom::{Datom, DatomFlags, DatomRef};
use strata_db_core::ids::{AttributeId, EntityId, TxId};
use strata_db_core::value::ValueTag;

/// A contiguous sorted run of datoms stored as parallel columns.
///
/// Produced by [`Appendable::pack`](super::Appendable::pack) or decoded from
/// the wire format; immutable either way. Values live in one shared blob
/// column addressed by per-row `(offset, length)` pairs, so reading a row
/// never copies until a [`Datom`] is materialized.
pub struct DataNode {
    entity_ids: Box<[u64]>,
    attribute_ids: Box<[u16]>,
    tx_ids: Box<[u64]>,
    flags: Box<[u8]>,
    val_offsets: Box<[u32]>,
    val_lengths: Box<[u32]>,
    blob: Box<[u8]>,
}

impl DataNode {
    /// Assemble a node from already-validated columns. Callers (the builder
    /// and the wire decoder) guarantee equal column lengths, in-bounds value
    /// spans, and valid tag nibbles.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_columns(
        entity_ids: Box<[u64]>,
        attribute_ids: Box<[u16]>,
        tx_ids: Box<[u64]>,
        flags: Box<[u8]>,
        val_offsets: Box<[u32]>,
        val_lengths: Box<[u32]>,
        blob: Box<[u8]>,
    ) -> Self {
        debug_assert_eq!(entity_ids.len(), attribute_ids.len());
        debug_assert_eq!(entity_ids.len(), tx_ids.len());
        debug_assert_eq!(entity_ids.len(), flags.len());
        debug_assert_eq!(entity_ids.len(), val_offsets.len());
        debug_assert_eq!(entity_ids.len(), val_lengths.len());
        Self {
            entity_ids,
            attribute_ids,
            tx_ids,
            flags,
            val_offsets,
            val_lengths,
            blob,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entity_ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty()
    }

    #[inline]
    pub fn entity_id(&self, idx: usize) -> EntityId {
        EntityId::from_u64(self.entity_ids[idx])
    }

    #[inline]
    pub fn attribute_id(&self, idx: usize) -> AttributeId {
        AttributeId::from_u16(self.attribute_ids[idx])
    }

    #[inline]
    pub fn tx_id(&self, idx: usize) -> TxId {
        TxId::from_u64(self.tx_ids[idx])
    }

    #[inline]
    pub fn flags_at(&self, idx: usize) -> DatomFlags {
        DatomFlags::from_u8(self.flags[idx])
    }

    /// The value bytes of one row, borrowed from the blob column.
    #[inline]
    pub fn value(&self, idx: usize) -> &[u8] {
        let start = self.val_offsets[idx] as usize;
        let end = start + self.val_lengths[idx] as usize;
        &self.blob[start..end]
    }

    /// Borrowed view of one row. No allocation; the row's value span points
    /// into the blob column.
    #[inline]
    pub fn datom_ref(&self, idx: usize) -> DatomRef<'_> {
        let flags = self.flags_at(idx);
        DatomRef {
            e: self.entity_id(idx),
            a: self.attribute_id(idx),
            t: self.tx_id(idx),
            flags,
            // Tag nibbles are validated when the node is built or decoded.
            tag: flags.value_tag().unwrap_or(ValueTag::Blob),
            v: self.value(idx),
        }
    }

    /// Materialize one row as an owned datom.
    pub fn get(&self, idx: usize) -> Datom {
        self.datom_ref(idx).to_datom()
    }

    pub fn last_datom(&self) -> Option<Datom> {
        if self.is_empty() {
            None
        } else {
            Some(self.get(self.len() - 1))
        }
    }

    /// Binary-search the insertion point of `target` within `[start, end)`:
    /// the first position whose row is not less than the target under `ord`.
    ///
    /// Compares against the node's own columns through [`DatomRef`]; no row
    /// is materialized.
    pub fn find(&self, ord: &DatomOrd, target: &DatomRef<'_>, start: usize, end: usize) -> usize {
        let mut lo = start;
        let mut hi = end.min(self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if ord.cmp_ref(&self.datom_ref(mid), target) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Blob column accessor for the wire encoder.
    #[inline]
    pub(crate) fn blob(&self) -> &[u8] {
        &self.blob
    }

    #[inline]
    pub(crate) fn val_offset(&self, idx: usize) -> u32 {
        self.val_offsets[idx]
    }

    #[inline]
    pub(crate) fn val_length(&self, idx: usize) -> u32 {
        self.val_lengths[idx]
    }

    /// Approximate resident size for cache weighing.
    pub fn byte_size(&self) -> usize {
        self.len() * (8 + 2 + 8 + 1 + 4 + 4) + self.blob.len() + std::mem::size_of::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::super::Appendable;
    use std::sync::Arc;
    use strata_db_core::comparator::IndexType;
    use strata_db_core::datom::Datom;
    use strata_db_core::ids::{AttributeId, EntityId, Partition, TxId};
    use strata_db_core::registry::AttributeRegistry;
    use strata_db_core::value::Value;

    fn make(e: u64, a: u16, v: u64, t: u64) -> Datom {
        Datom::new(
            EntityId::new(Partition::Entity, e),
            AttributeId(a),
            TxId::from_sequence(t),
            true,
            Value::u64(v),
        )
    }

    fn packed(datoms: &[Datom]) -> super::DataNode {
        let mut node = Appendable::new();
        for d in datoms {
            node.push(d);
        }
        node.pack()
    }

    #[test]
    fn test_column_accessors() {
        let d = make(3, 7, 42, 5);
        let node = packed(&[d.clone()]);
        assert_eq!(node.len(), 1);
        assert_eq!(node.entity_id(0), d.e);
        assert_eq!(node.attribute_id(0), d.a);
        assert_eq!(node.tx_id(0), d.t);
        assert_eq!(node.value(0), &*d.v.bytes);
        assert_eq!(node.get(0), d);
        assert_eq!(node.last_datom(), Some(d));
    }

    #[test]
    fn test_find_locates_insertion_point() {
        let ord = IndexType::EavtCurrent.comparator(Arc::new(AttributeRegistry::new()));
        let datoms: Vec<_> = (0..10).map(|i| make(i * 2, 1, 1, 1)).collect();
        let node = packed(&datoms);

        // Present key: exact position.
        let target = make(6, 1, 1, 1);
        assert_eq!(node.find(&ord, &target.as_ref(), 0, node.len()), 3);

        // Absent key: position of the next greater row.
        let target = make(7, 1, 1, 1);
        assert_eq!(node.find(&ord, &target.as_ref(), 0, node.len()), 4);

        // Beyond the last row.
        let target = make(100, 1, 1, 1);
        assert_eq!(node.find(&ord, &target.as_ref(), 0, node.len()), 10);
    }

    #[test]
    fn test_find_respects_window() {
        let ord = IndexType::EavtCurrent.comparator(Arc::new(AttributeRegistry::new()));
        let datoms: Vec<_> = (0..10).map(|i| make(i, 1, 1, 1)).collect();
        let node = packed(&datoms);
        let target = make(2, 1, 1, 1);
        // Searching [5, 10) can't see position 2.
        assert_eq!(node.find(&ord, &target.as_ref(), 5, node.len()), 5);
    }
}
