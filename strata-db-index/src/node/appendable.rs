//! Appendable node: the mutable builder form.

use super::DataNode;
use std::cmp::Ordering;
use strata_db_core::comparator::DatomOrd;
use strata_db_core::datom::{Datom, DatomFlags, DatomRef};
use strata_db_core::ids::{AttributeId, EntityId, TxId};
use strata_db_core::value::ValueTag;

/// How [`merge`] treats retractions and exact-key collisions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MergeMode {
    /// Keep everything; on an identical full key the batch datom wins once.
    /// Used by the history and tx-log indexes.
    Preserve,
    /// A batch retraction annihilates the matching stored assert (both are
    /// dropped) and retractions are never emitted. Used by the current
    /// indexes, whose batches carry retractions re-stamped with the target
    /// datom's transaction so the pair is adjacent under every ordering.
    Current,
}

/// Growable parallel columns; the only mutable node form.
///
/// Rows are appended, sorted and split here, then frozen with [`pack`].
/// Column layout mirrors [`DataNode`]: values go into one shared blob
/// buffer addressed by `(offset, length)` pairs.
///
/// [`pack`]: Appendable::pack
#[derive(Default)]
pub struct Appendable {
    entity_ids: Vec<u64>,
    attribute_ids: Vec<u16>,
    tx_ids: Vec<u64>,
    flags: Vec<u8>,
    val_offsets: Vec<u32>,
    val_lengths: Vec<u32>,
    blob: Vec<u8>,
}

impl Appendable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(rows: usize) -> Self {
        Self {
            entity_ids: Vec::with_capacity(rows),
            attribute_ids: Vec::with_capacity(rows),
            tx_ids: Vec::with_capacity(rows),
            flags: Vec::with_capacity(rows),
            val_offsets: Vec::with_capacity(rows),
            val_lengths: Vec::with_capacity(rows),
            blob: Vec::new(),
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

    /// Append one datom's fields to every column.
    pub fn push(&mut self, datom: &Datom) {
        self.entity_ids.push(datom.e.as_u64());
        self.attribute_ids.push(datom.a.as_u16());
        self.tx_ids.push(datom.t.as_u64());
        self.flags.push(datom.flags.as_u8());
        self.val_offsets.push(self.blob.len() as u32);
        self.val_lengths.push(datom.v.bytes.len() as u32);
        self.blob.extend_from_slice(&datom.v.bytes);
    }

    fn push_ref(&mut self, row: &DatomRef<'_>) {
        self.entity_ids.push(row.e.as_u64());
        self.attribute_ids.push(row.a.as_u16());
        self.tx_ids.push(row.t.as_u64());
        self.flags.push(row.flags.as_u8());
        self.val_offsets.push(self.blob.len() as u32);
        self.val_lengths.push(row.v.len() as u32);
        self.blob.extend_from_slice(row.v);
    }

    /// Borrowed view of one row.
    #[inline]
    pub fn datom_ref(&self, idx: usize) -> DatomRef<'_> {
        let flags = DatomFlags::from_u8(self.flags[idx]);
        let start = self.val_offsets[idx] as usize;
        let end = start + self.val_lengths[idx] as usize;
        DatomRef {
            e: EntityId::from_u64(self.entity_ids[idx]),
            a: AttributeId::from_u16(self.attribute_ids[idx]),
            t: TxId::from_u64(self.tx_ids[idx]),
            flags,
            tag: flags.value_tag().unwrap_or(ValueTag::Blob),
            v: &self.blob[start..end],
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

    /// Sort every column in lock-step under `ord`.
    ///
    /// Columns are typed arrays of different widths, so rows can't be
    /// swapped in place. Instead a `0..n` index permutation is sorted with
    /// a comparator that dereferences into the columns, then each column is
    /// gathered once into a fresh array (the blob is rebuilt in row order,
    /// which also compacts it).
    pub fn sort(&mut self, ord: &DatomOrd) {
        let n = self.len();
        let mut perm: Vec<u32> = (0..n as u32).collect();
        perm.sort_by(|&x, &y| ord.cmp_ref(&self.datom_ref(x as usize), &self.datom_ref(y as usize)));

        let mut sorted = Appendable::with_capacity(n);
        for &i in &perm {
            sorted.push_ref(&self.datom_ref(i as usize));
        }
        *self = sorted;
    }

    /// Split at the midpoint into two builders covering `[0, mid)` and
    /// `[mid, len)`.
    pub fn split(self) -> (Appendable, Appendable) {
        let mid = self.len() / 2;
        let mut left = Appendable::with_capacity(mid);
        let mut right = Appendable::with_capacity(self.len() - mid);
        for i in 0..mid {
            left.push_ref(&self.datom_ref(i));
        }
        for i in mid..self.len() {
            right.push_ref(&self.datom_ref(i));
        }
        (left, right)
    }

    /// Freeze the columns into an immutable [`DataNode`].
    pub fn pack(self) -> DataNode {
        DataNode::from_columns(
            self.entity_ids.into_boxed_slice(),
            self.attribute_ids.into_boxed_slice(),
            self.tx_ids.into_boxed_slice(),
            self.flags.into_boxed_slice(),
            self.val_offsets.into_boxed_slice(),
            self.val_lengths.into_boxed_slice(),
            self.blob.into_boxed_slice(),
        )
    }
}

/// Two-pointer merge of a packed run and a sorted batch.
///
/// Both inputs must already be sorted by `ord`. On an exact key tie the
/// batch (newer) datom wins exactly once, matching the tx-descending
/// comparator convention; `mode` decides what a tie means and whether
/// retractions survive (see [`MergeMode`]).
pub fn merge(existing: &DataNode, batch: &[Datom], ord: &DatomOrd, mode: MergeMode) -> Appendable {
    let mut out = Appendable::with_capacity(existing.len() + batch.len());
    let mut i = 0;
    let mut j = 0;

    while i < existing.len() && j < batch.len() {
        let a = existing.datom_ref(i);
        let b = batch[j].as_ref();

        let tie = match mode {
            MergeMode::Preserve => ord.cmp_ref(&a, &b) == Ordering::Equal,
            MergeMode::Current => ord.cmp_key(&a, &b) == Ordering::Equal && a.t == b.t,
        };
        if tie {
            // Batch wins; in Current mode a retraction cancels the stored
            // assert, so neither side is emitted.
            if !(mode == MergeMode::Current && b.flags.is_retraction()) {
                out.push(&batch[j]);
            }
            i += 1;
            j += 1;
            continue;
        }

        if ord.cmp_ref(&a, &b) != Ordering::Greater {
            out.push_ref(&a);
            i += 1;
        } else {
            if !(mode == MergeMode::Current && b.flags.is_retraction()) {
                out.push(&batch[j]);
            }
            j += 1;
        }
    }

    while i < existing.len() {
        out.push_ref(&existing.datom_ref(i));
        i += 1;
    }
    while j < batch.len() {
        if !(mode == MergeMode::Current && batch[j].is_retraction()) {
            out.push(&batch[j]);
        }
        j += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_db_core::comparator::IndexType;
    use strata_db_core::ids::{AttributeId, EntityId, Partition, TxId};
    use strata_db_core::registry::AttributeRegistry;
    use strata_db_core::value::Value;

    fn ord() -> DatomOrd {
        IndexType::EavtHistory.comparator(Arc::new(AttributeRegistry::new()))
    }

    fn make(e: u64, a: u16, v: u64, t: u64) -> Datom {
        Datom::new(
            EntityId::new(Partition::Entity, e),
            AttributeId(a),
            TxId::from_sequence(t),
            true,
            Value::u64(v),
        )
    }

    fn collect(node: &Appendable) -> Vec<Datom> {
        (0..node.len()).map(|i| node.get(i)).collect()
    }

    #[test]
    fn test_sort_reorders_all_columns_in_lock_step() {
        let ord = ord();
        let mut node = Appendable::new();
        let datoms = [make(3, 1, 30, 1), make(1, 2, 10, 2), make(2, 1, 20, 3)];
        for d in &datoms {
            node.push(d);
        }
        node.sort(&ord);

        let mut expected: Vec<Datom> = datoms.to_vec();
        expected.sort_by(|a, b| ord.cmp(a, b));
        assert_eq!(collect(&node), expected);
    }

    #[test]
    fn test_sort_is_stable_permutation() {
        // Values of different lengths force real blob rebuilding.
        let ord = ord();
        let mut node = Appendable::new();
        let d1 = Datom::new(
            EntityId::new(Partition::Entity, 2),
            AttributeId(1),
            TxId::from_sequence(1),
            true,
            Value::str("a-longer-string-value"),
        );
        let d2 = Datom::new(
            EntityId::new(Partition::Entity, 1),
            AttributeId(1),
            TxId::from_sequence(1),
            true,
            Value::str("x"),
        );
        node.push(&d1);
        node.push(&d2);
        node.sort(&ord);
        assert_eq!(collect(&node), vec![d2, d1]);
    }

    #[test]
    fn test_split_at_midpoint_preserves_sequence() {
        let mut node = Appendable::new();
        let datoms: Vec<_> = (0..7).map(|i| make(i, 1, i, 1)).collect();
        for d in &datoms {
            node.push(d);
        }
        let (left, right) = node.split();
        assert_eq!(left.len(), 3);
        assert_eq!(right.len(), 4);
        let mut rejoined = collect(&left);
        rejoined.extend(collect(&right));
        assert_eq!(rejoined, datoms);
    }

    #[test]
    fn test_merge_disjoint_is_sorted_union() {
        let ord = ord();
        let existing: Vec<_> = [0u64, 2, 4, 6].iter().map(|&e| make(e, 1, e, 1)).collect();
        let batch: Vec<_> = [1u64, 3, 5].iter().map(|&e| make(e, 1, e, 2)).collect();

        let mut packed = Appendable::new();
        for d in &existing {
            packed.push(d);
        }
        let merged = merge(&packed.pack(), &batch, &ord, MergeMode::Preserve);

        assert_eq!(merged.len(), 7);
        let out = collect(&merged);
        for pair in out.windows(2) {
            assert_eq!(ord.cmp(&pair[0], &pair[1]), Ordering::Less);
        }
    }

    #[test]
    fn test_merge_exact_tie_newer_wins_once() {
        let ord = ord();
        let shared = make(1, 1, 10, 1);
        let mut packed = Appendable::new();
        packed.push(&shared);
        let merged = merge(&packed.pack(), &[shared.clone()], &ord, MergeMode::Preserve);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.get(0), shared);
    }

    #[test]
    fn test_current_mode_retraction_annihilates_assert() {
        let ord = IndexType::EavtCurrent.comparator(Arc::new(AttributeRegistry::new()));
        let assert_d = make(1, 1, 10, 1);
        let keep = make(2, 1, 20, 1);
        let mut packed = Appendable::new();
        packed.push(&assert_d);
        packed.push(&keep);

        // Tombstone re-stamped with the target's tx.
        let tomb = Datom::new(assert_d.e, assert_d.a, assert_d.t, false, assert_d.v.clone());
        let merged = merge(&packed.pack(), &[tomb], &ord, MergeMode::Current);
        assert_eq!(collect(&merged), vec![keep]);
    }

    #[test]
    fn test_current_mode_drops_lone_retraction() {
        let ord = IndexType::EavtCurrent.comparator(Arc::new(AttributeRegistry::new()));
        let keep = make(5, 1, 50, 1);
        let mut packed = Appendable::new();
        packed.push(&keep);

        let lone = Datom::retract(
            EntityId::new(Partition::Entity, 9),
            AttributeId(1),
            Value::u64(90),
        );
        let merged = merge(&packed.pack(), &[lone], &ord, MergeMode::Current);
        assert_eq!(collect(&merged), vec![keep]);
    }

    #[test]
    fn test_pack_round_trip() {
        let mut node = Appendable::new();
        let datoms: Vec<_> = (0..5).map(|i| make(i, 1, i * 10, i)).collect();
        for d in &datoms {
            node.push(d);
        }
        let packed = node.pack();
        let reread: Vec<_> = (0..packed.len()).map(|i| packed.get(i)).collect();
        assert_eq!(reread, datoms);
    }
}
