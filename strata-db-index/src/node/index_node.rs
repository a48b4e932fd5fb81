//! Packed index node: an immutable internal tree node.

use super::{Appendable, DataNode, Node};
use strata_db_core::comparator::{DatomOrd, IndexType};
use strata_db_core::datom::{Datom, DatomRef};

/// An internal node: per-child boundary markers plus child references.
///
/// The marker of child *i* is that child's last datom, stored columnar in a
/// [`DataNode`] so marker searches reuse the leaf binary search. For
/// routing, the final child's boundary is treated as +∞: everything beyond
/// the last stored marker belongs to it.
///
/// Children are usually [`Node::Reference`]s; a subtree the current
/// operation never touches is carried by key alone and never loaded.
pub struct IndexNode {
    markers: DataNode,
    child_counts: Box<[u64]>,
    /// Prefix sums of `child_counts`; `child_offsets[i]` is the number of
    /// datoms in the subtree left of child *i*.
    child_offsets: Box<[u64]>,
    children: Box<[Node]>,
    index: IndexType,
}

impl IndexNode {
    /// Build an index node over `children` with their datom counts and
    /// boundary markers (one marker per child, the child's last datom).
    pub fn new(
        index: IndexType,
        children: Vec<Node>,
        child_counts: Vec<u64>,
        markers: &[Datom],
    ) -> Self {
        debug_assert_eq!(children.len(), child_counts.len());
        debug_assert_eq!(children.len(), markers.len());

        let mut marker_columns = Appendable::with_capacity(markers.len());
        for m in markers {
            marker_columns.push(m);
        }

        let mut child_offsets = Vec::with_capacity(child_counts.len());
        let mut total = 0u64;
        for &count in &child_counts {
            child_offsets.push(total);
            total += count;
        }

        Self {
            markers: marker_columns.pack(),
            child_counts: child_counts.into_boxed_slice(),
            child_offsets: child_offsets.into_boxed_slice(),
            children: children.into_boxed_slice(),
            index,
        }
    }

    /// Reassemble from decoded parts (wire decoder).
    pub(crate) fn from_parts(
        index: IndexType,
        markers: DataNode,
        child_counts: Box<[u64]>,
        children: Box<[Node]>,
    ) -> Self {
        let mut child_offsets = Vec::with_capacity(child_counts.len());
        let mut total = 0u64;
        for &count in child_counts.iter() {
            child_offsets.push(total);
            total += count;
        }
        Self {
            markers,
            child_counts,
            child_offsets: child_offsets.into_boxed_slice(),
            children,
            index,
        }
    }

    /// Total datoms beneath this node.
    pub fn len(&self) -> u64 {
        self.child_offsets.last().copied().unwrap_or(0)
            + self.child_counts.last().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    #[inline]
    pub fn child_at(&self, idx: usize) -> &Node {
        &self.children[idx]
    }

    #[inline]
    pub fn child_len(&self, idx: usize) -> u64 {
        self.child_counts[idx]
    }

    /// Datoms in subtrees left of child `idx`; accumulated during descent
    /// to turn a leaf position into a tree position.
    #[inline]
    pub fn child_base_offset(&self, idx: usize) -> u64 {
        self.child_offsets[idx]
    }

    /// The boundary marker (last datom) of child `idx`.
    pub fn marker(&self, idx: usize) -> Datom {
        self.markers.get(idx)
    }

    #[inline]
    pub fn marker_ref(&self, idx: usize) -> DatomRef<'_> {
        self.markers.datom_ref(idx)
    }

    /// The last datom beneath this node (the final child's marker).
    pub fn last_datom(&self) -> Option<Datom> {
        self.markers.last_datom()
    }

    /// Which index ordering this tree is sorted by.
    pub fn index_type(&self) -> IndexType {
        self.index
    }

    /// Locate the child owning `target`: the first child whose marker is
    /// not less than the target, clamped to the final child (its boundary
    /// is +∞).
    pub fn find_child(&self, ord: &DatomOrd, target: &DatomRef<'_>) -> usize {
        let idx = self.markers.find(ord, target, 0, self.markers.len());
        idx.min(self.child_count().saturating_sub(1))
    }

    /// Approximate resident size for cache weighing.
    pub fn byte_size(&self) -> usize {
        self.markers.byte_size()
            + self.children.len() * (8 + 8 + std::mem::size_of::<Node>())
            + std::mem::size_of::<Self>()
    }
}

// Used by the wire encoder to walk markers as plain columns.
impl IndexNode {
    pub(crate) fn markers(&self) -> &DataNode {
        &self.markers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;
    use std::sync::Arc;
    use strata_db_core::ids::{AttributeId, EntityId, Partition, StoreKey, TxId};
    use strata_db_core::registry::AttributeRegistry;
    use strata_db_core::value::Value;

    fn make(e: u64) -> Datom {
        Datom::new(
            EntityId::new(Partition::Entity, e),
            AttributeId(1),
            TxId::from_sequence(1),
            true,
            Value::u64(e),
        )
    }

    fn node() -> IndexNode {
        // Three children covering e <= 10, e <= 20, e <= 30.
        IndexNode::new(
            IndexType::EavtCurrent,
            (0..3)
                .map(|i| Node::reference(StoreKey::new(Partition::Index, i), NodeKind::Data))
                .collect(),
            vec![5, 7, 3],
            &[make(10), make(20), make(30)],
        )
    }

    #[test]
    fn test_len_and_offsets() {
        let ix = node();
        assert_eq!(ix.len(), 15);
        assert_eq!(ix.child_base_offset(0), 0);
        assert_eq!(ix.child_base_offset(1), 5);
        assert_eq!(ix.child_base_offset(2), 12);
        assert_eq!(ix.last_datom(), Some(make(30)));
    }

    #[test]
    fn test_find_child_routes_by_marker() {
        let ix = node();
        let ord = IndexType::EavtCurrent.comparator(Arc::new(AttributeRegistry::new()));

        assert_eq!(ix.find_child(&ord, &make(3).as_ref()), 0);
        // Boundary datom belongs to the child it is the marker of.
        assert_eq!(ix.find_child(&ord, &make(10).as_ref()), 0);
        assert_eq!(ix.find_child(&ord, &make(11).as_ref()), 1);
        // Beyond every marker: clamped to the final child.
        assert_eq!(ix.find_child(&ord, &make(99).as_ref()), 2);
    }
}
