//! Columnar tree nodes.
//!
//! A node instance moves through the state machine
//! `Appendable -> Packed -> Referenced`:
//!
//! - [`Appendable`] is the only mutable form, a builder of parallel growable
//!   columns. `pack()` freezes it into a [`DataNode`].
//! - [`DataNode`] (packed leaf) and [`IndexNode`] (packed internal node) are
//!   immutable; older snapshots may still reference them, so they are never
//!   touched again once built.
//! - [`Reference`] stands in for a packed node that lives in the node store;
//!   the resolver swaps it for the decoded form on demand.
//!
//! Mutation of a packed form is unrepresentable: the enum has no mutable
//! variants, and the builder is a separate type.

mod appendable;
mod data;
mod index_node;

pub use appendable::{merge, Appendable, MergeMode};
pub use data::DataNode;
pub use index_node::IndexNode;

use std::fmt;
use std::sync::Arc;
use strata_db_core::ids::StoreKey;

/// What a [`Reference`] points at, and the wire tag of a child entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Data,
    Index,
}

/// A by-key stand-in for a packed node held in the node store.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Reference {
    pub key: StoreKey,
    pub kind: NodeKind,
}

/// One tree node: packed leaf, packed internal node, or by-key reference.
///
/// Cheap to clone; packed variants are `Arc`-backed so snapshots and the
/// node cache share the same allocation.
#[derive(Clone)]
pub enum Node {
    Data(Arc<DataNode>),
    Index(Arc<IndexNode>),
    Reference(Reference),
}

impl Node {
    pub fn reference(key: StoreKey, kind: NodeKind) -> Self {
        Node::Reference(Reference { key, kind })
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Data(_) => NodeKind::Data,
            Node::Index(_) => NodeKind::Index,
            Node::Reference(r) => r.kind,
        }
    }

    /// The store key, for reference nodes.
    pub fn store_key(&self) -> Option<StoreKey> {
        match self {
            Node::Reference(r) => Some(r.key),
            _ => None,
        }
    }

    /// Approximate resident size, used by the node-cache weigher.
    pub fn byte_size(&self) -> usize {
        match self {
            Node::Data(d) => d.byte_size(),
            Node::Index(ix) => ix.byte_size(),
            Node::Reference(_) => std::mem::size_of::<Reference>(),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Data(d) => write!(f, "Data(len={})", d.len()),
            Node::Index(ix) => write!(f, "Index(children={})", ix.child_count()),
            Node::Reference(r) => write!(f, "Reference({:?}, {})", r.kind, r.key),
        }
    }
}
