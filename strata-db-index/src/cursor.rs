//! Seekable cursor over one index tree.
//!
//! A cursor is a read-only view pinned to one (immutable) root: it never
//! observes writes committed after it was opened. Descent resolves
//! `Reference` children through the node resolver, so the seek and advance
//! operations are async; inspecting the current position is not.

use crate::codec;
use crate::node::{DataNode, IndexNode, Node};
use crate::resolver::{NodeResolver, Resolved};
use std::sync::Arc;
use strata_db_core::comparator::DatomOrd;
use strata_db_core::datom::Datom;
use strata_db_core::error::Result;

/// Seekable iterator over the datoms beneath one root, in index order.
pub struct DatomCursor {
    resolver: Arc<NodeResolver>,
    ord: DatomOrd,
    root: Option<Node>,
    /// Ancestor path: each frame is an index node and the child position
    /// the descent took.
    stack: Vec<(Arc<IndexNode>, usize)>,
    /// Leaf run currently streaming, with the cursor position inside it.
    leaf: Option<(Arc<DataNode>, usize)>,
    current: Option<Datom>,
}

impl DatomCursor {
    /// Open a cursor over `root`. `None` stands for an index that has never
    /// been written; such a cursor is exhausted from the start.
    pub fn new(resolver: Arc<NodeResolver>, ord: DatomOrd, root: Option<Node>) -> Self {
        Self {
            resolver,
            ord,
            root,
            stack: Vec::new(),
            leaf: None,
            current: None,
        }
    }

    /// True while the cursor points at a datom.
    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// The datom under the cursor.
    pub fn current(&self) -> Option<&Datom> {
        self.current.as_ref()
    }

    /// Position at the first datom of the index.
    pub async fn seek_start(&mut self) -> Result<()> {
        self.stack.clear();
        self.leaf = None;
        self.current = None;

        let Some(root) = self.root.clone() else {
            return Ok(());
        };
        self.descend_leftmost(root).await?;
        // Skip an empty leaf (only an empty root has one).
        if self.current.is_none() && self.leaf.is_some() {
            self.advance_leaf().await?;
        }
        Ok(())
    }

    /// Position at the first datom not less than `target` under this
    /// index's ordering.
    pub async fn seek(&mut self, target: &Datom) -> Result<()> {
        self.stack.clear();
        self.leaf = None;
        self.current = None;

        let Some(mut node) = self.root.clone() else {
            return Ok(());
        };

        loop {
            match self.resolver.resolve(&node).await? {
                Resolved::Index(ix) => {
                    let idx = ix.find_child(&self.ord, &target.as_ref());
                    node = ix.child_at(idx).clone();
                    self.stack.push((ix, idx));
                }
                Resolved::Data(data) => {
                    let pos = data.find(&self.ord, &target.as_ref(), 0, data.len());
                    let exhausted = pos >= data.len();
                    self.leaf = Some((data, pos));
                    self.refresh_current();
                    if exhausted {
                        // Target sorts past this leaf: continue in the next.
                        self.advance_leaf().await?;
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Like [`seek`](Self::seek), but the target arrives as codec-encoded
    /// key bytes (with its blob segment, when the value is not inline).
    pub async fn seek_bytes(&mut self, key: &[u8], blobs: &[u8]) -> Result<()> {
        let target = codec::decode(key, blobs)?;
        self.seek(&target).await
    }

    /// Advance to the next datom. Past the last datom the cursor becomes
    /// invalid and further calls are no-ops.
    pub async fn next(&mut self) -> Result<()> {
        let Some((leaf, pos)) = &mut self.leaf else {
            return Ok(());
        };
        if *pos + 1 < leaf.len() {
            *pos += 1;
            self.refresh_current();
            return Ok(());
        }
        self.advance_leaf().await
    }

    /// Drain the remaining datoms into a vector. Test and range helper.
    pub async fn collect_remaining(&mut self) -> Result<Vec<Datom>> {
        let mut out = Vec::new();
        while let Some(d) = self.current() {
            out.push(d.clone());
            self.next().await?;
        }
        Ok(out)
    }

    /// Descend to the leftmost leaf beneath `node`.
    async fn descend_leftmost(&mut self, mut node: Node) -> Result<()> {
        loop {
            match self.resolver.resolve(&node).await? {
                Resolved::Index(ix) => {
                    node = ix.child_at(0).clone();
                    self.stack.push((ix, 0));
                }
                Resolved::Data(data) => {
                    self.leaf = Some((data, 0));
                    self.refresh_current();
                    return Ok(());
                }
            }
        }
    }

    /// Move to the first datom of the next leaf, popping exhausted
    /// ancestors.
    async fn advance_leaf(&mut self) -> Result<()> {
        self.leaf = None;
        self.current = None;
        while let Some((ix, pos)) = self.stack.pop() {
            if pos + 1 < ix.child_count() {
                let child = ix.child_at(pos + 1).clone();
                self.stack.push((ix, pos + 1));
                return self.descend_leftmost(child).await;
            }
        }
        Ok(())
    }

    fn refresh_current(&mut self) {
        self.current = match &self.leaf {
            Some((leaf, pos)) if *pos < leaf.len() => Some(leaf.get(*pos)),
            _ => None,
        };
    }
}
