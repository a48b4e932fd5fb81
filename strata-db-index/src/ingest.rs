//! Ingest: fold a sorted batch into a persisted index tree.
//!
//! Produces a new tree sharing every untouched subtree with the old one
//! (copy-on-write): children whose key range the batch misses are carried
//! over by store key alone and never loaded, so the work done is
//! O(batch × log tree) regardless of total tree size. The old root stays
//! valid and immutable, still reachable from older snapshots.

use crate::node::{merge, Appendable, IndexNode, MergeMode, Node};
use crate::resolver::{NodeResolver, Resolved};
use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;
use strata_db_core::comparator::{DatomOrd, IndexType};
use strata_db_core::datom::Datom;
use strata_db_core::error::Result;

/// Tree-shape thresholds for one ingest run.
#[derive(Copy, Clone, Debug)]
pub struct IngestConfig {
    /// Maximum datoms per data node before it splits.
    pub data_node_split_threshold: usize,
    /// Maximum children per index node before a new level is added.
    pub index_node_split_threshold: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_node_split_threshold: 512,
            index_node_split_threshold: 64,
        }
    }
}

/// One freshly built (or carried-over) child: its node, datom count, and
/// boundary marker.
struct ChildEntry {
    node: Node,
    count: u64,
    last: Datom,
}

/// Fold `batch` (sorted by `ord`) into the tree rooted at `root`, returning
/// the new root.
///
/// An empty batch returns the root unchanged — same store key, no writes.
/// `index` selects the merge semantics (current indexes cancel retractions,
/// history and log indexes preserve them) and routes tx-log nodes to the
/// store's distinguished append stream.
pub async fn ingest(
    resolver: &NodeResolver,
    config: &IngestConfig,
    root: &Node,
    batch: &[Datom],
    ord: &DatomOrd,
    index: IndexType,
) -> Result<Node> {
    if batch.is_empty() {
        return Ok(root.clone());
    }

    let tx_log = index == IndexType::TxLog;
    let mode = if index.is_current() {
        MergeMode::Current
    } else {
        MergeMode::Preserve
    };

    let mut entries = ingest_node(resolver, config, root, batch, ord, mode, tx_log).await?;

    tracing::debug!(
        index = %index,
        batch = batch.len(),
        children = entries.len(),
        "ingest produced new child list"
    );

    if entries.is_empty() {
        // Everything cancelled: the index is empty again.
        let node = Appendable::new().pack();
        return resolver.flush_data(node, tx_log).await;
    }

    // Wrap sibling lists in index levels until a single root remains.
    while entries.len() > 1 {
        let group_size = entries.len().min(config.index_node_split_threshold).max(2);
        let mut parents = Vec::with_capacity(entries.len().div_ceil(group_size));
        for group in entries.chunks(group_size) {
            parents.push(flush_index_over(resolver, group, index, tx_log).await?);
        }
        entries = parents;
    }

    Ok(entries.remove(0).node)
}

/// Recursive worker: returns the replacement child list for `node` after
/// folding in `batch`. A data node may fan out into several entries when it
/// splits; an index node returns its (partially reused) children's entries
/// so splits propagate upward as longer sibling lists.
///
/// Boxed return type because the recursion through index levels would
/// otherwise give the future an infinite size.
fn ingest_node<'a>(
    resolver: &'a NodeResolver,
    config: &'a IngestConfig,
    node: &'a Node,
    batch: &'a [Datom],
    ord: &'a DatomOrd,
    mode: MergeMode,
    tx_log: bool,
) -> Pin<Box<dyn Future<Output = Result<Vec<ChildEntry>>> + Send + 'a>> {
    Box::pin(async move {
        match resolver.resolve(node).await? {
            Resolved::Data(data) => {
                let merged = merge(&data, batch, ord, mode);
                flush_data_run(resolver, config, merged, tx_log).await
            }
            Resolved::Index(ix) => {
                let mut out = Vec::with_capacity(ix.child_count());
                let mut start = 0;
                for i in 0..ix.child_count() {
                    // The final child's boundary is +∞: it takes the rest.
                    let end = if i + 1 == ix.child_count() {
                        batch.len()
                    } else {
                        let marker = ix.marker_ref(i);
                        start
                            + batch[start..].partition_point(|d| {
                                ord.cmp_ref(&d.as_ref(), &marker) != Ordering::Greater
                            })
                    };
                    let sub = &batch[start..end];
                    if sub.is_empty() {
                        // Untouched: carried by reference, subtree never loaded.
                        out.push(ChildEntry {
                            node: ix.child_at(i).clone(),
                            count: ix.child_len(i),
                            last: ix.marker(i),
                        });
                    } else {
                        let replaced =
                            ingest_node(resolver, config, ix.child_at(i), sub, ord, mode, tx_log)
                                .await?;
                        out.extend(replaced);
                    }
                    start = end;
                }
                Ok(out)
            }
        }
    })
}

/// Split a merged run into pieces at or below the data-node threshold,
/// packing and flushing each piece.
async fn flush_data_run(
    resolver: &NodeResolver,
    config: &IngestConfig,
    merged: Appendable,
    tx_log: bool,
) -> Result<Vec<ChildEntry>> {
    if merged.is_empty() {
        return Ok(Vec::new());
    }

    let mut pieces = Vec::new();
    split_to_threshold(merged, config.data_node_split_threshold.max(1), &mut pieces);

    let mut out = Vec::with_capacity(pieces.len());
    for piece in pieces {
        let count = piece.len() as u64;
        let last = piece.last_datom().expect("split pieces are non-empty");
        let node = resolver.flush_data(piece.pack(), tx_log).await?;
        out.push(ChildEntry { node, count, last });
    }
    Ok(out)
}

/// Recursive midpoint split until every piece fits the threshold.
fn split_to_threshold(node: Appendable, threshold: usize, out: &mut Vec<Appendable>) {
    if node.len() <= threshold {
        out.push(node);
        return;
    }
    let (left, right) = node.split();
    split_to_threshold(left, threshold, out);
    split_to_threshold(right, threshold, out);
}

/// Build and flush one index node over a group of children.
async fn flush_index_over(
    resolver: &NodeResolver,
    entries: &[ChildEntry],
    index: IndexType,
    tx_log: bool,
) -> Result<ChildEntry> {
    let children: Vec<Node> = entries.iter().map(|e| e.node.clone()).collect();
    let counts: Vec<u64> = entries.iter().map(|e| e.count).collect();
    let markers: Vec<Datom> = entries.iter().map(|e| e.last.clone()).collect();

    let node = IndexNode::new(index, children, counts, &markers);
    let count = node.len();
    let last = markers.last().cloned().expect("index groups are non-empty");
    let flushed = resolver.flush_index(node, tx_log).await?;
    Ok(ChildEntry {
        node: flushed,
        count,
        last,
    })
}
