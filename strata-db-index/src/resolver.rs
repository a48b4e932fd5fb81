//! Node resolution against the store, with a bounded decode cache.
//!
//! Uses a single `moka::sync::Cache` (synchronous — tree traversal is sync
//! once nodes are in memory) with TinyLFU eviction and a byte weigher, so
//! hot subtrees stay decoded and cold ones fall back to their store keys.
//! Packed nodes are immutable and content never changes under a key, so
//! entries never need invalidation.

use crate::format;
use crate::node::{DataNode, IndexNode, Node, NodeKind};
use moka::sync::Cache;
use std::sync::Arc;
use strata_db_core::error::{Error, Result};
use strata_db_core::ids::StoreKey;
use strata_db_core::store::NodeStore;

/// Default decoded-node cache budget.
pub const DEFAULT_CACHE_BYTES: u64 = 64 * 1024 * 1024;

/// A node with any indirection removed: what traversal actually works on.
#[derive(Clone)]
pub enum Resolved {
    Data(Arc<DataNode>),
    Index(Arc<IndexNode>),
}

/// Resolves [`Node::Reference`]s against the node store and flushes packed
/// nodes back to it.
///
/// Shared by the ingest pipeline and every cursor; cheap to clone through
/// `Arc`. A failed resolution is fatal to the operation in progress — the
/// node is unreadable and the engine does not retry.
pub struct NodeResolver {
    store: Arc<dyn NodeStore>,
    cache: Cache<StoreKey, Node>,
}

impl NodeResolver {
    pub fn new(store: Arc<dyn NodeStore>, cache_bytes: u64) -> Self {
        let cache = Cache::builder()
            .weigher(|_key: &StoreKey, node: &Node| {
                node.byte_size().min(u32::MAX as usize) as u32
            })
            .max_capacity(cache_bytes)
            .build();
        Self { store, cache }
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    /// Strip the indirection from `node`, fetching and decoding through the
    /// cache if it is a reference.
    pub async fn resolve(&self, node: &Node) -> Result<Resolved> {
        match node {
            Node::Data(d) => Ok(Resolved::Data(d.clone())),
            Node::Index(ix) => Ok(Resolved::Index(ix.clone())),
            Node::Reference(r) => {
                if let Some(cached) = self.cache.get(&r.key) {
                    return into_resolved(cached, r.key, r.kind);
                }
                let bytes = self.store.get(r.key).await?;
                let decoded = format::decode_node(&bytes)?;
                self.cache.insert(r.key, decoded.clone());
                into_resolved(decoded, r.key, r.kind)
            }
        }
    }

    /// Resolve directly by store key (snapshot roots).
    pub async fn resolve_key(&self, key: StoreKey, kind: NodeKind) -> Result<Resolved> {
        self.resolve(&Node::reference(key, kind)).await
    }

    /// Persist a packed data node; returns the reference that replaces it.
    ///
    /// `tx_log` routes the write to the store's transaction-log append
    /// stream instead of the index stream.
    pub async fn flush_data(&self, node: DataNode, tx_log: bool) -> Result<Node> {
        let bytes = format::encode_data(&node);
        let key = self.put(&bytes, tx_log).await?;
        self.cache.insert(key, Node::Data(Arc::new(node)));
        Ok(Node::reference(key, NodeKind::Data))
    }

    /// Persist a packed index node; returns the reference that replaces it.
    pub async fn flush_index(&self, node: IndexNode, tx_log: bool) -> Result<Node> {
        let bytes = format::encode_index(&node)?;
        let key = self.put(&bytes, tx_log).await?;
        self.cache.insert(key, Node::Index(Arc::new(node)));
        Ok(Node::reference(key, NodeKind::Index))
    }

    async fn put(&self, bytes: &[u8], tx_log: bool) -> Result<StoreKey> {
        if tx_log {
            self.store.log_tx(bytes).await
        } else {
            self.store.put(bytes).await
        }
    }
}

fn into_resolved(node: Node, key: StoreKey, expected: NodeKind) -> Result<Resolved> {
    match node {
        Node::Data(d) if expected == NodeKind::Data => Ok(Resolved::Data(d)),
        Node::Index(ix) if expected == NodeKind::Index => Ok(Resolved::Index(ix)),
        Node::Reference(_) => Err(Error::corrupt(format!(
            "reference resolved to another reference at {key}"
        ))),
        _ => Err(Error::corrupt(format!(
            "node kind mismatch at {key}: expected {expected:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Appendable;
    use strata_db_core::datom::Datom;
    use strata_db_core::ids::{AttributeId, EntityId, Partition, TxId};
    use strata_db_core::store::MemoryNodeStore;
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

    fn leaf(datoms: &[Datom]) -> DataNode {
        let mut node = Appendable::new();
        for d in datoms {
            node.push(d);
        }
        node.pack()
    }

    #[tokio::test]
    async fn test_flush_then_resolve() {
        let resolver = NodeResolver::new(Arc::new(MemoryNodeStore::new()), DEFAULT_CACHE_BYTES);
        let datoms = vec![make(1), make(2)];
        let flushed = resolver.flush_data(leaf(&datoms), false).await.unwrap();
        assert!(flushed.store_key().is_some());

        match resolver.resolve(&flushed).await.unwrap() {
            Resolved::Data(d) => {
                assert_eq!(d.len(), 2);
                assert_eq!(d.get(0), datoms[0]);
            }
            Resolved::Index(_) => panic!("expected data node"),
        }
    }

    #[tokio::test]
    async fn test_resolve_survives_cache_eviction() {
        // Zero-byte cache: every entry is immediately evicted, so resolve
        // must fall back to store reads.
        let resolver = NodeResolver::new(Arc::new(MemoryNodeStore::new()), 0);
        let flushed = resolver.flush_data(leaf(&[make(7)]), false).await.unwrap();
        match resolver.resolve(&flushed).await.unwrap() {
            Resolved::Data(d) => assert_eq!(d.get(0), make(7)),
            Resolved::Index(_) => panic!("expected data node"),
        }
    }

    #[tokio::test]
    async fn test_missing_key_is_fatal() {
        let resolver = NodeResolver::new(Arc::new(MemoryNodeStore::new()), DEFAULT_CACHE_BYTES);
        let dangling = Node::reference(StoreKey::new(Partition::Index, 404), NodeKind::Data);
        assert!(matches!(
            resolver.resolve(&dangling).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_corrupt() {
        let resolver = NodeResolver::new(Arc::new(MemoryNodeStore::new()), DEFAULT_CACHE_BYTES);
        let flushed = resolver.flush_data(leaf(&[make(1)]), false).await.unwrap();
        let key = flushed.store_key().unwrap();
        let wrong = Node::reference(key, NodeKind::Index);
        assert!(matches!(
            resolver.resolve(&wrong).await,
            Err(Error::CorruptData(_))
        ));
    }
}
