//! Snapshots: immutable per-index root bundles.
//!
//! A snapshot records, for every index, the store key of that index's
//! current root, plus the transaction it was published at and the head of
//! the transaction-log block chain. Published snapshots are `Arc`-shared
//! and never mutated; readers holding one are isolated from all later
//! writes. The latest snapshot is also persisted as a small JSON record in
//! the node store's root slot so a store can reopen where it left off.

use serde::{Deserialize, Serialize};
use strata_db_core::comparator::IndexType;
use strata_db_core::error::{Error, Result};
use strata_db_core::ids::{StoreKey, TxId};
use strata_db_index::{Node, NodeKind};

/// Serializable node kind for root records.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootKind {
    Data,
    Index,
}

impl From<NodeKind> for RootKind {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Data => RootKind::Data,
            NodeKind::Index => RootKind::Index,
        }
    }
}

impl From<RootKind> for NodeKind {
    fn from(kind: RootKind) -> Self {
        match kind {
            RootKind::Data => NodeKind::Data,
            RootKind::Index => NodeKind::Index,
        }
    }
}

/// One index's root: its store key and node kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRef {
    pub key: StoreKey,
    pub kind: RootKind,
}

impl RootRef {
    /// The reference node a cursor or ingest starts from.
    pub fn node(&self) -> Node {
        Node::reference(self.key, self.kind.into())
    }
}

/// A point-in-time view of the whole store: one root per index.
///
/// `None` means the index has never been written.
#[derive(Clone, Debug)]
pub struct Snapshot {
    tx_id: TxId,
    roots: [Option<RootRef>; IndexType::COUNT],
    /// Newest transaction-log block; blocks chain backwards from here.
    last_block: Option<StoreKey>,
}

impl Snapshot {
    /// The empty store: no transactions, no roots.
    pub fn genesis() -> Self {
        Self {
            tx_id: TxId::from_sequence(0),
            roots: [None; IndexType::COUNT],
            last_block: None,
        }
    }

    pub(crate) fn new(
        tx_id: TxId,
        roots: [Option<RootRef>; IndexType::COUNT],
        last_block: Option<StoreKey>,
    ) -> Self {
        Self {
            tx_id,
            roots,
            last_block,
        }
    }

    /// The transaction this snapshot was published at.
    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }

    pub fn root(&self, index: IndexType) -> Option<RootRef> {
        self.roots[index.as_u8() as usize]
    }

    /// The root as a reference node, for cursors and ingest.
    pub fn root_node(&self, index: IndexType) -> Option<Node> {
        self.root(index).map(|r| r.node())
    }

    pub(crate) fn roots(&self) -> &[Option<RootRef>; IndexType::COUNT] {
        &self.roots
    }

    pub fn last_block(&self) -> Option<StoreKey> {
        self.last_block
    }
}

// ============================================================================
// Root record (JSON, persisted in the node store's root slot)
// ============================================================================

#[derive(Serialize, Deserialize)]
struct RootRecord {
    version: u32,
    tx: u64,
    next_entity: u64,
    last_block: Option<u64>,
    roots: Vec<RootEntry>,
}

#[derive(Serialize, Deserialize)]
struct RootEntry {
    index: String,
    kind: RootKind,
    key: u64,
}

const RECORD_VERSION: u32 = 1;

/// Serialize a snapshot (plus the entity-id allocator position) for the
/// root slot.
pub(crate) fn encode_record(snapshot: &Snapshot, next_entity: u64) -> Result<Vec<u8>> {
    let roots = IndexType::all()
        .iter()
        .filter_map(|&index| {
            snapshot.root(index).map(|r| RootEntry {
                index: index.name().to_string(),
                kind: r.kind,
                key: r.key.as_u64(),
            })
        })
        .collect();
    let record = RootRecord {
        version: RECORD_VERSION,
        tx: snapshot.tx_id.sequence(),
        next_entity,
        last_block: snapshot.last_block.map(StoreKey::as_u64),
        roots,
    };
    serde_json::to_vec(&record).map_err(|e| Error::corrupt(format!("root record encode: {e}")))
}

/// Parse a root record back into a snapshot and the entity-id allocator
/// position.
pub(crate) fn decode_record(bytes: &[u8]) -> Result<(Snapshot, u64)> {
    let record: RootRecord = serde_json::from_slice(bytes)
        .map_err(|e| Error::corrupt(format!("root record decode: {e}")))?;
    if record.version != RECORD_VERSION {
        return Err(Error::corrupt(format!(
            "unknown root record version {}",
            record.version
        )));
    }

    let mut roots = [None; IndexType::COUNT];
    for entry in record.roots {
        let index: IndexType = entry
            .index
            .parse()
            .map_err(|e: String| Error::corrupt(format!("root record: {e}")))?;
        roots[index.as_u8() as usize] = Some(RootRef {
            key: StoreKey::from_u64(entry.key),
            kind: entry.kind,
        });
    }

    let snapshot = Snapshot::new(
        TxId::from_sequence(record.tx),
        roots,
        record.last_block.map(StoreKey::from_u64),
    );
    Ok((snapshot, record.next_entity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db_core::ids::Partition;

    #[test]
    fn test_record_round_trip() {
        let mut roots = [None; IndexType::COUNT];
        roots[IndexType::EavtCurrent.as_u8() as usize] = Some(RootRef {
            key: StoreKey::new(Partition::Index, 17),
            kind: RootKind::Index,
        });
        roots[IndexType::TxLog.as_u8() as usize] = Some(RootRef {
            key: StoreKey::new(Partition::TxLog, 3),
            kind: RootKind::Data,
        });
        let snapshot = Snapshot::new(
            TxId::from_sequence(42),
            roots,
            Some(StoreKey::new(Partition::TxLog, 9)),
        );

        let bytes = encode_record(&snapshot, 1_000).unwrap();
        let (restored, next_entity) = decode_record(&bytes).unwrap();

        assert_eq!(restored.tx_id(), TxId::from_sequence(42));
        assert_eq!(next_entity, 1_000);
        assert_eq!(restored.last_block(), snapshot.last_block());
        for &index in IndexType::all() {
            assert_eq!(restored.root(index), snapshot.root(index));
        }
    }

    #[test]
    fn test_genesis_has_no_roots() {
        let snapshot = Snapshot::genesis();
        assert_eq!(snapshot.tx_id().sequence(), 0);
        assert!(IndexType::all().iter().all(|&ix| snapshot.root(ix).is_none()));
    }

    #[test]
    fn test_bad_record_is_corrupt() {
        assert!(matches!(
            decode_record(b"not json"),
            Err(Error::CorruptData(_))
        ));
    }
}
