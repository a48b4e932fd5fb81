//! The datom store and its commit pipeline.
//!
//! Writes flow through a single consumer task, so transactions serialize
//! without locks: callers enqueue a batch and await its oneshot reply. Each
//! commit runs the fixed stage sequence — validate, remap temp ids, resolve
//! retractions, check unique constraints, ingest every index concurrently,
//! append the log block, publish — and any failure before publish abandons
//! the transaction with the store's current snapshot untouched. Publication
//! itself is one pointer swap: readers either see the old snapshot or the
//! new one, never a mix of roots.

use crate::error::{Error, Result, Stage};
use crate::log;
use crate::remap::{remap_batch, RemapTable};
use crate::snapshot::{self, RootRef, Snapshot};
use futures::future::try_join_all;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Instant;
use strata_db_core::comparator::IndexType;
use strata_db_core::datom::Datom;
use strata_db_core::error::Error as CoreError;
use strata_db_core::ids::{AttributeId, EntityId, TxId};
use strata_db_core::registry::AttributeRegistry;
use strata_db_core::store::NodeStore;
use strata_db_core::value::Value;
use strata_db_index::{ingest, Appendable, DatomCursor, IngestConfig, Node, NodeResolver};
use tokio::sync::{broadcast, mpsc, oneshot};

/// Store tuning knobs.
#[derive(Copy, Clone, Debug)]
pub struct DatomStoreConfig {
    /// Tree-shape thresholds passed to every ingest.
    pub ingest: IngestConfig,
    /// Budget for the decoded-node cache.
    pub node_cache_bytes: u64,
    /// Commit queue depth; senders beyond it wait.
    pub queue_depth: usize,
}

impl Default for DatomStoreConfig {
    fn default() -> Self {
        Self {
            ingest: IngestConfig::default(),
            node_cache_bytes: strata_db_index::DEFAULT_CACHE_BYTES,
            queue_depth: 64,
        }
    }
}

/// What a committed transaction hands back to its caller.
#[derive(Debug)]
pub struct TransactResult {
    pub tx_id: TxId,
    /// Temp id to permanent id, for translating caller-held temp ids.
    pub remap: RemapTable,
    /// The snapshot this transaction published.
    pub snapshot: Arc<Snapshot>,
}

/// One committed transaction on the broadcast log stream.
pub type TxLogEvent = (TxId, Arc<[Datom]>);

struct PendingTransaction {
    datoms: Vec<Datom>,
    reply: oneshot::Sender<Result<TransactResult>>,
}

struct Shared {
    registry: Arc<AttributeRegistry>,
    resolver: Arc<NodeResolver>,
    config: DatomStoreConfig,
    current: RwLock<Arc<Snapshot>>,
    tx_log: broadcast::Sender<TxLogEvent>,
}

/// The datom store: append-only facts under nine sorted copy-on-write
/// indexes.
///
/// Single-writer: commits are serialized by the consumer task. Readers are
/// lock-free — they grab an `Arc<Snapshot>` and traverse immutable trees.
pub struct DatomStore {
    shared: Arc<Shared>,
    queue: mpsc::Sender<PendingTransaction>,
}

impl DatomStore {
    /// Open a store over `store`, restoring the latest published snapshot
    /// from the root slot (or starting empty), and spawn the commit
    /// consumer.
    pub async fn open(
        store: Arc<dyn NodeStore>,
        registry: Arc<AttributeRegistry>,
        config: DatomStoreConfig,
    ) -> Result<DatomStore> {
        let resolver = Arc::new(NodeResolver::new(store.clone(), config.node_cache_bytes));
        let (snapshot, next_entity) = match store.get_root().await.map_err(Error::Read)? {
            Some(bytes) => snapshot::decode_record(&bytes).map_err(Error::Read)?,
            None => (Snapshot::genesis(), 0),
        };

        tracing::info!(
            tx = snapshot.tx_id().sequence(),
            next_entity,
            "datom store opened"
        );

        let (tx_log, _) = broadcast::channel(256);
        let shared = Arc::new(Shared {
            registry,
            resolver,
            config,
            current: RwLock::new(Arc::new(snapshot)),
            tx_log,
        });

        let (queue, rx) = mpsc::channel(config.queue_depth.max(1));
        tokio::spawn(consumer(shared.clone(), rx, next_entity));

        Ok(DatomStore { shared, queue })
    }

    /// Commit a batch of datoms as one transaction.
    ///
    /// Blocks until the full pipeline (every index plus the log append)
    /// completes and the new snapshot is published. An empty batch is the
    /// `sync` barrier: it commits nothing and replies once every previously
    /// queued transaction is visible.
    pub async fn transact(&self, datoms: Vec<Datom>) -> Result<TransactResult> {
        let (reply, rx) = oneshot::channel();
        self.queue
            .send(PendingTransaction { datoms, reply })
            .await
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Barrier: waits until all previously queued writes are visible and
    /// returns the transaction id they are visible at.
    pub async fn sync(&self) -> Result<TxId> {
        Ok(self.transact(Vec::new()).await?.tx_id)
    }

    /// The current snapshot. Holding it isolates the reader from all
    /// future writes.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.shared.current.read().clone()
    }

    /// The transaction the current snapshot was published at.
    pub fn as_of_tx(&self) -> TxId {
        self.snapshot().tx_id()
    }

    pub fn registry(&self) -> &Arc<AttributeRegistry> {
        &self.shared.registry
    }

    /// Subscribe to committed transactions: `(tx id, datoms in log order)`.
    pub fn tx_log(&self) -> broadcast::Receiver<TxLogEvent> {
        self.shared.tx_log.subscribe()
    }

    /// A seekable cursor over one index of `snapshot`.
    pub fn datoms(&self, snapshot: &Snapshot, index: IndexType) -> DatomCursor {
        DatomCursor::new(
            self.shared.resolver.clone(),
            index.comparator(self.shared.registry.clone()),
            snapshot.root_node(index),
        )
    }

    /// Every datom of one index, in index order.
    pub async fn scan(&self, snapshot: &Snapshot, index: IndexType) -> Result<Vec<Datom>> {
        let mut cursor = self.datoms(snapshot, index);
        cursor.seek_start().await?;
        Ok(cursor.collect_remaining().await?)
    }

    /// All datoms about one entity, from an EAVT-ordered index.
    pub async fn range_entity(
        &self,
        snapshot: &Snapshot,
        index: IndexType,
        e: EntityId,
    ) -> Result<Vec<Datom>> {
        let mut cursor = self.datoms(snapshot, index);
        cursor.seek(&Datom::min_for_entity(e)).await?;
        let mut out = Vec::new();
        while let Some(d) = cursor.current() {
            if d.e != e {
                break;
            }
            out.push(d.clone());
            cursor.next().await?;
        }
        Ok(out)
    }

    /// All datoms with `attribute = value`, from an AVET-ordered index.
    pub async fn range_attr_value(
        &self,
        snapshot: &Snapshot,
        index: IndexType,
        a: AttributeId,
        v: &Value,
    ) -> Result<Vec<Datom>> {
        let mut cursor = self.datoms(snapshot, index);
        cursor.seek(&Datom::min_for_attr_value(a, v.clone())).await?;
        let mut out = Vec::new();
        while let Some(d) = cursor.current() {
            if d.a != a || &d.v != v {
                break;
            }
            out.push(d.clone());
            cursor.next().await?;
        }
        Ok(out)
    }

    /// Who points at `target`: reference datoms from a VAET-ordered index.
    pub async fn range_backrefs(
        &self,
        snapshot: &Snapshot,
        index: IndexType,
        target: EntityId,
    ) -> Result<Vec<Datom>> {
        let mut cursor = self.datoms(snapshot, index);
        cursor.seek(&Datom::min_for_ref(target)).await?;
        let mut out = Vec::new();
        while let Some(d) = cursor.current() {
            if d.v.as_entity_id() != Some(target) {
                break;
            }
            out.push(d.clone());
            cursor.next().await?;
        }
        Ok(out)
    }

    /// Replay the transaction-log block chain of `snapshot`, oldest first.
    pub async fn replay(&self, snapshot: &Snapshot) -> Result<Vec<(TxId, Vec<Datom>)>> {
        let store = self.shared.resolver.store();
        let mut out = Vec::new();
        let mut next = snapshot.last_block();
        while let Some(key) = next {
            let bytes = store.get(key).await.map_err(Error::Read)?;
            let (prev, datoms) = log::decode_block(&bytes).map_err(Error::Read)?;
            let tx_id = datoms
                .first()
                .map(|d| d.t)
                .ok_or_else(|| Error::Read(CoreError::corrupt("empty tx-log block")))?;
            out.push((tx_id, datoms));
            next = prev;
        }
        out.reverse();
        Ok(out)
    }
}

// ============================================================================
// Consumer task
// ============================================================================

async fn consumer(
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<PendingTransaction>,
    mut next_entity: u64,
) {
    while let Some(pending) = rx.recv().await {
        if pending.datoms.is_empty() {
            // Sync barrier: every earlier transaction has already been
            // consumed, so the current snapshot is the answer.
            let snapshot = shared.current.read().clone();
            let _ = pending.reply.send(Ok(TransactResult {
                tx_id: snapshot.tx_id(),
                remap: RemapTable::default(),
                snapshot,
            }));
            continue;
        }

        let result = commit(&shared, pending.datoms, &mut next_entity).await;
        if let Err(err) = &result {
            tracing::warn!(error = %err, "transaction abandoned");
        }
        let _ = pending.reply.send(result);
    }
}

/// Run one transaction through the pipeline. Nothing is published unless
/// every stage succeeds.
async fn commit(
    shared: &Shared,
    mut datoms: Vec<Datom>,
    next_entity: &mut u64,
) -> Result<TransactResult> {
    let started = Instant::now();
    let base = shared.current.read().clone();
    let tx_id = TxId::from_sequence(base.tx_id().sequence() + 1);

    // Validate against the registry.
    for d in &datoms {
        shared
            .registry
            .validate(d)
            .map_err(|e| Error::commit(Stage::Validate, e))?;
    }

    // Remap temp ids, then stamp the assigned transaction.
    let remap = remap_batch(&mut datoms, &shared.registry, next_entity)
        .map_err(|e| Error::commit(Stage::Remap, e))?;
    for d in &mut datoms {
        d.t = tx_id;
    }

    // Log order doubles as the block layout and the broadcast payload.
    let txlog_ord = IndexType::TxLog.comparator(shared.registry.clone());
    datoms.sort_by(|a, b| txlog_ord.cmp(a, b));
    let datoms: Arc<[Datom]> = datoms.into();

    // Resolve retractions for the current indexes: same-batch pairs cancel
    // outright; the rest are re-stamped with their target's stored
    // transaction so merge finds them adjacent.
    let (adds, tombs) = prepare_current(shared, &base, &datoms)
        .await
        .map_err(|e| Error::commit(Stage::Ingest, e))?;

    enforce_unique(shared, &base, &adds, &tombs)
        .await
        .map_err(|e| Error::commit(Stage::UniqueCheck, e))?;

    // Fold each index's batch into its tree; the nine ingests run
    // concurrently against the same base snapshot.
    let mut jobs = Vec::new();
    for &index in IndexType::all() {
        let batch = batch_for(index, &datoms, &adds, &tombs, &shared.registry);
        if batch.is_empty() {
            continue;
        }
        let mut batch = batch;
        let ord = index.comparator(shared.registry.clone());
        let root = base.root_node(index).unwrap_or_else(empty_root);
        let resolver = shared.resolver.clone();
        let ingest_config = shared.config.ingest;
        jobs.push(async move {
            batch.sort_by(|a, b| ord.cmp(a, b));
            let node = ingest(&resolver, &ingest_config, &root, &batch, &ord, index).await?;
            Ok::<(IndexType, Node), CoreError>((index, node))
        });
    }
    let ingested = try_join_all(jobs)
        .await
        .map_err(|e| Error::commit(Stage::Ingest, e))?;

    let mut roots = *base.roots();
    for (index, node) in ingested {
        let key = node.store_key().ok_or_else(|| {
            Error::commit(Stage::Ingest, CoreError::corrupt("ingest returned unflushed root"))
        })?;
        roots[index.as_u8() as usize] = Some(RootRef {
            key,
            kind: node.kind().into(),
        });
    }

    // Append the log block, chained to its predecessor.
    let block = log::encode_block(base.last_block(), &datoms);
    let block_key = shared
        .resolver
        .store()
        .log_tx(&block)
        .await
        .map_err(|e| Error::commit(Stage::LogAppend, e))?;

    // Publish: persist the root record, then swap the snapshot pointer.
    let snapshot = Arc::new(Snapshot::new(tx_id, roots, Some(block_key)));
    let record = snapshot::encode_record(&snapshot, *next_entity)
        .map_err(|e| Error::commit(Stage::Publish, e))?;
    shared
        .resolver
        .store()
        .put_root(&record)
        .await
        .map_err(|e| Error::commit(Stage::Publish, e))?;
    *shared.current.write() = snapshot.clone();

    let _ = shared.tx_log.send((tx_id, datoms.clone()));

    tracing::info!(
        tx = tx_id.sequence(),
        datoms = datoms.len(),
        duration_ms = started.elapsed().as_millis() as u64,
        "transaction committed"
    );

    Ok(TransactResult {
        tx_id,
        remap,
        snapshot,
    })
}

fn empty_root() -> Node {
    Node::Data(Arc::new(Appendable::new().pack()))
}

/// Split the stamped batch into current-index asserts and tombstones.
///
/// A retraction matching an assert in the same batch cancels it before
/// ingest. A retraction of a stored datom becomes a tombstone carrying the
/// stored transaction id, which gives it the target's exact sort position
/// in every current ordering (including AVET, where the transaction ranks
/// above the entity). A retraction of nothing is dropped.
async fn prepare_current(
    shared: &Shared,
    base: &Snapshot,
    datoms: &[Datom],
) -> std::result::Result<(Vec<Datom>, Vec<Datom>), CoreError> {
    let mut adds: Vec<Datom> = datoms.iter().filter(|d| d.is_added()).cloned().collect();
    let mut tombs = Vec::new();

    for r in datoms.iter().filter(|d| d.is_retraction()) {
        if let Some(pos) = adds
            .iter()
            .position(|d| d.e == r.e && d.a == r.a && d.v == r.v)
        {
            adds.swap_remove(pos);
        } else if let Some(t) = lookup_current_tx(shared, base, r).await? {
            tombs.push(Datom::new(r.e, r.a, t, false, r.v.clone()));
        }
    }
    Ok((adds, tombs))
}

/// Find the stored transaction of the live `(e, a, v)` datom, if any.
async fn lookup_current_tx(
    shared: &Shared,
    base: &Snapshot,
    r: &Datom,
) -> std::result::Result<Option<TxId>, CoreError> {
    let Some(root) = base.root_node(IndexType::EavtCurrent) else {
        return Ok(None);
    };
    let ord = IndexType::EavtCurrent.comparator(shared.registry.clone());
    let mut cursor = DatomCursor::new(shared.resolver.clone(), ord, Some(root));
    // Tx max sorts first within (e, a, v), so this lands on the stored
    // datom when it exists.
    cursor
        .seek(&Datom::new(r.e, r.a, TxId::max(), false, r.v.clone()))
        .await?;
    if let Some(found) = cursor.current() {
        if found.e == r.e && found.a == r.a && found.v == r.v {
            return Ok(Some(found.t));
        }
    }
    Ok(None)
}

/// Reject asserts that would duplicate a unique attribute's value on a
/// different entity, either within the batch or against the stored AVET
/// current index. A same-batch retraction freeing the value permits the
/// re-assert.
async fn enforce_unique(
    shared: &Shared,
    base: &Snapshot,
    adds: &[Datom],
    tombs: &[Datom],
) -> std::result::Result<(), CoreError> {
    let mut seen: FxHashMap<(AttributeId, Value), EntityId> = FxHashMap::default();

    for d in adds {
        if !shared.registry.is_unique(d.a) {
            continue;
        }

        let holder = *seen.entry((d.a, d.v.clone())).or_insert(d.e);
        if holder != d.e {
            return Err(violation(d, holder));
        }

        let Some(root) = base.root_node(IndexType::AvetCurrent) else {
            continue;
        };
        let ord = IndexType::AvetCurrent.comparator(shared.registry.clone());
        let mut cursor = DatomCursor::new(shared.resolver.clone(), ord, Some(root));
        cursor
            .seek(&Datom::min_for_attr_value(d.a, d.v.clone()))
            .await?;
        while let Some(found) = cursor.current() {
            if found.a != d.a || found.v != d.v {
                break;
            }
            if found.e != d.e {
                let freed = tombs
                    .iter()
                    .any(|t| t.e == found.e && t.a == d.a && t.v == d.v);
                if !freed {
                    return Err(violation(d, found.e));
                }
            }
            cursor.next().await?;
        }
    }
    Ok(())
}

fn violation(d: &Datom, existing: EntityId) -> CoreError {
    CoreError::UniqueConstraintViolation {
        attribute: d.a,
        value: format!("{:?}", d.v),
        existing,
    }
}

/// The slice of a committed batch one index receives.
fn batch_for(
    index: IndexType,
    datoms: &[Datom],
    adds: &[Datom],
    tombs: &[Datom],
    registry: &AttributeRegistry,
) -> Vec<Datom> {
    let keep = |d: &&Datom| !index.refs_only() || registry.is_reference(d.a);
    if index.is_current() {
        adds.iter().chain(tombs.iter()).filter(keep).cloned().collect()
    } else {
        datoms.iter().filter(keep).cloned().collect()
    }
}
