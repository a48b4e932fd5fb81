//! # Strata DB Store
//!
//! The transactional surface of the strata-db datom store.
//!
//! This crate provides:
//! - `DatomStore`: single-writer commit pipeline over a `NodeStore`
//! - Temp-id remap at commit time
//! - `Snapshot`: immutable per-index root bundles with a persisted root
//!   record for reopening
//! - Range reads and full scans over any index
//! - A broadcast stream of committed transactions and block-chain replay
//!
//! ## Example
//!
//! ```ignore
//! use strata_db_store::{DatomStore, DatomStoreConfig};
//!
//! let store = DatomStore::open(backend, registry, DatomStoreConfig::default()).await?;
//! let result = store.transact(vec![Datom::add(e, name, Value::str("Ada"))]).await?;
//! let facts = store.range_entity(&result.snapshot, IndexType::EavtCurrent, e).await?;
//! ```

pub mod error;
mod log;
pub mod pipeline;
pub mod remap;
pub mod snapshot;

// Re-export main types
pub use error::{Error, Result, Stage};
pub use pipeline::{DatomStore, DatomStoreConfig, TransactResult, TxLogEvent};
pub use remap::{remap_batch, RemapTable};
pub use snapshot::{RootKind, RootRef, Snapshot};
