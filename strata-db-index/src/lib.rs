//! # Strata DB Index
//!
//! Columnar index engine for the strata-db datom store.
//!
//! This crate provides:
//! - The datom key-prefix codec and transaction-log block framing
//! - The node model: `Appendable` builder, packed `DataNode`/`IndexNode`,
//!   by-key `Reference`
//! - The packed node wire format (FourCC-tagged, column-oriented)
//! - `NodeResolver`: reference resolution with a bounded decode cache
//! - The ingest/merge/split algorithm producing copy-on-write trees
//! - `DatomCursor`: seekable iteration over one immutable root
//!
//! # Design
//!
//! - **Sync traversal, async I/O**: once a node is decoded everything is
//!   synchronous; only store reads and writes await
//! - **Immutability**: packed nodes never change, so snapshots share
//!   subtrees freely and cached nodes never need invalidation
//! - **Bounded memory**: large trees keep only recently-touched subtrees
//!   decoded; everything else stays a `Reference`

pub mod codec;
pub mod cursor;
pub mod format;
pub mod ingest;
pub mod node;
pub mod resolver;

// Re-export main types
pub use cursor::DatomCursor;
pub use ingest::{ingest, IngestConfig};
pub use node::{merge, Appendable, DataNode, IndexNode, MergeMode, Node, NodeKind, Reference};
pub use resolver::{NodeResolver, Resolved, DEFAULT_CACHE_BYTES};
