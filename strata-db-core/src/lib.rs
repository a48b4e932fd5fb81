//! # Strata DB Core
//!
//! Core types for the strata-db datom store.
//!
//! This crate provides:
//! - Partitioned 64-bit ids: `EntityId`, `TxId`, `StoreKey`, `AttributeId`
//! - The `Datom` fact model and tagged `Value` encoding
//! - Index comparators for all five orderings (EAVT, AEVT, AVET, VAET, TxLog)
//! - The explicit `AttributeRegistry` table
//! - The `NodeStore` persistence contract with memory and file backends
//! - The shared error taxonomy
//!
//! ## Design Principles
//!
//! 1. **Async at the I/O seam only**: comparing, searching and merging are
//!    synchronous; only `NodeStore` operations await
//! 2. **Strict total ordering**: every index comparator is a total order
//!    with explicit min sentinels for range bounds, no nil-as-wildcard
//! 3. **Explicit registration**: attribute types come from a table built at
//!    store open, never from runtime reflection

pub mod comparator;
pub mod datom;
pub mod error;
pub mod ids;
pub mod registry;
pub mod store;
pub mod value;

// Re-export main types
pub use comparator::{DatomOrd, IndexType, KeyOrder};
pub use datom::{Datom, DatomFlags, DatomRef};
pub use error::{Error, Result};
pub use ids::{AttributeId, EntityId, Partition, StoreKey, TxId};
pub use registry::{AttributeDef, AttributeRegistry};
pub use store::{FileNodeStore, MemoryNodeStore, NodeStore};
pub use value::{Value, ValueTag};
