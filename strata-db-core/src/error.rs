//! Error types for strata-db-core

use crate::ids::{AttributeId, EntityId, StoreKey};
use crate::value::ValueTag;
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error taxonomy shared across the store.
///
/// Everything the indexing engine can fail with lives here; the store crate
/// wraps these with the commit stage that raised them. Node immutability
/// keeps the blast radius of a `CorruptData` to the single read that hit it.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed node or datom bytes on decode.
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// A unique attribute already holds this value on another entity.
    #[error("unique constraint violation: attribute {attribute} value {value} already on {existing}")]
    UniqueConstraintViolation {
        attribute: AttributeId,
        value: String,
        existing: EntityId,
    },

    /// A datom references an attribute id with no registration.
    #[error("unknown attribute: {0}")]
    UnknownAttribute(AttributeId),

    /// An attribute id was registered twice. Ids are assigned once and
    /// never redefined.
    #[error("attribute redefined: {0}")]
    AttributeRedefined(AttributeId),

    /// A datom's value tag disagrees with the attribute's registered type.
    #[error("value tag mismatch on {attribute}: expected {expected}, found {found}")]
    TagMismatch {
        attribute: AttributeId,
        expected: ValueTag,
        found: ValueTag,
    },

    /// Backing-store failure on put/get. No automatic retry inside the
    /// engine; retry policy belongs to the backing implementation.
    #[error("store I/O error: {0}")]
    StoreIo(String),

    /// No blob persisted under this key.
    #[error("node not found: {0}")]
    NotFound(StoreKey),

    /// A temp id survived the remap pass. Internal invariant violation.
    #[error("remap conflict: temp id {0} not resolved")]
    RemapConflict(EntityId),

    /// The store's consumer task has shut down.
    #[error("datom store is closed")]
    Closed,
}

impl Error {
    /// Create a corrupt-data error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptData(msg.into())
    }

    /// Create a store I/O error
    pub fn store_io(msg: impl Into<String>) -> Self {
        Error::StoreIo(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::StoreIo(e.to_string())
    }
}
