//! Error types for strata-db-store

use std::fmt;
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Commit pipeline stage, carried by failed transactions so callers know
/// how far a commit got before it was abandoned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Registry validation of every datom in the batch.
    Validate,
    /// Temp-id remap computation and rewrite.
    Remap,
    /// Unique-constraint checks against the AVET current index.
    UniqueCheck,
    /// Per-index sort + tree ingest.
    Ingest,
    /// Transaction-log block append.
    LogAppend,
    /// Root-record write and snapshot install.
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Validate => "validate",
            Stage::Remap => "remap",
            Stage::UniqueCheck => "unique-check",
            Stage::Ingest => "ingest",
            Stage::LogAppend => "log-append",
            Stage::Publish => "publish",
        })
    }
}

/// Store-level error: the core taxonomy plus where a commit failed.
///
/// Every failure is raised before the atomic publish step, so a failed
/// transact leaves the current snapshot completely unchanged.
#[derive(Error, Debug)]
pub enum Error {
    /// A commit was abandoned at the named stage.
    #[error("commit failed during {stage}: {source}")]
    Commit {
        stage: Stage,
        #[source]
        source: strata_db_core::Error,
    },

    /// A read-side operation failed.
    #[error("read failed: {0}")]
    Read(#[from] strata_db_core::Error),

    /// The store's consumer task has shut down.
    #[error("datom store is closed")]
    Closed,
}

impl Error {
    pub fn commit(stage: Stage, source: strata_db_core::Error) -> Self {
        Error::Commit { stage, source }
    }

    /// The stage a failed commit reached, if this is a commit error.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Commit { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_error_names_the_stage() {
        let err = Error::commit(
            Stage::UniqueCheck,
            strata_db_core::Error::corrupt("boom"),
        );
        assert_eq!(err.stage(), Some(Stage::UniqueCheck));
        assert!(err.to_string().contains("unique-check"));
    }
}
