//! Layer 1: Errors
//!
//! Bounded and stable: these represent refusal states on malformed input,
//! not library implementation details.

use thiserror::Error;
use uuid::Uuid;

/// Structural misuse of the in-memory model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModelError {
    #[error("no group `{uuid}` in this database")]
    UnknownGroup { uuid: Uuid },
    #[error("no entry `{uuid}` in this database")]
    UnknownEntry { uuid: Uuid },
    #[error("uuid `{uuid}` is already taken by a live object")]
    DuplicateUuid { uuid: Uuid },
    #[error("the root group `{uuid}` cannot be moved or removed")]
    RootGroup { uuid: Uuid },
    #[error("moving group `{uuid}` into its own subtree")]
    CyclicMove { uuid: Uuid },
}

/// Merge preconditions. A failed construction populates no context; there is
/// nothing to merge.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MergeError {
    #[error("source group `{uuid}` is not part of the source database")]
    SourceGroupNotFound { uuid: Uuid },
    #[error("target group `{uuid}` is not part of the target database")]
    TargetGroupNotFound { uuid: Uuid },
}
