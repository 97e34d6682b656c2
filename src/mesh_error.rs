//! MeshStrataError: unified error type for mesh-strata public APIs
//!
//! Every fallible operation in the crate returns this type. Lower layers
//! return it unchanged; the only retry performed anywhere is the explicit
//! throttling around bulk persistence I/O.

use thiserror::Error;

use crate::partitioning::error::PartitionError;

/// Unified error type for mesh-strata operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshStrataError {
    /// Out-of-range codimension, level, parent index and similar caller errors.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Operation not allowed in the current refinement phase or element state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Pre-allocated storage exceeded during an append or refinement.
    #[error("overflow: {what} index {index} exceeds committed capacity {capacity}")]
    Overflow {
        what: &'static str,
        index: usize,
        capacity: usize,
    },
    /// A global id has no local slot.
    #[error("global id {0} not found")]
    NotFound(i64),
    /// Growing an index or table failed.
    #[error("allocation of {0} entries failed")]
    Allocation(usize),
    /// Internal invariant violation in adjacency or neighbor computation.
    #[error("inconsistent topology: {0}")]
    InconsistentTopology(String),
    /// A collective exchange failed or delivered malformed data.
    #[error("collective operation failed: {0}")]
    Collective(String),
    /// Partitioner failure.
    #[error(transparent)]
    Partition(#[from] PartitionError),
    /// Error surfaced from the persistent store.
    #[error("persistence error: {0}")]
    Persistence(String),
    /// Operation not available for this mesh kind.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<std::io::Error> for MeshStrataError {
    fn from(e: std::io::Error) -> Self {
        MeshStrataError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for MeshStrataError {
    fn from(e: serde_json::Error) -> Self {
        MeshStrataError::Persistence(format!("metadata: {e}"))
    }
}

/// Shorthand used across the crate.
pub type Result<T> = std::result::Result<T, MeshStrataError>;
