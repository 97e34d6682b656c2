//! Partitioning errors for mesh-strata

use thiserror::Error;

/// Errors from octree, chunk and partitioner routines
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// A point lies outside the octree bounding box
    #[error("point {0} lies outside the octree bounding box")]
    PointOutsideOctree(String),
    /// Octant index does not exist
    #[error("octant {0} does not exist")]
    OctantNotFound(i32),
    /// All user-data slots of an octant are in use
    #[error("octant {oct_idx} has no free user-data slot (capacity {capacity})")]
    OctantFull { oct_idx: i32, capacity: usize },
    /// The octree root has no siblings
    #[error("octant {0} has no siblings")]
    NoSiblings(i32),
    /// Partition array did not contain an entry for a graph vertex
    #[error("partition missing part for vertex {0}")]
    MissingPartition(usize),
    /// Unexpected condition: no parts requested
    #[error("cannot partition into zero parts")]
    NoParts,
    /// Requested mode is not compiled in
    #[error("partition mode {0} is not available in this build")]
    ModeUnavailable(&'static str),
    /// Other errors (e.g. METIS wrapper failures)
    #[error("partitioner error: {0}")]
    Other(String),
}
