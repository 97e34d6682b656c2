#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-strata
//!
//! mesh-strata stores adaptive unstructured triangle and tetrahedron meshes,
//! level by level, on one process or distributed over many. Meshes are
//! built in batches, refined by red subdivision, queried through entity ids
//! that name every vertex, edge, face and cell by an element and a local
//! position, and persisted to a column store.
//!
//! ## Features
//! - Multi-level storage with global ↔ local index maps and per-level counters
//! - Incidence indexes for vertices, edges and triangles with boundary and
//!   ghost classification
//! - Red refinement (1:4 triangles, 1:8 tetrahedra) with shared midpoints
//! - Octree chunking and partitioning (Morton order, slices or Metis)
//! - Ghost layers that follow refinement across processes
//! - Chunked, throttled persistence readable on any number of processes
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-strata = "0.1"
//! # Optional features:
//! # features = ["mpi-support", "rayon", "metis-support"]
//! ```
//!
//! Serial meshes use [`algs::communicator::NoComm`]; tests and single-node
//! runs may simulate a process group with
//! [`algs::communicator::LocalComm`]; `MpiComm` drives MPI.

pub mod adjacency;
pub mod algs;
pub mod config;
pub mod io;
pub mod mesh_error;
pub mod partitioning;
pub mod refine;
pub mod store;
pub mod topology;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CollectiveExt, Communicator, LocalComm, NoComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::config::{ChunkConfig, MeshConfig, WeightUpdate};
    pub use crate::io::{ColumnStore, DirStore, Selection, Throttle};
    pub use crate::mesh_error::MeshStrataError;
    pub use crate::partitioning::{PartitionMode, PartitionerConfig};
    pub use crate::refine::RefinePhase;
    pub use crate::store::{LevelCounts, Mesh};
    pub use crate::topology::{
        ElemFlags, ElemIdx, Element, EntityId, EntityType, MeshKind, Neighbor, Vertex, VertexIdx,
    };
}
