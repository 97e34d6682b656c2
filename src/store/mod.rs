//! Local mesh store: the owner of every vertex and element array of one
//! process, the global → local index maps, the adjacency index and the
//! refinement / chunk state.
//!
//! Storage is organised in refinement levels. Level 0 holds the input
//! mesh; every refinement (or explicit [`Mesh::add_level`]) opens a new
//! level whose elements are appended after those of all previous levels.
//! Vertices and elements are written in batches:
//!
//! ```
//! use mesh_strata::prelude::*;
//!
//! let mut mesh = Mesh::new(MeshKind::Triangle);
//! mesh.begin_store_vertices(3).unwrap();
//! for p in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
//!     mesh.store_vertex(None, p).unwrap();
//! }
//! mesh.end_store_vertices().unwrap();
//! mesh.begin_store_elems(1).unwrap();
//! mesh.add_lvl0_cell(&[VertexIdx(2), VertexIdx(0), VertexIdx(1)], &[]).unwrap();
//! mesh.end_store_elems().unwrap();
//! assert_eq!(mesh.num_elems(), 1);
//! ```
//!
//! In a parallel mesh every `end_*` call is collective.

pub mod counters;
mod elements;
pub mod iter;
mod query;
mod vertices;

use crate::adjacency::AdjacencyIndex;
use crate::algs::communicator::{CollectiveExt, Communicator, NoComm};
use crate::config::MeshConfig;
use crate::mesh_error::MeshStrataError;
use crate::partitioning::chunks::ChunkManager;
use crate::refine::{RefinePhase, RefineState};
use crate::topology::{Element, IndexMap, MeshKind, Neighbor, Vertex};

pub use counters::LevelCounts;
pub use iter::{BoundaryFacetIter, EntityIter, LeafIter};

/// Open store batch: first index and committed capacity.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Batch {
    pub start: usize,
    pub capacity: usize,
}

/// Neighbor slot of an already committed element, overwritten when a
/// later commit placed an element exactly across that facet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Backlink {
    pub elem: usize,
    pub facet: usize,
    pub previous: Neighbor,
}

pub struct Mesh<C: Communicator = NoComm> {
    pub(crate) kind: MeshKind,
    pub(crate) comm: C,
    pub(crate) config: MeshConfig,
    pub(crate) vertices: Vec<Vertex>,
    pub(crate) elems: Vec<Element>,
    pub(crate) vertex_map: IndexMap,
    pub(crate) elem_map: IndexMap,
    pub(crate) levels: Vec<LevelCounts>,
    /// First local element of every level.
    pub(crate) level_elem_start: Vec<usize>,
    /// Level used by queries and iterators.
    pub(crate) query_level: usize,
    pub(crate) num_weights: usize,
    /// `num_weights` entries per local element.
    pub(crate) weights: Vec<i32>,
    pub(crate) adjacency: AdjacencyIndex,
    pub(crate) refine: RefineState,
    pub(crate) chunks: Option<ChunkManager>,
    pub(crate) vertex_batch: Option<Batch>,
    pub(crate) elem_batch: Option<Batch>,
}

impl Mesh<NoComm> {
    /// Serial mesh with the default configuration.
    pub fn new(kind: MeshKind) -> Self {
        Self::build(kind, NoComm, MeshConfig::default())
    }

    pub fn with_config(kind: MeshKind, config: MeshConfig) -> Result<Self, MeshStrataError> {
        config.validate()?;
        Ok(Self::build(kind, NoComm, config))
    }
}

impl<C: Communicator> Mesh<C> {
    /// Mesh distributed over the processes of `comm`.
    pub fn with_comm(kind: MeshKind, comm: C, config: MeshConfig) -> Result<Self, MeshStrataError> {
        config.validate()?;
        log::info!(
            "creating {kind:?} mesh on rank {} of {}",
            comm.rank(),
            comm.size()
        );
        Ok(Self::build(kind, comm, config))
    }

    fn build(kind: MeshKind, comm: C, config: MeshConfig) -> Self {
        let adjacency = AdjacencyIndex::new(kind, config.hash_slack);
        Self {
            kind,
            comm,
            config,
            vertices: Vec::new(),
            elems: Vec::new(),
            vertex_map: IndexMap::new(),
            elem_map: IndexMap::new(),
            levels: vec![LevelCounts::default()],
            level_elem_start: vec![0],
            query_level: 0,
            num_weights: 0,
            weights: Vec::new(),
            adjacency,
            refine: RefineState::default(),
            chunks: None,
            vertex_batch: None,
            elem_batch: None,
        }
    }

    pub fn kind(&self) -> MeshKind {
        self.kind
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn chunks(&self) -> Option<&ChunkManager> {
        self.chunks.as_ref()
    }

    /// Level currently being written.
    pub fn store_level(&self) -> usize {
        self.levels.len() - 1
    }

    /// Open a new refinement level; queries switch to it.
    pub fn add_level(&mut self) -> Result<usize, MeshStrataError> {
        self.ensure_quiescent("add a level")?;
        let last = *self.levels.last().unwrap_or(&LevelCounts::default());
        self.levels.push(last);
        self.level_elem_start.push(self.elems.len());
        self.query_level = self.levels.len() - 1;
        log::debug!("level {} opened", self.query_level);
        Ok(self.query_level)
    }

    /// Number of weights stored per element; set before storing elements.
    pub fn set_num_weights(&mut self, n: usize) -> Result<(), MeshStrataError> {
        if !self.elems.is_empty() || self.elem_batch.is_some() {
            return Err(MeshStrataError::InvalidState(
                "number of weights must be set before elements are stored".into(),
            ));
        }
        self.num_weights = n;
        Ok(())
    }

    pub fn num_weights(&self) -> usize {
        self.num_weights
    }

    /// No store batch open and no refinement in progress.
    pub(crate) fn ensure_quiescent(&self, what: &str) -> Result<(), MeshStrataError> {
        if self.vertex_batch.is_some() || self.elem_batch.is_some() {
            return Err(MeshStrataError::InvalidState(format!(
                "cannot {what} while a store batch is open"
            )));
        }
        if self.refine.phase != RefinePhase::Idle {
            return Err(MeshStrataError::InvalidState(format!(
                "cannot {what} during refinement ({:?})",
                self.refine.phase
            )));
        }
        Ok(())
    }

    /// Turn a local failure into a failure everywhere. Collective.
    pub(crate) fn agree<T>(
        &self,
        what: &str,
        local: Result<T, MeshStrataError>,
    ) -> Result<T, MeshStrataError> {
        let failed = self.comm.allgather(u64::from(local.is_err()))?;
        let value = local?;
        match failed.iter().position(|&f| f != 0) {
            Some(p) => Err(MeshStrataError::Collective(format!(
                "process {p} failed during {what}"
            ))),
            None => Ok(value),
        }
    }

    pub(crate) fn rank(&self) -> u32 {
        self.comm.rank() as u32
    }

    pub(crate) fn current_counts_mut(&mut self) -> &mut LevelCounts {
        let last = self.levels.len() - 1;
        &mut self.levels[last]
    }
}
