//! Spatial partitioning of a distributed mesh.
//!
//! Level-0 elements are grouped by centroid into *chunks* hanging off the
//! leaves of a replicated [`octree::Octree`]; the octants holding chunks are
//! assigned to processes with one of the [`PartitionMode`]s, and an element
//! is owned by the processor of its chunk's octant. The submodules do the
//! collective work: initial [`distribution`], [`ghost`] exchange and the
//! numbering of vertices on split edges shared between processes
//! ([`boundary_edges`]).

pub mod boundary_edges;
pub mod chunks;
pub mod distribution;
pub mod error;
pub mod ghost;
pub mod octree;

use serde::{Deserialize, Serialize};

use crate::algs::dual_graph::{DualGraph, vtxdist};
use error::PartitionError;

/// How octants are assigned to processes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionMode {
    /// k-way graph partition of the octant adjacency (needs `metis-support`;
    /// falls back to [`PartitionMode::Morton`] otherwise).
    Metis,
    /// Contiguous runs of octants in depth-first order.
    #[default]
    Morton,
    /// Equal-width slabs along `preferred_axis`.
    Slices,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionerConfig {
    pub mode: PartitionMode,
    /// 0 = x, 1 = y, 2 = z; used by [`PartitionMode::Slices`].
    pub preferred_axis: usize,
    /// Allowed load imbalance for the graph partitioner.
    pub imbalance: f64,
}

impl Default for PartitionerConfig {
    fn default() -> Self {
        Self {
            mode: PartitionMode::Morton,
            preferred_axis: 0,
            imbalance: 1.05,
        }
    }
}

/// Processor of every partition unit.
///
/// Units are given in depth-first order with their box centers; `graph`
/// connects units whose octants touch.
pub fn assign_units(
    graph: &DualGraph,
    centers: &[[f64; 3]],
    bounds: ([f64; 3], [f64; 3]),
    nprocs: usize,
    cfg: &PartitionerConfig,
) -> Result<Vec<usize>, PartitionError> {
    if nprocs == 0 {
        return Err(PartitionError::NoParts);
    }
    let n = graph.num_vertices();
    match cfg.mode {
        PartitionMode::Metis => match graph.metis_partition(nprocs, cfg.imbalance) {
            Ok(p) => Ok(p.part),
            Err(PartitionError::ModeUnavailable(mode)) => {
                log::warn!("{mode} partitioning not compiled in, using Morton order");
                Ok(morton_assignment(n, nprocs))
            }
            Err(e) => Err(e),
        },
        PartitionMode::Morton => Ok(morton_assignment(n, nprocs)),
        PartitionMode::Slices => Ok(slice_assignment(
            centers,
            bounds,
            cfg.preferred_axis.min(2),
            nprocs,
        )),
    }
}

fn morton_assignment(n: usize, nprocs: usize) -> Vec<usize> {
    let dist = vtxdist(n, nprocs);
    let mut part = Vec::with_capacity(n);
    for (p, w) in dist.windows(2).enumerate() {
        part.extend(std::iter::repeat_n(p, w[1] - w[0]));
    }
    part
}

fn slice_assignment(
    centers: &[[f64; 3]],
    (min, max): ([f64; 3], [f64; 3]),
    axis: usize,
    nprocs: usize,
) -> Vec<usize> {
    let width = (max[axis] - min[axis]) / nprocs as f64;
    centers
        .iter()
        .map(|c| {
            if width <= 0.0 {
                return 0;
            }
            let slab = ((c[axis] - min[axis]) / width).floor();
            (slab.max(0.0) as usize).min(nprocs - 1)
        })
        .collect()
}
