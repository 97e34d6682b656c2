//! Per-level bookkeeping.
//!
//! Every counter is cumulative over levels `0..=L`, so the row of level `L`
//! describes the whole mesh as seen at that level.

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LevelCounts {
    /// Vertices of the whole mesh.
    pub num_glb_vertices: u64,
    /// Vertices resident on this process, ghosts' vertices included.
    pub num_loc_vertices: u64,
    /// Resident vertices shared with another process.
    pub num_b_vtx: u64,
    /// Lowest local index among the shared vertices.
    pub first_b_vtx: u64,
    pub num_glb_elems: u64,
    pub num_glb_leaf_elems: u64,
    /// Elements owned by this process.
    pub num_interior_elems: u64,
    pub num_interior_leaf_elems: u64,
    pub num_ghost_elems: u64,
}

impl LevelCounts {
    /// Local elements, owned and ghost.
    pub fn num_loc_elems(&self) -> u64 {
        self.num_interior_elems + self.num_ghost_elems
    }
}
