//! Fixed, versioned, little-endian records exchanged between processes and
//! written to the column store.
//!
//! All multi-byte fields are stored pre-LE with `.to_le()` and decoded with
//! `.from_le()`; floating-point fields go through their bit patterns.
//! Element records carry *global* indices only: parents, children, vertices
//! and neighbors (`-1` for the geometric boundary).

use bytemuck::{Pod, Zeroable};
use static_assertions::assert_eq_size;

use crate::topology::{ElemFlags, MAX_VERTICES};

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

#[inline]
fn f64_to_le(x: f64) -> u64 {
    x.to_bits().to_le()
}

#[inline]
fn f64_from_le(x: u64) -> f64 {
    f64::from_bits(u64::from_le(x))
}

// ===== Vertices ============================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct WireVertex {
    pub glb_idx_le: i64,
    pub coords_le: [u64; 3],
}

impl WireVertex {
    pub fn new(glb_idx: i64, coords: [f64; 3]) -> Self {
        Self {
            glb_idx_le: glb_idx.to_le(),
            coords_le: coords.map(f64_to_le),
        }
    }
    pub fn glb_idx(&self) -> i64 {
        i64::from_le(self.glb_idx_le)
    }
    pub fn coords(&self) -> [f64; 3] {
        self.coords_le.map(f64_from_le)
    }
}

// ===== Elements ============================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct WireElem {
    pub glb_idx_le: i64,
    pub parent_le: i64,
    pub child_le: i64,
    pub level_le: u16,
    pub refinement_le: u16,
    pub flags_le: u16,
    pub nverts_le: u16,
    pub my_proc_le: u32,
    pub reserved_le: u32, // keep zero
    pub vertices_le: [i64; MAX_VERTICES],
    pub neighbors_le: [i64; MAX_VERTICES],
}

/// Plain decoded form of a [`WireElem`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalElem {
    pub glb_idx: i64,
    pub parent: i64,
    pub child: i64,
    pub level: u16,
    pub refinement: u16,
    pub flags: ElemFlags,
    pub my_proc: u32,
    pub vertices: Vec<i64>,
    pub neighbors: Vec<i64>,
}

impl WireElem {
    pub fn encode(e: &GlobalElem) -> Self {
        let mut vertices_le = [-1i64; MAX_VERTICES];
        let mut neighbors_le = [-1i64; MAX_VERTICES];
        for (dst, &v) in vertices_le.iter_mut().zip(&e.vertices) {
            *dst = v.to_le();
        }
        for (dst, &n) in neighbors_le.iter_mut().zip(&e.neighbors) {
            *dst = n.to_le();
        }
        Self {
            glb_idx_le: e.glb_idx.to_le(),
            parent_le: e.parent.to_le(),
            child_le: e.child.to_le(),
            level_le: e.level.to_le(),
            refinement_le: e.refinement.to_le(),
            flags_le: e.flags.bits().to_le(),
            nverts_le: (e.vertices.len() as u16).to_le(),
            my_proc_le: e.my_proc.to_le(),
            reserved_le: 0,
            vertices_le,
            neighbors_le,
        }
    }

    pub fn decode(&self) -> GlobalElem {
        let n = (u16::from_le(self.nverts_le) as usize).min(MAX_VERTICES);
        GlobalElem {
            glb_idx: self.glb_idx(),
            parent: i64::from_le(self.parent_le),
            child: i64::from_le(self.child_le),
            level: u16::from_le(self.level_le),
            refinement: u16::from_le(self.refinement_le),
            flags: ElemFlags::from_bits(u16::from_le(self.flags_le)),
            my_proc: u32::from_le(self.my_proc_le),
            vertices: self.vertices_le[..n].iter().map(|&v| i64::from_le(v)).collect(),
            neighbors: self.neighbors_le[..n].iter().map(|&v| i64::from_le(v)).collect(),
        }
    }

    pub fn glb_idx(&self) -> i64 {
        i64::from_le(self.glb_idx_le)
    }
}

// ===== Chunks ==============================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct WireChunk {
    pub idx_le: i32,
    pub oct_idx_le: i32,
    pub elem_le: i64,
    pub weight_le: i64,
    pub num_elems_le: u32,
    pub reserved_le: u32,
}

impl WireChunk {
    pub fn new(idx: i32, oct_idx: i32, elem: i64, weight: i64, num_elems: u32) -> Self {
        Self {
            idx_le: idx.to_le(),
            oct_idx_le: oct_idx.to_le(),
            elem_le: elem.to_le(),
            weight_le: weight.to_le(),
            num_elems_le: num_elems.to_le(),
            reserved_le: 0,
        }
    }
    pub fn idx(&self) -> i32 {
        i32::from_le(self.idx_le)
    }
    pub fn oct_idx(&self) -> i32 {
        i32::from_le(self.oct_idx_le)
    }
    pub fn elem(&self) -> i64 {
        i64::from_le(self.elem_le)
    }
    pub fn weight(&self) -> i64 {
        i64::from_le(self.weight_le)
    }
    pub fn num_elems(&self) -> u32 {
        u32::from_le(self.num_elems_le)
    }
}

// ===== Octants =============================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct WireOctant {
    pub idx_le: i32,
    pub parent_le: i32,
    pub child_idx_le: i32,
    pub level_le: i32,
    pub orient_le: i32,
    pub processor_le: i32,
    pub userlevels_le: u32,
    pub reserved_le: u32,
    pub userdata_le: [i32; 4],
}

impl WireOctant {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        idx: i32,
        parent: i32,
        child_idx: i32,
        level: i32,
        orient: i32,
        processor: i32,
        userlevels: u32,
        userdata: [i32; 4],
    ) -> Self {
        Self {
            idx_le: idx.to_le(),
            parent_le: parent.to_le(),
            child_idx_le: child_idx.to_le(),
            level_le: level.to_le(),
            orient_le: orient.to_le(),
            processor_le: processor.to_le(),
            userlevels_le: userlevels.to_le(),
            reserved_le: 0,
            userdata_le: userdata.map(i32::to_le),
        }
    }
    pub fn idx(&self) -> i32 {
        i32::from_le(self.idx_le)
    }
    pub fn parent(&self) -> i32 {
        i32::from_le(self.parent_le)
    }
    pub fn child_idx(&self) -> i32 {
        i32::from_le(self.child_idx_le)
    }
    pub fn level(&self) -> i32 {
        i32::from_le(self.level_le)
    }
    pub fn orient(&self) -> i32 {
        i32::from_le(self.orient_le)
    }
    pub fn processor(&self) -> i32 {
        i32::from_le(self.processor_le)
    }
    pub fn userlevels(&self) -> u32 {
        u32::from_le(self.userlevels_le)
    }
    pub fn userdata(&self) -> [i32; 4] {
        self.userdata_le.map(i32::from_le)
    }
}

// ===== Boundary edges ======================================================

/// Split edge seen by one process: sorted global endpoints, the new vertex
/// (local index before numbering, global index in the reply) and the rank.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct WireEdge {
    pub v1_le: i64,
    pub v2_le: i64,
    pub new_vtx_le: i64,
    pub proc_le: i64,
}

impl WireEdge {
    pub fn new(v1: i64, v2: i64, new_vtx: i64, proc: usize) -> Self {
        let (v1, v2) = if v1 <= v2 { (v1, v2) } else { (v2, v1) };
        Self {
            v1_le: v1.to_le(),
            v2_le: v2.to_le(),
            new_vtx_le: new_vtx.to_le(),
            proc_le: (proc as i64).to_le(),
        }
    }
    pub fn v1(&self) -> i64 {
        i64::from_le(self.v1_le)
    }
    pub fn v2(&self) -> i64 {
        i64::from_le(self.v2_le)
    }
    pub fn new_vtx(&self) -> i64 {
        i64::from_le(self.new_vtx_le)
    }
    pub fn proc(&self) -> usize {
        i64::from_le(self.proc_le) as usize
    }
    /// Ordering key `(v1, v2, proc)`.
    pub fn key(&self) -> (i64, i64, usize) {
        (self.v1(), self.v2(), self.proc())
    }
}

// ===== Centroids ===========================================================

/// Element centroid with its global index and weight, used to build chunks.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct WireCentroid {
    pub glb_idx_le: i64,
    pub weight_le: i64,
    pub point_le: [u64; 3],
}

impl WireCentroid {
    pub fn new(glb_idx: i64, weight: i64, point: [f64; 3]) -> Self {
        Self {
            glb_idx_le: glb_idx.to_le(),
            weight_le: weight.to_le(),
            point_le: point.map(f64_to_le),
        }
    }
    pub fn glb_idx(&self) -> i64 {
        i64::from_le(self.glb_idx_le)
    }
    pub fn weight(&self) -> i64 {
        i64::from_le(self.weight_le)
    }
    pub fn point(&self) -> [f64; 3] {
        self.point_le.map(f64_from_le)
    }
}

assert_eq_size!(WireVertex, [u8; 32]);
assert_eq_size!(WireElem, [u8; 104]);
assert_eq_size!(WireChunk, [u8; 32]);
assert_eq_size!(WireOctant, [u8; 48]);
assert_eq_size!(WireEdge, [u8; 32]);
assert_eq_size!(WireCentroid, [u8; 40]);
