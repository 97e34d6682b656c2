//! Vertex and element records of the local mesh store.
//!
//! Records are addressed by typed local indices ([`ElemIdx`], [`VertexIdx`]).
//! Neighbor slots carry three cases: geometric boundary, a locally resident
//! element, or an element known only by its global index. On the wire and on
//! disk these map to `-1`, `loc` and `-(glb + 2)`.

use std::ops::{BitOr, BitOrAssign};

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::mesh_error::MeshStrataError;

/// Maximum number of vertices (and facets) of any supported element.
pub const MAX_VERTICES: usize = 4;

/// Process-local element index.
#[repr(transparent)]
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Pod, Zeroable,
)]
pub struct ElemIdx(pub u32);

/// Process-local vertex index.
#[repr(transparent)]
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Pod, Zeroable,
)]
pub struct VertexIdx(pub u32);

impl ElemIdx {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl VertexIdx {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Local indices are `u32`; a larger slot is reported as an overflow.
fn local_index(what: &'static str, i: usize) -> Result<u32, MeshStrataError> {
    u32::try_from(i).map_err(|_| MeshStrataError::Overflow {
        what,
        index: i,
        capacity: u32::MAX as usize,
    })
}

impl TryFrom<usize> for ElemIdx {
    type Error = MeshStrataError;

    fn try_from(i: usize) -> Result<Self, Self::Error> {
        local_index("local element index", i).map(ElemIdx)
    }
}

impl TryFrom<usize> for VertexIdx {
    type Error = MeshStrataError;

    fn try_from(i: usize) -> Result<Self, Self::Error> {
        local_index("local vertex index", i).map(VertexIdx)
    }
}

/// Bit flags carried by elements and derived for sub-entities.
#[repr(transparent)]
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
pub struct ElemFlags(u16);

impl ElemFlags {
    pub const INTERIOR: Self = Self(1);
    pub const BORDER: Self = Self(1 << 1);
    pub const GHOST: Self = Self(1 << 2);
    /// Touches the geometric boundary of the domain.
    pub const BOUNDARY: Self = Self(1 << 3);
    /// Entity seen only by ghost elements.
    pub const FRONT: Self = Self(1 << 4);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Only the ownership bits (interior, border, ghost).
    #[inline]
    pub fn ownership(self) -> Self {
        Self(self.0 & (Self::INTERIOR.0 | Self::BORDER.0 | Self::GHOST.0))
    }
}

impl BitOr for ElemFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ElemFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl std::fmt::Debug for ElemFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = [
            (Self::INTERIOR, "INTERIOR"),
            (Self::BORDER, "BORDER"),
            (Self::GHOST, "GHOST"),
            (Self::BOUNDARY, "BOUNDARY"),
            (Self::FRONT, "FRONT"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "ElemFlags({})", set.join(" | "))
    }
}

/// Content of one neighbor slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Neighbor {
    /// Facet lies on the geometric boundary.
    Boundary,
    /// Locally resident neighbor.
    Local(ElemIdx),
    /// Neighbor exists but is not resident; carries its global index.
    Remote(i64),
}

impl Neighbor {
    /// Encode as `-1` (boundary), `loc` or `-(glb + 2)`.
    pub fn encode(self) -> i64 {
        match self {
            Neighbor::Boundary => -1,
            Neighbor::Local(idx) => idx.0 as i64,
            Neighbor::Remote(glb) => -(glb + 2),
        }
    }

    pub fn decode(raw: i64) -> Result<Self, MeshStrataError> {
        Ok(match raw {
            -1 => Neighbor::Boundary,
            r if r >= 0 => {
                let idx = usize::try_from(r).map_err(|_| MeshStrataError::Overflow {
                    what: "local element index",
                    index: usize::MAX,
                    capacity: u32::MAX as usize,
                })?;
                Neighbor::Local(ElemIdx::try_from(idx)?)
            }
            r => Neighbor::Remote(-r - 2),
        })
    }

    pub fn local(self) -> Option<ElemIdx> {
        match self {
            Neighbor::Local(idx) => Some(idx),
            _ => None,
        }
    }
}

/// Vertex record.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    /// Global index, `-1` until assigned.
    pub glb_idx: i64,
    pub coords: [f64; 3],
}

/// Element record (triangle or tetrahedron).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// Global index, `-1` until assigned.
    pub glb_idx: i64,
    pub parent_idx: Option<ElemIdx>,
    /// First child; children of one parent are stored contiguously.
    pub child_idx: Option<ElemIdx>,
    pub level_idx: u16,
    /// Number of refinements this element went through.
    pub refinement: u16,
    pub flags: ElemFlags,
    pub my_proc: u32,
    nverts: u8,
    vertex_indices: [VertexIdx; MAX_VERTICES],
    neighbor_indices: [Neighbor; MAX_VERTICES],
}

impl Element {
    pub fn new(level_idx: u16, my_proc: u32, vertices: &[VertexIdx]) -> Self {
        debug_assert!(vertices.len() <= MAX_VERTICES);
        let mut vertex_indices = [VertexIdx(0); MAX_VERTICES];
        vertex_indices[..vertices.len()].copy_from_slice(vertices);
        Self {
            glb_idx: -1,
            parent_idx: None,
            child_idx: None,
            level_idx,
            refinement: 0,
            flags: ElemFlags::empty(),
            my_proc,
            nverts: vertices.len() as u8,
            vertex_indices,
            neighbor_indices: [Neighbor::Boundary; MAX_VERTICES],
        }
    }

    #[inline]
    pub fn vertices(&self) -> &[VertexIdx] {
        &self.vertex_indices[..self.nverts as usize]
    }

    #[inline]
    pub fn vertices_mut(&mut self) -> &mut [VertexIdx] {
        &mut self.vertex_indices[..self.nverts as usize]
    }

    #[inline]
    pub fn neighbors(&self) -> &[Neighbor] {
        &self.neighbor_indices[..self.nverts as usize]
    }

    #[inline]
    pub fn neighbors_mut(&mut self) -> &mut [Neighbor] {
        &mut self.neighbor_indices[..self.nverts as usize]
    }

    #[inline]
    pub fn is_refined(&self) -> bool {
        self.child_idx.is_some()
    }

    #[inline]
    pub fn is_ghost(&self) -> bool {
        self.flags.contains(ElemFlags::GHOST)
    }

    /// Vertex at local position `i`.
    #[inline]
    pub fn vertex(&self, i: usize) -> VertexIdx {
        self.vertex_indices[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_index_conversion_is_checked() {
        assert_eq!(ElemIdx::try_from(7usize).unwrap(), ElemIdx(7));
        assert_eq!(VertexIdx::try_from(u32::MAX as usize).unwrap(), VertexIdx(u32::MAX));
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            ElemIdx::try_from(u32::MAX as usize + 1),
            Err(MeshStrataError::Overflow { index, .. }) if index == u32::MAX as usize + 1
        ));
    }

    #[test]
    fn neighbor_encoding() {
        assert_eq!(Neighbor::Boundary.encode(), -1);
        assert_eq!(Neighbor::Local(ElemIdx(5)).encode(), 5);
        assert_eq!(Neighbor::Remote(0).encode(), -2);
        assert_eq!(Neighbor::Remote(41).encode(), -43);
        for raw in [-43, -2, -1, 0, 7] {
            assert_eq!(Neighbor::decode(raw).unwrap().encode(), raw);
        }
        assert!(matches!(
            Neighbor::decode(1 << 40),
            Err(MeshStrataError::Overflow { .. })
        ));
    }

    #[test]
    fn flags_ownership_mask() {
        let f = ElemFlags::INTERIOR | ElemFlags::BOUNDARY;
        assert_eq!(f.ownership(), ElemFlags::INTERIOR);
        assert!(f.contains(ElemFlags::BOUNDARY));
        assert!(!f.intersects(ElemFlags::GHOST));
    }

    #[test]
    fn element_slices_follow_vertex_count() {
        let e = Element::new(0, 0, &[VertexIdx(2), VertexIdx(0), VertexIdx(1)]);
        assert_eq!(e.vertices().len(), 3);
        assert_eq!(e.neighbors(), &[Neighbor::Boundary; 3]);
        assert!(!e.is_refined());
    }
}
