//! Bit-packed entity identities.
//!
//! An [`EntityId`] packs `(entity type, face index, element index)` into one
//! `u64`:
//!
//! ```text
//!  63..60  type     (EntityType, 4 bits)
//!  59..56  face     (sub-entity index within the element, 4 bits)
//!  55..0   element  (process-local element index, 56 bits)
//! ```
//!
//! Every [`ElemIdx`] fits the element field. Face indices above
//! [`EntityId::MAX_FACE_IDX`] cannot be represented: [`EntityId::build`]
//! asserts this limit and [`EntityId::try_build`] reports it.
//! Two different ids may denote the same geometric entity when it is shared
//! by several elements; the adjacency index picks the canonical one.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

use crate::mesh_error::MeshStrataError;
use crate::topology::element::ElemIdx;
use crate::topology::ref_element::EntityType;

const TYPE_SHIFT: u32 = 60;
const FACE_SHIFT: u32 = 56;
const FACE_MASK: u64 = 0xF;
const ELEM_MASK: u64 = (1 << FACE_SHIFT) - 1;

// local element indices are u32
const_assert!(u32::MAX as u64 <= ELEM_MASK);

/// Opaque identity of a vertex, edge, facet or cell.
#[repr(transparent)]
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Pod, Zeroable,
)]
pub struct EntityId(u64);

impl EntityId {
    /// Largest element index an id can carry.
    pub const MAX_ELEM_IDX: u64 = ELEM_MASK;
    /// Largest face index an id can carry.
    pub const MAX_FACE_IDX: usize = FACE_MASK as usize;

    /// Pack an identity. Panics if `face` exceeds [`EntityId::MAX_FACE_IDX`].
    #[inline]
    pub fn build(ty: EntityType, face: usize, elem: ElemIdx) -> Self {
        assert!(
            face <= Self::MAX_FACE_IDX,
            "entity id out of range: face {face}, elem {elem:?}"
        );
        Self::pack(ty, face, elem)
    }

    /// Checked variant of [`EntityId::build`].
    pub fn try_build(ty: EntityType, face: usize, elem: ElemIdx) -> Result<Self, MeshStrataError> {
        if face > Self::MAX_FACE_IDX {
            return Err(MeshStrataError::InvalidArgument(format!(
                "cannot encode face {face} of element {}",
                elem.0
            )));
        }
        Ok(Self::pack(ty, face, elem))
    }

    #[inline]
    fn pack(ty: EntityType, face: usize, elem: ElemIdx) -> Self {
        EntityId(
            ((ty as u64) << TYPE_SHIFT) | ((face as u64) << FACE_SHIFT) | (elem.0 as u64 & ELEM_MASK),
        )
    }

    #[inline]
    pub fn type_of(self) -> EntityType {
        // type bits are only ever written from a valid EntityType
        EntityType::from_bits((self.0 >> TYPE_SHIFT) as u8).unwrap_or(EntityType::Vertex)
    }

    #[inline]
    pub fn face_of(self) -> usize {
        ((self.0 >> FACE_SHIFT) & FACE_MASK) as usize
    }

    #[inline]
    pub fn elem_of(self) -> ElemIdx {
        ElemIdx((self.0 & ELEM_MASK) as u32)
    }

    /// Raw packed value.
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }

    /// Rebuild from a raw packed value; `None` if the type bits are invalid.
    pub fn from_raw(raw: u64) -> Option<Self> {
        EntityType::from_bits((raw >> TYPE_SHIFT) as u8).map(|_| EntityId(raw))
    }
}

impl std::fmt::Debug for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EntityId({:?}, face {}, elem {})",
            self.type_of(),
            self.face_of(),
            self.elem_of().0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use static_assertions::assert_eq_size;

    assert_eq_size!(EntityId, u64);

    fn any_type() -> impl Strategy<Value = EntityType> {
        prop_oneof![
            Just(EntityType::Vertex),
            Just(EntityType::Edge),
            Just(EntityType::Triangle),
            Just(EntityType::Tetrahedron),
        ]
    }

    proptest! {
        #[test]
        fn build_unpacks_to_its_parts(ty in any_type(), face in 0usize..16, elem in any::<u32>()) {
            let id = EntityId::build(ty, face, ElemIdx(elem));
            prop_assert_eq!(id.type_of(), ty);
            prop_assert_eq!(id.face_of(), face);
            prop_assert_eq!(id.elem_of(), ElemIdx(elem));
        }
    }

    #[test]
    fn largest_local_element_round_trips() {
        let id = EntityId::build(EntityType::Tetrahedron, 0, ElemIdx(u32::MAX));
        assert_eq!(id.elem_of(), ElemIdx(u32::MAX));
        assert_eq!(id.type_of(), EntityType::Tetrahedron);
    }

    #[test]
    fn face_out_of_range_is_rejected() {
        let err = EntityId::try_build(EntityType::Edge, 16, ElemIdx(3)).unwrap_err();
        assert!(matches!(err, MeshStrataError::InvalidArgument(_)));
    }

    #[test]
    #[should_panic]
    fn build_asserts_face_range() {
        let _ = EntityId::build(EntityType::Edge, 40, ElemIdx(0));
    }

    #[test]
    fn raw_round_trip() {
        let id = EntityId::build(EntityType::Triangle, 2, ElemIdx(77));
        assert_eq!(EntityId::from_raw(id.get()), Some(id));
        assert_eq!(EntityId::from_raw(u64::MAX), None);
    }
}
