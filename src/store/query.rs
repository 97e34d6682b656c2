//! Read-only queries on the local store.

use super::{LevelCounts, Mesh};
use crate::algs::communicator::Communicator;
use crate::mesh_error::MeshStrataError;
use crate::topology::{
    ElemFlags, ElemIdx, Element, EntityId, EntityType, MeshKind, Neighbor, Vertex, VertexIdx,
};

impl<C: Communicator> Mesh<C> {
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Select the level seen by queries and iterators.
    pub fn set_level(&mut self, level: usize) -> Result<(), MeshStrataError> {
        if level >= self.levels.len() {
            return Err(MeshStrataError::InvalidArgument(format!(
                "level {level} does not exist ({} levels)",
                self.levels.len()
            )));
        }
        self.query_level = level;
        Ok(())
    }

    pub fn level(&self) -> usize {
        self.query_level
    }

    pub fn counts(&self, level: usize) -> Result<&LevelCounts, MeshStrataError> {
        self.levels
            .get(level)
            .ok_or_else(|| MeshStrataError::InvalidArgument(format!("level {level} does not exist")))
    }

    fn query_counts(&self) -> &LevelCounts {
        &self.levels[self.query_level]
    }

    /// Global number of elements at the query level.
    pub fn num_elems(&self) -> u64 {
        self.query_counts().num_glb_elems
    }

    /// Global number of leaf elements at the query level.
    pub fn num_leaf_elems(&self) -> u64 {
        self.query_counts().num_glb_leaf_elems
    }

    /// Global number of vertices at the query level.
    pub fn num_vertices(&self) -> u64 {
        self.query_counts().num_glb_vertices
    }

    pub fn num_loc_elems(&self) -> usize {
        self.elems.len()
    }

    pub fn num_loc_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn elem(&self, idx: ElemIdx) -> Result<&Element, MeshStrataError> {
        self.elems
            .get(idx.index())
            .ok_or_else(|| MeshStrataError::InvalidArgument(format!("no element {idx:?}")))
    }

    pub fn vertex(&self, idx: VertexIdx) -> Result<&Vertex, MeshStrataError> {
        self.vertices
            .get(idx.index())
            .ok_or_else(|| MeshStrataError::InvalidArgument(format!("no vertex {idx:?}")))
    }

    pub fn vertex_coords(&self, idx: VertexIdx) -> Result<[f64; 3], MeshStrataError> {
        Ok(self.vertex(idx)?.coords)
    }

    pub fn vertex_coords_by_glb(&self, glb_idx: i64) -> Result<[f64; 3], MeshStrataError> {
        self.vertex_coords(self.map_glb_vertex(glb_idx)?)
    }

    pub fn map_glb_vertex(&self, glb_idx: i64) -> Result<VertexIdx, MeshStrataError> {
        self.vertex_map.find(glb_idx).map(VertexIdx)
    }

    pub fn map_glb_elem(&self, glb_idx: i64) -> Result<ElemIdx, MeshStrataError> {
        self.elem_map.find(glb_idx).map(ElemIdx)
    }

    pub fn neighbor_indices(&self, idx: ElemIdx) -> Result<&[Neighbor], MeshStrataError> {
        Ok(self.elem(idx)?.neighbors())
    }

    /// Neighbor slots encoded as `-1`, local index or `-(glb + 2)`.
    pub fn encoded_neighbor_indices(&self, idx: ElemIdx) -> Result<Vec<i64>, MeshStrataError> {
        Ok(self.neighbor_indices(idx)?.iter().map(|n| n.encode()).collect())
    }

    /// Children of `idx`, in child-table order.
    pub fn children(&self, idx: ElemIdx) -> Result<Vec<ElemIdx>, MeshStrataError> {
        let elem = self.elem(idx)?;
        let Some(first) = elem.child_idx else {
            return Ok(Vec::new());
        };
        Ok((first.index()..self.elems.len())
            .take(self.kind.num_children())
            .take_while(|&c| self.elems[c].parent_idx == Some(idx))
            .map(ElemIdx::try_from)
            .collect::<Result<_, _>>()?)
    }

    pub fn elem_weights(&self, idx: ElemIdx) -> Result<&[i32], MeshStrataError> {
        self.elem(idx)?;
        Ok(self.elem_weights_at(idx.index()))
    }

    /// Local vertices of an entity, in reference-element order.
    pub fn vertex_indices_of_entity(&self, id: EntityId) -> Result<Vec<VertexIdx>, MeshStrataError> {
        let elem = self.elem(id.elem_of())?;
        let re = self.kind.ref_element();
        let ty = id.type_of();
        if ty.dim() > re.dim || id.face_of() >= re.num_faces_of(ty) {
            return Err(MeshStrataError::InvalidArgument(format!(
                "{id:?} is not an entity of a {:?} mesh",
                self.kind
            )));
        }
        Ok(re
            .face_vertices(ty, id.face_of())
            .iter()
            .map(|&i| elem.vertex(i))
            .collect())
    }

    /// Classification of an entity (cells report their own flags).
    pub fn entity_flags(&self, id: EntityId) -> Result<ElemFlags, MeshStrataError> {
        self.adjacency.entity_flags(&self.elems, id)
    }

    /// Entity of the parent element on which `id` lies: the smallest parent
    /// sub-entity containing it. `None` for level-0 elements.
    ///
    /// Only tetrahedral meshes support this lookup.
    pub fn entity_parent(&self, id: EntityId) -> Result<Option<EntityId>, MeshStrataError> {
        if self.kind == MeshKind::Triangle {
            return Err(MeshStrataError::Unsupported(
                "entity parent lookup on triangle meshes".into(),
            ));
        }
        let elem = self.elem(id.elem_of())?;
        let Some(p) = elem.parent_idx else {
            return Ok(None);
        };
        let first = self.elems[p.index()].child_idx.ok_or_else(|| {
            MeshStrataError::InconsistentTopology(format!("parent {p:?} has no children"))
        })?;
        let re = self.kind.ref_element();
        let nth = id.elem_of().index() - first.index();
        let points = re.child_points(nth);
        let ty = id.type_of();
        if id.face_of() >= re.num_faces_of(ty) {
            return Err(MeshStrataError::InvalidArgument(format!("{id:?} has no such face")));
        }
        let local: Vec<usize> = re
            .face_vertices(ty, id.face_of())
            .iter()
            .map(|&i| points[i])
            .collect();
        let (pty, pface) = re.parent_entity_of_points(&local);
        Ok(Some(EntityId::build(pty, pface, p)))
    }

    /// Entity type of the given codimension.
    pub fn entity_type_of_codim(&self, codim: usize) -> Result<EntityType, MeshStrataError> {
        self.kind.entity_type_of_codim(codim).ok_or_else(|| {
            MeshStrataError::InvalidArgument(format!(
                "codimension {codim} exceeds dimension {}",
                self.kind.dim()
            ))
        })
    }
}
