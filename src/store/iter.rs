//! Restartable entity iterators over one level of the mesh.
//!
//! Iterators borrow the mesh, so it cannot change underneath a traversal.
//! [`LeafIter::restart`] and friends rewind to the first entity.

use super::Mesh;
use crate::algs::communicator::Communicator;
use crate::mesh_error::MeshStrataError;
use crate::topology::{ElemIdx, EntityId, EntityType, Neighbor};

/// Leaf elements of a level, in local order.
pub struct LeafIter<'a, C: Communicator> {
    mesh: &'a Mesh<C>,
    level: usize,
    with_ghosts: bool,
    next: usize,
}

impl<'a, C: Communicator> LeafIter<'a, C> {
    pub fn restart(&mut self) {
        self.next = 0;
    }

    pub fn level(&self) -> usize {
        self.level
    }
}

impl<C: Communicator> Iterator for LeafIter<'_, C> {
    type Item = ElemIdx;

    fn next(&mut self) -> Option<ElemIdx> {
        while self.next < self.mesh.elems.len() {
            let i = self.next;
            self.next += 1;
            let elem = &self.mesh.elems[i];
            if (self.with_ghosts || !elem.is_ghost()) && self.mesh.is_leaf_at(elem, self.level) {
                return ElemIdx::try_from(i).ok();
            }
        }
        None
    }
}

/// Facets of leaf elements lying on the geometric boundary.
pub struct BoundaryFacetIter<'a, C: Communicator> {
    leaves: LeafIter<'a, C>,
    current: Option<ElemIdx>,
    facet: usize,
}

impl<C: Communicator> BoundaryFacetIter<'_, C> {
    pub fn restart(&mut self) {
        self.leaves.restart();
        self.current = None;
        self.facet = 0;
    }
}

impl<C: Communicator> Iterator for BoundaryFacetIter<'_, C> {
    type Item = EntityId;

    fn next(&mut self) -> Option<EntityId> {
        let mesh = self.leaves.mesh;
        let nf = mesh.kind.num_facets();
        loop {
            let e = match self.current {
                Some(e) if self.facet < nf => e,
                _ => {
                    self.current = Some(self.leaves.next()?);
                    self.facet = 0;
                    continue;
                }
            };
            let f = self.facet;
            self.facet += 1;
            if mesh.elems[e.index()].neighbors()[f] == Neighbor::Boundary {
                return Some(EntityId::build(mesh.kind.facet_type(), f, e));
            }
        }
    }
}

/// One id per geometric entity of a type among the leaf elements: the id
/// whose element has the lowest index among the incident leaves.
pub struct EntityIter<'a, C: Communicator> {
    leaves: LeafIter<'a, C>,
    ty: EntityType,
    current: Option<ElemIdx>,
    face: usize,
}

impl<C: Communicator> EntityIter<'_, C> {
    pub fn restart(&mut self) {
        self.leaves.restart();
        self.current = None;
        self.face = 0;
    }

    pub fn entity_type(&self) -> EntityType {
        self.ty
    }
}

impl<C: Communicator> Iterator for EntityIter<'_, C> {
    type Item = EntityId;

    fn next(&mut self) -> Option<EntityId> {
        let mesh = self.leaves.mesh;
        let nfaces = mesh.kind.ref_element().num_faces_of(self.ty);
        loop {
            let e = match self.current {
                Some(e) if self.face < nfaces => e,
                _ => {
                    self.current = Some(self.leaves.next()?);
                    self.face = 0;
                    continue;
                }
            };
            let id = EntityId::build(self.ty, self.face, e);
            self.face += 1;
            let owner = mesh
                .leaf_representative(id, self.leaves.level, self.leaves.with_ghosts)
                .unwrap_or(id);
            if owner == id {
                return Some(id);
            }
        }
    }
}

impl<C: Communicator> Mesh<C> {
    /// Owned leaf elements of the query level.
    pub fn leaf_elems(&self) -> LeafIter<'_, C> {
        self.leaf_iter(false)
    }

    /// Leaf elements of the query level, ghosts included.
    pub fn leaf_elems_with_ghosts(&self) -> LeafIter<'_, C> {
        self.leaf_iter(true)
    }

    fn leaf_iter(&self, with_ghosts: bool) -> LeafIter<'_, C> {
        LeafIter {
            mesh: self,
            level: self.query_level,
            with_ghosts,
            next: 0,
        }
    }

    pub fn boundary_facets(&self) -> BoundaryFacetIter<'_, C> {
        BoundaryFacetIter {
            leaves: self.leaf_elems(),
            current: None,
            facet: 0,
        }
    }

    /// Entities of codimension `codim` (0 = cells) among owned leaves.
    pub fn entities(&self, codim: usize) -> Result<EntityIter<'_, C>, MeshStrataError> {
        let ty = self.entity_type_of_codim(codim)?;
        Ok(EntityIter {
            leaves: self.leaf_elems(),
            ty,
            current: None,
            face: 0,
        })
    }

    /// Id of `id`'s entity on the lowest-index leaf element containing it.
    fn leaf_representative(
        &self,
        id: EntityId,
        level: usize,
        with_ghosts: bool,
    ) -> Result<EntityId, MeshStrataError> {
        if id.type_of() == self.kind.cell_type() {
            return Ok(id);
        }
        Ok(self
            .adjacency
            .incident(&self.elems, id)?
            .iter()
            .copied()
            .filter(|i| {
                let elem = &self.elems[i.elem_of().index()];
                (with_ghosts || !elem.is_ghost()) && self.is_leaf_at(elem, level)
            })
            .min_by_key(|i| i.elem_of())
            .unwrap_or(id))
    }
}
