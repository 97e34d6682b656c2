//! Red refinement of marked elements.
//!
//! ```text
//! Idle --begin_refine_elems--> Marking --end_refine_elems--> PreRefine
//!      --> Refining --> PostRefine --> Idle
//! ```
//!
//! `begin_refine_elems` opens a new level. Marked elements are split into
//! 4 (triangles) or 8 (tetrahedra) children in [`subdivision`]; the
//! post-refine step numbers the new vertices and elements, exchanges ghost
//! children between processes and connects the new level.
//!
//! A failed refinement abandons its level: the vertices, elements and map
//! entries it created are dropped, links into them are restored and the
//! store is back at the state before `begin_refine_elems`.

pub mod subdivision;

use hashbrown::HashSet;

use crate::algs::communicator::Communicator;
use crate::mesh_error::MeshStrataError;
use crate::store::{Backlink, Mesh};
use crate::topology::{ElemIdx, EntityId, VertexIdx};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RefinePhase {
    #[default]
    Idle,
    Marking,
    PreRefine,
    Refining,
    PostRefine,
}

/// Edge split during the running refinement: endpoints and the new midpoint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SplitEdge {
    pub a: VertexIdx,
    pub b: VertexIdx,
    pub mid: VertexIdx,
}

#[derive(Clone, Debug, Default)]
pub struct RefineState {
    pub(crate) phase: RefinePhase,
    pub(crate) marked: Vec<ElemIdx>,
    marked_set: HashSet<ElemIdx>,
    pub(crate) split_edges: Vec<SplitEdge>,
    /// Capacity committed by pre-refine: vertices, elements.
    pub(crate) capacity: (usize, usize),
    /// Slots of older elements relinked to the new level.
    pub(crate) backlinks: Vec<Backlink>,
}

impl RefineState {
    fn clear(&mut self) {
        self.phase = RefinePhase::Idle;
        self.marked.clear();
        self.marked_set.clear();
        self.split_edges.clear();
        self.capacity = (0, 0);
        self.backlinks.clear();
    }
}

impl<C: Communicator> Mesh<C> {
    pub fn refine_phase(&self) -> RefinePhase {
        self.refine.phase
    }

    /// Open a new level and start collecting marks.
    pub fn begin_refine_elems(&mut self) -> Result<(), MeshStrataError> {
        self.ensure_quiescent("begin refinement")?;
        let level = self.add_level()?;
        self.refine.clear();
        self.refine.phase = RefinePhase::Marking;
        log::debug!("refinement towards level {level} started");
        Ok(())
    }

    /// Mark an element (given by its cell entity id) for refinement.
    pub fn mark_entity(&mut self, id: EntityId) -> Result<(), MeshStrataError> {
        if self.refine.phase != RefinePhase::Marking {
            return Err(MeshStrataError::InvalidState(format!(
                "cannot mark in phase {:?}",
                self.refine.phase
            )));
        }
        if id.type_of() != self.kind.cell_type() {
            return Err(MeshStrataError::InvalidArgument(format!(
                "only cells can be marked, got {id:?}"
            )));
        }
        let idx = id.elem_of();
        let elem = self.elem(idx)?;
        if elem.is_refined() {
            return Err(MeshStrataError::InvalidState(format!(
                "element {idx:?} is already refined"
            )));
        }
        if elem.is_ghost() {
            return Err(MeshStrataError::InvalidArgument(format!(
                "ghost element {idx:?} is refined by its owner"
            )));
        }
        if self.refine.marked_set.insert(idx) {
            self.refine.marked.push(idx);
        }
        Ok(())
    }

    pub fn refine_elem(&mut self, idx: ElemIdx) -> Result<(), MeshStrataError> {
        self.mark_entity(EntityId::build(self.kind.cell_type(), 0, idx))
    }

    pub fn num_marked(&self) -> usize {
        self.refine.marked.len()
    }

    /// Refine every marked element. Collective on a parallel mesh.
    ///
    /// On failure the level opened by [`Mesh::begin_refine_elems`] is
    /// abandoned and the error is returned.
    pub fn end_refine_elems(&mut self) -> Result<(), MeshStrataError> {
        if self.refine.phase != RefinePhase::Marking {
            return Err(MeshStrataError::InvalidState(format!(
                "cannot end refinement in phase {:?}",
                self.refine.phase
            )));
        }
        let vstart = self.vertices.len();
        let estart = self.elems.len();
        let result = self.run_refinement(vstart, estart);
        if let Err(err) = &result {
            let level = self.store_level();
            log::warn!(
                "rank {}: refinement towards level {level} abandoned in {:?}: {err}",
                self.rank(),
                self.refine.phase
            );
            if let Err(undo) = self.abandon_level(vstart, estart) {
                log::error!("rank {}: rolling back level {level} failed: {undo}", self.rank());
            }
        }
        self.refine.clear();
        result
    }

    fn run_refinement(&mut self, vstart: usize, estart: usize) -> Result<(), MeshStrataError> {
        self.refine.phase = RefinePhase::PreRefine;
        let split = self.pre_refine().and_then(|()| {
            self.refine.phase = RefinePhase::Refining;
            self.refine_marked()
        });
        // every process enters the collective post-refine step, or none
        self.agree("refinement", split)?;

        self.refine.phase = RefinePhase::PostRefine;
        self.post_refine(vstart, estart)?;
        log::info!(
            "level {}: {} elements refined, {} new elements, {} new vertices",
            self.store_level(),
            self.refine.marked.len(),
            self.elems.len() - estart,
            self.vertices.len() - vstart
        );
        Ok(())
    }

    /// Reserve storage for the worst case of the current marks.
    fn pre_refine(&mut self) -> Result<(), MeshStrataError> {
        self.refine.marked.sort_unstable();
        let m = self.refine.marked.len();
        let nv = self.kind.new_vertices_bound(m);
        let ne = self.kind.new_elems_bound(m);
        self.vertices
            .try_reserve(nv)
            .map_err(|_| MeshStrataError::Allocation(self.vertices.len() + nv))?;
        self.reserve_elems(ne)?;
        self.refine.capacity = (self.vertices.len() + nv, self.elems.len() + ne);
        log::debug!("pre-refine: {m} marked, room for {nv} vertices and {ne} elements");
        Ok(())
    }

    fn post_refine(&mut self, vstart: usize, estart: usize) -> Result<(), MeshStrataError> {
        let vrange = vstart..self.vertices.len();
        let erange = estart..self.elems.len();
        if self.comm.is_serial() {
            self.number_vertices(vrange.clone())?;
        } else {
            self.number_split_vertices()?;
        }
        self.map_vertices(vrange)?;
        self.commit_vertices()?;

        match self.chunks.is_some() {
            true => self.number_children_by_chunk(erange.clone())?,
            false => self.number_elems(erange.clone())?,
        }
        self.map_elems(erange.clone())?;

        if !self.comm.is_serial() {
            let refined = self.refine.marked.clone();
            self.exchange_ghost_children(&refined)?;
            self.commit_vertices()?;
        }
        self.commit_elems(estart..self.elems.len())?;

        if self.chunks.is_some() {
            let saved = self.chunks.clone();
            if let Err(err) = self.add_chunks_for_level(erange) {
                self.chunks = saved;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Drop what a failed refinement created from `vstart` / `estart` on
    /// and close its level.
    fn abandon_level(&mut self, vstart: usize, estart: usize) -> Result<(), MeshStrataError> {
        let indexed = self.refine.phase == RefinePhase::PostRefine;
        let backlinks = std::mem::take(&mut self.refine.backlinks);
        for b in backlinks.iter().rev() {
            self.elems[b.elem].neighbors_mut()[b.facet] = b.previous;
        }
        for e in estart..self.elems.len() {
            let Some(p) = self.elems[e].parent_idx.filter(|p| p.index() < estart) else {
                continue;
            };
            let parent = &mut self.elems[p.index()];
            if parent.child_idx.is_some_and(|c| c.index() >= estart) {
                parent.child_idx = None;
            }
        }
        self.elems.truncate(estart);
        self.weights.truncate(estart * self.num_weights);
        self.vertices.truncate(vstart);
        self.elem_map.retain_below(estart);
        self.vertex_map.retain_below(vstart);

        if indexed {
            self.adjacency.clear();
            self.adjacency.update(&self.elems, 0..estart)?;
            let mut relinked: Vec<usize> = backlinks.iter().map(|b| b.elem).collect();
            relinked.sort_unstable();
            relinked.dedup();
            self.update_elem_flags(&relinked);
            self.adjacency.update_flags(&self.elems)?;
        }

        self.levels.pop();
        self.level_elem_start.pop();
        self.query_level = self.levels.len() - 1;
        log::debug!(
            "level {} abandoned, back to {} elements and {} vertices",
            self.levels.len(),
            estart,
            vstart
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    fn triangle_strip() -> Mesh {
        let mut mesh = Mesh::new(MeshKind::Triangle);
        mesh.begin_store_vertices(4).unwrap();
        for p in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]] {
            mesh.store_vertex(None, p).unwrap();
        }
        mesh.end_store_vertices().unwrap();
        mesh.begin_store_elems(2).unwrap();
        mesh.add_lvl0_cell(&[VertexIdx(0), VertexIdx(1), VertexIdx(2)], &[]).unwrap();
        mesh.add_lvl0_cell(&[VertexIdx(1), VertexIdx(2), VertexIdx(3)], &[]).unwrap();
        mesh.end_store_elems().unwrap();
        mesh
    }

    #[test]
    fn marking_outside_marking_phase_fails() {
        let mut mesh = triangle_strip();
        assert!(matches!(
            mesh.refine_elem(ElemIdx(0)),
            Err(MeshStrataError::InvalidState(_))
        ));
        assert!(mesh.end_refine_elems().is_err());
    }

    #[test]
    fn marks_are_deduplicated() {
        let mut mesh = triangle_strip();
        mesh.begin_refine_elems().unwrap();
        mesh.refine_elem(ElemIdx(0)).unwrap();
        mesh.refine_elem(ElemIdx(0)).unwrap();
        assert_eq!(mesh.num_marked(), 1);
        let edge = EntityId::build(EntityType::Edge, 0, ElemIdx(0));
        assert!(mesh.mark_entity(edge).is_err());
        mesh.end_refine_elems().unwrap();
        assert_eq!(mesh.refine_phase(), RefinePhase::Idle);
        assert_eq!(mesh.num_levels(), 2);
    }

    #[test]
    fn refined_element_cannot_be_marked_again() {
        let mut mesh = triangle_strip();
        mesh.begin_refine_elems().unwrap();
        mesh.refine_elem(ElemIdx(0)).unwrap();
        mesh.end_refine_elems().unwrap();
        mesh.begin_refine_elems().unwrap();
        assert!(matches!(
            mesh.refine_elem(ElemIdx(0)),
            Err(MeshStrataError::InvalidState(_))
        ));
    }

    #[test]
    fn midpoints_are_reused_across_levels() {
        let mut mesh = triangle_strip();
        mesh.begin_refine_elems().unwrap();
        mesh.refine_elem(ElemIdx(0)).unwrap();
        mesh.end_refine_elems().unwrap();
        assert_eq!(mesh.num_loc_vertices(), 7);
        mesh.begin_refine_elems().unwrap();
        mesh.refine_elem(ElemIdx(1)).unwrap();
        mesh.end_refine_elems().unwrap();
        // the shared edge (1, 2) was split on level 1 already
        assert_eq!(mesh.num_loc_vertices(), 9);
        let c = mesh.counts(2).unwrap();
        assert_eq!(c.num_glb_elems, 10);
        assert_eq!(c.num_interior_leaf_elems, 8);
        assert_eq!(c.num_glb_vertices, 9);
    }

    #[test]
    fn same_batch_neighbors_share_midpoints() {
        let mut mesh = triangle_strip();
        mesh.begin_refine_elems().unwrap();
        mesh.refine_elem(ElemIdx(1)).unwrap();
        mesh.refine_elem(ElemIdx(0)).unwrap();
        mesh.end_refine_elems().unwrap();
        assert_eq!(mesh.num_loc_vertices(), 9);
        // no facet of a leaf points at a refined element any more
        for leaf in mesh.leaf_elems() {
            for n in mesh.neighbor_indices(leaf).unwrap() {
                if let Neighbor::Local(o) = n {
                    assert!(!mesh.elem(*o).unwrap().is_refined(), "{leaf:?} -> {o:?}");
                }
            }
        }
    }

    #[test]
    fn abandoned_level_restores_relinked_neighbors() {
        let mut mesh = triangle_strip();
        mesh.begin_refine_elems().unwrap();
        mesh.refine_elem(ElemIdx(0)).unwrap();
        mesh.end_refine_elems().unwrap();
        let elems = mesh.elems.clone();
        let vertices = mesh.vertices.clone();
        let levels = mesh.levels.clone();
        let edges = mesh.entities(1).unwrap().count();

        // run a refinement to the end and throw it away
        mesh.begin_refine_elems().unwrap();
        mesh.refine_elem(ElemIdx(1)).unwrap();
        let (vstart, estart) = (mesh.vertices.len(), mesh.elems.len());
        mesh.refine.phase = RefinePhase::PreRefine;
        mesh.pre_refine().unwrap();
        mesh.refine.phase = RefinePhase::Refining;
        mesh.refine_marked().unwrap();
        mesh.refine.phase = RefinePhase::PostRefine;
        mesh.post_refine(vstart, estart).unwrap();
        assert!(!mesh.refine.backlinks.is_empty());
        mesh.abandon_level(vstart, estart).unwrap();
        mesh.refine.clear();

        assert_eq!(mesh.elems, elems);
        assert_eq!(mesh.vertices, vertices);
        assert_eq!(mesh.levels, levels);
        assert_eq!(mesh.level(), 1);
        assert_eq!(mesh.entities(1).unwrap().count(), edges);
        assert!(!mesh.elem(ElemIdx(1)).unwrap().is_refined());

        mesh.begin_refine_elems().unwrap();
        mesh.refine_elem(ElemIdx(1)).unwrap();
        mesh.end_refine_elems().unwrap();
        assert_eq!(mesh.num_loc_vertices(), 9);
        assert_eq!(mesh.counts(2).unwrap().num_glb_elems, 10);
    }
}
