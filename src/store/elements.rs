//! Element batches, global numbering, neighbor resolution, element flags
//! and the level counters.

use std::ops::Range;

use hashbrown::HashSet;

use super::{Backlink, Batch, Mesh};
use crate::algs::communicator::{CollectiveExt, Communicator};
use crate::algs::wire::GlobalElem;
use crate::config::WeightUpdate;
use crate::mesh_error::MeshStrataError;
use crate::refine::RefinePhase;
use crate::topology::{ElemFlags, ElemIdx, Element, EntityId, Neighbor, VertexIdx};

impl<C: Communicator> Mesh<C> {
    /// Open a batch of at most `n` elements on the current store level.
    pub fn begin_store_elems(&mut self, n: usize) -> Result<(), MeshStrataError> {
        self.ensure_quiescent("store elements")?;
        self.reserve_elems(n)?;
        let start = self.elems.len();
        self.elem_batch = Some(Batch {
            start,
            capacity: start + n,
        });
        log::debug!(
            "begin storing up to {n} elements on level {}",
            self.store_level()
        );
        Ok(())
    }

    pub(crate) fn reserve_elems(&mut self, n: usize) -> Result<(), MeshStrataError> {
        let total = self.elems.len() + n;
        self.elems
            .try_reserve(n)
            .map_err(|_| MeshStrataError::Allocation(total))?;
        self.weights
            .try_reserve(n * self.num_weights)
            .map_err(|_| MeshStrataError::Allocation(total * self.num_weights))?;
        Ok(())
    }

    /// Store a level-0 cell. Vertex indices are sorted by global id.
    pub fn add_lvl0_cell(
        &mut self,
        vertices: &[VertexIdx],
        weights: &[i32],
    ) -> Result<ElemIdx, MeshStrataError> {
        let mut sorted = vertices.to_vec();
        self.check_vertices(&sorted)?;
        sorted.sort_by_key(|v| (self.vertices[v.index()].glb_idx, *v));
        self.add_cell(None, &sorted, weights)
    }

    /// Store a cell; level-0 cells have no parent, cells of level `L > 0`
    /// refine an element stored before level `L`. Vertex order is kept.
    pub fn add_cell(
        &mut self,
        parent: Option<ElemIdx>,
        vertices: &[VertexIdx],
        weights: &[i32],
    ) -> Result<ElemIdx, MeshStrataError> {
        let batch = self
            .elem_batch
            .ok_or_else(|| MeshStrataError::InvalidState("no element batch open".into()))?;
        let idx = self.elems.len();
        if idx >= batch.capacity {
            return Err(MeshStrataError::Overflow {
                what: "element",
                index: idx,
                capacity: batch.capacity,
            });
        }
        let elem_idx = ElemIdx::try_from(idx)?;
        self.check_vertices(vertices)?;
        if !weights.is_empty() && weights.len() != self.num_weights {
            return Err(MeshStrataError::InvalidArgument(format!(
                "expected {} weights, got {}",
                self.num_weights,
                weights.len()
            )));
        }
        let level = self.store_level();
        match (level, parent) {
            (0, None) => {}
            (0, Some(p)) => {
                return Err(MeshStrataError::InvalidArgument(format!(
                    "level-0 cell cannot have parent {p:?}"
                )));
            }
            (_, None) => {
                return Err(MeshStrataError::InvalidArgument(format!(
                    "cell on level {level} needs a parent"
                )));
            }
            (_, Some(p)) => self.check_parent(p, idx)?,
        }

        let mut elem = Element::new(level as u16, self.rank(), vertices);
        if let Some(p) = parent {
            elem.parent_idx = Some(p);
            elem.refinement = self.elems[p.index()].refinement + 1;
            let parent = &mut self.elems[p.index()];
            if parent.child_idx.is_none() {
                parent.child_idx = Some(elem_idx);
            }
        }
        self.elems.push(elem);
        self.push_weights(parent, weights);
        Ok(elem_idx)
    }

    fn check_vertices(&self, vertices: &[VertexIdx]) -> Result<(), MeshStrataError> {
        if vertices.len() != self.kind.num_vertices() {
            return Err(MeshStrataError::InvalidArgument(format!(
                "{:?} cells have {} vertices, got {}",
                self.kind,
                self.kind.num_vertices(),
                vertices.len()
            )));
        }
        if let Some(v) = vertices.iter().find(|v| v.index() >= self.vertices.len()) {
            return Err(MeshStrataError::InvalidArgument(format!("no vertex {v:?}")));
        }
        Ok(())
    }

    /// Parent must predate the current level, and its children must be
    /// stored contiguously.
    fn check_parent(&self, p: ElemIdx, idx: usize) -> Result<(), MeshStrataError> {
        let level_start = self.level_elem_start[self.store_level()];
        if p.index() >= level_start {
            return Err(MeshStrataError::InvalidArgument(format!(
                "parent {p:?} was not stored before level {}",
                self.store_level()
            )));
        }
        let parent = &self.elems[p.index()];
        if let Some(first) = parent.child_idx {
            let nth = idx - first.index();
            let contiguous = first.index() >= level_start
                && nth < self.kind.num_children()
                && self.elems[idx - 1].parent_idx == Some(p);
            if !contiguous {
                return Err(MeshStrataError::InvalidState(format!(
                    "element {p:?} is already refined"
                )));
            }
        }
        Ok(())
    }

    /// Append the weights of a new element, inheriting from `parent` when
    /// none are given.
    pub(crate) fn push_weights(&mut self, parent: Option<ElemIdx>, weights: &[i32]) {
        let nw = self.num_weights;
        if nw == 0 {
            return;
        }
        if !weights.is_empty() {
            self.weights.extend(weights.iter().map(|&w| w.max(1)));
            return;
        }
        match parent {
            Some(p) => {
                let div = match self.config.weight_update {
                    WeightUpdate::Copy => 1,
                    WeightUpdate::Split => self.kind.num_children() as i32,
                };
                let start = p.index() * nw;
                for k in 0..nw {
                    let w = self.weights[start + k];
                    self.weights.push((w / div).max(1));
                }
            }
            None => self.weights.extend(std::iter::repeat_n(1, nw)),
        }
    }

    /// Close the batch: number, index and connect the new elements.
    ///
    /// On a parallel mesh, closing the level-0 batch distributes the mesh.
    pub fn end_store_elems(&mut self) -> Result<(), MeshStrataError> {
        let batch = self
            .elem_batch
            .take()
            .ok_or_else(|| MeshStrataError::InvalidState("no element batch open".into()))?;
        let range = batch.start..self.elems.len();
        if !self.comm.is_serial() && self.store_level() == 0 {
            return self.distribute_level0(range);
        }
        self.number_elems(range.clone())?;
        self.map_elems(range.clone())?;
        self.commit_elems(range.clone())?;
        log::info!(
            "stored elements {range:?} on level {}: {} global",
            self.store_level(),
            self.levels[self.store_level()].num_glb_elems
        );
        Ok(())
    }

    /// Number unnumbered owned elements of `range` after the current global count.
    pub(crate) fn number_elems(&mut self, range: Range<usize>) -> Result<(), MeshStrataError> {
        let rank = self.rank();
        let unassigned: Vec<usize> = range
            .filter(|&i| self.elems[i].glb_idx < 0 && self.elems[i].my_proc == rank)
            .collect();
        self.number_elems_in_order(&unassigned)
    }

    pub(crate) fn number_elems_in_order(&mut self, order: &[usize]) -> Result<(), MeshStrataError> {
        let (offset, _) = self.comm.exclusive_prefix(order.len() as u64)?;
        let base = self.levels[self.store_level()].num_glb_elems + offset;
        for (k, &i) in order.iter().enumerate() {
            self.elems[i].glb_idx = (base + k as u64) as i64;
        }
        Ok(())
    }

    pub(crate) fn map_elems(&mut self, range: Range<usize>) -> Result<(), MeshStrataError> {
        self.elem_map.grow(self.elem_map.len() + range.len())?;
        for i in range {
            self.elem_map.insert(self.elems[i].glb_idx, i as u32);
        }
        self.elem_map.sort();
        Ok(())
    }

    /// Append elements known by global ids. Neighbors start out as
    /// `Remote(glb)` and are resolved by [`Mesh::commit_elems`]. With
    /// `link_parents`, resident parents get their first-child link.
    pub(crate) fn append_global_elems(
        &mut self,
        recs: &[GlobalElem],
        weights: &[i32],
        ghost: bool,
        link_parents: bool,
    ) -> Result<Range<usize>, MeshStrataError> {
        let start = self.elems.len();
        self.reserve_elems(recs.len())?;
        let mut seen: HashSet<i64> = HashSet::with_capacity(recs.len());
        for (r, rec) in recs.iter().enumerate() {
            if self.elem_map.contains(rec.glb_idx) || !seen.insert(rec.glb_idx) {
                continue;
            }
            let verts = rec
                .vertices
                .iter()
                .map(|&g| self.vertex_map.find(g).map(VertexIdx))
                .collect::<Result<Vec<_>, _>>()?;
            if verts.len() != self.kind.num_vertices() {
                return Err(MeshStrataError::InconsistentTopology(format!(
                    "element {} has {} vertices",
                    rec.glb_idx,
                    verts.len()
                )));
            }
            let idx = self.elems.len();
            let elem_idx = ElemIdx::try_from(idx)?;
            let mut elem = Element::new(rec.level, rec.my_proc, &verts);
            elem.glb_idx = rec.glb_idx;
            elem.refinement = rec.refinement;
            if ghost {
                elem.flags = ElemFlags::GHOST;
            }
            for (slot, &n) in elem.neighbors_mut().iter_mut().zip(&rec.neighbors) {
                *slot = if n < 0 { Neighbor::Boundary } else { Neighbor::Remote(n) };
            }
            if link_parents && rec.parent >= 0 {
                if let Ok(p) = self.elem_map.find(rec.parent) {
                    elem.parent_idx = Some(ElemIdx(p));
                    let parent = &mut self.elems[p as usize];
                    if parent.child_idx.is_none() {
                        parent.child_idx = Some(elem_idx);
                    }
                }
            }
            self.elems.push(elem);
            let nw = self.num_weights;
            if nw > 0 {
                match weights.get(r * nw..(r + 1) * nw) {
                    Some(w) => self.weights.extend(w.iter().map(|&x| x.max(1))),
                    None => {
                        let parent = self.elems[idx].parent_idx;
                        self.push_weights(parent, &[]);
                    }
                }
            }
        }
        // map only after the batch so lookups above see a sorted map
        self.map_elems(start..self.elems.len())?;
        Ok(start..self.elems.len())
    }

    /// Index the new range, resolve neighbors, refresh flags and counters.
    /// Only the range and the older elements it relinked are revisited.
    /// Collective on a parallel mesh.
    pub(crate) fn commit_elems(&mut self, range: Range<usize>) -> Result<(), MeshStrataError> {
        self.adjacency.update(&self.elems, range.clone())?;
        let mut relinked = Vec::new();
        let resolved = self.resolve_neighbors(range.clone(), &mut relinked);
        let mut changed: Vec<usize> = relinked.iter().map(|b| b.elem).collect();
        if self.refine.phase == RefinePhase::PostRefine {
            self.refine.backlinks.extend(relinked);
        }
        resolved?;
        changed.sort_unstable();
        changed.dedup();
        changed.extend(range.clone());
        self.update_elem_flags(&changed);
        self.adjacency.update_flags_of(&self.elems, &changed)?;
        self.update_counters(range)
    }

    /// Exact facet matches first; otherwise a preset remote id or the
    /// parent's neighbor across the parent facet containing the child facet.
    /// Overwritten slots of older elements are appended to `relinked`.
    fn resolve_neighbors(
        &mut self,
        range: Range<usize>,
        relinked: &mut Vec<Backlink>,
    ) -> Result<(), MeshStrataError> {
        let nf = self.kind.num_facets();
        for e in range.clone() {
            for f in 0..nf {
                let other = self.facet_partner(e, f)?;
                let slot = match other {
                    Some(o) => {
                        let oi = o.elem_of().index();
                        if oi < range.start {
                            // older element sharing the same facet now sees us
                            let facet = o.face_of();
                            let slot = &mut self.elems[oi].neighbors_mut()[facet];
                            relinked.push(Backlink {
                                elem: oi,
                                facet,
                                previous: *slot,
                            });
                            *slot = Neighbor::Local(ElemIdx::try_from(e)?);
                        }
                        Neighbor::Local(o.elem_of())
                    }
                    None => self.unmatched_neighbor(e, f)?,
                };
                self.elems[e].neighbors_mut()[f] = slot;
            }
        }
        Ok(())
    }

    fn facet_partner(&self, e: usize, f: usize) -> Result<Option<EntityId>, MeshStrataError> {
        let ids = self
            .adjacency
            .facet_incidence(&self.elems, ElemIdx::try_from(e)?, f)?;
        let mut others = ids.iter().copied().filter(|id| id.elem_of().index() != e);
        let first = others.next();
        if others.next().is_some() {
            return Err(MeshStrataError::InconsistentTopology(format!(
                "facet {f} of element {e} is shared by {} elements",
                ids.len()
            )));
        }
        Ok(first)
    }

    fn unmatched_neighbor(&self, e: usize, f: usize) -> Result<Neighbor, MeshStrataError> {
        let elem = &self.elems[e];
        match elem.neighbors()[f] {
            Neighbor::Remote(g) => Ok(self
                .elem_map
                .find(g)
                .map(|l| Neighbor::Local(ElemIdx(l)))
                .unwrap_or(Neighbor::Remote(g))),
            Neighbor::Local(l) => Ok(Neighbor::Local(l)),
            Neighbor::Boundary => {
                let Some(p) = elem.parent_idx else {
                    return Ok(Neighbor::Boundary);
                };
                let parent = &self.elems[p.index()];
                let Some(first) = parent.child_idx else {
                    return Ok(Neighbor::Boundary);
                };
                let nth = e.checked_sub(first.index()).filter(|&k| k < self.kind.num_children());
                let re = self.kind.ref_element();
                match nth.and_then(|k| re.child_facet_parent(k, f)) {
                    Some(pf) => Ok(parent.neighbors()[pf]),
                    None => Err(MeshStrataError::InconsistentTopology(format!(
                        "interior facet {f} of element {e} has no sibling across it"
                    ))),
                }
            }
        }
    }

    /// Ghost, border (sees a non-owned neighbor) or interior, plus the
    /// geometric-boundary bit, for the elements in `which`.
    pub(crate) fn update_elem_flags(&mut self, which: &[usize]) {
        let rank = self.rank();
        let flags: Vec<ElemFlags> = which
            .iter()
            .map(|&e| {
                let elem = &self.elems[e];
                let foreign = elem.neighbors().iter().any(|n| match *n {
                    Neighbor::Remote(_) => true,
                    Neighbor::Local(l) => self.elems[l.index()].my_proc != rank,
                    Neighbor::Boundary => false,
                });
                let mut f = if elem.my_proc != rank {
                    ElemFlags::GHOST
                } else if foreign {
                    ElemFlags::BORDER
                } else {
                    ElemFlags::INTERIOR
                };
                if elem.neighbors().contains(&Neighbor::Boundary) {
                    f.insert(ElemFlags::BOUNDARY);
                }
                f
            })
            .collect();
        for (&e, f) in which.iter().zip(flags) {
            self.elems[e].flags = f;
        }
    }

    /// Leaf at `level`: exists there and is not refined by then.
    pub(crate) fn is_leaf_at(&self, elem: &Element, level: usize) -> bool {
        elem.level_idx as usize <= level
            && match elem.child_idx {
                None => true,
                Some(c) => self.elems[c.index()].level_idx as usize > level,
            }
    }

    /// Add the elements of `range` to the counters of the current level.
    /// Counters are totals, so only the new elements are visited: owned
    /// parents whose first child is in `range` stop being leaves, and
    /// vertices of new ghosts not touched by an older ghost become shared.
    pub(crate) fn update_counters(&mut self, range: Range<usize>) -> Result<(), MeshStrataError> {
        let level = self.store_level();
        let mut owned = 0u64;
        let mut ghosts = 0u64;
        let mut leaves = 0u64;
        let mut retired = 0u64;
        let mut fresh: Vec<usize> = Vec::new();
        for e in range.clone() {
            let elem = &self.elems[e];
            if elem.is_ghost() {
                ghosts += 1;
                for &v in elem.vertices() {
                    let older_ghost = self.adjacency.vertex_entry(v).is_some_and(|entry| {
                        entry.items.iter().any(|id| {
                            let i = id.elem_of().index();
                            i < range.start && self.elems[i].is_ghost()
                        })
                    });
                    if !older_ghost {
                        fresh.push(v.index());
                    }
                }
            } else {
                owned += 1;
                if self.is_leaf_at(elem, level) {
                    leaves += 1;
                }
            }
            if let Some(p) = elem.parent_idx.filter(|p| p.index() < range.start) {
                let parent = &self.elems[p.index()];
                if parent.child_idx.map(ElemIdx::index) == Some(e)
                    && !parent.is_ghost()
                    && parent.level_idx as usize <= level
                {
                    retired += 1;
                }
            }
        }
        fresh.sort_unstable();
        fresh.dedup();

        let before = self.levels[level];
        let interior = before.num_interior_elems + owned;
        // retired parents were counted as leaves when they were committed
        let interior_leaves = (before.num_interior_leaf_elems + leaves).saturating_sub(retired);
        let glb_elems = self.comm.allreduce_sum(interior)?;
        let glb_leaves = self.comm.allreduce_sum(interior_leaves)?;
        let num_loc_vertices = self.vertices.len() as u64;
        let counts = self.current_counts_mut();
        counts.num_interior_elems = interior;
        counts.num_ghost_elems += ghosts;
        counts.num_interior_leaf_elems = interior_leaves;
        counts.num_glb_elems = glb_elems;
        counts.num_glb_leaf_elems = glb_leaves;
        counts.num_loc_vertices = num_loc_vertices;
        counts.first_b_vtx = match (counts.num_b_vtx, fresh.first()) {
            (0, None) => num_loc_vertices,
            (0, Some(&v)) => v as u64,
            (_, Some(&v)) => counts.first_b_vtx.min(v as u64),
            (_, None) => counts.first_b_vtx,
        };
        counts.num_b_vtx += fresh.len() as u64;
        Ok(())
    }

    /// Element record with every reference replaced by a global index.
    pub(crate) fn global_record(&self, e: usize) -> GlobalElem {
        let elem = &self.elems[e];
        let glb_of = |i: ElemIdx| self.elems[i.index()].glb_idx;
        GlobalElem {
            glb_idx: elem.glb_idx,
            parent: elem.parent_idx.map_or(-1, glb_of),
            child: elem.child_idx.map_or(-1, glb_of),
            level: elem.level_idx,
            refinement: elem.refinement,
            flags: elem.flags,
            my_proc: elem.my_proc,
            vertices: elem
                .vertices()
                .iter()
                .map(|v| self.vertices[v.index()].glb_idx)
                .collect(),
            neighbors: elem
                .neighbors()
                .iter()
                .map(|n| match *n {
                    Neighbor::Boundary => -1,
                    Neighbor::Local(l) => glb_of(l),
                    Neighbor::Remote(g) => g,
                })
                .collect(),
        }
    }

    pub(crate) fn elem_weights_at(&self, e: usize) -> &[i32] {
        let nw = self.num_weights;
        &self.weights[e * nw..(e + 1) * nw]
    }
}
