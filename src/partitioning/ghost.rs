//! Ghost elements: read-only copies of elements owned elsewhere.
//!
//! After distribution every process asks for the non-resident neighbors of
//! its owned elements; after a refinement, holders of a ghost whose owner
//! refined it fetch the children so that the ghost layer follows the mesh.

use std::ops::Range;

use hashbrown::HashSet;

use crate::algs::communicator::{CollectiveExt, Communicator};
use crate::algs::wire::{GlobalElem, WireElem, WireVertex};
use crate::mesh_error::MeshStrataError;
use crate::store::Mesh;
use crate::topology::{ElemIdx, Neighbor};

/// Element records with their vertices and weights, per destination.
struct Outbox {
    elems: Vec<Vec<WireElem>>,
    vertices: Vec<Vec<WireVertex>>,
    weights: Vec<Vec<i32>>,
    sent_vertices: Vec<HashSet<i64>>,
}

impl Outbox {
    fn new(size: usize) -> Self {
        Self {
            elems: vec![Vec::new(); size],
            vertices: vec![Vec::new(); size],
            weights: vec![Vec::new(); size],
            sent_vertices: vec![HashSet::new(); size],
        }
    }
}

impl<C: Communicator> Mesh<C> {
    fn post(&self, out: &mut Outbox, dst: usize, e: usize, rec: &GlobalElem) {
        out.elems[dst].push(WireElem::encode(rec));
        out.weights[dst].extend_from_slice(self.elem_weights_at(e));
        for v in self.elems[e].vertices() {
            let wire = self.wire_vertex(*v);
            if out.sent_vertices[dst].insert(wire.glb_idx()) {
                out.vertices[dst].push(wire);
            }
        }
    }

    /// Swap outboxes and append what arrived. Returns the new elements.
    fn deliver(
        &mut self,
        out: Outbox,
        link_parents: bool,
    ) -> Result<Range<usize>, MeshStrataError> {
        let elems = self.comm.alltoallv(&out.elems)?;
        let verts = self.comm.alltoallv(&out.vertices)?;
        let weights = self.comm.alltoallv(&out.weights)?;
        let verts: Vec<WireVertex> = verts.into_iter().flatten().collect();
        self.append_global_vertices(&verts)?;
        let recs: Vec<GlobalElem> = elems.iter().flatten().map(WireElem::decode).collect();
        let weights: Vec<i32> = weights.into_iter().flatten().collect();
        self.append_global_elems(&recs, &weights, true, link_parents)
    }

    /// Fetch the owned neighbors of local elements that are not resident
    /// yet. Collective.
    pub(crate) fn exchange_ghosts(&mut self) -> Result<Range<usize>, MeshStrataError> {
        let rank = self.rank();
        let mut wanted: Vec<i64> = self
            .elems
            .iter()
            .filter(|e| e.my_proc == rank)
            .flat_map(|e| e.neighbors().iter())
            .filter_map(|n| match *n {
                Neighbor::Remote(g) if !self.elem_map.contains(g) => Some(g),
                _ => None,
            })
            .collect();
        wanted.sort_unstable();
        wanted.dedup();

        let requests = self.comm.allgatherv(&wanted)?;
        let mut out = Outbox::new(self.comm.size());
        for (src, ids) in requests.iter().enumerate() {
            if src == self.comm.rank() {
                continue;
            }
            for &g in ids {
                let Ok(l) = self.elem_map.find(g) else { continue };
                let e = l as usize;
                if self.elems[e].my_proc == rank {
                    let rec = self.global_record(e);
                    self.post(&mut out, src, e, &rec);
                }
            }
        }
        let range = self.deliver(out, false)?;
        log::debug!(
            "rank {rank}: asked for {} ghosts, received {}",
            wanted.len(),
            range.len()
        );
        Ok(range)
    }

    /// Fetch the children of ghosts refined by their owners. `refined` are
    /// the local parents refined in this step. Collective.
    pub(crate) fn exchange_ghost_children(
        &mut self,
        refined: &[ElemIdx],
    ) -> Result<Range<usize>, MeshStrataError> {
        let size = self.comm.size();
        let me = self.comm.rank();
        let glbs: Vec<i64> = refined
            .iter()
            .map(|p| self.elems[p.index()].glb_idx)
            .collect();
        let announced = self.comm.allgatherv(&glbs)?;

        let mut asks: Vec<Vec<i64>> = vec![Vec::new(); size];
        for (src, ids) in announced.iter().enumerate() {
            if src == me {
                continue;
            }
            for &g in ids {
                let Ok(l) = self.elem_map.find(g) else { continue };
                let elem = &self.elems[l as usize];
                if elem.is_ghost() && !elem.is_refined() {
                    asks[src].push(g);
                }
            }
        }
        let asked = self.comm.alltoallv(&asks)?;

        let mut out = Outbox::new(size);
        for (dst, ids) in asked.iter().enumerate() {
            for &g in ids {
                let p = self.map_glb_elem(g)?;
                for c in self.children(p)? {
                    let mut rec = self.global_record(c.index());
                    // resolved by the receiver through the ghost parent
                    rec.neighbors.iter_mut().for_each(|n| *n = -1);
                    self.post(&mut out, dst, c.index(), &rec);
                }
            }
        }
        let range = self.deliver(out, true)?;
        log::debug!("rank {me}: received {} ghost children", range.len());
        Ok(range)
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    /// Two triangles sharing an edge, one per rank after distribution.
    fn square(comm: LocalComm) -> Mesh<LocalComm> {
        // one centroid per octant, so each triangle gets its own chunk
        let cfg = MeshConfig {
            chunking: ChunkConfig {
                max_num_elems_p_chunk: 4,
                ..ChunkConfig::default()
            },
            partition: PartitionerConfig {
                mode: PartitionMode::Slices,
                ..PartitionerConfig::default()
            },
            ..MeshConfig::default()
        };
        let mut mesh = Mesh::with_comm(MeshKind::Triangle, comm, cfg).unwrap();
        let root = mesh.comm().rank() == 0;
        let pts = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]];
        mesh.begin_store_vertices(if root { 4 } else { 0 }).unwrap();
        if root {
            for (g, p) in pts.iter().enumerate() {
                mesh.store_vertex(Some(g as i64), *p).unwrap();
            }
        }
        mesh.end_store_vertices().unwrap();
        mesh.begin_store_elems(if root { 2 } else { 0 }).unwrap();
        if root {
            mesh.add_lvl0_cell(&[VertexIdx(0), VertexIdx(1), VertexIdx(2)], &[]).unwrap();
            mesh.add_lvl0_cell(&[VertexIdx(1), VertexIdx(3), VertexIdx(2)], &[]).unwrap();
        }
        mesh.end_store_elems().unwrap();
        mesh
    }

    #[test]
    fn each_rank_sees_the_other_triangle_as_ghost() {
        let out = LocalComm::run(2, |comm| {
            let mesh = square(comm);
            let c = *mesh.counts(0).unwrap();
            (c.num_glb_elems, c.num_interior_elems, c.num_ghost_elems, c.num_b_vtx)
        });
        for (glb, owned, ghosts, shared) in out {
            assert_eq!(glb, 2);
            assert_eq!(owned, 1);
            assert_eq!(ghosts, 1);
            // the two endpoints of the shared edge plus the ghost's corner
            assert_eq!(shared, 3);
        }
    }

    #[test]
    fn ghost_children_follow_their_owner() {
        let out = LocalComm::run(2, |comm| {
            let mut mesh = square(comm);
            mesh.begin_refine_elems().unwrap();
            let owned: Vec<ElemIdx> = mesh.leaf_elems().collect();
            for e in owned {
                mesh.refine_elem(e).unwrap();
            }
            mesh.end_refine_elems().unwrap();
            let c = *mesh.counts(1).unwrap();
            let leaves_with_ghosts = mesh.leaf_elems_with_ghosts().count();
            (c.num_glb_elems, c.num_glb_vertices, leaves_with_ghosts, mesh.num_loc_vertices())
        });
        for (glb_elems, glb_vertices, leaves, loc_vertices) in out {
            assert_eq!(glb_elems, 10);
            // 4 corners and 5 distinct edge midpoints
            assert_eq!(glb_vertices, 9);
            assert_eq!(leaves, 8);
            assert_eq!(loc_vertices, 9);
        }
    }
}
