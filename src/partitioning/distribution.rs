//! Initial distribution of the level-0 mesh.
//!
//! Closing the level-0 element batch on a parallel mesh gathers every staged
//! element on rank 0. Rank 0 orders the elements along the octree, builds
//! the level-0 chunks, partitions the octants and sends every process the
//! elements it owns; ghosts follow by [`Mesh::exchange_ghosts`]. The chunk
//! manager is replicated on every process.

use std::ops::Range;

use hashbrown::HashSet;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use super::chunks::ChunkManager;
use super::octree::BBox;
use crate::algs::communicator::{CollectiveExt, Communicator, NoComm};
use crate::algs::wire::{GlobalElem, WireCentroid, WireChunk, WireElem, WireOctant, WireVertex};
use crate::mesh_error::MeshStrataError;
use crate::store::{LevelCounts, Mesh};
use crate::topology::VertexIdx;

const ROOT: usize = 0;

/// What rank 0 sends back: the replicated chunk state and, per process,
/// the owned elements with their vertices and weights.
struct DistributionPlan {
    bbox: BBox,
    octants: Vec<WireOctant>,
    chunks: Vec<WireChunk>,
    num_chunks_p_level: Vec<u64>,
    elems: Vec<Vec<WireElem>>,
    vertices: Vec<Vec<WireVertex>>,
    weights: Vec<Vec<i32>>,
}

/// One buffer per process, all empty but the root's.
fn to_root<T: Clone>(size: usize, items: Vec<T>) -> Vec<Vec<T>> {
    let mut out = vec![Vec::new(); size];
    out[ROOT] = items;
    out
}

pub(crate) fn bbox_to_bits(b: &BBox) -> [u64; 6] {
    [b.min[0], b.min[1], b.min[2], b.max[0], b.max[1], b.max[2]].map(f64::to_bits)
}

pub(crate) fn bbox_from_bits(bits: &[u64]) -> Result<BBox, MeshStrataError> {
    if bits.len() != 6 {
        return Err(MeshStrataError::Collective(format!(
            "bounding box has {} coordinates",
            bits.len()
        )));
    }
    let f = |i: usize| f64::from_bits(bits[i]);
    Ok(BBox {
        min: [f(0), f(1), f(2)],
        max: [f(3), f(4), f(5)],
    })
}

impl<C: Communicator> Mesh<C> {
    /// Distribute the staged level-0 elements. Collective.
    pub(crate) fn distribute_level0(&mut self, range: Range<usize>) -> Result<(), MeshStrataError> {
        if range.start != 0 {
            return Err(MeshStrataError::InvalidState(
                "a parallel level 0 must be stored in a single element batch".into(),
            ));
        }
        let size = self.comm.size();
        let staged: Vec<WireElem> = range
            .clone()
            .map(|e| WireElem::encode(&self.global_record(e)))
            .collect();
        let vertices: Vec<WireVertex> = (0..self.vertices.len())
            .map(|v| VertexIdx::try_from(v).map(|v| self.wire_vertex(v)))
            .collect::<Result<_, _>>()?;
        let elems_in = self.comm.alltoallv(&to_root(size, staged))?;
        let verts_in = self.comm.alltoallv(&to_root(size, vertices))?;
        let weights_in = self.comm.alltoallv(&to_root(size, self.weights.clone()))?;
        self.reset_local_store();

        let plan = if self.comm.rank() == ROOT {
            let elems: Vec<GlobalElem> = elems_in.iter().flatten().map(WireElem::decode).collect();
            let verts: Vec<WireVertex> = verts_in.into_iter().flatten().collect();
            let weights: Vec<i32> = weights_in.into_iter().flatten().collect();
            Some(self.plan_distribution(elems, verts, weights))
        } else {
            None
        };
        // status first, so a failing root does not leave the others waiting
        let status = match &plan {
            Some(Err(_)) => 1u64,
            _ => 0,
        };
        let status = self.comm.broadcast(ROOT, &[status])?;
        let plan = match plan {
            Some(p) => Some(p?),
            None if status.first() == Some(&0) => None,
            None => {
                return Err(MeshStrataError::Collective(
                    "rank 0 failed to distribute the level-0 mesh".into(),
                ));
            }
        };

        let bbox_bits = self.comm.broadcast(
            ROOT,
            &plan.as_ref().map(|p| bbox_to_bits(&p.bbox).to_vec()).unwrap_or_default(),
        )?;
        let octants = self.comm.broadcast(
            ROOT,
            plan.as_ref().map_or(&[][..], |p| &p.octants[..]),
        )?;
        let chunks = self.comm.broadcast(
            ROOT,
            plan.as_ref().map_or(&[][..], |p| &p.chunks[..]),
        )?;
        let per_level = self.comm.broadcast(
            ROOT,
            plan.as_ref().map_or(&[][..], |p| &p.num_chunks_p_level[..]),
        )?;
        let mgr = ChunkManager::from_wire(
            bbox_from_bits(&bbox_bits)?,
            self.config.chunking,
            &octants,
            &chunks,
            per_level.into_iter().map(|n| n as usize).collect(),
        )?;

        let (elems_out, verts_out, weights_out) = match plan {
            Some(p) => (p.elems, p.vertices, p.weights),
            None => (vec![Vec::new(); size], vec![Vec::new(); size], vec![Vec::new(); size]),
        };
        let elems = self.comm.alltoallv(&elems_out)?.swap_remove(ROOT);
        let verts = self.comm.alltoallv(&verts_out)?.swap_remove(ROOT);
        let weights = self.comm.alltoallv(&weights_out)?.swap_remove(ROOT);

        self.append_global_vertices(&verts)?;
        let recs: Vec<GlobalElem> = elems.iter().map(WireElem::decode).collect();
        self.append_global_elems(&recs, &weights, false, true)?;
        self.chunks = Some(mgr);
        self.exchange_ghosts()?;
        self.commit_vertices()?;
        self.commit_elems(0..self.elems.len())?;
        log::info!(
            "rank {}: {} owned and {} ghost level-0 elements of {}",
            self.comm.rank(),
            self.levels[0].num_interior_elems,
            self.levels[0].num_ghost_elems,
            self.levels[0].num_glb_elems
        );
        Ok(())
    }

    /// Drop every element and vertex; the level counters restart.
    fn reset_local_store(&mut self) {
        self.elems.clear();
        self.vertices.clear();
        self.weights.clear();
        self.elem_map.clear();
        self.vertex_map.clear();
        self.adjacency.clear();
        self.levels = vec![LevelCounts::default()];
        self.level_elem_start = vec![0];
        self.query_level = 0;
    }

    /// Order, chunk and partition the whole level-0 mesh on rank 0.
    fn plan_distribution(
        &self,
        staged: Vec<GlobalElem>,
        mut vertices: Vec<WireVertex>,
        weights: Vec<i32>,
    ) -> Result<DistributionPlan, MeshStrataError> {
        let nprocs = self.comm.size();
        let nw = self.num_weights;
        vertices.sort_by_key(|v| v.glb_idx());
        vertices.dedup_by_key(|v| v.glb_idx());

        let mut serial = Mesh::<NoComm>::with_config(self.kind, self.config.clone())?;
        serial.set_num_weights(nw)?;
        serial.begin_store_vertices(vertices.len())?;
        for v in &vertices {
            serial.store_vertex(Some(v.glb_idx()), v.coords())?;
        }
        serial.end_store_vertices()?;
        let local_verts = staged
            .iter()
            .map(|e| {
                e.vertices
                    .iter()
                    .map(|&g| serial.map_glb_vertex(g))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let centroid_of = |i: usize| {
            let weight = if nw == 0 { 1 } else { weights[i * nw] as i64 };
            let n = local_verts[i].len() as f64;
            let mut c = [0.0; 3];
            for v in &local_verts[i] {
                let p = serial.vertices[v.index()].coords;
                for a in 0..3 {
                    c[a] += p[a] / n;
                }
            }
            WireCentroid::new(i as i64, weight, c)
        };
        #[cfg(feature = "rayon")]
        let centroids: Vec<WireCentroid> = (0..staged.len()).into_par_iter().map(centroid_of).collect();
        #[cfg(not(feature = "rayon"))]
        let centroids: Vec<WireCentroid> = (0..staged.len()).map(centroid_of).collect();

        let (mut mgr, order) =
            ChunkManager::build_level0(&centroids, self.kind.num_children(), self.config.chunking)?;

        serial.begin_store_elems(staged.len())?;
        for &i in &order {
            let w = if nw == 0 { &[][..] } else { &weights[i * nw..(i + 1) * nw] };
            serial.add_cell(None, &local_verts[i], w)?;
        }
        serial.end_store_elems()?;
        mgr.partition(nprocs, &self.config.partition)?;

        let mut plan = DistributionPlan {
            bbox: mgr.octree().bbox(),
            octants: mgr.wire_octants(),
            chunks: mgr.wire_chunks(),
            num_chunks_p_level: mgr.num_chunks_p_level().iter().map(|&n| n as u64).collect(),
            elems: vec![Vec::new(); nprocs],
            vertices: vec![Vec::new(); nprocs],
            weights: vec![Vec::new(); nprocs],
        };
        let mut sent: Vec<HashSet<i64>> = vec![HashSet::new(); nprocs];
        for e in 0..serial.elems.len() {
            let mut rec = serial.global_record(e);
            let owner = mgr.owner_of_elem(rec.glb_idx).ok_or_else(|| {
                MeshStrataError::InconsistentTopology(format!(
                    "element {} has no owning process",
                    rec.glb_idx
                ))
            })?;
            rec.my_proc = owner as u32;
            plan.elems[owner].push(WireElem::encode(&rec));
            plan.weights[owner].extend_from_slice(serial.elem_weights_at(e));
            for v in serial.elems[e].vertices() {
                let wire = serial.wire_vertex(*v);
                if sent[owner].insert(wire.glb_idx()) {
                    plan.vertices[owner].push(wire);
                }
            }
        }
        for (p, list) in plan.elems.iter().enumerate() {
            log::debug!("rank {p} receives {} level-0 elements", list.len());
        }
        Ok(plan)
    }
}
