//! Whole meshes in a column store.
//!
//! Layout, all rows indexed by global id:
//!
//! | dataset    | record          | rows                  |
//! |------------|-----------------|-----------------------|
//! | `vertices` | [`WireVertex`]  | global vertices       |
//! | `elements` | [`WireElem`]    | global elements       |
//! | `weights`  | `i32` x weights | global elements       |
//! | `chunks`   | [`WireChunk`]   | chunks, chunked only  |
//! | `octree`   | [`WireOctant`]  | octants, chunked only |
//!
//! Per-level counters and the chunk bookkeeping go into attributes. A
//! chunked mesh is written by every process at its own global rows and may
//! be read back on any number of processes: the octree is re-partitioned
//! and every process reads the chunks it now owns, level by level.

use std::mem::size_of;

use super::{ColumnStore, Selection, Throttle, read_records, read_scalar, write_records};
use crate::algs::communicator::{CollectiveExt, Communicator};
use crate::algs::wire::{GlobalElem, WireChunk, WireElem, WireOctant, WireVertex};
use crate::mesh_error::MeshStrataError;
use crate::partitioning::chunks::ChunkManager;
use crate::partitioning::distribution::{bbox_from_bits, bbox_to_bits};
use crate::store::{LevelCounts, Mesh};
use crate::topology::{ElemIdx, VertexIdx};

pub const VERTICES: &str = "vertices";
pub const ELEMENTS: &str = "elements";
pub const WEIGHTS: &str = "weights";
pub const CHUNKS: &str = "chunks";
pub const OCTREE: &str = "octree";

pub const NUM_VERTICES: &str = "__num_vertices__";
pub const NUM_B_VERTICES: &str = "__num_b_vertices__";
pub const FIRST_B_VERTICES: &str = "__first_b_vertices__";
pub const NUM_ELEMS: &str = "__num_elems__";
pub const NUM_LEAF_ELEMS: &str = "__num_leaf_elems__";
pub const NUM_LEAF_LEVELS: &str = "__num_leaf_levels__";
pub const NUM_PROCS: &str = "__num_procs__";
pub const IS_CHUNKED: &str = "__is_chunked__";
pub const NUM_WEIGHTS: &str = "__num_weights__";
pub const NUM_CHUNKS: &str = "__num_chunks__";
pub const NUM_CHK_LEVELS: &str = "__num_chk_levels__";
pub const NUM_CHK_P_LEVEL: &str = "__num_chk_p_level__";
pub const OCTREE_BBOX: &str = "__octree_bbox__";
pub const CHUNK_SLOTS: &str = "__chunk_slots__";

const MESH_IO: &str = "mesh I/O";

/// Elements of one level as read from the store.
struct LevelData {
    recs: Vec<GlobalElem>,
    weights: Vec<i32>,
    vertices: Vec<WireVertex>,
}

fn to_count(name: &str, v: i64) -> Result<usize, MeshStrataError> {
    usize::try_from(v)
        .map_err(|_| MeshStrataError::Persistence(format!("attribute {name} holds {v}")))
}

fn to_row(what: &str, glb: i64) -> Result<u64, MeshStrataError> {
    u64::try_from(glb)
        .map_err(|_| MeshStrataError::InvalidState(format!("{what} without a global id")))
}

impl<C: Communicator> Mesh<C> {
    /// Write the mesh, every level included. Collective.
    pub fn write_mesh<S: ColumnStore + ?Sized>(&self, store: &S) -> Result<(), MeshStrataError> {
        self.ensure_quiescent("write the mesh")?;
        let top = self.levels.last().copied().unwrap_or_default();
        let root = self.comm.rank() == 0;

        let created = match root {
            true => self.create_datasets(store, &top),
            false => Ok(()),
        };
        self.agree(MESH_IO, created)?;

        let throttle = Throttle::new(self.config.throttle_factor);
        let written = throttle.run(&self.comm, || self.write_local(store));
        self.agree(MESH_IO, written)?;

        let b_vtx: Vec<u64> = self.levels.iter().map(|c| c.num_b_vtx).collect();
        let first_b: Vec<u64> = self.levels.iter().map(|c| c.first_b_vtx).collect();
        let all_b = self.comm.allgatherv(&b_vtx)?;
        let all_first = self.comm.allgatherv(&first_b)?;
        let meta = match root {
            true => self.write_metadata(store, &all_b, &all_first),
            false => Ok(()),
        };
        self.agree(MESH_IO, meta)?;
        log::info!(
            "rank {}: mesh written, {} levels, {} elements, {} vertices",
            self.comm.rank(),
            self.levels.len(),
            top.num_glb_elems,
            top.num_glb_vertices
        );
        Ok(())
    }

    /// Read a mesh into this empty store. Collective.
    pub fn read_mesh<S: ColumnStore + ?Sized>(&mut self, store: &S) -> Result<(), MeshStrataError> {
        self.ensure_quiescent("read a mesh")?;
        if !self.elems.is_empty() || !self.vertices.is_empty() {
            return Err(MeshStrataError::InvalidState(
                "a mesh can only be read into an empty store".into(),
            ));
        }
        let num_elems = store.read_attribute(NUM_ELEMS)?;
        let num_levels = to_count(NUM_LEAF_LEVELS, read_scalar(store, NUM_LEAF_LEVELS)?)?;
        if num_levels == 0 || num_elems.len() != num_levels {
            return Err(MeshStrataError::Persistence(format!(
                "{num_levels} levels but {} element counts",
                num_elems.len()
            )));
        }
        self.set_num_weights(to_count(NUM_WEIGHTS, read_scalar(store, NUM_WEIGHTS)?)?)?;

        if read_scalar(store, IS_CHUNKED)? != 0 {
            self.chunks = Some(self.read_chunks(store)?);
        } else if !self.comm.is_serial() {
            return Err(MeshStrataError::Unsupported(
                "a mesh without chunks can only be read by a single process".into(),
            ));
        }

        let throttle = Throttle::new(self.config.throttle_factor);
        let mut first = 0u64;
        for (level, &end) in num_elems.iter().enumerate() {
            let end = to_count(NUM_ELEMS, end)? as u64;
            if level > 0 {
                self.add_level()?;
            }
            let fetched = self
                .level_selection(level, first, end)
                .and_then(|sel| throttle.run(&self.comm, || self.fetch_level(store, &sel)));
            let data = self.agree(MESH_IO, fetched)?;
            self.load_level(data)?;
            first = end;
        }
        let top = self.levels.last().copied().unwrap_or_default();
        log::info!(
            "rank {}: mesh read, {} levels, {} owned of {} elements",
            self.comm.rank(),
            num_levels,
            top.num_interior_elems,
            top.num_glb_elems
        );
        Ok(())
    }

    fn create_datasets<S: ColumnStore + ?Sized>(
        &self,
        store: &S,
        top: &LevelCounts,
    ) -> Result<(), MeshStrataError> {
        let chunk = self.config.chunking.max_num_elems_p_chunk as u64;
        store.create_dataset(VERTICES, size_of::<WireVertex>(), top.num_glb_vertices, chunk)?;
        store.create_dataset(ELEMENTS, size_of::<WireElem>(), top.num_glb_elems, chunk)?;
        if self.num_weights > 0 {
            let size = size_of::<i32>() * self.num_weights;
            store.create_dataset(WEIGHTS, size, top.num_glb_elems, chunk)?;
        }
        if let Some(mgr) = &self.chunks {
            let n = mgr.chunks().len() as u64;
            store.create_dataset(CHUNKS, size_of::<WireChunk>(), n, chunk)?;
            let n = mgr.octree().len() as u64;
            store.create_dataset(OCTREE, size_of::<WireOctant>(), n, chunk)?;
        }
        Ok(())
    }

    /// Owned elements with their weights, and every resident vertex.
    fn write_local<S: ColumnStore + ?Sized>(&self, store: &S) -> Result<(), MeshStrataError> {
        let rank = self.rank();
        let mut owned: Vec<usize> = (0..self.elems.len())
            .filter(|&e| self.elems[e].my_proc == rank)
            .collect();
        owned.sort_unstable_by_key(|&e| self.elems[e].glb_idx);
        let rows = owned
            .iter()
            .map(|&e| to_row("element", self.elems[e].glb_idx))
            .collect::<Result<Vec<_>, _>>()?;
        let sel = Selection::from_sorted_indices(&rows)?;
        let recs: Vec<WireElem> = owned
            .iter()
            .map(|&e| WireElem::encode(&self.global_record(e)))
            .collect();
        write_records(store, ELEMENTS, &sel, &recs)?;
        if self.num_weights > 0 {
            let weights: Vec<i32> = owned
                .iter()
                .flat_map(|&e| self.elem_weights_at(e).iter().copied())
                .collect();
            write_records(store, WEIGHTS, &sel, &weights)?;
        }

        // shared vertices are written by every process holding them
        let mut verts: Vec<WireVertex> = (0..self.vertices.len())
            .map(|v| VertexIdx::try_from(v).map(|v| self.wire_vertex(v)))
            .collect::<Result<_, _>>()?;
        verts.sort_unstable_by_key(|v| v.glb_idx());
        let rows = verts
            .iter()
            .map(|v| to_row("vertex", v.glb_idx()))
            .collect::<Result<Vec<_>, _>>()?;
        write_records(store, VERTICES, &Selection::from_sorted_indices(&rows)?, &verts)?;
        log::debug!(
            "rank {rank}: wrote {} elements and {} vertices",
            recs.len(),
            verts.len()
        );
        Ok(())
    }

    fn write_metadata<S: ColumnStore + ?Sized>(
        &self,
        store: &S,
        b_vtx: &[Vec<u64>],
        first_b_vtx: &[Vec<u64>],
    ) -> Result<(), MeshStrataError> {
        let per_level = |f: fn(&LevelCounts) -> u64| -> Vec<i64> {
            self.levels.iter().map(|c| f(c) as i64).collect()
        };
        let per_rank = |all: &[Vec<u64>]| -> Vec<i64> {
            all.iter().flatten().map(|&n| n as i64).collect()
        };
        store.write_attribute(NUM_VERTICES, &per_level(|c| c.num_glb_vertices))?;
        store.write_attribute(NUM_ELEMS, &per_level(|c| c.num_glb_elems))?;
        store.write_attribute(NUM_LEAF_ELEMS, &per_level(|c| c.num_glb_leaf_elems))?;
        store.write_attribute(NUM_B_VERTICES, &per_rank(b_vtx))?;
        store.write_attribute(FIRST_B_VERTICES, &per_rank(first_b_vtx))?;
        store.write_attribute(NUM_LEAF_LEVELS, &[self.levels.len() as i64])?;
        store.write_attribute(NUM_PROCS, &[self.comm.size() as i64])?;
        store.write_attribute(NUM_WEIGHTS, &[self.num_weights as i64])?;
        match &self.chunks {
            Some(mgr) => {
                write_records(store, CHUNKS, &Selection::All, &mgr.wire_chunks())?;
                write_records(store, OCTREE, &Selection::All, &mgr.wire_octants())?;
                let per_level: Vec<i64> =
                    mgr.num_chunks_p_level().iter().map(|&n| n as i64).collect();
                store.write_attribute(IS_CHUNKED, &[1])?;
                store.write_attribute(NUM_CHUNKS, &[mgr.chunks().len() as i64])?;
                store.write_attribute(NUM_CHK_LEVELS, &[per_level.len() as i64])?;
                store.write_attribute(NUM_CHK_P_LEVEL, &per_level)?;
                store.write_attribute(
                    OCTREE_BBOX,
                    &bbox_to_bits(&mgr.octree().bbox()).map(|b| b as i64),
                )?;
                store.write_attribute(CHUNK_SLOTS, &[mgr.config().chunk_slots as i64])?;
            }
            None => store.write_attribute(IS_CHUNKED, &[0])?,
        }
        store.flush()
    }

    /// Rebuild the chunk bookkeeping and partition it over this group.
    fn read_chunks<S: ColumnStore + ?Sized>(
        &self,
        store: &S,
    ) -> Result<ChunkManager, MeshStrataError> {
        let chunks: Vec<WireChunk> = read_records(store, CHUNKS, &Selection::All)?;
        let octants: Vec<WireOctant> = read_records(store, OCTREE, &Selection::All)?;
        let expected = to_count(NUM_CHUNKS, read_scalar(store, NUM_CHUNKS)?)?;
        if chunks.len() != expected {
            return Err(MeshStrataError::Persistence(format!(
                "{} chunk records, attribute says {expected}",
                chunks.len()
            )));
        }
        let per_level = store
            .read_attribute(NUM_CHK_P_LEVEL)?
            .into_iter()
            .map(|n| to_count(NUM_CHK_P_LEVEL, n))
            .collect::<Result<Vec<_>, _>>()?;
        let bits: Vec<u64> = store
            .read_attribute(OCTREE_BBOX)?
            .into_iter()
            .map(|b| b as u64)
            .collect();
        let mut config = self.config.chunking;
        config.chunk_slots = to_count(CHUNK_SLOTS, read_scalar(store, CHUNK_SLOTS)?)?;
        let mut mgr =
            ChunkManager::from_wire(bbox_from_bits(&bits)?, config, &octants, &chunks, per_level)?;
        mgr.partition(self.comm.size(), &self.config.partition)?;
        Ok(mgr)
    }

    /// Rows of `level` this process reads: its owned chunks, or every
    /// element of the level without chunks.
    fn level_selection(&self, level: usize, first: u64, end: u64) -> Result<Selection, MeshStrataError> {
        let count = end.checked_sub(first).ok_or_else(|| {
            MeshStrataError::Persistence(format!("element counts decrease at level {level}"))
        })?;
        let Some(mgr) = &self.chunks else {
            return Ok(Selection::range(first, count));
        };
        let rank = self.comm.rank();
        let mut rows: Vec<u64> = mgr
            .level_chunks(level)
            .iter()
            .filter(|c| mgr.owner_of_elem(c.elem) == Some(rank))
            .flat_map(|c| c.elems().map(|g| g as u64))
            .collect();
        rows.sort_unstable();
        Selection::from_sorted_indices(&rows)
    }

    /// Element records, weights and the non-resident vertices they use.
    fn fetch_level<S: ColumnStore + ?Sized>(
        &self,
        store: &S,
        sel: &Selection,
    ) -> Result<LevelData, MeshStrataError> {
        let wire: Vec<WireElem> = read_records(store, ELEMENTS, sel)?;
        let weights: Vec<i32> = match self.num_weights {
            0 => Vec::new(),
            _ => read_records(store, WEIGHTS, sel)?,
        };
        let rows = sel.runs(0).into_iter().flat_map(|r| r.start..r.end());
        for (row, rec) in rows.zip(&wire) {
            if rec.glb_idx() != row as i64 {
                return Err(MeshStrataError::Persistence(format!(
                    "row {row} holds element {}",
                    rec.glb_idx()
                )));
            }
        }
        let recs: Vec<GlobalElem> = wire.iter().map(WireElem::decode).collect();

        let mut needed = Vec::new();
        for &g in recs.iter().flat_map(|r| r.vertices.iter()) {
            if !self.vertex_map.contains(g) {
                needed.push(to_row("vertex", g)?);
            }
        }
        needed.sort_unstable();
        needed.dedup();
        let vertices = read_records(store, VERTICES, &Selection::from_sorted_indices(&needed)?)?;
        Ok(LevelData {
            recs,
            weights,
            vertices,
        })
    }

    /// Append one level read from the store and connect it. Collective.
    fn load_level(&mut self, data: LevelData) -> Result<(), MeshStrataError> {
        let rank = self.rank();
        let start = self.elems.len();
        self.append_global_vertices(&data.vertices)?;
        let recs: Vec<GlobalElem> = data
            .recs
            .into_iter()
            .map(|mut r| {
                r.my_proc = rank;
                r
            })
            .collect();
        let owned = self.append_global_elems(&recs, &data.weights, false, true)?;
        if !self.comm.is_serial() {
            let mut parents: Vec<ElemIdx> = self.elems[owned]
                .iter()
                .filter_map(|e| e.parent_idx)
                .collect();
            parents.sort_unstable();
            parents.dedup();
            self.exchange_ghost_children(&parents)?;
            self.exchange_ghosts()?;
        }
        self.commit_vertices()?;
        self.commit_elems(start..self.elems.len())
    }
}

#[cfg(test)]
mod tests {
    use crate::io::DirStore;
    use crate::prelude::*;
    use serial_test::serial;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mesh-strata-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    /// Unit square of two triangles, refined twice, with one weight.
    fn refined_square() -> Mesh {
        let mut mesh = Mesh::new(MeshKind::Triangle);
        mesh.set_num_weights(1).unwrap();
        let pts = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]];
        mesh.begin_store_vertices(4).unwrap();
        for p in pts {
            mesh.store_vertex(None, p).unwrap();
        }
        mesh.end_store_vertices().unwrap();
        mesh.begin_store_elems(2).unwrap();
        mesh.add_lvl0_cell(&[VertexIdx(0), VertexIdx(1), VertexIdx(2)], &[5]).unwrap();
        mesh.add_lvl0_cell(&[VertexIdx(1), VertexIdx(3), VertexIdx(2)], &[7]).unwrap();
        mesh.end_store_elems().unwrap();
        for _ in 0..2 {
            mesh.begin_refine_elems().unwrap();
            let first = mesh.leaf_elems().next().unwrap();
            mesh.refine_elem(first).unwrap();
            mesh.end_refine_elems().unwrap();
        }
        mesh
    }

    #[test]
    #[serial]
    fn serial_round_trip_keeps_every_level() {
        let dir = scratch("serial-io");
        let mesh = refined_square();
        let store = DirStore::create(&dir).unwrap();
        mesh.write_mesh(&store).unwrap();

        let mut back = Mesh::new(MeshKind::Triangle);
        back.read_mesh(&DirStore::open(&dir).unwrap()).unwrap();
        assert_eq!(back.num_levels(), mesh.num_levels());
        assert_eq!(back.num_weights(), 1);
        for level in 0..mesh.num_levels() {
            assert_eq!(back.counts(level).unwrap(), mesh.counts(level).unwrap());
        }
        for e in 0..mesh.num_loc_elems() {
            let idx = ElemIdx(e as u32);
            let glb = mesh.elem(idx).unwrap().glb_idx;
            let there = back.map_glb_elem(glb).unwrap();
            assert_eq!(
                back.encoded_neighbor_indices(there).unwrap(),
                mesh.encoded_neighbor_indices(idx).unwrap()
            );
            assert_eq!(back.elem_weights(there).unwrap(), mesh.elem_weights(idx).unwrap());
        }
        for v in 0..mesh.num_loc_vertices() {
            let vertex = mesh.vertex(VertexIdx(v as u32)).unwrap();
            assert_eq!(back.vertex_coords_by_glb(vertex.glb_idx).unwrap(), vertex.coords);
        }
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    #[serial]
    fn reading_needs_an_empty_store() {
        let dir = scratch("serial-io-busy");
        let mesh = refined_square();
        let store = DirStore::create(&dir).unwrap();
        mesh.write_mesh(&store).unwrap();
        let mut busy = refined_square();
        assert!(matches!(
            busy.read_mesh(&store),
            Err(MeshStrataError::InvalidState(_))
        ));
        assert_eq!(store.read_attribute("__is_chunked__").unwrap(), vec![0]);
        std::fs::remove_dir_all(dir).unwrap();
    }
}
