//! Vertex batches: begin / store / end, numbering and the vertex map.

use std::ops::Range;

use hashbrown::HashSet;

use super::{Batch, Mesh};
use crate::algs::communicator::{CollectiveExt, Communicator};
use crate::algs::wire::WireVertex;
use crate::mesh_error::MeshStrataError;
use crate::topology::{Vertex, VertexIdx};

impl<C: Communicator> Mesh<C> {
    /// Open a batch of at most `n` vertices.
    pub fn begin_store_vertices(&mut self, n: usize) -> Result<(), MeshStrataError> {
        self.ensure_quiescent("store vertices")?;
        let start = self.vertices.len();
        self.vertices
            .try_reserve(n)
            .map_err(|_| MeshStrataError::Allocation(start + n))?;
        self.vertex_batch = Some(Batch {
            start,
            capacity: start + n,
        });
        log::debug!("begin storing up to {n} vertices at local index {start}");
        Ok(())
    }

    /// Append one vertex; `glb_idx` is `None` when the store should number it.
    pub fn store_vertex(
        &mut self,
        glb_idx: Option<i64>,
        coords: [f64; 3],
    ) -> Result<VertexIdx, MeshStrataError> {
        let batch = self
            .vertex_batch
            .ok_or_else(|| MeshStrataError::InvalidState("no vertex batch open".into()))?;
        let idx = self.vertices.len();
        if idx >= batch.capacity {
            return Err(MeshStrataError::Overflow {
                what: "vertex",
                index: idx,
                capacity: batch.capacity,
            });
        }
        let vidx = VertexIdx::try_from(idx)?;
        if let Some(g) = glb_idx.filter(|&g| g < 0) {
            return Err(MeshStrataError::InvalidArgument(format!(
                "negative global vertex index {g}"
            )));
        }
        self.vertices.push(Vertex {
            glb_idx: glb_idx.unwrap_or(-1),
            coords,
        });
        Ok(vidx)
    }

    /// Close the batch: number unassigned vertices and update the vertex map.
    pub fn end_store_vertices(&mut self) -> Result<(), MeshStrataError> {
        let batch = self
            .vertex_batch
            .take()
            .ok_or_else(|| MeshStrataError::InvalidState("no vertex batch open".into()))?;
        let range = batch.start..self.vertices.len();
        self.number_vertices(range.clone())?;
        self.map_vertices(range.clone())?;
        self.commit_vertices()?;
        log::debug!("stored vertices {range:?}");
        Ok(())
    }

    /// Give unnumbered vertices of `range` consecutive global ids after the
    /// current global count; in parallel each process gets its own block.
    pub(crate) fn number_vertices(&mut self, range: Range<usize>) -> Result<(), MeshStrataError> {
        let unassigned: Vec<usize> = range.filter(|&i| self.vertices[i].glb_idx < 0).collect();
        let (offset, _) = self.comm.exclusive_prefix(unassigned.len() as u64)?;
        let base = self.levels[self.store_level()].num_glb_vertices + offset;
        for (k, i) in unassigned.into_iter().enumerate() {
            self.vertices[i].glb_idx = (base + k as u64) as i64;
        }
        Ok(())
    }

    pub(crate) fn map_vertices(&mut self, range: Range<usize>) -> Result<(), MeshStrataError> {
        self.vertex_map.grow(self.vertex_map.len() + range.len())?;
        for i in range {
            self.vertex_map.insert(self.vertices[i].glb_idx, i as u32);
        }
        self.vertex_map.sort();
        Ok(())
    }

    /// Append vertices known by global id, skipping those already resident.
    pub(crate) fn append_global_vertices(
        &mut self,
        recs: &[WireVertex],
    ) -> Result<Range<usize>, MeshStrataError> {
        let start = self.vertices.len();
        let mut seen: HashSet<i64> = HashSet::with_capacity(recs.len());
        for rec in recs {
            let glb = rec.glb_idx();
            if self.vertex_map.contains(glb) || !seen.insert(glb) {
                continue;
            }
            self.vertices.push(Vertex {
                glb_idx: glb,
                coords: rec.coords(),
            });
        }
        let range = start..self.vertices.len();
        self.map_vertices(range.clone())?;
        Ok(range)
    }

    /// Refresh the vertex counters of the current level (collective).
    pub(crate) fn commit_vertices(&mut self) -> Result<(), MeshStrataError> {
        let local_max = self
            .vertices
            .iter()
            .map(|v| v.glb_idx + 1)
            .max()
            .unwrap_or(0)
            .max(0) as u64;
        let glb = self.comm.allgather(local_max)?.into_iter().max().unwrap_or(0);
        let num_loc = self.vertices.len() as u64;
        let counts = self.current_counts_mut();
        counts.num_loc_vertices = num_loc;
        counts.num_glb_vertices = counts.num_glb_vertices.max(glb);
        Ok(())
    }

    pub(crate) fn wire_vertex(&self, v: VertexIdx) -> WireVertex {
        let vertex = &self.vertices[v.index()];
        WireVertex::new(vertex.glb_idx, vertex.coords)
    }
}
