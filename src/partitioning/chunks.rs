//! Chunks: runs of consecutive global element ids attached to an octant.
//!
//! Level-0 chunks are built on one process from the element centroids and
//! define the element order; every later level gets chunks for the children
//! created by refinement, attached next to their parents' chunks. Chunk and
//! octree state is replicated on every process.

use std::ops::Range;

use super::error::PartitionError;
use super::octree::{BBox, MAX_DEPTH, Octree};
use super::{PartitionerConfig, assign_units};
use crate::algs::communicator::{CollectiveExt, Communicator};
use crate::algs::dual_graph::DualGraph;
use crate::algs::wire::{WireCentroid, WireChunk, WireOctant};
use crate::config::ChunkConfig;
use crate::mesh_error::MeshStrataError;
use crate::store::Mesh;

/// Padding added to the max side of the level-0 bounding box.
const BBOX_PAD: f64 = 0.1;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub idx: i32,
    pub oct_idx: i32,
    /// First global element id.
    pub elem: i64,
    pub num_elems: u32,
    /// Sum of the first weight of the elements.
    pub weight: i64,
}

impl Chunk {
    pub fn elems(&self) -> Range<i64> {
        self.elem..self.elem + self.num_elems as i64
    }

    pub fn to_wire(&self) -> WireChunk {
        WireChunk::new(self.idx, self.oct_idx, self.elem, self.weight, self.num_elems)
    }

    pub fn from_wire(w: &WireChunk) -> Self {
        Self {
            idx: w.idx(),
            oct_idx: w.oct_idx(),
            elem: w.elem(),
            num_elems: w.num_elems(),
            weight: w.weight(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChunkManager {
    octree: Octree,
    /// Sorted by first element.
    chunks: Vec<Chunk>,
    num_chunks_p_level: Vec<usize>,
    config: ChunkConfig,
}

impl ChunkManager {
    /// Build the octree and the level-0 chunks from element centroids.
    ///
    /// Returns the manager and the new element order: position `i` of the
    /// result is the input index of the element that gets global id `i`.
    pub fn build_level0(
        centroids: &[WireCentroid],
        num_children: usize,
        config: ChunkConfig,
    ) -> Result<(Self, Vec<usize>), PartitionError> {
        let points: Vec<[f64; 3]> = centroids.iter().map(|c| c.point()).collect();
        let bbox = BBox::of_points(&points, BBOX_PAD);
        let mut octree = Octree::with_slots(bbox, config.chunk_slots);
        let max_points = (config.max_num_elems_p_chunk / num_children.max(1)).max(1);
        octree.refine_w_points(&points, max_points)?;

        let (leaf_of, _) = octree.add_points_to_leaf(&points)?;
        let mut rank_of_leaf = vec![usize::MAX; octree.len()];
        for (r, leaf) in octree.leaves().enumerate() {
            rank_of_leaf[leaf as usize] = r;
        }
        let mut order: Vec<usize> = (0..centroids.len()).collect();
        order.sort_by_key(|&i| rank_of_leaf[leaf_of[i] as usize]);

        let mut mgr = Self {
            octree,
            chunks: Vec::new(),
            num_chunks_p_level: Vec::new(),
            config,
        };
        let runs = split_runs(&order, |&i| leaf_of[i], config.max_num_elems_p_chunk);
        for (start, len) in runs {
            let oct = leaf_of[order[start]];
            let weight = order[start..start + len]
                .iter()
                .map(|&i| centroids[i].weight())
                .sum();
            mgr.push_chunk(oct, start as i64, len as u32, weight, 0)?;
        }
        mgr.num_chunks_p_level.push(mgr.chunks.len());
        log::info!(
            "level 0: {} elements in {} chunks over {} octants",
            centroids.len(),
            mgr.chunks.len(),
            mgr.octree.len()
        );
        Ok((mgr, order))
    }

    pub fn from_wire(
        bbox: BBox,
        config: ChunkConfig,
        octants: &[WireOctant],
        chunks: &[WireChunk],
        num_chunks_p_level: Vec<usize>,
    ) -> Result<Self, PartitionError> {
        let octree = Octree::from_wire(bbox, config.chunk_slots, octants)?;
        let mut chunks: Vec<Chunk> = chunks.iter().map(Chunk::from_wire).collect();
        chunks.sort_by_key(|c| c.elem);
        Ok(Self {
            octree,
            chunks,
            num_chunks_p_level,
            config,
        })
    }

    pub fn wire_octants(&self) -> Vec<WireOctant> {
        self.octree.to_wire()
    }

    pub fn wire_chunks(&self) -> Vec<WireChunk> {
        self.chunks.iter().map(Chunk::to_wire).collect()
    }

    pub fn octree(&self) -> &Octree {
        &self.octree
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn config(&self) -> ChunkConfig {
        self.config
    }

    pub fn num_chunks_p_level(&self) -> &[usize] {
        &self.num_chunks_p_level
    }

    /// Chunks created on `level`.
    pub fn level_chunks(&self, level: usize) -> &[Chunk] {
        let start: usize = self.num_chunks_p_level.iter().take(level).sum();
        let n = self.num_chunks_p_level.get(level).copied().unwrap_or(0);
        let end = (start + n).min(self.chunks.len());
        &self.chunks[start.min(end)..end]
    }

    pub fn chunk_of_elem(&self, glb: i64) -> Option<&Chunk> {
        let pos = self.chunks.partition_point(|c| c.elem <= glb);
        let chunk = self.chunks.get(pos.checked_sub(1)?)?;
        (glb < chunk.elem + chunk.num_elems as i64).then_some(chunk)
    }

    /// Process owning the chunk that holds `glb`.
    pub fn owner_of_elem(&self, glb: i64) -> Option<usize> {
        let chunk = self.chunk_of_elem(glb)?;
        let p = self.octree.octant(chunk.oct_idx).ok()?.processor;
        usize::try_from(p).ok()
    }

    fn push_chunk(
        &mut self,
        oct: i32,
        elem: i64,
        num_elems: u32,
        weight: i64,
        level: usize,
    ) -> Result<(), PartitionError> {
        let idx = self.chunks.len() as i32;
        self.octree.add_userdata(oct, idx)?;
        self.octree.set_userlevel(oct, level)?;
        self.chunks.push(Chunk {
            idx,
            oct_idx: oct,
            elem,
            num_elems,
            weight,
        });
        Ok(())
    }

    /// Attach the chunks of a refined level. Records carry the octant of the
    /// parents' chunk and the centroid of their first element; a chunk that
    /// does not fit its octant goes to the child octant containing the
    /// centroid, splitting the octant when needed.
    pub fn add_level_chunks(
        &mut self,
        level: usize,
        mut recs: Vec<(WireChunk, [f64; 3])>,
    ) -> Result<(), PartitionError> {
        recs.sort_by_key(|(c, _)| c.elem());
        for (rec, centroid) in &recs {
            let oct = self.place(rec.oct_idx(), centroid)?;
            self.push_chunk(oct, rec.elem(), rec.num_elems(), rec.weight(), level)?;
        }
        if self.num_chunks_p_level.len() <= level {
            self.num_chunks_p_level.resize(level + 1, 0);
        }
        self.num_chunks_p_level[level] += recs.len();
        Ok(())
    }

    fn place(&mut self, mut oct: i32, centroid: &[f64; 3]) -> Result<i32, PartitionError> {
        loop {
            if self.octree.has_free_slot(oct)? {
                return Ok(oct);
            }
            let o = self.octree.octant(oct)?;
            if o.level >= MAX_DEPTH {
                return Err(PartitionError::OctantFull {
                    oct_idx: oct,
                    capacity: self.config.chunk_slots,
                });
            }
            let first = self.octree.refine_octant(oct)?;
            let bbox = self.octree.bounding_box_of_octant(oct)?;
            oct = first + bbox.orient_of(centroid);
        }
    }

    /// Octants holding level-0 chunks, in depth-first order.
    fn units(&self) -> Vec<i32> {
        self.octree
            .preorder()
            .into_iter()
            .filter(|&o| {
                self.octree
                    .octant(o)
                    .is_ok_and(|oct| oct.userlevels & 1 != 0)
            })
            .collect()
    }

    /// Assign every octant to a process: level-0 chunk octants are
    /// partitioned, their descendants and first-child ancestors follow.
    pub fn partition(&mut self, nprocs: usize, cfg: &PartitionerConfig) -> Result<(), PartitionError> {
        let units = self.units();
        let mut unit_of = vec![usize::MAX; self.octree.len()];
        for (u, &o) in units.iter().enumerate() {
            unit_of[o as usize] = u;
        }
        let mut weights = vec![0i64; units.len()];
        for chunk in self.level_chunks(0) {
            if let Some(&u) = unit_of.get(chunk.oct_idx as usize) {
                if u != usize::MAX {
                    weights[u] += chunk.weight;
                }
            }
        }
        let mut lists = Vec::with_capacity(units.len());
        let mut centers = Vec::with_capacity(units.len());
        for &o in &units {
            let level = self.octree.octant(o)?.level;
            let bbox = self.octree.bounding_box_of_octant(o)?;
            centers.push(bbox.center());
            let mut adj = Vec::new();
            for n in self.octree.neighbors(o, level)? {
                self.units_touching(n, &bbox, &unit_of, &mut adj)?;
            }
            lists.push(adj);
        }
        let graph = DualGraph::from_lists(&lists, &weights);
        let bbox = self.octree.bbox();
        let part = assign_units(&graph, &centers, (bbox.min, bbox.max), nprocs, cfg)?;

        for (u, &o) in units.iter().enumerate() {
            let p = *part.get(u).ok_or(PartitionError::MissingPartition(u))? as i32;
            self.set_subtree_processor(o, p)?;
            let mut cur = o;
            loop {
                let oct = self.octree.octant(cur)?;
                if oct.parent < 0 || oct.orient != 0 {
                    break;
                }
                cur = oct.parent;
                self.octree.set_processor(cur, p)?;
            }
        }
        log::info!(
            "partitioned {} octants over {nprocs} processes ({:?})",
            units.len(),
            cfg.mode
        );
        Ok(())
    }

    /// Partition unit of `n` (itself or an ancestor), or the units below it
    /// touching `target`.
    fn units_touching(
        &self,
        n: i32,
        target: &BBox,
        unit_of: &[usize],
        out: &mut Vec<usize>,
    ) -> Result<(), PartitionError> {
        let mut cur = n;
        while cur >= 0 {
            if unit_of[cur as usize] != usize::MAX {
                out.push(unit_of[cur as usize]);
                return Ok(());
            }
            cur = self.octree.octant(cur)?.parent;
        }
        let mut stack = vec![n];
        while let Some(o) = stack.pop() {
            if !self.octree.bounding_box_of_octant(o)?.touches(target) {
                continue;
            }
            if unit_of[o as usize] != usize::MAX {
                out.push(unit_of[o as usize]);
                continue;
            }
            let oct = self.octree.octant(o)?;
            if !oct.is_leaf() {
                stack.extend((0..8).map(|k| oct.child_idx + k));
            }
        }
        Ok(())
    }

    fn set_subtree_processor(&mut self, root: i32, p: i32) -> Result<(), PartitionError> {
        let mut stack = vec![root];
        while let Some(o) = stack.pop() {
            self.octree.set_processor(o, p)?;
            let oct = self.octree.octant(o)?;
            if !oct.is_leaf() {
                stack.extend((0..8).map(|k| oct.child_idx + k));
            }
        }
        Ok(())
    }
}

/// Runs of equal `key` in `items`, each split at `max` entries:
/// `(start, len)` pairs.
fn split_runs<T, K: PartialEq>(
    items: &[T],
    key: impl Fn(&T) -> K,
    max: usize,
) -> Vec<(usize, usize)> {
    let max = max.max(1);
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=items.len() {
        let boundary = i == items.len() || key(&items[i]) != key(&items[start]) || i - start == max;
        if boundary && i > start {
            runs.push((start, i - start));
            start = i;
        }
    }
    runs
}

impl<C: Communicator> Mesh<C> {
    /// Arithmetic mean of an element's vertices.
    pub fn elem_centroid(&self, e: usize) -> [f64; 3] {
        let elem = &self.elems[e];
        let n = elem.vertices().len() as f64;
        let mut c = [0.0; 3];
        for v in elem.vertices() {
            let p = self.vertices[v.index()].coords;
            for a in 0..3 {
                c[a] += p[a] / n;
            }
        }
        c
    }

    pub(crate) fn chunk_weight_of(&self, e: usize) -> i64 {
        if self.num_weights == 0 {
            1
        } else {
            self.elem_weights_at(e)[0] as i64
        }
    }

    /// Octant of the chunk holding element `e`'s parent.
    fn parent_octant(&self, mgr: &ChunkManager, e: usize) -> Result<i32, MeshStrataError> {
        let parent = self.elems[e].parent_idx.ok_or_else(|| {
            MeshStrataError::InconsistentTopology(format!("refined element {e} has no parent"))
        })?;
        let glb = self.elems[parent.index()].glb_idx;
        mgr.chunk_of_elem(glb).map(|c| c.oct_idx).ok_or_else(|| {
            MeshStrataError::InconsistentTopology(format!("element {glb} is in no chunk"))
        })
    }

    /// Owned new children of `erange`, ordered by their parents' chunk octant.
    fn owned_children_by_octant(
        &self,
        erange: Range<usize>,
    ) -> Result<Vec<(i32, usize)>, MeshStrataError> {
        let mgr = self
            .chunks
            .as_ref()
            .ok_or_else(|| MeshStrataError::InvalidState("mesh has no chunks".into()))?;
        let rank = self.rank();
        let mut keyed = erange
            .filter(|&e| self.elems[e].my_proc == rank)
            .map(|e| -> Result<(i32, usize), MeshStrataError> {
                Ok((self.parent_octant(mgr, e)?, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        keyed.sort_unstable();
        Ok(keyed)
    }

    /// Number the owned children of a refinement so that those sharing a
    /// parent octant get consecutive global ids.
    pub(crate) fn number_children_by_chunk(
        &mut self,
        erange: Range<usize>,
    ) -> Result<(), MeshStrataError> {
        let order: Vec<usize> = self
            .owned_children_by_octant(erange)?
            .into_iter()
            .map(|(_, e)| e)
            .filter(|&e| self.elems[e].glb_idx < 0)
            .collect();
        self.number_elems_in_order(&order)
    }

    /// Create and replicate the chunks of the new children. Collective.
    pub(crate) fn add_chunks_for_level(&mut self, erange: Range<usize>) -> Result<(), MeshStrataError> {
        let mut keyed = self.owned_children_by_octant(erange)?;
        keyed.sort_unstable_by_key(|&(_, e)| self.elems[e].glb_idx);
        let max = self.config.chunking.max_num_elems_p_chunk;
        let mut chunks = Vec::new();
        let mut firsts = Vec::new();
        for (start, len) in split_runs(&keyed, |&(oct, _)| oct, max) {
            let run = &keyed[start..start + len];
            let (oct, first) = run[0];
            let weight = run.iter().map(|&(_, e)| self.chunk_weight_of(e)).sum();
            let glb = self.elems[first].glb_idx;
            chunks.push(WireChunk::new(-1, oct, glb, weight, len as u32));
            firsts.push(WireCentroid::new(glb, weight, self.elem_centroid(first)));
        }
        let all_chunks = self.comm.allgatherv(&chunks)?;
        let all_firsts = self.comm.allgatherv(&firsts)?;
        let recs: Vec<(WireChunk, [f64; 3])> = all_chunks
            .into_iter()
            .flatten()
            .zip(all_firsts.into_iter().flatten().map(|c| c.point()))
            .collect();
        let level = self.store_level();
        let mgr = self
            .chunks
            .as_mut()
            .ok_or_else(|| MeshStrataError::InvalidState("mesh has no chunks".into()))?;
        let n = recs.len();
        mgr.add_level_chunks(level, recs)?;
        log::debug!("level {level}: {n} chunks added");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_centroids(n: usize) -> Vec<WireCentroid> {
        (0..n * n)
            .map(|i| {
                let (x, y) = ((i % n) as f64 + 0.5, (i / n) as f64 + 0.5);
                WireCentroid::new(i as i64, 2, [x, y, 0.0])
            })
            .collect()
    }

    #[test]
    fn runs_split_at_key_changes_and_max() {
        let items = [1, 1, 1, 2, 2, 3];
        assert_eq!(split_runs(&items, |&x| x, 2), vec![(0, 2), (2, 1), (3, 2), (5, 1)]);
        assert!(split_runs::<i32, i32>(&[], |&x| x, 4).is_empty());
    }

    #[test]
    fn level0_chunks_cover_every_element_once() {
        let cfg = ChunkConfig {
            max_num_elems_p_chunk: 8,
            chunk_slots: 4,
        };
        let (mgr, order) = ChunkManager::build_level0(&grid_centroids(10), 4, cfg).unwrap();
        let mut seen = order.clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        let covered: u32 = mgr.chunks().iter().map(|c| c.num_elems).sum();
        assert_eq!(covered, 100);
        assert!(mgr.chunks().iter().all(|c| c.num_elems <= 8));
        assert_eq!(mgr.num_chunks_p_level(), &[mgr.chunks().len()]);
        for c in mgr.chunks() {
            assert_eq!(c.weight, 2 * c.num_elems as i64);
            assert_eq!(mgr.chunk_of_elem(c.elem), Some(c));
        }
        assert_eq!(mgr.chunk_of_elem(100), None);
    }

    #[test]
    fn morton_partition_balances_units() {
        let cfg = ChunkConfig {
            max_num_elems_p_chunk: 8,
            chunk_slots: 4,
        };
        let (mut mgr, _) = ChunkManager::build_level0(&grid_centroids(8), 4, cfg).unwrap();
        mgr.partition(4, &PartitionerConfig::default()).unwrap();
        let mut per_proc = [0usize; 4];
        for c in mgr.chunks() {
            per_proc[mgr.owner_of_elem(c.elem).unwrap()] += 1;
        }
        assert!(per_proc.iter().all(|&n| n > 0), "{per_proc:?}");
        // the root follows its first child
        assert_eq!(mgr.octree().octant(0).unwrap().processor, 0);
    }

    #[test]
    fn full_octant_spills_into_child() {
        let cfg = ChunkConfig {
            max_num_elems_p_chunk: 120,
            chunk_slots: 1,
        };
        let (mut mgr, _) = ChunkManager::build_level0(&grid_centroids(2), 4, cfg).unwrap();
        let oct = mgr.chunks()[0].oct_idx;
        let before = mgr.octree().len();
        let rec = WireChunk::new(-1, oct, 4, 4, 4);
        mgr.add_level_chunks(1, vec![(rec, [0.5, 0.5, 0.0])]).unwrap();
        assert_eq!(mgr.octree().len(), before + 8);
        assert_eq!(mgr.level_chunks(1).len(), 1);
        assert_eq!(mgr.octree().octant(mgr.level_chunks(1)[0].oct_idx).unwrap().parent, oct);
    }
}
