//! Red refinement: bisect every edge of a marked element and emit its
//! children from the fixed child tables of the reference element.
//!
//! Child vertex order comes from the tables and is never re-sorted, so a
//! child keeps the orientation of its parent.

use hashbrown::HashMap;

use super::SplitEdge;
use crate::adjacency::sorted_key;
use crate::algs::communicator::Communicator;
use crate::mesh_error::MeshStrataError;
use crate::store::Mesh;
use crate::topology::{ElemIdx, Element, Vertex, VertexIdx};

/// Corners plus one midpoint per edge.
const MAX_POINTS: usize = 10;

impl<C: Communicator> Mesh<C> {
    pub(crate) fn refine_marked(&mut self) -> Result<(), MeshStrataError> {
        let marked = std::mem::take(&mut self.refine.marked);
        let result = self.refine_each(&marked);
        self.refine.marked = marked;
        result
    }

    fn refine_each(&mut self, marked: &[ElemIdx]) -> Result<(), MeshStrataError> {
        let re = self.kind.ref_element();
        let nv = re.num_vertices();
        let level = self.store_level() as u16;
        let rank = self.rank();
        let mut midpoints: HashMap<[VertexIdx; 2], VertexIdx> = HashMap::new();
        for &p in marked {
            let corners: Vec<VertexIdx> = self.elems[p.index()].vertices().to_vec();
            let mut points = [VertexIdx(0); MAX_POINTS];
            points[..nv].copy_from_slice(&corners);
            for e in 0..re.num_edges() {
                let [a, b] = re.edge_vertices(e);
                points[nv + e] = self.bisect(corners[a], corners[b], &mut midpoints)?;
            }
            self.emit_children(p, &points, level, rank)?;
        }
        Ok(())
    }

    /// Midpoint of `(a, b)`: from this batch, from an element refined
    /// earlier, or a new vertex.
    fn bisect(
        &mut self,
        a: VertexIdx,
        b: VertexIdx,
        midpoints: &mut HashMap<[VertexIdx; 2], VertexIdx>,
    ) -> Result<VertexIdx, MeshStrataError> {
        let key = sorted_key([a, b]);
        if let Some(&m) = midpoints.get(&key) {
            return Ok(m);
        }
        if let Some(m) = self.adjacency.bisection_vertex(&self.elems, a, b) {
            midpoints.insert(key, m);
            return Ok(m);
        }
        let idx = self.vertices.len();
        let capacity = self.refine.capacity.0;
        if idx >= capacity {
            return Err(MeshStrataError::Overflow {
                what: "refinement vertex",
                index: idx,
                capacity,
            });
        }
        let (pa, pb) = (self.vertices[a.index()].coords, self.vertices[b.index()].coords);
        let coords = [0, 1, 2].map(|i| 0.5 * (pa[i] + pb[i]));
        self.vertices.push(Vertex { glb_idx: -1, coords });
        let mid = VertexIdx::try_from(idx)?;
        midpoints.insert(key, mid);
        self.refine.split_edges.push(SplitEdge { a: key[0], b: key[1], mid });
        Ok(mid)
    }

    fn emit_children(
        &mut self,
        parent: ElemIdx,
        points: &[VertexIdx; MAX_POINTS],
        level: u16,
        rank: u32,
    ) -> Result<(), MeshStrataError> {
        let re = self.kind.ref_element();
        let first = self.elems.len();
        let capacity = self.refine.capacity.1;
        if first + re.num_children() > capacity {
            return Err(MeshStrataError::Overflow {
                what: "refinement element",
                index: first + re.num_children() - 1,
                capacity,
            });
        }
        let refinement = self.elems[parent.index()].refinement + 1;
        let mut verts = Vec::with_capacity(re.num_vertices());
        for k in 0..re.num_children() {
            verts.clear();
            verts.extend(re.child_points(k).iter().map(|&pt| points[pt]));
            let mut child = Element::new(level, rank, &verts);
            child.parent_idx = Some(parent);
            child.refinement = refinement;
            self.elems.push(child);
            self.push_weights(Some(parent), &[]);
        }
        self.elems[parent.index()].child_idx = Some(ElemIdx::try_from(first)?);
        Ok(())
    }
}
