//! Reference element tables for the two supported mesh kinds.
//!
//! Local numbering conventions shared by every other module:
//!
//! * facet `i` is the facet opposite vertex `i`, so neighbor slot `i` of an
//!   element always refers to the element across facet `i`;
//! * refinement points are numbered corners first (`0..nv`) followed by one
//!   midpoint per edge (`nv + e` bisects edge `e`);
//! * child `k` of a refined element uses the refinement points listed in
//!   `children[k]`, in that order.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Mesh kind, selected once when a mesh is created.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshKind {
    Triangle,
    Tetrahedron,
}

/// Type of a mesh entity, ordered by dimension.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    Vertex = 0,
    Edge = 1,
    Triangle = 2,
    Tetrahedron = 3,
}

impl EntityType {
    pub const fn dim(self) -> usize {
        self as usize
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(EntityType::Vertex),
            1 => Some(EntityType::Edge),
            2 => Some(EntityType::Triangle),
            3 => Some(EntityType::Tetrahedron),
            _ => None,
        }
    }

    pub fn from_dim(dim: usize) -> Option<Self> {
        Self::from_bits(u8::try_from(dim).ok()?)
    }
}

/// Static topology description of one reference element.
#[derive(Debug)]
pub struct RefElement {
    pub kind: MeshKind,
    pub dim: usize,
    /// Number of sub-entities per dimension.
    pub num_faces: [usize; 4],
    /// Reference coordinates of the corners.
    pub coords: &'static [[f64; 3]],
    edges: &'static [[usize; 2]],
    triangles: &'static [[usize; 3]],
    cell: &'static [usize],
    children: &'static [&'static [usize]],
}

const TRI_COORDS: [[f64; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
const TRI_EDGES: [[usize; 2]; 3] = [[1, 2], [0, 2], [0, 1]];
const TRI_TRIANGLES: [[usize; 3]; 1] = [[0, 1, 2]];
const TRI_CELL: [usize; 3] = [0, 1, 2];
// points 3, 4, 5 bisect edges (1,2), (0,2), (0,1)
const TRI_CHILDREN: [&[usize]; 4] = [&[0, 4, 5], &[1, 3, 5], &[2, 3, 4], &[3, 4, 5]];

const TET_COORDS: [[f64; 3]; 4] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
];
const TET_EDGES: [[usize; 2]; 6] = [[0, 1], [0, 2], [1, 2], [0, 3], [1, 3], [2, 3]];
const TET_TRIANGLES: [[usize; 3]; 4] = [[1, 2, 3], [0, 2, 3], [0, 1, 3], [0, 1, 2]];
const TET_CELL: [usize; 4] = [0, 1, 2, 3];
// points 4..=9 bisect edges (0,1) (0,2) (1,2) (0,3) (1,3) (2,3); the inner
// octahedron is split along the diagonal between points 5 and 8.
const TET_CHILDREN: [&[usize]; 8] = [
    &[0, 4, 5, 7],
    &[1, 4, 6, 8],
    &[2, 5, 6, 9],
    &[3, 7, 8, 9],
    &[4, 5, 6, 8],
    &[5, 6, 8, 9],
    &[5, 7, 8, 9],
    &[4, 5, 7, 8],
];

static TRIANGLE: RefElement = RefElement {
    kind: MeshKind::Triangle,
    dim: 2,
    num_faces: [3, 3, 1, 0],
    coords: &TRI_COORDS,
    edges: &TRI_EDGES,
    triangles: &TRI_TRIANGLES,
    cell: &TRI_CELL,
    children: &TRI_CHILDREN,
};

static TETRAHEDRON: RefElement = RefElement {
    kind: MeshKind::Tetrahedron,
    dim: 3,
    num_faces: [4, 6, 4, 1],
    coords: &TET_COORDS,
    edges: &TET_EDGES,
    triangles: &TET_TRIANGLES,
    cell: &TET_CELL,
    children: &TET_CHILDREN,
};

static TRI_CHILD_FACETS: Lazy<Vec<Vec<Option<usize>>>> =
    Lazy::new(|| derive_child_facet_parents(&TRIANGLE));
static TET_CHILD_FACETS: Lazy<Vec<Vec<Option<usize>>>> =
    Lazy::new(|| derive_child_facet_parents(&TETRAHEDRON));

/// For every child facet, the parent facet it lies on (if any).
fn derive_child_facet_parents(re: &RefElement) -> Vec<Vec<Option<usize>>> {
    let nv = re.num_vertices();
    re.children
        .iter()
        .map(|child| {
            (0..nv)
                .map(|facet| {
                    let mut support = [false; 4];
                    for (i, &p) in child.iter().enumerate() {
                        if i == facet {
                            continue;
                        }
                        for &v in re.point_support(p) {
                            support[v] = true;
                        }
                    }
                    let missing: Vec<usize> = (0..nv).filter(|&v| !support[v]).collect();
                    match missing.as_slice() {
                        [v] => Some(*v),
                        _ => None,
                    }
                })
                .collect()
        })
        .collect()
}

impl MeshKind {
    pub fn ref_element(self) -> &'static RefElement {
        match self {
            MeshKind::Triangle => &TRIANGLE,
            MeshKind::Tetrahedron => &TETRAHEDRON,
        }
    }

    pub fn dim(self) -> usize {
        self.ref_element().dim
    }

    pub fn num_vertices(self) -> usize {
        self.ref_element().num_vertices()
    }

    pub fn num_facets(self) -> usize {
        self.ref_element().num_facets()
    }

    pub fn num_children(self) -> usize {
        self.ref_element().num_children()
    }

    /// Entity type of the cells of this mesh kind.
    pub fn cell_type(self) -> EntityType {
        match self {
            MeshKind::Triangle => EntityType::Triangle,
            MeshKind::Tetrahedron => EntityType::Tetrahedron,
        }
    }

    /// Entity type of the facets (codimension 1).
    pub fn facet_type(self) -> EntityType {
        match self {
            MeshKind::Triangle => EntityType::Edge,
            MeshKind::Tetrahedron => EntityType::Triangle,
        }
    }

    /// Entity type at the given codimension, `None` when out of range.
    pub fn entity_type_of_codim(self, codim: usize) -> Option<EntityType> {
        let dim = self.dim();
        if codim > dim {
            return None;
        }
        EntityType::from_dim(dim - codim)
    }

    /// Upper bound on new vertices when refining `marked` elements.
    pub fn new_vertices_bound(self, marked: usize) -> usize {
        match self {
            MeshKind::Triangle => 3 * marked + 64,
            MeshKind::Tetrahedron => 3 * marked + 192,
        }
    }

    /// Upper bound on new elements when refining `marked` elements.
    pub fn new_elems_bound(self, marked: usize) -> usize {
        self.num_children() * marked
    }
}

impl RefElement {
    pub fn num_vertices(&self) -> usize {
        self.num_faces[0]
    }

    pub fn num_edges(&self) -> usize {
        self.num_faces[1]
    }

    pub fn num_facets(&self) -> usize {
        self.num_faces[self.dim - 1]
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    pub fn edge_vertices(&self, edge: usize) -> [usize; 2] {
        self.edges[edge]
    }

    /// Local vertices of sub-entity `face` of the given type.
    pub fn face_vertices(&self, ty: EntityType, face: usize) -> &'static [usize] {
        static VERTICES: [[usize; 1]; 4] = [[0], [1], [2], [3]];
        let (edges, triangles) = (self.edges, self.triangles);
        match ty {
            EntityType::Vertex => &VERTICES[face],
            EntityType::Edge => &edges[face],
            EntityType::Triangle => &triangles[face],
            EntityType::Tetrahedron => self.cell,
        }
    }

    pub fn facet_vertices(&self, facet: usize) -> &'static [usize] {
        let (edges, triangles) = (self.edges, self.triangles);
        match self.kind {
            MeshKind::Triangle => &edges[facet],
            MeshKind::Tetrahedron => &triangles[facet],
        }
    }

    pub fn num_faces_of(&self, ty: EntityType) -> usize {
        self.num_faces[ty.dim()]
    }

    /// Facet `facet` contains every local vertex except the opposite one.
    pub fn facet_contains(&self, facet: usize, local_vertices: &[usize]) -> bool {
        !local_vertices.contains(&facet)
    }

    /// Refinement points of child `k`.
    pub fn child_points(&self, child: usize) -> &'static [usize] {
        self.children[child]
    }

    /// Corners a refinement point depends on: itself, or the bisected edge.
    pub fn point_support(&self, point: usize) -> &'static [usize] {
        let nv = self.num_vertices();
        let (cell, edges) = (self.cell, self.edges);
        if point < nv {
            &cell[point..point + 1]
        } else {
            &edges[point - nv]
        }
    }

    /// Parent facet on which facet `facet` of child `child` lies, if any.
    pub fn child_facet_parent(&self, child: usize, facet: usize) -> Option<usize> {
        let table = match self.kind {
            MeshKind::Triangle => &*TRI_CHILD_FACETS,
            MeshKind::Tetrahedron => &*TET_CHILD_FACETS,
        };
        table.get(child).and_then(|c| c.get(facet).copied().flatten())
    }

    /// Smallest parent entity containing the given refinement points.
    pub fn parent_entity_of_points(&self, points: &[usize]) -> (EntityType, usize) {
        let mut support: Vec<usize> = points
            .iter()
            .flat_map(|&p| self.point_support(p).iter().copied())
            .collect();
        support.sort_unstable();
        support.dedup();
        let ty = EntityType::from_dim(support.len() - 1).unwrap_or(EntityType::Tetrahedron);
        let face = (0..self.num_faces_of(ty))
            .find(|&f| {
                let verts = self.face_vertices(ty, f);
                support.iter().all(|v| verts.contains(v))
            })
            .unwrap_or(0);
        (ty, face)
    }

    /// Local edge index joining two local vertices.
    pub fn edge_of(&self, a: usize, b: usize) -> Option<usize> {
        self.edges
            .iter()
            .position(|e| (e[0] == a && e[1] == b) || (e[0] == b && e[1] == a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_counts() {
        let tri = MeshKind::Triangle.ref_element();
        assert_eq!(tri.num_facets(), 3);
        assert_eq!(tri.num_children(), 4);
        let tet = MeshKind::Tetrahedron.ref_element();
        assert_eq!(tet.num_edges(), 6);
        assert_eq!(tet.num_facets(), 4);
        assert_eq!(tet.num_children(), 8);
    }

    #[test]
    fn facet_is_opposite_vertex() {
        for kind in [MeshKind::Triangle, MeshKind::Tetrahedron] {
            let re = kind.ref_element();
            for f in 0..re.num_facets() {
                assert!(!re.facet_vertices(f).contains(&f));
                assert_eq!(re.facet_vertices(f).len(), re.dim);
            }
        }
    }

    #[test]
    fn corner_children_touch_parent_facets() {
        let tet = MeshKind::Tetrahedron.ref_element();
        // child 0 is the corner at vertex 0; its facet opposite the corner
        // is interior, the others lie on parent facets 1, 2, 3
        assert_eq!(tet.child_facet_parent(0, 0), None);
        let mut on_parent: Vec<usize> = (1..4)
            .filter_map(|f| tet.child_facet_parent(0, f))
            .collect();
        on_parent.sort_unstable();
        assert_eq!(on_parent, vec![1, 2, 3]);
        // each inner octahedron child has one facet on the parent boundary
        for c in 4..8 {
            let n = (0..4).filter(|&f| tet.child_facet_parent(c, f).is_some()).count();
            assert_eq!(n, 1, "child {c}");
        }
    }

    #[test]
    fn triangle_middle_child_is_interior() {
        let tri = MeshKind::Triangle.ref_element();
        for f in 0..3 {
            assert_eq!(tri.child_facet_parent(3, f), None);
        }
        assert_eq!(tri.child_facet_parent(0, 1), Some(2));
    }

    #[test]
    fn parent_entity_of_child_edge() {
        let tet = MeshKind::Tetrahedron.ref_element();
        // corner 0 to midpoint of (0,1) lies on edge 0
        assert_eq!(tet.parent_entity_of_points(&[0, 4]), (EntityType::Edge, 0));
        // two midpoints on facet (0,1,2)
        assert_eq!(tet.parent_entity_of_points(&[4, 5]), (EntityType::Triangle, 3));
        // the octahedron diagonal is interior
        assert_eq!(
            tet.parent_entity_of_points(&[5, 8]),
            (EntityType::Tetrahedron, 0)
        );
    }
}
