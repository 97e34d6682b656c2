//! Incidence indexes between mesh entities.
//!
//! * vertex → incident vertex ids (direct array of short lists)
//! * edge → incident edge ids (open hash table keyed by the sorted vertex pair)
//! * triangle → incident triangle ids (tetrahedral meshes only)
//!
//! Every list holds entity ids of *all* elements sharing the geometric
//! entity, refined or not. The canonical representative of an entity is the
//! id with the lowest element index.

pub mod flags;
pub mod table;
pub mod vertex;

use std::ops::Range;

use crate::mesh_error::MeshStrataError;
use crate::topology::{
    ElemFlags, ElemIdx, Element, EntityId, EntityType, MeshKind, Neighbor, RefElement, VertexIdx,
};

pub use table::{IncidenceEntry, IncidenceTable, sorted_key};
pub use vertex::{VertexEntry, VertexIncidence};

/// Reusable buffers for lookup calls.
#[derive(Clone, Debug, Default)]
pub struct QueryScratch {
    verts: Vec<VertexIdx>,
}

#[derive(Clone, Debug)]
pub struct AdjacencyIndex {
    kind: MeshKind,
    vertices: VertexIncidence,
    edges: IncidenceTable<2>,
    triangles: IncidenceTable<3>,
    scratch: QueryScratch,
}

pub fn edge_key(re: &RefElement, elem: &Element, edge: usize) -> [VertexIdx; 2] {
    let [a, b] = re.edge_vertices(edge);
    sorted_key([elem.vertex(a), elem.vertex(b)])
}

pub fn triangle_key(re: &RefElement, elem: &Element, face: usize) -> [VertexIdx; 3] {
    let v = re.face_vertices(EntityType::Triangle, face);
    sorted_key([elem.vertex(v[0]), elem.vertex(v[1]), elem.vertex(v[2])])
}

fn touches_boundary(re: &RefElement, elem: &Element, local: &[usize]) -> bool {
    (0..re.num_facets())
        .any(|f| re.facet_contains(f, local) && elem.neighbors()[f] == Neighbor::Boundary)
}

fn derive_flags(
    re: &RefElement,
    elems: &[Element],
    items: &[EntityId],
) -> Result<ElemFlags, MeshStrataError> {
    let mut acc = ElemFlags::empty();
    for id in items {
        let elem = elems.get(id.elem_of().index()).ok_or_else(|| {
            MeshStrataError::InconsistentTopology(format!("{id:?} refers to a missing element"))
        })?;
        acc |= elem.flags.ownership();
        if touches_boundary(re, elem, re.face_vertices(id.type_of(), id.face_of())) {
            acc.insert(ElemFlags::BOUNDARY);
        }
    }
    flags::classify(acc)
}

impl AdjacencyIndex {
    pub fn new(kind: MeshKind, slack: usize) -> Self {
        Self {
            kind,
            vertices: VertexIncidence::default(),
            edges: IncidenceTable::new(slack),
            triangles: IncidenceTable::new(slack),
            scratch: QueryScratch::default(),
        }
    }

    pub fn kind(&self) -> MeshKind {
        self.kind
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
        self.edges.clear();
        self.triangles.clear();
    }

    /// Enter every sub-entity of the elements in `range`.
    pub fn update(&mut self, elems: &[Element], range: Range<usize>) -> Result<(), MeshStrataError> {
        let re = self.kind.ref_element();
        let total = range.len();
        for (k, e) in range.clone().enumerate() {
            let elem = &elems[e];
            let idx = ElemIdx::try_from(e)?;
            let remaining = total - k;
            for (i, &v) in elem.vertices().iter().enumerate() {
                self.vertices.enter(v, EntityId::build(EntityType::Vertex, i, idx));
            }
            for j in 0..re.num_edges() {
                let id = EntityId::build(EntityType::Edge, j, idx);
                self.edges
                    .enter(edge_key(re, elem, j), id, remaining * re.num_edges())?;
            }
            if self.kind == MeshKind::Tetrahedron {
                for f in 0..re.num_facets() {
                    let id = EntityId::build(EntityType::Triangle, f, idx);
                    self.triangles
                        .enter(triangle_key(re, elem, f), id, remaining * re.num_facets())?;
                }
            }
        }
        log::debug!(
            "adjacency updated for elements {range:?}: {} edges, {} triangles",
            self.edges.filled(),
            self.triangles.filled()
        );
        Ok(())
    }

    pub fn vertex_entry(&self, v: VertexIdx) -> Option<&VertexEntry> {
        self.vertices.get(v)
    }

    pub fn find_edge(&self, a: VertexIdx, b: VertexIdx) -> Option<&IncidenceEntry<2>> {
        self.edges.find(&sorted_key([a, b]))
    }

    pub fn find_triangle(
        &self,
        a: VertexIdx,
        b: VertexIdx,
        c: VertexIdx,
    ) -> Option<&IncidenceEntry<3>> {
        self.triangles.find(&sorted_key([a, b, c]))
    }

    /// All ids denoting the same geometric entity as `id`.
    pub fn incident(&self, elems: &[Element], id: EntityId) -> Result<&[EntityId], MeshStrataError> {
        let re = self.kind.ref_element();
        let elem = elems.get(id.elem_of().index()).ok_or_else(|| {
            MeshStrataError::InvalidArgument(format!("{id:?} refers to a missing element"))
        })?;
        let face = id.face_of();
        if face >= re.num_faces_of(id.type_of()) {
            return Err(MeshStrataError::InvalidArgument(format!("{id:?} has no such face")));
        }
        let items = match (id.type_of(), self.kind) {
            (EntityType::Vertex, _) => self.vertices.get(elem.vertex(face)).map(|e| &e.items[..]),
            (EntityType::Edge, _) => self.edges.find(&edge_key(re, elem, face)).map(|e| &e.items[..]),
            (EntityType::Triangle, MeshKind::Tetrahedron) => self
                .triangles
                .find(&triangle_key(re, elem, face))
                .map(|e| &e.items[..]),
            _ => {
                return Err(MeshStrataError::InvalidArgument(format!(
                    "{id:?} is a cell and has no incidence list"
                )));
            }
        };
        items.ok_or_else(|| MeshStrataError::InconsistentTopology(format!("{id:?} is not indexed")))
    }

    /// Representative id of the entity: the incident id with the lowest element.
    pub fn canonical(&self, elems: &[Element], id: EntityId) -> Result<EntityId, MeshStrataError> {
        if id.type_of() == self.kind.cell_type() {
            return Ok(id);
        }
        self.incident(elems, id)?
            .iter()
            .copied()
            .min_by_key(|i| i.elem_of())
            .ok_or_else(|| MeshStrataError::InconsistentTopology(format!("{id:?} has no owner")))
    }

    /// Ids of the facet `facet` of element `elem`, one per incident element.
    pub fn facet_incidence(
        &self,
        elems: &[Element],
        elem: ElemIdx,
        facet: usize,
    ) -> Result<&[EntityId], MeshStrataError> {
        let face = match self.kind {
            // in a triangle mesh facet i is edge i
            MeshKind::Triangle => EntityId::build(EntityType::Edge, facet, elem),
            MeshKind::Tetrahedron => EntityId::build(EntityType::Triangle, facet, elem),
        };
        self.incident(elems, face)
    }

    /// Recompute the classification of every indexed entity.
    pub fn update_flags(&mut self, elems: &[Element]) -> Result<(), MeshStrataError> {
        let re = self.kind.ref_element();
        for entry in self.vertices.iter_mut() {
            entry.flags = if entry.items.is_empty() {
                ElemFlags::empty()
            } else {
                derive_flags(re, elems, &entry.items)?
            };
        }
        for entry in self.edges.iter_mut() {
            entry.flags = derive_flags(re, elems, &entry.items)?;
        }
        for entry in self.triangles.iter_mut() {
            entry.flags = derive_flags(re, elems, &entry.items)?;
        }
        Ok(())
    }

    /// Recompute the classification of every sub-entity of the elements
    /// in `changed`.
    pub fn update_flags_of(
        &mut self,
        elems: &[Element],
        changed: &[usize],
    ) -> Result<(), MeshStrataError> {
        let re = self.kind.ref_element();
        for &e in changed {
            let elem = elems.get(e).ok_or_else(|| {
                MeshStrataError::InconsistentTopology(format!("element {e} is not stored"))
            })?;
            for &v in elem.vertices() {
                if let Some(entry) = self.vertices.get_mut(v) {
                    entry.flags = derive_flags(re, elems, &entry.items)?;
                }
            }
            for j in 0..re.num_edges() {
                if let Some(entry) = self.edges.find_mut(&edge_key(re, elem, j)) {
                    entry.flags = derive_flags(re, elems, &entry.items)?;
                }
            }
            if self.kind == MeshKind::Tetrahedron {
                for f in 0..re.num_facets() {
                    if let Some(entry) = self.triangles.find_mut(&triangle_key(re, elem, f)) {
                        entry.flags = derive_flags(re, elems, &entry.items)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Stored classification of an entity; cells report their own flags.
    pub fn entity_flags(&self, elems: &[Element], id: EntityId) -> Result<ElemFlags, MeshStrataError> {
        let re = self.kind.ref_element();
        let elem = elems.get(id.elem_of().index()).ok_or_else(|| {
            MeshStrataError::InvalidArgument(format!("{id:?} refers to a missing element"))
        })?;
        let face = id.face_of();
        let flags = match (id.type_of(), self.kind) {
            (EntityType::Vertex, _) => self.vertices.get(elem.vertex(face)).map(|e| e.flags),
            (EntityType::Edge, _) => self.edges.find(&edge_key(re, elem, face)).map(|e| e.flags),
            (EntityType::Triangle, MeshKind::Tetrahedron) => self
                .triangles
                .find(&triangle_key(re, elem, face))
                .map(|e| e.flags),
            _ => Some(elem.flags),
        };
        flags.ok_or_else(|| MeshStrataError::InconsistentTopology(format!("{id:?} is not indexed")))
    }

    pub fn edges(&self) -> impl Iterator<Item = &IncidenceEntry<2>> {
        self.edges.iter()
    }

    pub fn triangles(&self) -> impl Iterator<Item = &IncidenceEntry<3>> {
        self.triangles.iter()
    }

    pub fn vertices(&self) -> impl Iterator<Item = (VertexIdx, &VertexEntry)> {
        self.vertices.iter()
    }

    /// Midpoint of edge `(a, b)` if an element sharing the edge has been
    /// refined: the vertex joined to both `a` and `b` by child edges.
    pub fn bisection_vertex(
        &mut self,
        elems: &[Element],
        a: VertexIdx,
        b: VertexIdx,
    ) -> Option<VertexIdx> {
        let re = self.kind.ref_element();
        let Self { edges, scratch, .. } = self;
        let entry = edges.find(&sorted_key([a, b]))?;
        for id in &entry.items {
            let parent = &elems[id.elem_of().index()];
            let Some(first) = parent.child_idx else {
                continue;
            };
            scratch.verts.clear();
            for c in 0..re.num_children() {
                let Some(child) = elems.get(first.index() + c) else {
                    break;
                };
                for &m in child.vertices() {
                    if !parent.vertices().contains(&m) && !scratch.verts.contains(&m) {
                        scratch.verts.push(m);
                    }
                }
            }
            let found = scratch.verts.iter().copied().find(|&m| {
                edges.find(&sorted_key([a, m])).is_some() && edges.find(&sorted_key([b, m])).is_some()
            });
            if found.is_some() {
                return found;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tet_pair() -> Vec<Element> {
        // two tetrahedra sharing the facet (1, 2, 3)
        let mut a = Element::new(0, 0, &[VertexIdx(0), VertexIdx(1), VertexIdx(2), VertexIdx(3)]);
        let mut b = Element::new(0, 0, &[VertexIdx(1), VertexIdx(2), VertexIdx(3), VertexIdx(4)]);
        a.flags = ElemFlags::INTERIOR;
        b.flags = ElemFlags::GHOST;
        vec![a, b]
    }

    #[test]
    fn shared_facet_lists_both_elements() {
        let elems = tet_pair();
        let mut adj = AdjacencyIndex::new(MeshKind::Tetrahedron, 16);
        adj.update(&elems, 0..2).unwrap();
        let ids = adj.facet_incidence(&elems, ElemIdx(0), 0).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[1].elem_of(), ElemIdx(1));
        assert_eq!(ids[1].face_of(), 3);
        // vertex 1 is shared, vertex 0 is not
        assert_eq!(adj.vertex_entry(VertexIdx(1)).unwrap().items.len(), 2);
        assert_eq!(adj.vertex_entry(VertexIdx(0)).unwrap().items.len(), 1);
    }

    #[test]
    fn canonical_is_lowest_element() {
        let elems = tet_pair();
        let mut adj = AdjacencyIndex::new(MeshKind::Tetrahedron, 16);
        adj.update(&elems, 0..2).unwrap();
        // edge (1, 2) is edge 2 in element 0 and edge 0 in element 1
        let id = EntityId::build(EntityType::Edge, 0, ElemIdx(1));
        let c = adj.canonical(&elems, id).unwrap();
        assert_eq!(c, EntityId::build(EntityType::Edge, 2, ElemIdx(0)));
    }

    #[test]
    fn flags_of_shared_and_ghost_only_entities() {
        let elems = tet_pair();
        let mut adj = AdjacencyIndex::new(MeshKind::Tetrahedron, 16);
        adj.update(&elems, 0..2).unwrap();
        adj.update_flags(&elems).unwrap();
        // shared facet touches an interior element
        let shared = EntityId::build(EntityType::Triangle, 0, ElemIdx(0));
        assert!(adj.entity_flags(&elems, shared).unwrap().contains(ElemFlags::INTERIOR));
        // vertex 4 belongs to the ghost only
        let v4 = EntityId::build(EntityType::Vertex, 3, ElemIdx(1));
        let f = adj.entity_flags(&elems, v4).unwrap();
        assert!(f.contains(ElemFlags::FRONT));
        // every neighbor slot defaults to boundary
        assert!(f.contains(ElemFlags::BOUNDARY));
    }

    #[test]
    fn partial_flag_update_matches_full_one() {
        let mut elems = tet_pair();
        let mut adj = AdjacencyIndex::new(MeshKind::Tetrahedron, 16);
        adj.update(&elems, 0..2).unwrap();
        adj.update_flags(&elems).unwrap();
        // the ghost turns out to be owned after all
        elems[1].flags = ElemFlags::INTERIOR;
        adj.update_flags_of(&elems, &[1]).unwrap();
        let partial: Vec<ElemFlags> = adj.edges().map(|e| e.flags).collect();
        adj.update_flags(&elems).unwrap();
        let full: Vec<ElemFlags> = adj.edges().map(|e| e.flags).collect();
        assert_eq!(partial, full);
        let v4 = EntityId::build(EntityType::Vertex, 3, ElemIdx(1));
        assert!(adj.entity_flags(&elems, v4).unwrap().contains(ElemFlags::INTERIOR));
    }

    #[test]
    fn cell_has_no_incidence_list() {
        let elems = tet_pair();
        let adj = AdjacencyIndex::new(MeshKind::Tetrahedron, 16);
        let id = EntityId::build(EntityType::Tetrahedron, 0, ElemIdx(0));
        assert!(adj.incident(&elems, id).is_err());
        assert_eq!(adj.canonical(&elems, id).unwrap(), id);
    }
}
