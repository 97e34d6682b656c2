//! Vertex → incident elements, one short list per local vertex.

use crate::topology::{ElemFlags, EntityId, VertexIdx};

#[derive(Clone, Debug, Default)]
pub struct VertexEntry {
    pub items: Vec<EntityId>,
    pub flags: ElemFlags,
}

#[derive(Clone, Debug, Default)]
pub struct VertexIncidence {
    lists: Vec<VertexEntry>,
}

impl VertexIncidence {
    /// Make sure a list exists for every vertex below `num_vertices`.
    pub fn grow(&mut self, num_vertices: usize) {
        if self.lists.len() < num_vertices {
            self.lists.resize_with(num_vertices, VertexEntry::default);
        }
    }

    /// Add `id` to the list of `vertex`; lists are short so a scan suffices.
    pub fn enter(&mut self, vertex: VertexIdx, id: EntityId) {
        self.grow(vertex.index() + 1);
        let list = &mut self.lists[vertex.index()].items;
        if !list.contains(&id) {
            list.push(id);
        }
    }

    pub fn get(&self, vertex: VertexIdx) -> Option<&VertexEntry> {
        self.lists.get(vertex.index())
    }

    pub fn get_mut(&mut self, vertex: VertexIdx) -> Option<&mut VertexEntry> {
        self.lists.get_mut(vertex.index())
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn clear(&mut self) {
        self.lists.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (VertexIdx, &VertexEntry)> {
        self.lists
            .iter()
            .enumerate()
            // slots exist only for vertices admitted with a valid index
            .filter_map(|(i, entry)| VertexIdx::try_from(i).ok().map(|v| (v, entry)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut VertexEntry> {
        self.lists.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{ElemIdx, EntityType};

    #[test]
    fn duplicates_are_suppressed() {
        let mut vi = VertexIncidence::default();
        let id = EntityId::build(EntityType::Vertex, 1, ElemIdx(4));
        vi.enter(VertexIdx(3), id);
        vi.enter(VertexIdx(3), id);
        assert_eq!(vi.len(), 4);
        assert_eq!(vi.get(VertexIdx(3)).unwrap().items, vec![id]);
        assert!(vi.get(VertexIdx(0)).unwrap().items.is_empty());
    }
}
