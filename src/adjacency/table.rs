//! Open-addressed incidence table keyed by sorted local vertex tuples.
//!
//! Linear probing over `Option` slots. When an insert would bring
//! `filled / size` past 4/5 the table grows to
//! `max(filled + 2 * remaining + slack, 2 * (filled + 1))` slots, where
//! `remaining` is the caller's estimate of entries still to come in the
//! current batch, and every entry is rehashed. References into the table
//! are invalidated by any call that may grow it.

use std::hash::BuildHasher;

use hashbrown::hash_map::DefaultHashBuilder;

use crate::mesh_error::MeshStrataError;
use crate::topology::{ElemFlags, EntityId, VertexIdx};

/// One populated slot: the entity key and every id incident to it.
#[derive(Clone, Debug)]
pub struct IncidenceEntry<const N: usize> {
    pub key: [VertexIdx; N],
    pub items: Vec<EntityId>,
    pub flags: ElemFlags,
}

#[derive(Clone, Debug)]
pub struct IncidenceTable<const N: usize> {
    slots: Vec<Option<IncidenceEntry<N>>>,
    filled: usize,
    slack: usize,
    hasher: DefaultHashBuilder,
}

impl<const N: usize> IncidenceTable<N> {
    pub fn new(slack: usize) -> Self {
        Self {
            slots: Vec::new(),
            filled: 0,
            slack: slack.max(1),
            hasher: DefaultHashBuilder::default(),
        }
    }

    /// Number of slots.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of populated slots.
    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.filled = 0;
    }

    #[inline]
    fn over_load(&self) -> bool {
        (self.filled + 1) * 5 > self.slots.len() * 4
    }

    /// Grow if the load factor is reached, sized for `remaining` more entries.
    pub fn reserve_for(&mut self, remaining: usize) -> Result<(), MeshStrataError> {
        if !self.over_load() {
            return Ok(());
        }
        let new_size = (self.filled + 2 * remaining + self.slack).max(2 * (self.filled + 1));
        self.rehash(new_size)
    }

    fn rehash(&mut self, new_size: usize) -> Result<(), MeshStrataError> {
        log::debug!(
            "incidence table grows from {} to {new_size} slots ({} filled)",
            self.slots.len(),
            self.filled
        );
        let mut slots: Vec<Option<IncidenceEntry<N>>> = Vec::new();
        slots
            .try_reserve_exact(new_size)
            .map_err(|_| MeshStrataError::Allocation(new_size))?;
        slots.resize_with(new_size, || None);
        let old = std::mem::replace(&mut self.slots, slots);
        for entry in old.into_iter().flatten() {
            let pos = match self.slot_of(&entry.key) {
                Ok(pos) | Err(pos) => pos,
            };
            self.slots[pos] = Some(entry);
        }
        Ok(())
    }

    /// `Ok(slot)` if the key is present, `Err(free slot)` otherwise.
    fn slot_of(&self, key: &[VertexIdx; N]) -> Result<usize, usize> {
        let size = self.slots.len();
        let mut pos = (self.hasher.hash_one(key) % size as u64) as usize;
        loop {
            match &self.slots[pos] {
                None => return Err(pos),
                Some(entry) if entry.key == *key => return Ok(pos),
                Some(_) => pos = (pos + 1) % size,
            }
        }
    }

    pub fn find(&self, key: &[VertexIdx; N]) -> Option<&IncidenceEntry<N>> {
        if self.slots.is_empty() {
            return None;
        }
        self.slot_of(key).ok().and_then(|pos| self.slots[pos].as_ref())
    }

    pub fn find_mut(&mut self, key: &[VertexIdx; N]) -> Option<&mut IncidenceEntry<N>> {
        if self.slots.is_empty() {
            return None;
        }
        let pos = self.slot_of(key).ok()?;
        self.slots[pos].as_mut()
    }

    /// Insert-or-get the entry for `key` and add `id` to it unless present.
    pub fn enter(
        &mut self,
        key: [VertexIdx; N],
        id: EntityId,
        remaining: usize,
    ) -> Result<&mut IncidenceEntry<N>, MeshStrataError> {
        self.reserve_for(remaining)?;
        let pos = match self.slot_of(&key) {
            Ok(pos) => pos,
            Err(pos) => {
                self.slots[pos] = Some(IncidenceEntry {
                    key,
                    items: Vec::with_capacity(2),
                    flags: ElemFlags::empty(),
                });
                self.filled += 1;
                pos
            }
        };
        let entry = self.slots[pos]
            .as_mut()
            .ok_or_else(|| MeshStrataError::InconsistentTopology("empty hash slot".into()))?;
        if !entry.items.contains(&id) {
            entry.items.push(id);
        }
        Ok(entry)
    }

    /// Populated slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &IncidenceEntry<N>> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut IncidenceEntry<N>> {
        self.slots.iter_mut().flatten()
    }
}

/// Sort a vertex tuple into table key order.
#[inline]
pub fn sorted_key<const N: usize>(mut key: [VertexIdx; N]) -> [VertexIdx; N] {
    key.sort_unstable();
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{ElemIdx, EntityType};

    fn v2(a: u32, b: u32) -> [VertexIdx; 2] {
        sorted_key([VertexIdx(a), VertexIdx(b)])
    }

    fn edge(face: usize, elem: u32) -> EntityId {
        EntityId::build(EntityType::Edge, face, ElemIdx(elem))
    }

    #[test]
    fn enter_then_find() {
        let mut t = IncidenceTable::<2>::new(8);
        t.enter(v2(3, 1), edge(0, 0), 4).unwrap();
        t.enter(v2(1, 3), edge(2, 5), 3).unwrap();
        t.enter(v2(1, 3), edge(2, 5), 2).unwrap();
        let e = t.find(&v2(1, 3)).unwrap();
        assert_eq!(e.items, vec![edge(0, 0), edge(2, 5)]);
        assert!(t.find(&v2(1, 4)).is_none());
        assert_eq!(t.filled(), 1);
    }

    #[test]
    fn growth_keeps_every_entry() {
        let mut t = IncidenceTable::<2>::new(1);
        for i in 0..500u32 {
            t.enter(v2(i, i + 1), edge(0, i), 0).unwrap();
            assert!(t.filled() * 5 <= t.size() * 4);
        }
        for i in 0..500u32 {
            let e = t.find(&v2(i + 1, i)).unwrap();
            assert_eq!(e.items, vec![edge(0, i)]);
        }
        assert_eq!(t.iter().count(), 500);
    }
}
