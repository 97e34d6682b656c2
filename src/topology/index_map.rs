//! Sorted global → local index map.
//!
//! Inserts append unsorted; callers batch them and call [`IndexMap::sort`]
//! once before the next [`IndexMap::find`]. The sort is stable, so `find`
//! returns the slot inserted last for a repeated global id.

use crate::mesh_error::MeshStrataError;

/// One map entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IndexMapEntry {
    pub glb_idx: i64,
    pub loc_idx: u32,
}

#[derive(Clone, Debug)]
pub struct IndexMap {
    items: Vec<IndexMapEntry>,
    sorted: bool,
}

impl Default for IndexMap {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexMap {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            sorted: true,
        }
    }

    /// Make room for at least `capacity` entries in total.
    pub fn grow(&mut self, capacity: usize) -> Result<(), MeshStrataError> {
        let additional = capacity.saturating_sub(self.items.len());
        self.items
            .try_reserve(additional)
            .map_err(|_| MeshStrataError::Allocation(capacity))
    }

    /// Append without restoring order.
    pub fn insert(&mut self, glb_idx: i64, loc_idx: u32) {
        if let Some(last) = self.items.last() {
            if last.glb_idx > glb_idx {
                self.sorted = false;
            }
        }
        self.items.push(IndexMapEntry { glb_idx, loc_idx });
    }

    /// Stable sort by global id.
    pub fn sort(&mut self) {
        if !self.sorted {
            self.items.sort_by_key(|e| e.glb_idx);
            self.sorted = true;
        }
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Local slot of `glb_idx`. The map must be sorted.
    pub fn find(&self, glb_idx: i64) -> Result<u32, MeshStrataError> {
        debug_assert!(self.sorted, "IndexMap::find on an unsorted map");
        let end = self.items.partition_point(|e| e.glb_idx <= glb_idx);
        match end.checked_sub(1).map(|i| self.items[i]) {
            Some(entry) if entry.glb_idx == glb_idx => Ok(entry.loc_idx),
            _ => Err(MeshStrataError::NotFound(glb_idx)),
        }
    }

    pub fn contains(&self, glb_idx: i64) -> bool {
        self.find(glb_idx).is_ok()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.sorted = true;
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexMapEntry> {
        self.items.iter()
    }

    /// Drop every entry whose local slot is `limit` or above. Relative
    /// order is kept, so an older slot of a repeated id becomes visible again.
    pub fn retain_below(&mut self, limit: usize) {
        self.items.retain(|e| (e.loc_idx as usize) < limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn find_after_sort() {
        let mut map = IndexMap::new();
        map.grow(4).unwrap();
        map.insert(30, 0);
        map.insert(10, 1);
        map.insert(20, 2);
        map.sort();
        assert_eq!(map.find(10).unwrap(), 1);
        assert_eq!(map.find(30).unwrap(), 0);
        assert_eq!(map.find(15), Err(MeshStrataError::NotFound(15)));
        assert_eq!(map.find(-1), Err(MeshStrataError::NotFound(-1)));
    }

    #[test]
    fn repeated_id_resolves_to_latest_insert() {
        let mut map = IndexMap::new();
        map.insert(5, 0);
        map.insert(2, 1);
        map.insert(5, 9);
        map.sort();
        assert_eq!(map.find(5).unwrap(), 9);
    }

    #[test]
    fn retain_below_uncovers_older_slots() {
        let mut map = IndexMap::new();
        map.insert(5, 0);
        map.insert(7, 1);
        map.insert(5, 2);
        map.insert(9, 3);
        map.sort();
        map.retain_below(2);
        assert_eq!(map.len(), 2);
        assert_eq!(map.find(5).unwrap(), 0);
        assert!(map.find(9).is_err());
    }

    proptest! {
        #[test]
        fn sorted_map_finds_every_inserted_id(ids in proptest::collection::hash_set(0i64..10_000, 0..200)) {
            let ids: Vec<i64> = ids.into_iter().collect();
            let mut map = IndexMap::new();
            for (loc, &glb) in ids.iter().enumerate() {
                map.insert(glb, loc as u32);
            }
            map.sort();
            for (loc, &glb) in ids.iter().enumerate() {
                prop_assert_eq!(map.find(glb).unwrap(), loc as u32);
            }
            prop_assert!(map.find(10_000).is_err());
        }
    }
}
