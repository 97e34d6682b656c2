//! Replicated spatial octree over element centroids.
//!
//! Octants live in one array; the 8 children of an octant are contiguous,
//! child `k` covering the half of its parent selected by the orientation
//! bits of `k` (x = 1, y = 2, z = 4). Containment is half-open, so a point on
//! a split plane belongs to the upper child. Every octant carries a small
//! fixed number of user-data slots holding chunk indices; a chunk that does
//! not fit is an error, never a silent growth.

use serde::{Deserialize, Serialize};

use super::error::PartitionError;
use crate::algs::wire::WireOctant;

/// User-data slots per octant.
pub const OCTANT_SLOTS: usize = 4;
/// Octants are not split below this depth.
pub const MAX_DEPTH: i32 = 24;

/// Axis-aligned box.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BBox {
    /// Bounding box of `points`, widened by `pad` on the max side.
    pub fn of_points(points: &[[f64; 3]], pad: f64) -> Self {
        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        for p in points {
            for a in 0..3 {
                min[a] = min[a].min(p[a]);
                max[a] = max[a].max(p[a]);
            }
        }
        if points.is_empty() {
            min = [0.0; 3];
            max = [0.0; 3];
        }
        Self {
            min,
            max: max.map(|x| x + pad),
        }
    }

    /// Half-open containment `min <= p < max`.
    pub fn contains(&self, p: &[f64; 3]) -> bool {
        (0..3).all(|a| self.min[a] <= p[a] && p[a] < self.max[a])
    }

    /// Closed boxes intersect (shared faces, edges and corners count).
    pub fn touches(&self, other: &BBox) -> bool {
        (0..3).all(|a| self.min[a] <= other.max[a] && other.min[a] <= self.max[a])
    }

    pub fn center(&self) -> [f64; 3] {
        [0, 1, 2].map(|a| 0.5 * (self.min[a] + self.max[a]))
    }

    /// Box of the child with orientation bits `orient`.
    pub fn child(&self, orient: i32) -> Self {
        let mid = self.center();
        let mut b = *self;
        for a in 0..3 {
            if orient & (1 << a) != 0 {
                b.min[a] = mid[a];
            } else {
                b.max[a] = mid[a];
            }
        }
        b
    }

    /// Orientation bits of the child of this box containing `p`.
    pub fn orient_of(&self, p: &[f64; 3]) -> i32 {
        let mid = self.center();
        (0..3).fold(0, |o, a| if p[a] >= mid[a] { o | (1 << a) } else { o })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Octant {
    /// `-1` for the root.
    pub parent: i32,
    /// First of 8 children, `-1` for a leaf.
    pub child_idx: i32,
    /// Depth below the root.
    pub level: i32,
    /// Position within the parent (x = 1, y = 2, z = 4).
    pub orient: i32,
    /// Owning process, `-1` until partitioned.
    pub processor: i32,
    /// Bit `L` set when a chunk of level `L` is attached.
    pub userlevels: u32,
    userdata: [Option<i32>; OCTANT_SLOTS],
}

impl Octant {
    fn new(parent: i32, level: i32, orient: i32, processor: i32) -> Self {
        Self {
            parent,
            child_idx: -1,
            level,
            orient,
            processor,
            userlevels: 0,
            userdata: [None; OCTANT_SLOTS],
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.child_idx < 0
    }

    pub fn userdata(&self) -> impl Iterator<Item = i32> + '_ {
        self.userdata.iter().flatten().copied()
    }
}

#[derive(Clone, Debug)]
pub struct Octree {
    octants: Vec<Octant>,
    bbox: BBox,
    /// Usable user-data slots per octant.
    slots: usize,
}

impl Octree {
    pub fn new(bbox: BBox) -> Self {
        Self::with_slots(bbox, OCTANT_SLOTS)
    }

    pub fn with_slots(bbox: BBox, slots: usize) -> Self {
        Self {
            octants: vec![Octant::new(-1, 0, 0, -1)],
            bbox,
            slots: slots.clamp(1, OCTANT_SLOTS),
        }
    }

    pub fn bbox(&self) -> BBox {
        self.bbox
    }

    pub fn len(&self) -> usize {
        self.octants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.octants.is_empty()
    }

    pub fn octant(&self, idx: i32) -> Result<&Octant, PartitionError> {
        usize::try_from(idx)
            .ok()
            .and_then(|i| self.octants.get(i))
            .ok_or(PartitionError::OctantNotFound(idx))
    }

    fn octant_mut(&mut self, idx: i32) -> Result<&mut Octant, PartitionError> {
        usize::try_from(idx)
            .ok()
            .and_then(|i| self.octants.get_mut(i))
            .ok_or(PartitionError::OctantNotFound(idx))
    }

    /// Split a leaf into 8 children, which inherit its processor.
    /// Returns the first child.
    pub fn refine_octant(&mut self, idx: i32) -> Result<i32, PartitionError> {
        let oct = self.octant(idx)?;
        if !oct.is_leaf() {
            return Ok(oct.child_idx);
        }
        let (level, processor) = (oct.level + 1, oct.processor);
        let first = self.octants.len();
        if self.octants.capacity() < first + 8 {
            // grow by at least 8 octants
            self.octants.reserve(first.max(8));
        }
        for orient in 0..8 {
            self.octants.push(Octant::new(idx, level, orient, processor));
        }
        self.octant_mut(idx)?.child_idx = first as i32;
        Ok(first as i32)
    }

    /// Leaf octant containing `p`.
    pub fn find_leafoctant_of_point(&self, p: &[f64; 3]) -> Result<i32, PartitionError> {
        let mut bbox = self.bbox;
        if !bbox.contains(p) {
            return Err(PartitionError::PointOutsideOctree(format!("{p:?}")));
        }
        let mut idx = 0i32;
        loop {
            let oct = self.octant(idx)?;
            if oct.is_leaf() {
                return Ok(idx);
            }
            let orient = bbox.orient_of(p);
            bbox = bbox.child(orient);
            idx = oct.child_idx + orient;
        }
    }

    /// Leaf of every point, plus the number of points per octant.
    pub fn add_points_to_leaf(
        &self,
        points: &[[f64; 3]],
    ) -> Result<(Vec<i32>, Vec<usize>), PartitionError> {
        let mut counts = vec![0usize; self.octants.len()];
        let leaves = points
            .iter()
            .map(|p| -> Result<i32, PartitionError> {
                let leaf = self.find_leafoctant_of_point(p)?;
                counts[leaf as usize] += 1;
                Ok(leaf)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((leaves, counts))
    }

    /// Split leaves until none holds more than `max_points` points, and
    /// none whose user-data slots are all taken holds any.
    pub fn refine_w_points(
        &mut self,
        points: &[[f64; 3]],
        max_points: usize,
    ) -> Result<(), PartitionError> {
        let max_points = max_points.max(1);
        loop {
            let (_, counts) = self.add_points_to_leaf(points)?;
            let to_split: Vec<i32> = counts
                .iter()
                .enumerate()
                .filter(|&(i, &n)| {
                    let oct = &self.octants[i];
                    oct.is_leaf()
                        && oct.level < MAX_DEPTH
                        && (n > max_points || (n > 0 && !self.has_free_slot_at(i)))
                })
                .map(|(i, _)| i as i32)
                .collect();
            if to_split.is_empty() {
                break;
            }
            for idx in to_split {
                self.refine_octant(idx)?;
            }
        }
        log::debug!(
            "octree refined over {} points: {} octants",
            points.len(),
            self.octants.len()
        );
        Ok(())
    }

    pub fn bounding_box_of_octant(&self, idx: i32) -> Result<BBox, PartitionError> {
        let mut path = Vec::new();
        let mut cur = idx;
        while cur > 0 {
            let oct = self.octant(cur)?;
            path.push(oct.orient);
            cur = oct.parent;
        }
        self.octant(idx)?;
        Ok(path.iter().rev().fold(self.bbox, |b, &o| b.child(o)))
    }

    /// The 8 children of `idx`'s parent.
    pub fn siblings(&self, idx: i32) -> Result<[i32; 8], PartitionError> {
        let oct = self.octant(idx)?;
        if oct.parent < 0 {
            return Err(PartitionError::NoSiblings(idx));
        }
        let first = self.octant(oct.parent)?.child_idx;
        Ok(std::array::from_fn(|k| first + k as i32))
    }

    fn is_ancestor(&self, anc: i32, mut idx: i32) -> bool {
        while idx >= 0 {
            if idx == anc {
                return true;
            }
            idx = self.octants[idx as usize].parent;
        }
        false
    }

    /// Octants touching `idx` at depth `level`, or leaves above that depth.
    /// Ancestors and descendants of `idx` are excluded.
    pub fn neighbors(&self, idx: i32, level: i32) -> Result<Vec<i32>, PartitionError> {
        let target = self.bounding_box_of_octant(idx)?;
        let mut out = Vec::new();
        let mut stack = vec![(0i32, self.bbox)];
        while let Some((cur, bbox)) = stack.pop() {
            if cur == idx || !bbox.touches(&target) || self.is_ancestor(idx, cur) {
                continue;
            }
            let oct = &self.octants[cur as usize];
            let ancestor = self.is_ancestor(cur, idx);
            if !ancestor && (oct.level == level || (oct.is_leaf() && oct.level < level)) {
                out.push(cur);
                continue;
            }
            if !oct.is_leaf() {
                for orient in (0..8).rev() {
                    stack.push((oct.child_idx + orient, bbox.child(orient)));
                }
            }
        }
        out.sort_unstable();
        Ok(out)
    }

    /// Leaves in depth-first (Morton) order.
    pub fn leaves(&self) -> LeafOctants<'_> {
        LeafOctants {
            tree: self,
            stack: vec![0],
        }
    }

    /// Every octant in depth-first pre-order.
    pub fn preorder(&self) -> Vec<i32> {
        let mut out = Vec::with_capacity(self.octants.len());
        let mut stack = vec![0i32];
        while let Some(cur) = stack.pop() {
            out.push(cur);
            let oct = &self.octants[cur as usize];
            if !oct.is_leaf() {
                stack.extend((0..8).rev().map(|o| oct.child_idx + o));
            }
        }
        out
    }

    fn has_free_slot_at(&self, i: usize) -> bool {
        self.octants[i].userdata().count() < self.slots
    }

    pub fn has_free_slot(&self, idx: i32) -> Result<bool, PartitionError> {
        self.octant(idx)?;
        Ok(self.has_free_slot_at(idx as usize))
    }

    /// Attach a chunk index to an octant.
    pub fn add_userdata(&mut self, idx: i32, chunk: i32) -> Result<(), PartitionError> {
        let slots = self.slots;
        let oct = self.octant_mut(idx)?;
        match oct.userdata[..slots].iter_mut().find(|s| s.is_none()) {
            Some(slot) => {
                *slot = Some(chunk);
                Ok(())
            }
            None => Err(PartitionError::OctantFull {
                oct_idx: idx,
                capacity: slots,
            }),
        }
    }

    pub fn set_userlevel(&mut self, idx: i32, level: usize) -> Result<(), PartitionError> {
        self.octant_mut(idx)?.userlevels |= 1u32 << level.min(31);
        Ok(())
    }

    pub fn set_processor(&mut self, idx: i32, proc: i32) -> Result<(), PartitionError> {
        self.octant_mut(idx)?.processor = proc;
        Ok(())
    }

    pub fn to_wire(&self) -> Vec<WireOctant> {
        self.octants
            .iter()
            .enumerate()
            .map(|(i, o)| {
                WireOctant::new(
                    i as i32,
                    o.parent,
                    o.child_idx,
                    o.level,
                    o.orient,
                    o.processor,
                    o.userlevels,
                    o.userdata.map(|s| s.unwrap_or(-1)),
                )
            })
            .collect()
    }

    pub fn from_wire(bbox: BBox, slots: usize, recs: &[WireOctant]) -> Result<Self, PartitionError> {
        if recs.is_empty() {
            return Ok(Self::with_slots(bbox, slots));
        }
        let octants = recs
            .iter()
            .enumerate()
            .map(|(i, r)| {
                if r.idx() != i as i32 {
                    return Err(PartitionError::OctantNotFound(i as i32));
                }
                let mut userdata = [None; OCTANT_SLOTS];
                for (slot, d) in userdata.iter_mut().zip(r.userdata()) {
                    *slot = (d >= 0).then_some(d);
                }
                Ok(Octant {
                    parent: r.parent(),
                    child_idx: r.child_idx(),
                    level: r.level(),
                    orient: r.orient(),
                    processor: r.processor(),
                    userlevels: r.userlevels(),
                    userdata,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            octants,
            bbox,
            slots: slots.clamp(1, OCTANT_SLOTS),
        })
    }
}

/// Depth-first leaf iterator.
pub struct LeafOctants<'a> {
    tree: &'a Octree,
    stack: Vec<i32>,
}

impl Iterator for LeafOctants<'_> {
    type Item = i32;

    fn next(&mut self) -> Option<i32> {
        while let Some(cur) = self.stack.pop() {
            let oct = &self.tree.octants[cur as usize];
            if oct.is_leaf() {
                return Some(cur);
            }
            self.stack.extend((0..8).rev().map(|o| oct.child_idx + o));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_tree() -> Octree {
        Octree::new(BBox {
            min: [0.0; 3],
            max: [1.0; 3],
        })
    }

    #[test]
    fn half_open_point_location() {
        let mut t = unit_tree();
        let first = t.refine_octant(0).unwrap();
        assert_eq!(first, 1);
        assert_eq!(t.find_leafoctant_of_point(&[0.25, 0.25, 0.25]).unwrap(), 1);
        // a point on the split plane goes up
        assert_eq!(t.find_leafoctant_of_point(&[0.5, 0.1, 0.1]).unwrap(), 2);
        assert_eq!(t.find_leafoctant_of_point(&[0.9, 0.9, 0.9]).unwrap(), 8);
        assert!(matches!(
            t.find_leafoctant_of_point(&[1.0, 0.0, 0.0]),
            Err(PartitionError::PointOutsideOctree(_))
        ));
    }

    #[test]
    fn refine_w_points_respects_max_points() {
        let mut t = unit_tree();
        let pts: Vec<[f64; 3]> = (0..64)
            .map(|i| {
                let (x, y, z) = (i % 4, (i / 4) % 4, i / 16);
                [0.125 + 0.25 * x as f64, 0.125 + 0.25 * y as f64, 0.125 + 0.25 * z as f64]
            })
            .collect();
        t.refine_w_points(&pts, 4).unwrap();
        let (_, counts) = t.add_points_to_leaf(&pts).unwrap();
        for leaf in t.leaves() {
            assert!(counts[leaf as usize] <= 4);
        }
        // two rounds of splitting leave one point per leaf
        assert_eq!(t.leaves().count(), 64);
    }

    #[test]
    fn box_siblings_and_neighbors() {
        let mut t = unit_tree();
        t.refine_octant(0).unwrap();
        let b = t.bounding_box_of_octant(8).unwrap();
        assert_eq!(b.min, [0.5; 3]);
        assert_eq!(b.max, [1.0; 3]);
        assert_eq!(t.siblings(3).unwrap(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(matches!(t.siblings(0), Err(PartitionError::NoSiblings(0))));
        // every other child of the root touches octant 1 at least in a corner
        assert_eq!(t.neighbors(1, 1).unwrap(), vec![2, 3, 4, 5, 6, 7, 8]);
        t.refine_octant(8).unwrap();
        // only the grandchild at the center corner touches octant 1
        let n = t.neighbors(1, 2).unwrap();
        assert!(n.contains(&9));
        assert!(!n.contains(&16));
    }

    #[test]
    fn fifth_chunk_is_rejected() {
        let mut t = unit_tree();
        for c in 0..4 {
            t.add_userdata(0, c).unwrap();
        }
        assert_eq!(
            t.add_userdata(0, 4),
            Err(PartitionError::OctantFull {
                oct_idx: 0,
                capacity: 4
            })
        );
        assert!(!t.has_free_slot(0).unwrap());
    }

    #[test]
    fn wire_round_trip_keeps_structure() {
        let mut t = unit_tree();
        t.refine_octant(0).unwrap();
        t.add_userdata(3, 7).unwrap();
        t.set_processor(3, 2).unwrap();
        let back = Octree::from_wire(t.bbox(), OCTANT_SLOTS, &t.to_wire()).unwrap();
        assert_eq!(back.octant(3).unwrap(), t.octant(3).unwrap());
        assert_eq!(back.leaves().collect::<Vec<_>>(), (1..9).collect::<Vec<_>>());
    }
}
