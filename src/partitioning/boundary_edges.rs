//! Global numbering of the vertices created on split edges.
//!
//! Two processes refining elements that share an edge each create a
//! midpoint for it. Every split edge is published by its global endpoints;
//! the lowest rank publishing an edge owns the midpoint and numbers it, and
//! every other publisher adopts the same id. All processes see the same
//! list, so the ids are derived locally without a reply round.

use hashbrown::HashMap;
use itertools::Itertools;

use crate::algs::communicator::{CollectiveExt, Communicator};
use crate::algs::wire::WireEdge;
use crate::mesh_error::MeshStrataError;
use crate::store::Mesh;

/// Global id of every published edge, keyed by sorted endpoints.
pub(crate) fn number_published_edges(
    published: &[Vec<WireEdge>],
    base: u64,
) -> HashMap<(i64, i64), i64> {
    let mut all: Vec<WireEdge> = published.iter().flatten().copied().collect();
    all.sort_unstable_by_key(|e| e.key());
    let winners: Vec<WireEdge> = all
        .into_iter()
        .dedup_by(|a, b| (a.v1(), a.v2()) == (b.v1(), b.v2()))
        .collect();
    // winners are sorted by endpoints; number them rank by rank
    let mut per_rank: Vec<Vec<(i64, i64)>> = vec![Vec::new(); published.len()];
    for w in &winners {
        if let Some(list) = per_rank.get_mut(w.proc()) {
            list.push((w.v1(), w.v2()));
        }
    }
    let mut ids = HashMap::with_capacity(winners.len());
    let mut next = base as i64;
    for list in per_rank {
        for key in list {
            ids.insert(key, next);
            next += 1;
        }
    }
    ids
}

impl<C: Communicator> Mesh<C> {
    /// Number the midpoints of this refinement consistently across
    /// processes. Collective.
    pub(crate) fn number_split_vertices(&mut self) -> Result<(), MeshStrataError> {
        let rank = self.comm.rank();
        let mut mine: Vec<WireEdge> = self
            .refine
            .split_edges
            .iter()
            .map(|s| {
                WireEdge::new(
                    self.vertices[s.a.index()].glb_idx,
                    self.vertices[s.b.index()].glb_idx,
                    s.mid.index() as i64,
                    rank,
                )
            })
            .collect();
        mine.sort_unstable_by_key(|e| e.key());
        mine.dedup_by_key(|e| (e.v1(), e.v2()));

        let published = self.comm.allgatherv(&mine)?;
        let base = self.levels[self.store_level()].num_glb_vertices;
        let ids = number_published_edges(&published, base);
        for e in &mine {
            let glb = ids.get(&(e.v1(), e.v2())).copied().ok_or_else(|| {
                MeshStrataError::Collective(format!(
                    "split edge ({}, {}) lost in exchange",
                    e.v1(),
                    e.v2()
                ))
            })?;
            self.vertices[e.new_vtx() as usize].glb_idx = glb;
        }
        log::debug!(
            "rank {rank}: {} split edges numbered from {base}, {} new global vertices",
            mine.len(),
            ids.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_edge_gets_one_id() {
        let published = vec![
            vec![WireEdge::new(0, 1, 10, 0), WireEdge::new(1, 2, 11, 0)],
            vec![WireEdge::new(2, 1, 4, 1), WireEdge::new(2, 3, 5, 1)],
        ];
        let ids = number_published_edges(&published, 100);
        assert_eq!(ids.len(), 3);
        // rank 0 owns (0, 1) and (1, 2), rank 1 only (2, 3)
        assert_eq!(ids[&(0, 1)], 100);
        assert_eq!(ids[&(1, 2)], 101);
        assert_eq!(ids[&(2, 3)], 102);
    }

    #[test]
    fn ids_are_contiguous_per_rank() {
        let published = vec![
            vec![WireEdge::new(5, 6, 0, 0)],
            vec![WireEdge::new(0, 1, 0, 1), WireEdge::new(5, 6, 1, 1)],
        ];
        let ids = number_published_edges(&published, 0);
        assert_eq!(ids[&(5, 6)], 0);
        assert_eq!(ids[&(0, 1)], 1);
    }
}
