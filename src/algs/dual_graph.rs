//! CSR (compressed-sparse-row) *dual graph* used by the partitioners.
//
// Graph vertices are either leaf octants (chunk distribution) or elements
// (facet adjacency). Returned as METIS-ready triples:
//
// * `xadj[i] .. xadj[i+1]`   = neighbour list of vertex *i*
// * `adjncy`                 = concatenated neighbour vertices
// * `vwgt[i]`                = vertex weight, at least 1
//
// The graph is symmetrised (i↔j appear in both lists) and self-free.

use itertools::Itertools;

/// CSR triple
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DualGraph {
    pub xadj: Vec<usize>,
    pub adjncy: Vec<usize>,
    pub vwgt: Vec<i32>,
}

impl DualGraph {
    /// Build from per-vertex neighbour lists; missing reverse edges are added,
    /// loops and duplicates dropped.
    pub fn from_lists(lists: &[Vec<usize>], weights: &[i64]) -> Self {
        let n = lists.len();
        let mut sym: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (u, nbrs) in lists.iter().enumerate() {
            for &v in nbrs {
                if v != u && v < n {
                    sym[u].push(v);
                    sym[v].push(u);
                }
            }
        }
        let mut xadj = Vec::with_capacity(n + 1);
        let mut adjncy = Vec::new();
        xadj.push(0);
        for list in &mut sym {
            list.sort_unstable();
            adjncy.extend(list.iter().copied().dedup());
            xadj.push(adjncy.len());
        }
        let vwgt = (0..n)
            .map(|i| weights.get(i).copied().unwrap_or(1).clamp(1, i32::MAX as i64) as i32)
            .collect();
        Self { xadj, adjncy, vwgt }
    }

    pub fn num_vertices(&self) -> usize {
        self.xadj.len().saturating_sub(1)
    }

    pub fn neighbors(&self, v: usize) -> &[usize] {
        &self.adjncy[self.xadj[v]..self.xadj[v + 1]]
    }

    pub fn total_weight(&self) -> i64 {
        self.vwgt.iter().map(|&w| w as i64).sum()
    }
}

/// Initial vertex distribution: `n / nprocs` vertices each, the remainder
/// one per leading process. Returns `nprocs + 1` offsets.
pub fn vtxdist(n: usize, nprocs: usize) -> Vec<usize> {
    let nprocs = nprocs.max(1);
    let (base, rem) = (n / nprocs, n % nprocs);
    let mut dist = Vec::with_capacity(nprocs + 1);
    let mut acc = 0;
    dist.push(0);
    for p in 0..nprocs {
        acc += base + usize::from(p < rem);
        dist.push(acc);
    }
    dist
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_are_symmetrised() {
        let g = DualGraph::from_lists(&[vec![1, 1, 0], vec![], vec![1]], &[3, 0]);
        assert_eq!(g.num_vertices(), 3);
        assert_eq!(g.neighbors(0), &[1]);
        assert_eq!(g.neighbors(1), &[0, 2]);
        assert_eq!(g.neighbors(2), &[1]);
        assert_eq!(g.vwgt, vec![3, 1, 1]);
    }

    #[test]
    fn vtxdist_spreads_remainder() {
        assert_eq!(vtxdist(10, 4), vec![0, 3, 6, 8, 10]);
        assert_eq!(vtxdist(2, 4), vec![0, 1, 2, 2, 2]);
        assert_eq!(*vtxdist(0, 3).last().unwrap(), 0);
    }
}
