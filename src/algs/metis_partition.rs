//! k-way partitioning of a [`DualGraph`] through METIS.

use crate::algs::dual_graph::DualGraph;
use crate::partitioning::error::PartitionError;

/// A wrapper around a METIS partition.
pub struct MetisPartition {
    /// for each vertex i, part[i] ∈ [0..nparts)
    pub part: Vec<usize>,
}

impl DualGraph {
    /// Partition into `nparts` balanced parts with equal target weights and
    /// the given load imbalance tolerance.
    #[cfg(feature = "metis-support")]
    pub fn metis_partition(
        &self,
        nparts: usize,
        imbalance: f64,
    ) -> Result<MetisPartition, PartitionError> {
        use metis::{Graph, Idx, Real};

        if nparts == 0 {
            return Err(PartitionError::NoParts);
        }
        let n = self.num_vertices();
        if nparts == 1 || n <= 1 {
            return Ok(MetisPartition { part: vec![0; n] });
        }
        let xadj: Vec<Idx> = self.xadj.iter().map(|&u| u as Idx).collect();
        let adjncy: Vec<Idx> = self.adjncy.iter().map(|&v| v as Idx).collect();
        let vwgt: Vec<Idx> = self.vwgt.iter().map(|&w| w as Idx).collect();
        let tpwgts: Vec<Real> = vec![1.0 / nparts as Real; nparts];
        let ubvec: [Real; 1] = [imbalance as Real];
        let mut part: Vec<Idx> = vec![0; n];

        Graph::new(1, nparts as Idx, &xadj, &adjncy)
            .map_err(|e| PartitionError::Other(format!("METIS graph: {e}")))?
            .set_vwgt(&vwgt)
            .set_tpwgts(&tpwgts)
            .set_ubvec(&ubvec)
            .part_kway(&mut part)
            .map_err(|e| PartitionError::Other(format!("METIS k-way: {e}")))?;

        let part = part
            .into_iter()
            .enumerate()
            .map(|(i, p)| usize::try_from(p).map_err(|_| PartitionError::MissingPartition(i)))
            .collect::<Result<_, _>>()?;
        Ok(MetisPartition { part })
    }

    #[cfg(not(feature = "metis-support"))]
    pub fn metis_partition(
        &self,
        _nparts: usize,
        _imbalance: f64,
    ) -> Result<MetisPartition, PartitionError> {
        Err(PartitionError::ModeUnavailable("Metis"))
    }
}

#[cfg(all(test, feature = "metis-support"))]
mod tests {
    use super::*;

    #[test]
    fn path_graph_splits_in_two() {
        let lists: Vec<Vec<usize>> = (0..8).map(|i| if i < 7 { vec![i + 1] } else { vec![] }).collect();
        let g = DualGraph::from_lists(&lists, &[]);
        let p = g.metis_partition(2, 1.05).unwrap();
        assert_eq!(p.part.len(), 8);
        assert_eq!(p.part.iter().filter(|&&x| x == 0).count(), 4);
    }
}
