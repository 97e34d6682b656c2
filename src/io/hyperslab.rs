//! Hyperslab selections over one-dimensional datasets.
//!
//! A selection is either the whole dataset or a list of disjoint, ordered
//! runs. Runs are built by coalescing sorted global indices, so consecutive
//! ids become one run; the first run replaces any previous selection and the
//! following ones are OR-ed into it.

use serde::{Deserialize, Serialize};

use crate::mesh_error::MeshStrataError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub start: u64,
    pub count: u64,
}

impl Run {
    pub fn end(&self) -> u64 {
        self.start + self.count
    }
}

/// How a run combines with the selection built so far.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SelectOp {
    Set,
    Or,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    All,
    Runs(Vec<Run>),
}

impl Selection {
    /// Coalesce sorted indices into the minimal set of runs. Repeated
    /// indices are selected once.
    pub fn from_sorted_indices(indices: &[u64]) -> Result<Self, MeshStrataError> {
        let mut runs: Vec<Run> = Vec::new();
        for &i in indices {
            match runs.last_mut() {
                Some(r) if i < r.end() - 1 => {
                    return Err(MeshStrataError::InvalidArgument(format!(
                        "selection indices are not sorted at {i}"
                    )));
                }
                Some(r) if i == r.end() - 1 => {}
                Some(r) if i == r.end() => r.count += 1,
                _ => runs.push(Run { start: i, count: 1 }),
            }
        }
        Ok(Selection::Runs(runs))
    }

    pub fn range(start: u64, count: u64) -> Self {
        match count {
            0 => Selection::Runs(Vec::new()),
            _ => Selection::Runs(vec![Run { start, count }]),
        }
    }

    /// Runs of the selection on a dataset of `len` rows.
    pub fn runs(&self, len: u64) -> Vec<Run> {
        match self {
            Selection::All if len == 0 => Vec::new(),
            Selection::All => vec![Run { start: 0, count: len }],
            Selection::Runs(runs) => runs.clone(),
        }
    }

    /// Number of selected rows on a dataset of `len` rows.
    pub fn count(&self, len: u64) -> u64 {
        self.runs(len).iter().map(|r| r.count).sum()
    }

    /// Selection operations in order: the first run sets, the rest extend.
    pub fn ops(&self, len: u64) -> impl Iterator<Item = (SelectOp, Run)> {
        self.runs(len).into_iter().enumerate().map(|(i, r)| {
            let op = if i == 0 { SelectOp::Set } else { SelectOp::Or };
            (op, r)
        })
    }

    /// Fails if a run reaches past `len`.
    pub fn check_bounds(&self, len: u64) -> Result<(), MeshStrataError> {
        match self.runs(len).last() {
            Some(r) if r.end() > len => Err(MeshStrataError::Persistence(format!(
                "selection ends at row {} of a {len}-row dataset",
                r.end()
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn consecutive_ids_coalesce() {
        let sel = Selection::from_sorted_indices(&[2, 3, 4, 4, 7, 9, 10]).unwrap();
        assert_eq!(
            sel.runs(0),
            vec![
                Run { start: 2, count: 3 },
                Run { start: 7, count: 1 },
                Run { start: 9, count: 2 }
            ]
        );
        let ops: Vec<SelectOp> = sel.ops(0).map(|(op, _)| op).collect();
        assert_eq!(ops, vec![SelectOp::Set, SelectOp::Or, SelectOp::Or]);
        assert!(Selection::from_sorted_indices(&[3, 1]).is_err());
    }

    #[test]
    fn all_covers_the_dataset() {
        assert_eq!(Selection::All.count(5), 5);
        assert!(Selection::All.runs(0).is_empty());
        assert!(Selection::range(3, 4).check_bounds(6).is_err());
    }

    proptest! {
        #[test]
        fn coalescing_is_minimal_and_exact(mut ids in proptest::collection::vec(0u64..200, 0..64)) {
            ids.sort_unstable();
            let runs = Selection::from_sorted_indices(&ids).unwrap().runs(0);
            // runs never touch, so none could be merged
            for w in runs.windows(2) {
                prop_assert!(w[0].end() < w[1].start);
            }
            let covered: Vec<u64> = runs.iter().flat_map(|r| r.start..r.end()).collect();
            ids.dedup();
            prop_assert_eq!(covered, ids);
        }
    }
}
