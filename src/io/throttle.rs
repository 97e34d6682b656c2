//! Bounded concurrency for collective writes and reads.
//!
//! With a factor `k`, ranks `0..k` touch the store first, then ranks
//! `k..2k` and so on; a barrier separates the waves. Every rank passes every
//! barrier, whether its own work failed or not.

use crate::algs::communicator::Communicator;
use crate::mesh_error::MeshStrataError;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Throttle {
    factor: usize,
}

impl Throttle {
    /// `0` lets every rank go at once.
    pub fn new(factor: usize) -> Self {
        Self { factor }
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Number of waves on a group of `size` ranks.
    pub fn waves(&self, size: usize) -> usize {
        if self.factor == 0 || size <= self.factor {
            1
        } else {
            size.div_ceil(self.factor)
        }
    }

    /// Run `f` in this rank's wave. Collective.
    pub fn run<C, R, F>(&self, comm: &C, f: F) -> Result<R, MeshStrataError>
    where
        C: Communicator + ?Sized,
        F: FnOnce() -> Result<R, MeshStrataError>,
    {
        let waves = self.waves(comm.size());
        if waves == 1 {
            return f();
        }
        let mine = comm.rank() / self.factor;
        let mut f = Some(f);
        let mut out = None;
        for wave in 0..waves {
            if wave == mine {
                out = f.take().map(|f| f());
            }
            comm.barrier();
        }
        out.unwrap_or_else(|| {
            Err(MeshStrataError::InvalidState(format!(
                "rank {} has no throttle wave",
                comm.rank()
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::LocalComm;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn waves_cover_every_rank() {
        assert_eq!(Throttle::new(0).waves(8), 1);
        assert_eq!(Throttle::new(3).waves(8), 3);
        assert_eq!(Throttle::new(8).waves(4), 1);
    }

    #[test]
    fn ranks_run_wave_by_wave() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = log.clone();
        LocalComm::run(4, move |comm| {
            Throttle::new(2)
                .run(&comm, || {
                    shared.lock().push(comm.rank() / 2);
                    Ok(())
                })
                .unwrap();
        });
        let order = log.lock().clone();
        assert_eq!(order.len(), 4);
        assert!(order.windows(2).all(|w| w[0] <= w[1]));
    }
}
