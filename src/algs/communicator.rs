//! Thin façade over collective communication.
//!
//! All coordination between processes is synchronous and collective: every
//! participant must issue the same sequence of calls. Payloads are
//! contiguous byte slices; [`CollectiveExt`] layers typed `Pod` helpers on
//! top. Nothing here is cancelable: a participant that stops calling leaves
//! the group in an undefined state.
//!
//! Backends:
//! * [`NoComm`]: a group of one, for serial meshes;
//! * [`LocalComm`]: ranks simulated by threads of one process, exchanging
//!   through a shared mailbox separated by barriers;
//! * `MpiComm` (feature `mpi-support`): MPI collectives.

use std::sync::{Arc, Barrier};

use bytemuck::Pod;
use bytes::Bytes;
use dashmap::DashMap;

use crate::mesh_error::MeshStrataError;

/// Collective communication interface.
pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Block until every participant arrives.
    fn barrier(&self);

    /// Every rank contributes one buffer and receives all of them, by rank.
    fn allgatherv_bytes(&self, send: &[u8]) -> Result<Vec<Bytes>, MeshStrataError>;

    /// `send[d]` goes to rank `d`; the result holds one buffer per source rank.
    fn alltoallv_bytes(&self, send: Vec<Bytes>) -> Result<Vec<Bytes>, MeshStrataError>;

    /// Buffer of `root` delivered to every rank. Non-root ranks pass `None`.
    fn broadcast_bytes(&self, root: usize, send: Option<&[u8]>) -> Result<Bytes, MeshStrataError>;

    fn is_serial(&self) -> bool {
        self.size() == 1
    }
}

fn decode<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, MeshStrataError> {
    let size = std::mem::size_of::<T>();
    if size == 0 || bytes.len() % size != 0 {
        return Err(MeshStrataError::Collective(format!(
            "received {} bytes, not a multiple of the {size}-byte record",
            bytes.len()
        )));
    }
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

/// Typed collectives over `Pod` records.
pub trait CollectiveExt: Communicator {
    fn allgather<T: Pod>(&self, value: T) -> Result<Vec<T>, MeshStrataError> {
        let parts = self.allgatherv_bytes(bytemuck::bytes_of(&value))?;
        let mut out = Vec::with_capacity(parts.len());
        for part in &parts {
            let mut v = decode::<T>(part)?;
            match v.pop() {
                Some(x) if v.is_empty() => out.push(x),
                _ => {
                    return Err(MeshStrataError::Collective(
                        "allgather expected exactly one record per rank".into(),
                    ));
                }
            }
        }
        Ok(out)
    }

    fn allgatherv<T: Pod>(&self, values: &[T]) -> Result<Vec<Vec<T>>, MeshStrataError> {
        self.allgatherv_bytes(bytemuck::cast_slice(values))?
            .iter()
            .map(|b| decode(b))
            .collect()
    }

    /// One value per destination rank.
    fn alltoall<T: Pod>(&self, values: &[T]) -> Result<Vec<T>, MeshStrataError> {
        if values.len() != self.size() {
            return Err(MeshStrataError::InvalidArgument(format!(
                "alltoall needs {} values, got {}",
                self.size(),
                values.len()
            )));
        }
        let send = values
            .iter()
            .map(|v| Bytes::copy_from_slice(bytemuck::bytes_of(v)))
            .collect();
        let mut out = Vec::with_capacity(values.len());
        for part in self.alltoallv_bytes(send)? {
            out.extend(decode::<T>(&part)?);
        }
        if out.len() != self.size() {
            return Err(MeshStrataError::Collective("alltoall lost records".into()));
        }
        Ok(out)
    }

    fn alltoallv<T: Pod>(&self, values: &[Vec<T>]) -> Result<Vec<Vec<T>>, MeshStrataError> {
        if values.len() != self.size() {
            return Err(MeshStrataError::InvalidArgument(format!(
                "alltoallv needs {} buffers, got {}",
                self.size(),
                values.len()
            )));
        }
        let send = values
            .iter()
            .map(|v| Bytes::copy_from_slice(bytemuck::cast_slice(v)))
            .collect();
        self.alltoallv_bytes(send)?.iter().map(|b| decode(b)).collect()
    }

    fn broadcast<T: Pod>(&self, root: usize, values: &[T]) -> Result<Vec<T>, MeshStrataError> {
        let send = (self.rank() == root).then(|| bytemuck::cast_slice(values));
        decode(&self.broadcast_bytes(root, send)?)
    }

    fn allreduce_sum(&self, value: u64) -> Result<u64, MeshStrataError> {
        Ok(self.allgather(value)?.iter().sum())
    }

    /// `(sum over lower ranks, sum over all ranks)`.
    fn exclusive_prefix(&self, value: u64) -> Result<(u64, u64), MeshStrataError> {
        let all = self.allgather(value)?;
        let offset = all[..self.rank()].iter().sum();
        Ok((offset, all.iter().sum()))
    }
}

impl<C: Communicator + ?Sized> CollectiveExt for C {}

/// Compile-time no-op comm for serial meshes and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) {}

    fn allgatherv_bytes(&self, send: &[u8]) -> Result<Vec<Bytes>, MeshStrataError> {
        Ok(vec![Bytes::copy_from_slice(send)])
    }

    fn alltoallv_bytes(&self, send: Vec<Bytes>) -> Result<Vec<Bytes>, MeshStrataError> {
        Ok(send)
    }

    fn broadcast_bytes(&self, _root: usize, send: Option<&[u8]>) -> Result<Bytes, MeshStrataError> {
        Ok(Bytes::copy_from_slice(send.unwrap_or_default()))
    }
}

// --- LocalComm: ranks simulated by threads ---
type Key = (usize, usize); // (src, dst)

#[derive(Debug)]
struct GroupState {
    size: usize,
    barrier: Barrier,
    mailbox: DashMap<Key, Bytes>,
}

/// One rank of a thread-simulated process group.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    group: Arc<GroupState>,
}

impl LocalComm {
    /// Handles for every rank of a new group of `size`.
    pub fn group(size: usize) -> Vec<LocalComm> {
        let group = Arc::new(GroupState {
            size,
            barrier: Barrier::new(size),
            mailbox: DashMap::new(),
        });
        (0..size)
            .map(|rank| LocalComm {
                rank,
                group: group.clone(),
            })
            .collect()
    }

    /// Run `f` on `size` threads, one per rank, and collect the results by rank.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(LocalComm) -> R + Sync,
    {
        let comms = Self::group(size);
        std::thread::scope(|s| {
            let f = &f;
            let handles: Vec<_> = comms.into_iter().map(|c| s.spawn(move || f(c))).collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    }

    /// Post outgoing buffers, wait for everyone, collect incoming by source.
    fn exchange(&self, outgoing: impl IntoIterator<Item = (usize, Bytes)>) -> Vec<Option<Bytes>> {
        for (dst, buf) in outgoing {
            self.group.mailbox.insert((self.rank, dst), buf);
        }
        self.group.barrier.wait();
        let incoming = (0..self.group.size)
            .map(|src| self.group.mailbox.remove(&(src, self.rank)).map(|(_, b)| b))
            .collect();
        // keep the next collective from overwriting unread slots
        self.group.barrier.wait();
        incoming
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.group.size
    }

    fn barrier(&self) {
        self.group.barrier.wait();
    }

    fn allgatherv_bytes(&self, send: &[u8]) -> Result<Vec<Bytes>, MeshStrataError> {
        let buf = Bytes::copy_from_slice(send);
        let incoming = self.exchange((0..self.group.size).map(|dst| (dst, buf.clone())));
        incoming
            .into_iter()
            .enumerate()
            .map(|(src, b)| {
                b.ok_or_else(|| MeshStrataError::Collective(format!("no allgather data from {src}")))
            })
            .collect()
    }

    fn alltoallv_bytes(&self, send: Vec<Bytes>) -> Result<Vec<Bytes>, MeshStrataError> {
        if send.len() != self.group.size {
            return Err(MeshStrataError::InvalidArgument(format!(
                "alltoallv needs {} buffers, got {}",
                self.group.size,
                send.len()
            )));
        }
        let incoming = self.exchange(send.into_iter().enumerate());
        incoming
            .into_iter()
            .enumerate()
            .map(|(src, b)| {
                b.ok_or_else(|| MeshStrataError::Collective(format!("no alltoall data from {src}")))
            })
            .collect()
    }

    fn broadcast_bytes(&self, root: usize, send: Option<&[u8]>) -> Result<Bytes, MeshStrataError> {
        let outgoing: Vec<(usize, Bytes)> = match send {
            Some(buf) if self.rank == root => {
                let buf = Bytes::copy_from_slice(buf);
                (0..self.group.size).map(|dst| (dst, buf.clone())).collect()
            }
            _ => Vec::new(),
        };
        self.exchange(outgoing)
            .into_iter()
            .nth(root)
            .flatten()
            .ok_or_else(|| MeshStrataError::Collective(format!("root {root} sent nothing")))
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::Count;
    use mpi::datatype::{Partition, PartitionMut};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    pub struct MpiComm {
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        pub fn new(world: SimpleCommunicator) -> Self {
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self { world, rank, size }
        }
    }

    fn displacements(counts: &[Count]) -> Vec<Count> {
        counts
            .iter()
            .scan(0, |acc, &c| {
                let d = *acc;
                *acc += c;
                Some(d)
            })
            .collect()
    }

    fn split(buf: Vec<u8>, counts: &[Count]) -> Vec<Bytes> {
        let mut all = Bytes::from(buf);
        counts
            .iter()
            .map(|&c| all.split_to(c as usize))
            .collect()
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) {
            self.world.barrier();
        }

        fn allgatherv_bytes(&self, send: &[u8]) -> Result<Vec<Bytes>, MeshStrataError> {
            let n = send.len() as Count;
            let mut counts: Vec<Count> = vec![0; self.size];
            self.world.all_gather_into(&n, &mut counts[..]);
            let displs = displacements(&counts);
            let total: usize = counts.iter().map(|&c| c as usize).sum();
            let mut buf = vec![0u8; total];
            {
                let mut part = PartitionMut::new(&mut buf[..], &counts[..], &displs[..]);
                self.world.all_gather_varcount_into(send, &mut part);
            }
            Ok(split(buf, &counts))
        }

        fn alltoallv_bytes(&self, send: Vec<Bytes>) -> Result<Vec<Bytes>, MeshStrataError> {
            let scounts: Vec<Count> = send.iter().map(|b| b.len() as Count).collect();
            let mut rcounts: Vec<Count> = vec![0; self.size];
            self.world.all_to_all_into(&scounts[..], &mut rcounts[..]);
            let sdispls = displacements(&scounts);
            let rdispls = displacements(&rcounts);
            let sendbuf: Vec<u8> = send.iter().flat_map(|b| b.iter().copied()).collect();
            let total: usize = rcounts.iter().map(|&c| c as usize).sum();
            let mut recvbuf = vec![0u8; total];
            {
                let spart = Partition::new(&sendbuf[..], &scounts[..], &sdispls[..]);
                let mut rpart = PartitionMut::new(&mut recvbuf[..], &rcounts[..], &rdispls[..]);
                self.world.all_to_all_varcount_into(&spart, &mut rpart);
            }
            Ok(split(recvbuf, &rcounts))
        }

        fn broadcast_bytes(&self, root: usize, send: Option<&[u8]>) -> Result<Bytes, MeshStrataError> {
            let root_proc = self.world.process_at_rank(root as i32);
            let mut len: u64 = send.map_or(0, |s| s.len() as u64);
            root_proc.broadcast_into(&mut len);
            let mut buf = match send {
                Some(s) if self.rank == root => s.to_vec(),
                _ => vec![0u8; len as usize],
            };
            root_proc.broadcast_into(&mut buf[..]);
            Ok(Bytes::from(buf))
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_comm_is_identity() {
        let c = NoComm;
        assert_eq!(c.allgather(7u64).unwrap(), vec![7]);
        assert_eq!(c.exclusive_prefix(5).unwrap(), (0, 5));
        assert_eq!(c.broadcast(0, &[1i32, 2]).unwrap(), vec![1, 2]);
    }

    #[test]
    fn local_group_allgatherv_and_prefix() {
        let results = LocalComm::run(4, |comm| {
            let mine: Vec<i64> = (0..comm.rank() as i64).collect();
            let all = comm.allgatherv(&mine).unwrap();
            let prefix = comm.exclusive_prefix(comm.rank() as u64 + 1).unwrap();
            (all, prefix)
        });
        for (rank, (all, prefix)) in results.iter().enumerate() {
            assert_eq!(all.len(), 4);
            assert_eq!(all[3], vec![0, 1, 2]);
            let expected: u64 = (1..=rank as u64).sum();
            assert_eq!(*prefix, (expected, 10));
        }
    }

    #[test]
    fn local_group_alltoallv_routes_by_destination() {
        let results = LocalComm::run(3, |comm| {
            let send: Vec<Vec<u32>> = (0..3)
                .map(|dst| vec![(comm.rank() * 10 + dst) as u32; dst + 1])
                .collect();
            let counts = comm.alltoall(&[1u32, 2, 3]).unwrap();
            (comm.alltoallv(&send).unwrap(), counts)
        });
        for (rank, (recv, counts)) in results.iter().enumerate() {
            for (src, buf) in recv.iter().enumerate() {
                assert_eq!(buf, &vec![(src * 10 + rank) as u32; rank + 1]);
            }
            assert_eq!(counts, &vec![rank as u32 + 1; 3]);
        }
    }

    #[test]
    fn local_group_broadcast() {
        let results = LocalComm::run(3, |comm| {
            let data = if comm.rank() == 1 { vec![4u16, 5, 6] } else { Vec::new() };
            comm.broadcast(1, &data).unwrap()
        });
        assert!(results.iter().all(|r| r == &vec![4, 5, 6]));
    }
}
