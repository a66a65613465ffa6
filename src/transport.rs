//! The injected collective-communication substrate.
//!
//! The message-passing layer is an external collaborator: blocking
//! point-to-point send/recv; blocking all-reduce and reduce, broadcast,
//! barrier, with a root rank selectable per call. This module defines that
//! contract as a trait, [`Transport`], so the core never depends on a
//! concrete wire protocol. Two implementations ship:
//!
//! - [`SingleRankTransport`]: the degenerate one-process cluster. Every
//!   collective is an identity/no-op. Used whenever `ClusterConfig` asks
//!   for a single rank (the common case for a desktop run).
//! - [`ThreadTransport`]: each rank is an OS thread in the *same* process,
//!   synchronized with `std::sync::Barrier` and a shared mailbox. This is
//!   the crate's test harness for the inter-process swap protocol and the
//!   reduction paths — it is not meant to scale across machines, only to
//!   exercise the real algorithm without a real MPI dependency.

use std::collections::HashMap;
use std::sync::{Arc, Barrier, Mutex};

use crate::error::{Error, Result};
use crate::types::{C, R};

/// The collective-communication contract the driver consumes. Every call
/// is blocking — a potential suspension point, with no fine-grained async.
pub trait Transport: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Pairwise exchange with `partner_rank`: send `send` to the partner,
    /// and receive the partner's corresponding buffer into `recv`. Every
    /// rank in the communicator must call this
    /// for the same logical step with its own correctly-paired partner —
    /// this is a cluster-wide collective operation built out of
    /// pairwise-matched sends, not a private conversation between two
    /// ranks.
    fn exchange(&self, partner_rank: usize, send: &[C], recv: &mut [C]) -> Result<()>;

    fn all_reduce_sum_real(&self, value: R) -> Result<R>;
    fn all_reduce_sum_complex(&self, value: C) -> Result<C>;

    /// Reduce to `root`; only the root gets `Some(sum)`, everyone else `None`.
    fn reduce_sum_real(&self, value: R, root: usize) -> Result<Option<R>>;

    fn broadcast_real(&self, value: R, root: usize) -> Result<R>;

    /// Gather one vector per rank to `root`, concatenated in rank order.
    fn gather_complex(&self, local: &[C], root: usize) -> Result<Option<Vec<C>>>;
    fn gather_usize(&self, local: usize, root: usize) -> Result<Option<Vec<usize>>>;

    fn barrier(&self) -> Result<()>;
}

/// The one-process cluster: rank 0 of 1.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleRankTransport;

impl Transport for SingleRankTransport {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn exchange(&self, partner_rank: usize, _send: &[C], _recv: &mut [C]) -> Result<()> {
        Err(Error::TransportFailure(format!(
            "single-rank transport has no partner (asked for rank {partner_rank})"
        )))
    }

    fn all_reduce_sum_real(&self, value: R) -> Result<R> {
        Ok(value)
    }

    fn all_reduce_sum_complex(&self, value: C) -> Result<C> {
        Ok(value)
    }

    fn reduce_sum_real(&self, value: R, _root: usize) -> Result<Option<R>> {
        Ok(Some(value))
    }

    fn broadcast_real(&self, value: R, _root: usize) -> Result<R> {
        Ok(value)
    }

    fn gather_complex(&self, local: &[C], _root: usize) -> Result<Option<Vec<C>>> {
        Ok(Some(local.to_vec()))
    }

    fn gather_usize(&self, local: usize, _root: usize) -> Result<Option<Vec<usize>>> {
        Ok(Some(vec![local]))
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

struct SharedScratch {
    barrier: Barrier,
    mailbox: Mutex<HashMap<(usize, usize), Vec<C>>>,
    reals: Mutex<Vec<R>>,
    complexes: Mutex<Vec<C>>,
    gathered_complex: Mutex<Vec<Option<Vec<C>>>>,
    gathered_usize: Mutex<Vec<Option<usize>>>,
}

/// Each rank is an OS thread in this process; ranks rendezvous through a
/// shared [`Barrier`] and a mailbox keyed by `(from, to)`.
pub struct ThreadTransport {
    rank: usize,
    size: usize,
    shared: Arc<SharedScratch>,
}

impl ThreadTransport {
    /// Build `num_ranks` transports that all refer to the same
    /// synchronization state. Hand one to each worker thread.
    pub fn cluster(num_ranks: usize) -> Vec<Self> {
        let shared = Arc::new(SharedScratch {
            barrier: Barrier::new(num_ranks),
            mailbox: Mutex::new(HashMap::new()),
            reals: Mutex::new(vec![0.0; num_ranks]),
            complexes: Mutex::new(vec![C::new(0.0, 0.0); num_ranks]),
            gathered_complex: Mutex::new(vec![None; num_ranks]),
            gathered_usize: Mutex::new(vec![None; num_ranks]),
        });
        (0..num_ranks)
            .map(|rank| Self { rank, size: num_ranks, shared: shared.clone() })
            .collect()
    }
}

impl Transport for ThreadTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn exchange(&self, partner_rank: usize, send: &[C], recv: &mut [C]) -> Result<()> {
        {
            let mut mailbox = self.shared.mailbox.lock().unwrap();
            mailbox.insert((self.rank, partner_rank), send.to_vec());
        }
        self.shared.barrier.wait();
        {
            let mut mailbox = self.shared.mailbox.lock().unwrap();
            let incoming = mailbox.remove(&(partner_rank, self.rank)).ok_or_else(|| {
                Error::TransportFailure(format!(
                    "rank {} found no message from partner {}",
                    self.rank, partner_rank
                ))
            })?;
            if incoming.len() != recv.len() {
                return Err(Error::TransportFailure(format!(
                    "rank {} partner {} sent {} amplitudes, expected {}",
                    self.rank,
                    partner_rank,
                    incoming.len(),
                    recv.len()
                )));
            }
            recv.copy_from_slice(&incoming);
        }
        self.shared.barrier.wait();
        Ok(())
    }

    fn all_reduce_sum_real(&self, value: R) -> Result<R> {
        {
            let mut reals = self.shared.reals.lock().unwrap();
            reals[self.rank] = value;
        }
        self.shared.barrier.wait();
        let sum = self.shared.reals.lock().unwrap().iter().sum();
        self.shared.barrier.wait();
        Ok(sum)
    }

    fn all_reduce_sum_complex(&self, value: C) -> Result<C> {
        {
            let mut complexes = self.shared.complexes.lock().unwrap();
            complexes[self.rank] = value;
        }
        self.shared.barrier.wait();
        let sum = self.shared.complexes.lock().unwrap().iter().fold(C::new(0.0, 0.0), |a, b| a + b);
        self.shared.barrier.wait();
        Ok(sum)
    }

    fn reduce_sum_real(&self, value: R, root: usize) -> Result<Option<R>> {
        let sum = self.all_reduce_sum_real(value)?;
        Ok(if self.rank == root { Some(sum) } else { None })
    }

    fn broadcast_real(&self, value: R, root: usize) -> Result<R> {
        if self.rank == root {
            let mut reals = self.shared.reals.lock().unwrap();
            reals[root] = value;
        }
        self.shared.barrier.wait();
        let v = self.shared.reals.lock().unwrap()[root];
        self.shared.barrier.wait();
        Ok(v)
    }

    fn gather_complex(&self, local: &[C], root: usize) -> Result<Option<Vec<C>>> {
        {
            let mut slots = self.shared.gathered_complex.lock().unwrap();
            slots[self.rank] = Some(local.to_vec());
        }
        self.shared.barrier.wait();
        let result = if self.rank == root {
            let slots = self.shared.gathered_complex.lock().unwrap();
            Some(slots.iter().flat_map(|s| s.clone().unwrap_or_default()).collect())
        } else {
            None
        };
        self.shared.barrier.wait();
        Ok(result)
    }

    fn gather_usize(&self, local: usize, root: usize) -> Result<Option<Vec<usize>>> {
        {
            let mut slots = self.shared.gathered_usize.lock().unwrap();
            slots[self.rank] = Some(local);
        }
        self.shared.barrier.wait();
        let result = if self.rank == root {
            let slots = self.shared.gathered_usize.lock().unwrap();
            Some(slots.iter().map(|s| s.unwrap()).collect())
        } else {
            None
        };
        self.shared.barrier.wait();
        Ok(result)
    }

    fn barrier(&self) -> Result<()> {
        self.shared.barrier.wait();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn single_rank_reduce_is_identity() {
        let t = SingleRankTransport;
        assert_eq!(t.all_reduce_sum_real(3.5).unwrap(), 3.5);
    }

    #[test]
    fn thread_transport_all_reduce_sums_every_rank() {
        let transports = ThreadTransport::cluster(4);
        let handles: Vec<_> = transports
            .into_iter()
            .map(|t| thread::spawn(move || t.all_reduce_sum_real((t.rank() + 1) as R).unwrap()))
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 10.0); // 1+2+3+4
        }
    }

    #[test]
    fn thread_transport_exchange_swaps_partner_data() {
        // 2 ranks, bit 0 differs: rank 0 <-> rank 1.
        let transports = ThreadTransport::cluster(2);
        let handles: Vec<_> = transports
            .into_iter()
            .map(|t| {
                thread::spawn(move || {
                    let send = vec![C::new(t.rank() as R, 0.0); 4];
                    let mut recv = vec![C::new(0.0, 0.0); 4];
                    t.exchange(1 - t.rank(), &send, &mut recv).unwrap();
                    recv
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results[0].iter().all(|c| c.re == 1.0));
        assert!(results[1].iter().all(|c| c.re == 0.0));
    }
}
