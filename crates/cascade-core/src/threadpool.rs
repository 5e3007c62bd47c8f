//! Thread pool: a small fixed pool that fans a `(domain_list, phase_fn)`
//! pair out across workers for each scheduler step.
//!
//! Built on `std::thread::scope`: the barrier-per-phase semantics (every
//! worker finishes the phase before the next one starts) falls out for
//! free from `scope`'s join-all-on-exit, and the first assertion failure
//! observed by any worker is captured into a single `Mutex`-guarded slot
//! and rethrown by the caller once the barrier is crossed.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::ClockDomain;
use crate::error::AssertionError;

/// Set for the duration of a phase running inside the pool, across every
/// worker thread (not just the caller): a component that re-enters the
/// scheduler from inside a worker's own update — not only the driver
/// thread — is therefore still observed as "already inside a phase", so
/// the inner run falls back to serial traversal rather than re-entering
/// the pool. A thread-local would miss this, since `thread::scope`
/// workers don't inherit the spawning thread's thread-local state.
static IN_PHASE: AtomicBool = AtomicBool::new(false);

/// Fixed-size pool sized `max(0, min(num_processors - 1, requested - 1))`
/// at construction.
pub struct ThreadPool {
    size: usize,
}

impl ThreadPool {
    /// `requested < 0` means "auto" (`cascade.NumThreads` default `-1`):
    /// use every processor but one.
    pub fn new(requested: i32) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let size = if requested < 0 {
            cpus.saturating_sub(1)
        } else {
            cpus.saturating_sub(1).min((requested as usize).saturating_sub(1))
        };
        Self { size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn currently_inside_a_phase() -> bool {
        IN_PHASE.load(Ordering::SeqCst)
    }

    /// Runs `phase` over every domain in `domains`. Partitions the
    /// same-tick bucket round-robin into `size + 1` chains and runs each
    /// chain to completion before returning, so the caller observes a
    /// single barrier per phase rather than one per domain.
    pub fn run_phase<'d>(
        &self,
        domains: Vec<&'d mut ClockDomain>,
        phase: impl Fn(&mut ClockDomain) -> Result<(), AssertionError> + Sync,
    ) -> Result<(), AssertionError> {
        if Self::currently_inside_a_phase() || self.size == 0 || domains.len() <= 1 {
            return Self::run_serial(domains, &phase);
        }

        IN_PHASE.store(true, Ordering::SeqCst);
        let error_slot: Mutex<Option<AssertionError>> = Mutex::new(None);
        let chains = partition_round_robin(domains, self.size + 1);
        std::thread::scope(|scope| {
            for chain in chains {
                let phase = &phase;
                let error_slot = &error_slot;
                scope.spawn(move || {
                    for domain in chain {
                        if let Err(e) = phase(domain) {
                            let mut slot = error_slot.lock().expect("error slot poisoned");
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                            break;
                        }
                    }
                });
            }
        });
        IN_PHASE.store(false, Ordering::SeqCst);

        match error_slot.into_inner().expect("error slot poisoned") {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn run_serial<'d>(
        domains: Vec<&'d mut ClockDomain>,
        phase: &(impl Fn(&mut ClockDomain) -> Result<(), AssertionError> + Sync),
    ) -> Result<(), AssertionError> {
        for domain in domains {
            phase(domain)?;
        }
        Ok(())
    }
}

/// Splits `domains` round-robin into `n` chains, preserving each chain's
/// relative order.
fn partition_round_robin<'d>(
    domains: Vec<&'d mut ClockDomain>,
    n: usize,
) -> Vec<Vec<&'d mut ClockDomain>> {
    let mut chains: Vec<Vec<&mut ClockDomain>> = (0..n).map(|_| Vec::new()).collect();
    for (i, domain) in domains.into_iter().enumerate() {
        chains[i % n].push(domain);
    }
    chains
}
