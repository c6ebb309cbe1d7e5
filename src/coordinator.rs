//! Shared budget coordinator: fair-share claims over a shrinking pool.
//!
//! # Problem Solved
//!
//! N workers start at the same time and each wants "its share" of whatever
//! physical memory is available right now. Dividing one up-front total by N
//! would promise later workers memory that earlier workers have already
//! taken. Instead, every claim re-reads the live available-page count and
//! divides by the number of cores that have not yet claimed, inside one
//! critical section, so no two workers can compute overlapping shares from
//! the same snapshot.
//!
//! # Contract
//!
//! [`BudgetCoordinator::acquire_share`] is the single scoped critical-section
//! operation:
//!
//! 1. read the live available-page count and `remaining_cores`;
//! 2. compute `pages = available / remaining_cores`;
//! 3. commit the claim (decrement `remaining_cores`, increment the active
//!    counter) under the same lock hold as the snapshot;
//! 4. return, releasing the lock *before* the caller performs its slow
//!    allocation and pin attempts.
//!
//! The decision region is locked; the allocation region is not. A worker that
//! fails to obtain its computed share degrades locally (shrink / unpinned)
//! and never returns the claimed slot. That is a deliberate best-effort
//! policy: later workers still adapt because they recompute from the live
//! page count, not from anyone's granted figure.
//!
//! # Counters
//!
//! - `remaining_cores`: cores that have not yet claimed. Mutex-guarded;
//!   mutated only inside the snapshot critical section.
//! - `active_workers`: workers that have claimed and not yet finished
//!   (successfully or not). A cache-padded atomic, because the progress
//!   reporter polls it from its own thread; `Relaxed` ordering suffices as
//!   the counter is pure accounting and transfers no data ownership.
//!
//! Invariants: `remaining_cores` never goes below zero (a claim at zero is a
//! programming error and panics); `active_workers` is non-negative and
//! reaches zero exactly when every claiming worker has called
//! [`BudgetCoordinator::worker_finished`].

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_utils::CachePadded;

use crate::probe::SystemProbe;

/// One worker's granted slice of the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Share {
    /// Whole pages granted.
    pub pages: u64,
    /// The same grant in bytes (`pages * page_size`).
    pub bytes: usize,
}

impl Share {
    #[inline]
    pub fn mib(&self) -> u64 {
        (self.bytes as u64) >> 20
    }
}

/// Coordinates fair-share memory claims across concurrently-starting workers.
pub struct BudgetCoordinator {
    probe: Arc<dyn SystemProbe>,
    remaining: Mutex<usize>,
    active: CachePadded<AtomicUsize>,
}

impl BudgetCoordinator {
    /// `cores` is the number of workers that will each claim exactly once.
    pub fn new(probe: Arc<dyn SystemProbe>, cores: usize) -> Self {
        assert!(cores > 0, "coordinator needs at least one core");
        Self {
            probe,
            remaining: Mutex::new(cores),
            active: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Claim this worker's share of the currently-available pool.
    ///
    /// On success the claim is committed: one core slot is consumed and the
    /// worker counts as active until it calls [`worker_finished`].
    ///
    /// On an inventory-query failure the slot is still consumed (the worker
    /// is a non-starter, not a no-show; consuming keeps sibling shares and
    /// the outstanding-work accounting honest) but the active counter is
    /// untouched, so the caller must NOT call [`worker_finished`].
    ///
    /// # Panics
    ///
    /// Panics if called more times than the coordinator has cores. Each
    /// worker claims exactly once; a second claim is a programming error.
    ///
    /// [`worker_finished`]: BudgetCoordinator::worker_finished
    pub fn acquire_share(&self, page_size: usize) -> io::Result<Share> {
        let mut remaining = self.remaining.lock().expect("coordinator mutex poisoned");
        assert!(
            *remaining > 0,
            "acquire_share called with no unclaimed cores left"
        );

        let available = match self.probe.available_pages() {
            Ok(pages) => pages,
            Err(e) => {
                *remaining -= 1;
                return Err(e);
            }
        };

        let pages = available / *remaining as u64;
        *remaining -= 1;
        self.active.fetch_add(1, Ordering::Relaxed);

        let bytes64 = pages.saturating_mul(page_size as u64);
        let bytes = usize::try_from(bytes64).unwrap_or(usize::MAX);
        // Keep the byte figure a whole-page multiple even after a clamp.
        let bytes = bytes - bytes % page_size.max(1);

        Ok(Share { pages, bytes })
    }

    /// A claiming worker is done (test loop finished or aborted).
    pub fn worker_finished(&self) {
        let prev = self.active.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "worker_finished without a matching claim");
    }

    /// Workers currently between claim and finish.
    #[inline]
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Cores that have not yet claimed.
    pub fn remaining_cores(&self) -> usize {
        *self.remaining.lock().expect("coordinator mutex poisoned")
    }

    /// True while any worker has yet to claim or yet to finish.
    ///
    /// This is the progress reporter's liveness condition. Checking the
    /// unclaimed count as well closes the startup window in which no worker
    /// has claimed yet and the active counter alone would read zero.
    pub fn workers_outstanding(&self) -> bool {
        self.remaining_cores() > 0 || self.active_workers() > 0
    }
}

// ============================================================================
// Tests
// ============================================================================
