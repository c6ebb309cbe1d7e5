//! System memory/CPU inventory queries.
//!
//! # Purpose
//!
//! Everything the harness needs to size its requests comes from four numbers:
//! the page size, the total and currently-available physical page counts, and
//! the number of usable cores. This module answers those queries and nothing
//! else.
//!
//! The available-page count is deliberately re-read on every call instead of
//! being cached: workers acquire memory concurrently, and a later worker must
//! see the pool already shrunk by its predecessors.
//!
//! # Platform Support
//!
//! - **Linux/Android**: full support via `sysconf(_SC_*)`
//! - **Other**: page-count queries return `ErrorKind::Unsupported` (not a
//!   silently-wrong default); core counts fall back to `num_cpus`
//!
//! # Trait Seam
//!
//! [`SystemProbe`] exists so the acquisition machinery can be driven by a
//! deterministic [`FixedProbe`] in tests and simulations. Production code
//! uses [`SysconfProbe`].

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Read-side interface to the machine's memory inventory.
///
/// Implementations must be `Send + Sync`: one probe instance is shared by
/// every worker through the budget coordinator.
pub trait SystemProbe: Send + Sync {
    /// System page size in bytes.
    fn page_size(&self) -> io::Result<usize>;

    /// Physical pages currently available for allocation.
    ///
    /// This is a live value; successive calls may (and should) differ while
    /// memory is being claimed elsewhere.
    fn available_pages(&self) -> io::Result<u64>;

    /// Total physical pages installed.
    fn total_pages(&self) -> io::Result<u64>;
}

// ============================================================================
// Production probe: sysconf
// ============================================================================

/// Probe backed by `sysconf(3)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SysconfProbe;

impl SysconfProbe {
    pub fn new() -> Self {
        SysconfProbe
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn sysconf_nonneg(name: libc::c_int) -> io::Result<i64> {
    // SAFETY: sysconf has no memory-safety preconditions; -1 signals an
    // unsupported or failed query and errno carries the reason.
    let v = unsafe { libc::sysconf(name) };
    if v < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(v)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl SystemProbe for SysconfProbe {
    fn page_size(&self) -> io::Result<usize> {
        sysconf_nonneg(libc::_SC_PAGESIZE).map(|v| v as usize)
    }

    fn available_pages(&self) -> io::Result<u64> {
        sysconf_nonneg(libc::_SC_AVPHYS_PAGES).map(|v| v as u64)
    }

    fn total_pages(&self) -> io::Result<u64> {
        sysconf_nonneg(libc::_SC_PHYS_PAGES).map(|v| v as u64)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
impl SystemProbe for SysconfProbe {
    fn page_size(&self) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "physical page queries are not supported on this platform",
        ))
    }

    fn available_pages(&self) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "physical page queries are not supported on this platform",
        ))
    }

    fn total_pages(&self) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "physical page queries are not supported on this platform",
        ))
    }
}

// ============================================================================
// Core counts
// ============================================================================

/// Number of cores the harness may use (one worker each).
///
/// Respects cgroup/affinity limits where the platform exposes them.
/// Never returns 0.
pub fn online_cores() -> usize {
    num_cpus::get().max(1)
}

/// Number of processors configured in the system, including offline ones.
///
/// Falls back to the online count where the query is unavailable.
pub fn configured_cores() -> usize {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        // SAFETY: plain sysconf query, no preconditions.
        let v = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
        if v > 0 {
            return v as usize;
        }
    }
    online_cores()
}

// ============================================================================
// Deterministic probe for tests
// ============================================================================

/// Fixed-inventory probe with an adjustable available-page pool.
///
/// Tests use `consume_pages` to model the pool shrinking as regions are
/// claimed, and `fail_queries` to model a machine whose counters cannot be
/// read at all.
#[derive(Debug)]
pub struct FixedProbe {
    page_size: usize,
    total: u64,
    available: AtomicU64,
    fail: AtomicBool,
}

impl FixedProbe {
    pub fn new(page_size: usize, available_pages: u64) -> Self {
        Self {
            page_size,
            total: available_pages,
            available: AtomicU64::new(available_pages),
            fail: AtomicBool::new(false),
        }
    }

    /// Shrink the pool, saturating at zero.
    pub fn consume_pages(&self, pages: u64) {
        let mut cur = self.available.load(Ordering::Relaxed);
        loop {
            let next = cur.saturating_sub(pages);
            match self.available.compare_exchange_weak(
                cur,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => cur = observed,
            }
        }
    }

    pub fn set_available(&self, pages: u64) {
        self.available.store(pages, Ordering::Relaxed);
    }

    /// Make every subsequent query fail, as on a machine with no counters.
    pub fn fail_queries(&self) {
        self.fail.store(true, Ordering::Relaxed);
    }

    fn check(&self) -> io::Result<()> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "inventory query failure (injected)",
            ));
        }
        Ok(())
    }
}

impl SystemProbe for FixedProbe {
    fn page_size(&self) -> io::Result<usize> {
        self.check()?;
        Ok(self.page_size)
    }

    fn available_pages(&self) -> io::Result<u64> {
        self.check()?;
        Ok(self.available.load(Ordering::Relaxed))
    }

    fn total_pages(&self) -> io::Result<u64> {
        self.check()?;
        Ok(self.total)
    }
}

// ============================================================================
// Tests
// ============================================================================
