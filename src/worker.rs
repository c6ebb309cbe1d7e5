//! Per-core worker: claim, acquire-with-fallback, verify, release.
//!
//! # Lifecycle
//!
//! One worker owns one core's test from start to finish:
//!
//! 1. **Claim** a fair share of the live pool through the budget coordinator
//!    (the only cross-worker synchronization point).
//! 2. **Acquire** a region of that size, degrading on failure:
//!    `SIZING -> ALLOCATING -> LOCKING -> {LOCKED, UNLOCKED, ABORTED}`.
//! 3. **Verify**: run the stuck-address check plus every mask-enabled
//!    detector, once per requested loop, forever when the loop count is 0.
//! 4. **Release**: unpin, free, report status bits, mark the worker finished.
//!
//! # Degrade Protocol
//!
//! - Allocation failure: shrink the request by one page and retry; at zero
//!   bytes the worker is a non-starter (`ABORTED`).
//! - Pin failure "over limit" / "out of memory": free, shrink one page,
//!   re-allocate, re-pin.
//! - Pin failure "permission denied": free, restore the *original* request
//!   size, disable pinning for the rest of this worker's lifetime, and
//!   re-allocate without pinning. This happens at most once.
//! - Any other pin failure: keep the region, proceed unpinned immediately.
//!
//! Failures here are contained: nothing a worker does can abort or block a
//! sibling. A worker that settles for less than its claimed share does not
//! hand the difference back; later claimers adapt via the live page count.

use crate::coordinator::BudgetCoordinator;
use crate::patterns::{mask_enables, stuck_address, REGISTRY};
use crate::region::{PinError, Region, RegionSource};
use crate::rng::XorShift64;
use crate::sink::Sink;
use crate::status::ExitStatus;

/// Per-worker immutable parameters, built by the orchestrator at spawn time.
#[derive(Clone, Copy, Debug)]
pub struct WorkerContext {
    /// Core index, 0-based.
    pub core: usize,
    /// System page size in bytes.
    pub page_size: usize,
    /// Requested verification loops; 0 means run until the process dies.
    pub loops: u64,
}

/// Terminal state of the acquisition machine.
pub enum Acquisition<R> {
    /// Region obtained and pinned against paging.
    Locked(R),
    /// Region obtained but running unpinned.
    Unlocked(R),
    /// No memory could be obtained at all; the core is a non-starter.
    Aborted,
}

// ============================================================================
// Acquisition state machine
// ============================================================================

/// Obtain a region of (at most) `want_bytes`, degrading per the protocol
/// above. Runs entirely outside the coordinator's lock.
pub fn acquire_region<S: RegionSource>(
    source: &S,
    want_bytes: usize,
    page_size: usize,
    log: &dyn Sink,
) -> Acquisition<S::Region> {
    let original_bytes = want_bytes;
    let mut want = want_bytes;
    let mut try_pin = true;

    loop {
        // ALLOCATING: shrink page by page until a region materializes.
        let mut region = loop {
            if want == 0 {
                log.write_line("unable to allocate any memory, aborting");
                return Acquisition::Aborted;
            }
            match source.request(want) {
                Some(r) => break r,
                None => {
                    log.write_line(&format!("failed to allocate {} bytes, reducing", want));
                    want = want.saturating_sub(page_size);
                }
            }
        };
        log.write_line(&format!(
            "got {} MiB ({} bytes)",
            region.len() >> 20,
            region.len()
        ));

        if !try_pin {
            return Acquisition::Unlocked(region);
        }

        // LOCKING: pin the whole span against paging.
        log.write_line("trying to pin ...");
        match region.pin() {
            Ok(()) => {
                log.write_line("pinned");
                return Acquisition::Locked(region);
            }
            Err(e @ PinError::OverLimit) | Err(e @ PinError::OutOfMemory) => {
                log.write_line(&format!("{}, reducing", e));
                drop(region);
                want = want.saturating_sub(page_size);
            }
            Err(e @ PinError::PermissionDenied) => {
                log.write_line(&format!("{}; retrying unpinned at full size", e));
                drop(region);
                want = original_bytes;
                try_pin = false;
            }
            Err(PinError::Other(e)) => {
                log.write_line(&format!("pin failed for an unknown reason ({})", e));
                return Acquisition::Unlocked(region);
            }
        }
    }
}

// ============================================================================
// Worker entry point
// ============================================================================

/// Marks the worker finished when dropped, so the active-worker count drains
/// even if a worker unwinds (a hung reporter would otherwise stall the whole
/// run waiting on a counter nobody will decrement).
struct FinishGuard<'a>(&'a BudgetCoordinator);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.worker_finished();
    }
}

/// Run one core's entire test lifecycle. Returns this worker's status bits.
pub fn run_worker<S: RegionSource>(
    ctx: &WorkerContext,
    coordinator: &BudgetCoordinator,
    source: &S,
    test_mask: u64,
    log: &dyn Sink,
    console: &dyn Sink,
) -> ExitStatus {
    log.write_line(&format!("page size: {} bytes", ctx.page_size));

    let share = match coordinator.acquire_share(ctx.page_size) {
        Ok(share) => share,
        Err(e) => {
            // The slot is consumed but no claim was committed; do not call
            // worker_finished for this path.
            log.write_line(&format!("cannot size request, inventory query failed: {}", e));
            log.flush();
            return ExitStatus::NONSTARTER;
        }
    };
    let _finished = FinishGuard(coordinator);
    log.write_line(&format!(
        "core {} claimed {} MiB ({} bytes, {} pages)",
        ctx.core,
        share.mib(),
        share.bytes,
        share.pages
    ));
    log.flush();

    let mut region = match acquire_region(source, share.bytes, ctx.page_size, log) {
        Acquisition::Locked(region) => {
            console.write_line(&format!(
                "memory pinned: core={} size={}MiB",
                ctx.core,
                (region.len() >> 20)
            ));
            console.flush();
            region
        }
        Acquisition::Unlocked(region) => {
            log.write_line("continuing with unpinned memory; testing will be slower and less reliable");
            region
        }
        Acquisition::Aborted => {
            log.write_line("non-starter: giving up on this core");
            log.flush();
            return ExitStatus::NONSTARTER;
        }
    };
    log.flush();

    let status = run_detector_loop(ctx, &mut region, test_mask, log);

    let tested_mib = region.len() >> 20;
    region.unpin();
    drop(region);

    log.write_line("done");
    log.flush();
    console.write_line(&format!(
        "test complete: core={} size={}MiB",
        ctx.core, tested_mib
    ));
    console.flush();

    status
}

/// The verification loop proper. Uninterruptible by design: a zero loop
/// count runs until the process is killed.
fn run_detector_loop<R: Region>(
    ctx: &WorkerContext,
    region: &mut R,
    test_mask: u64,
    log: &dyn Sink,
) -> ExitStatus {
    let mut status = ExitStatus::CLEAN;
    let mut rng = XorShift64::for_core(ctx.core);

    let mut iteration: u64 = 1;
    while ctx.loops == 0 || iteration <= ctx.loops {
        if ctx.loops != 0 {
            log.write_line(&format!("loop {}/{}:", iteration, ctx.loops));
        } else {
            log.write_line(&format!("loop {}:", iteration));
        }

        // Address-line integrity always runs, over the whole span.
        let addr_faults = stuck_address(region.words());
        if addr_faults == 0 {
            log.write_line("  Stuck Address: ok");
        } else {
            log.write_line(&format!("  Stuck Address: FAILED ({} faults)", addr_faults));
            status |= ExitStatus::ADDRESS_FAULT;
        }

        let (a, b) = region.halves();
        for (index, test) in REGISTRY.iter().enumerate() {
            if !mask_enables(test_mask, index) {
                continue;
            }
            let faults = (test.run)(&mut *a, &mut *b, &mut rng);
            if faults == 0 {
                log.write_line(&format!("  {}: ok", test.name));
            } else {
                log.write_line(&format!("  {}: FAILED ({} mismatches)", test.name, faults));
                status |= ExitStatus::OTHER_FAULT;
            }
        }
        log.flush();
        iteration += 1;
    }

    status
}

// ============================================================================
// Tests
// ============================================================================
