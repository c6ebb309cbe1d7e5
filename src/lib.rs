//! Per-core concurrent memory diagnostic.
//!
//! ## Scope
//! This crate claims a fair share of the machine's currently-available
//! physical memory on every core, pins each share against paging where
//! permitted, and hammers it with a suite of fault-detection passes (stuck
//! bits, coupling faults, addressing faults). It detects and reports; it
//! never corrects, and it is not a general-purpose allocator.
//!
//! ## Key invariants
//! - Share decisions are made one at a time: the live available-page count is
//!   re-read and `remaining_cores` decremented inside a single critical
//!   section, so no two workers size themselves from the same snapshot.
//! - Acquisition failures degrade, never escalate: allocation shrinks page by
//!   page, pin limits shrink and retry, a pin permission denial drops to
//!   unpinned mode exactly once, and only a fully exhausted request makes a
//!   core a non-starter.
//! - Nothing one worker does can block or abort a sibling; all cross-worker
//!   state lives in the budget coordinator.
//!
//! ## Flow (one run)
//! 1) Orchestrator detects cores and spawns one worker per core plus a
//!    progress reporter.
//! 2) Each worker claims a share, acquires and (best-effort) pins a region,
//!    and splits it into a comparison pair.
//! 3) Each loop runs the stuck-address check plus every mask-enabled
//!    registry detector, logging per-pass verdicts to the worker's own file.
//! 4) Workers release and report status bits; the orchestrator ORs them into
//!    the process exit code.
//!
//! ## Notable entry points
//! - [`harness::run`] / [`harness::HarnessConfig`]: the whole diagnostic.
//! - [`coordinator::BudgetCoordinator`]: fair-share claims over a live pool.
//! - [`worker::run_worker`] / [`worker::acquire_region`]: one core's
//!   lifecycle and its degrade-and-retry acquisition machine.
//! - [`patterns::REGISTRY`]: the ordered detector suite.
//! - [`probe::SystemProbe`] / [`region::RegionSource`]: the seams that let
//!   every acquisition path run deterministically in tests.

pub mod coordinator;
pub mod harness;
pub mod patterns;
pub mod probe;
pub mod region;
pub mod reporter;
pub mod rng;
pub mod sink;
pub mod status;
pub mod worker;

pub use coordinator::{BudgetCoordinator, Share};
pub use harness::{run, HarnessConfig};
pub use patterns::{stuck_address, TestDescriptor, REGISTRY};
pub use probe::{online_cores, SysconfProbe, SystemProbe};
pub use region::{MmapRegionSource, PinError, Region, RegionSource, Word};
pub use status::ExitStatus;
pub use worker::{acquire_region, run_worker, Acquisition, WorkerContext};
