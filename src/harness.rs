//! Orchestrator: one worker per core, one reporter, one combined verdict.
//!
//! # Flow
//!
//! 1. Read the page size (fatal if the platform cannot answer; nothing can
//!    size a request without it).
//! 2. Seed the budget coordinator with the usable core count.
//! 3. Spawn one named worker thread per core, each with a fresh
//!    [`WorkerContext`] and its own log sink, plus the progress reporter.
//! 4. Join the reporter first; it only exits once every worker has drained,
//!    so the spinner stays live for the whole run.
//! 5. Join the workers, OR their status bits, announce the aggregate.
//!
//! `run` wires the production pieces (sysconf probe, anonymous mappings,
//! stdout console, per-core log files); `run_with` takes all of them as
//! parameters so whole-run scenarios are testable without touching the
//! machine's real memory.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::coordinator::BudgetCoordinator;
use crate::probe::{online_cores, SysconfProbe, SystemProbe};
use crate::region::{MmapRegionSource, RegionSource};
use crate::reporter::{run_reporter, DEFAULT_SPIN_INTERVAL};
use crate::sink::{ConsoleSink, CoreLogSink, NullSink, Sink};
use crate::status::ExitStatus;
use crate::worker::{run_worker, WorkerContext};

/// Whole-run parameters.
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    /// Verification loops per worker; 0 runs until the process is killed.
    pub loops: u64,
    /// Detector selection bitmask; 0 enables the full registry.
    pub test_mask: u64,
    /// Worker count override; `None` detects the usable core count.
    pub workers: Option<usize>,
    /// Spinner frame period.
    pub spin_interval: Duration,
    /// Directory receiving the per-core log files.
    pub log_dir: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            loops: 0,
            test_mask: 0,
            workers: None,
            spin_interval: DEFAULT_SPIN_INTERVAL,
            log_dir: PathBuf::from("."),
        }
    }
}

/// Run the harness against the real machine.
pub fn run(config: &HarnessConfig) -> io::Result<ExitStatus> {
    let probe: Arc<dyn SystemProbe> = Arc::new(SysconfProbe::new());
    let console: Arc<dyn Sink> = Arc::new(ConsoleSink::new());
    let source = Arc::new(MmapRegionSource::new());
    let dir = config.log_dir.clone();
    run_with(config, probe, source, console, move |core| {
        CoreLogSink::for_core(&dir, core).map(|s| Box::new(s) as Box<dyn Sink>)
    })
}

/// Run the harness with injected probe, region source, console and log
/// factory. This is `run` minus the hardware.
pub fn run_with<S>(
    config: &HarnessConfig,
    probe: Arc<dyn SystemProbe>,
    source: Arc<S>,
    console: Arc<dyn Sink>,
    make_log: impl Fn(usize) -> io::Result<Box<dyn Sink>>,
) -> io::Result<ExitStatus>
where
    S: RegionSource + 'static,
{
    let page_size = probe.page_size()?;
    let cores = config.workers.unwrap_or_else(online_cores).max(1);
    let coordinator = Arc::new(BudgetCoordinator::new(Arc::clone(&probe), cores));

    let mut workers = Vec::with_capacity(cores);
    for core in 0..cores {
        let log: Box<dyn Sink> = match make_log(core) {
            Ok(sink) => sink,
            Err(e) => {
                eprintln!(
                    "warning: cannot open log for core {} ({}); continuing without one",
                    core, e
                );
                Box::new(NullSink)
            }
        };
        let ctx = WorkerContext {
            core,
            page_size,
            loops: config.loops,
        };
        let mask = config.test_mask;
        let coordinator = Arc::clone(&coordinator);
        let console = Arc::clone(&console);
        let source = Arc::clone(&source);

        let th = thread::Builder::new()
            .name(format!("memtest-worker-{core}"))
            .spawn(move || {
                run_worker(
                    &ctx,
                    &coordinator,
                    source.as_ref(),
                    mask,
                    log.as_ref(),
                    console.as_ref(),
                )
            })
            .expect("failed to spawn worker thread");
        workers.push(th);
    }

    let reporter = {
        let coordinator = Arc::clone(&coordinator);
        let console = Arc::clone(&console);
        let interval = config.spin_interval;
        thread::Builder::new()
            .name("memtest-progress".to_string())
            .spawn(move || run_reporter(&coordinator, console.as_ref(), interval))
            .expect("failed to spawn progress reporter")
    };

    // The reporter exits only after every worker drains, so this join is the
    // "all done" barrier and the worker joins below never block for long.
    if reporter.join().is_err() {
        eprintln!("warning: progress reporter panicked");
    }

    let mut combined = ExitStatus::CLEAN;
    for th in workers {
        match th.join() {
            Ok(status) => combined |= status,
            Err(_) => {
                eprintln!("warning: a worker thread panicked");
                combined |= ExitStatus::NONSTARTER;
            }
        }
    }

    console.write_line(&format!("memory test complete: status={}", combined));
    console.flush();
    Ok(combined)
}

// ============================================================================
// CLI/env value parsing
// ============================================================================

/// Parse the loop-count argument: plain non-negative decimal, nothing else.
pub fn parse_loops(text: &str) -> Result<u64, String> {
    text.parse::<u64>()
        .map_err(|_| format!("invalid loop count {:?} (expected a non-negative integer)", text))
}

/// Parse the detector bitmask: decimal, `0x` hex, or `0o` octal.
pub fn parse_mask(text: &str) -> Result<u64, String> {
    let t = text.trim();
    let parsed = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if let Some(oct) = t.strip_prefix("0o").or_else(|| t.strip_prefix("0O")) {
        u64::from_str_radix(oct, 8)
    } else {
        t.parse::<u64>()
    };
    parsed.map_err(|_| format!("invalid test mask {:?}", text))
}

// ============================================================================
// Tests
// ============================================================================
