//! Whole-run acquisition scenarios with deterministic probes and sources.
//!
//! These drive the real orchestration (coordinator, workers, reporter,
//! sinks) while injecting allocation and pin behavior, so every degrade
//! path is exercised without touching the machine's actual memory.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use memtester_rs::coordinator::BudgetCoordinator;
use memtester_rs::harness::{run_with, HarnessConfig};
use memtester_rs::probe::{FixedProbe, SystemProbe};
use memtester_rs::region::{PinError, Region, RegionSource, Word, WORD_BYTES};
use memtester_rs::sink::{Sink, VecSink};
use memtester_rs::status::ExitStatus;
use memtester_rs::worker::{run_worker, WorkerContext};
use memtester_rs::REGISTRY;

const PAGE: usize = 4096;

// ============================================================================
// Stubs
// ============================================================================

#[derive(Clone, Copy)]
enum PinMode {
    Succeed,
    PermissionDenied,
}

struct StubRegion {
    words: Vec<Word>,
    locked: bool,
    mode: PinMode,
}

impl Region for StubRegion {
    fn len(&self) -> usize {
        self.words.len() * WORD_BYTES
    }

    fn is_locked(&self) -> bool {
        self.locked
    }

    fn pin(&mut self) -> Result<(), PinError> {
        match self.mode {
            PinMode::Succeed => {
                self.locked = true;
                Ok(())
            }
            PinMode::PermissionDenied => Err(PinError::PermissionDenied),
        }
    }

    fn unpin(&mut self) {
        self.locked = false;
    }

    fn words(&mut self) -> &mut [Word] {
        &mut self.words
    }
}

/// Heap-backed source with a fixed pin outcome for every region.
struct StubSource {
    mode: PinMode,
}

impl RegionSource for StubSource {
    type Region = StubRegion;

    fn request(&self, bytes: usize) -> Option<StubRegion> {
        if bytes == 0 {
            return None;
        }
        Some(StubRegion {
            words: vec![0; bytes / WORD_BYTES],
            locked: false,
            mode: self.mode,
        })
    }
}

/// A source on which every allocation fails.
struct DenySource;

impl RegionSource for DenySource {
    type Region = StubRegion;

    fn request(&self, _bytes: usize) -> Option<StubRegion> {
        None
    }
}

/// Capture sink that hands the test a reader after moving into a worker.
struct SharedSink(Arc<VecSink>);

impl Sink for SharedSink {
    fn write_all(&self, bytes: &[u8]) {
        self.0.write_all(bytes)
    }
    fn flush(&self) {
        self.0.flush()
    }
}

fn scenario_config(loops: u64, workers: usize, test_mask: u64) -> HarnessConfig {
    HarnessConfig {
        loops,
        test_mask,
        workers: Some(workers),
        spin_interval: Duration::from_millis(1),
        log_dir: PathBuf::new(),
    }
}

fn capture_logs(n: usize) -> (Vec<Arc<VecSink>>, impl Fn(usize) -> io::Result<Box<dyn Sink>>) {
    let logs: Vec<Arc<VecSink>> = (0..n).map(|_| Arc::new(VecSink::new())).collect();
    let for_factory = logs.clone();
    let factory = move |core: usize| {
        Ok(Box::new(SharedSink(Arc::clone(&for_factory[core]))) as Box<dyn Sink>)
    };
    (logs, factory)
}

// ============================================================================
// Scenarios
// ============================================================================

/// Loop count 3, everything succeeds first try, no mask: every log shows
/// exactly three iterations, each listing the address check followed by
/// every registered detector in order, and the aggregate status is clean.
#[test]
fn three_loops_full_suite_all_clean() {
    let workers = 2;
    let probe = Arc::new(FixedProbe::new(PAGE, 16));
    let console = Arc::new(VecSink::new());
    let (logs, factory) = capture_logs(workers);

    let status = run_with(
        &scenario_config(3, workers, 0),
        probe as Arc<dyn SystemProbe>,
        Arc::new(StubSource {
            mode: PinMode::Succeed,
        }),
        Arc::clone(&console) as Arc<dyn Sink>,
        factory,
    )
    .expect("run_with");

    assert!(status.is_clean(), "aggregate status was {}", status);

    for (core, log) in logs.iter().enumerate() {
        let text = log.text();
        let iterations: Vec<&str> = text.split("loop ").skip(1).collect();
        assert_eq!(iterations.len(), 3, "core {} ran {} loops", core, iterations.len());

        for (n, body) in iterations.iter().enumerate() {
            assert!(
                body.starts_with(&format!("{}/3:", n + 1)),
                "core {} iteration header wrong:\n{}",
                core,
                body
            );
            // Address check first, then the registry in registration order.
            let mut cursor = body.find("Stuck Address: ok").unwrap_or_else(|| {
                panic!("core {} loop {} missing the address check", core, n + 1)
            });
            for t in REGISTRY {
                let here = body[cursor..]
                    .find(&format!("{}: ok", t.name))
                    .unwrap_or_else(|| {
                        panic!("core {} loop {} missing or misordered {}", core, n + 1, t.name)
                    });
                cursor += here;
            }
        }
    }

    let out = console.text();
    assert_eq!(out.matches("memory pinned: core=").count(), workers);
    assert_eq!(out.matches("test complete: core=").count(), workers);
    assert!(out.contains("memory test complete: status=clean"));
}

/// Pinning always denied for lack of permission: each worker retries
/// unpinned at full size exactly once, still completes the suite, and no
/// non-starter bit is set.
#[test]
fn permission_denied_degrades_to_unpinned_everywhere() {
    let workers = 2;
    let probe = Arc::new(FixedProbe::new(PAGE, 16));
    let console = Arc::new(VecSink::new());
    let (logs, factory) = capture_logs(workers);

    let status = run_with(
        &scenario_config(1, workers, 0b1),
        probe as Arc<dyn SystemProbe>,
        Arc::new(StubSource {
            mode: PinMode::PermissionDenied,
        }),
        Arc::clone(&console) as Arc<dyn Sink>,
        factory,
    )
    .expect("run_with");

    assert!(status.is_clean(), "degraded pinning must not fail the run");

    for log in &logs {
        let text = log.text();
        assert_eq!(
            text.matches("insufficient permission").count(),
            1,
            "pinning must be abandoned after one denial:\n{}",
            text
        );
        assert!(text.contains("unpinned memory"));
        assert!(text.contains("Random Value: ok"));
        assert!(text.contains("done"));
    }

    let out = console.text();
    assert!(!out.contains("memory pinned"), "nothing was pinned");
    assert_eq!(out.matches("test complete: core=").count(), workers);
}

/// One core's allocations always fail while its sibling is healthy: the
/// starved core shrinks to zero and reports a non-starter, the sibling
/// completes a clean full run, and the aggregate carries only those bits.
#[test]
fn starved_core_does_not_disturb_its_sibling() {
    let probe = Arc::new(FixedProbe::new(PAGE, 64));
    let coordinator = Arc::new(BudgetCoordinator::new(
        Arc::clone(&probe) as Arc<dyn SystemProbe>,
        2,
    ));
    let console = Arc::new(VecSink::new());
    let log0 = Arc::new(VecSink::new());
    let log1 = Arc::new(VecSink::new());

    let starved = {
        let coordinator = Arc::clone(&coordinator);
        let console = Arc::clone(&console);
        let log = Arc::clone(&log0);
        thread::spawn(move || {
            let ctx = WorkerContext {
                core: 0,
                page_size: PAGE,
                loops: 1,
            };
            run_worker(&ctx, &coordinator, &DenySource, 0, log.as_ref(), console.as_ref())
        })
    };
    let healthy = {
        let coordinator = Arc::clone(&coordinator);
        let console = Arc::clone(&console);
        let log = Arc::clone(&log1);
        thread::spawn(move || {
            let ctx = WorkerContext {
                core: 1,
                page_size: PAGE,
                loops: 1,
            };
            let source = StubSource {
                mode: PinMode::Succeed,
            };
            run_worker(&ctx, &coordinator, &source, 0, log.as_ref(), console.as_ref())
        })
    };

    let status0 = starved.join().unwrap();
    let status1 = healthy.join().unwrap();

    assert_eq!(status0, ExitStatus::NONSTARTER);
    assert!(status1.is_clean());
    assert!(!coordinator.workers_outstanding());

    let text0 = log0.text();
    assert!(text0.contains("reducing"), "starved core must show shrink attempts");
    assert!(text0.contains("aborting"));
    assert!(!text0.contains("loop"));

    let text1 = log1.text();
    for t in REGISTRY {
        assert!(text1.contains(&format!("{}: ok", t.name)), "{} skipped", t.name);
    }

    let combined = status0 | status1;
    assert_eq!(combined, ExitStatus::NONSTARTER);
}

/// Shrinking pool: grants across all workers never exceed the pages that
/// were available when the first claim was decided.
#[test]
fn grants_never_overcommit_the_opening_pool() {
    let initial_pages: u64 = 96;
    let workers = 4;
    let probe = Arc::new(FixedProbe::new(PAGE, initial_pages));
    let coordinator = Arc::new(BudgetCoordinator::new(
        Arc::clone(&probe) as Arc<dyn SystemProbe>,
        workers,
    ));

    let granted = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let probe = Arc::clone(&probe);
            let granted = Arc::clone(&granted);
            thread::spawn(move || {
                let share = coordinator.acquire_share(PAGE).unwrap();
                // Model the grant being realized (pinned memory leaves the pool).
                probe.consume_pages(share.pages);
                granted.lock().unwrap().push(share.pages);
                coordinator.worker_finished();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let total: u64 = granted.lock().unwrap().iter().sum();
    assert!(
        total <= initial_pages,
        "granted {} pages from an opening pool of {}",
        total,
        initial_pages
    );
}

/// An empty pool leaves every core a non-starter, and the run still
/// terminates (nothing spins forever waiting for memory that cannot come).
#[test]
fn empty_pool_terminates_with_non_starters() {
    let workers = 2;
    let probe = Arc::new(FixedProbe::new(PAGE, 0));
    let console = Arc::new(VecSink::new());
    let (logs, factory) = capture_logs(workers);

    let status = run_with(
        &scenario_config(1, workers, 0),
        probe as Arc<dyn SystemProbe>,
        Arc::new(StubSource {
            mode: PinMode::Succeed,
        }),
        Arc::clone(&console) as Arc<dyn Sink>,
        factory,
    )
    .expect("run_with");

    assert_eq!(status, ExitStatus::NONSTARTER);
    for log in &logs {
        assert!(log.text().contains("aborting"));
    }
    assert!(console.text().contains("status=non-starter"));
}
