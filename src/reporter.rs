//! Progress reporter: a spinner that proves the process is alive.
//!
//! Long runs produce no console output between pin announcements and
//! completion lines, so a dedicated thread rotates a glyph at a fixed
//! interval while any worker is still outstanding. Purely observational: it
//! reads the coordinator's counters and writes to the shared console,
//! nothing else. Its exit is the orchestrator's cue that all workers are
//! done acquiring and testing.

use std::thread;
use std::time::Duration;

use crate::coordinator::BudgetCoordinator;
use crate::sink::Sink;

/// Spinner frame period. Coarse on purpose; this is reassurance, not telemetry.
pub const DEFAULT_SPIN_INTERVAL: Duration = Duration::from_millis(250);

const GLYPHS: &[u8] = b"-\\|/";

/// Spin until no worker is outstanding.
///
/// The liveness condition includes cores that have not yet claimed a share,
/// so a reporter that starts before any worker reaches the coordinator does
/// not exit prematurely.
pub fn run_reporter(coordinator: &BudgetCoordinator, console: &dyn Sink, interval: Duration) {
    console.write_all(b"testing  ");
    console.flush();

    let mut frame = 0usize;
    while coordinator.workers_outstanding() {
        console.write_all(&[0x08, GLYPHS[frame % GLYPHS.len()]]);
        console.flush();
        frame = frame.wrapping_add(1);
        thread::sleep(interval);
    }

    // Erase the glyph and finish the line.
    console.write_all(b"\x08 \n");
    console.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{FixedProbe, SystemProbe};
    use std::sync::Arc;

    fn coordinator(cores: usize) -> BudgetCoordinator {
        let probe = Arc::new(FixedProbe::new(4096, 64));
        BudgetCoordinator::new(probe as Arc<dyn SystemProbe>, cores)
    }

    #[test]
    fn exits_once_workers_drain() {
        let coord = Arc::new(coordinator(1));
        let console = Arc::new(crate::sink::VecSink::new());

        let reporter = {
            let coord = Arc::clone(&coord);
            let console = Arc::clone(&console);
            thread::spawn(move || {
                run_reporter(&coord, console.as_ref(), Duration::from_millis(1))
            })
        };

        // Claim and finish; the reporter must notice and return.
        coord.acquire_share(4096).unwrap();
        coord.worker_finished();
        reporter.join().expect("reporter should exit");

        let out = console.take();
        assert!(out.starts_with(b"testing"));
        assert_eq!(*out.last().unwrap(), b'\n');
    }

    #[test]
    fn spins_while_claims_are_pending() {
        // No worker has claimed yet: the reporter must keep spinning on the
        // unclaimed-core count alone.
        let coord = Arc::new(coordinator(1));
        let console = Arc::new(crate::sink::VecSink::new());

        let reporter = {
            let coord = Arc::clone(&coord);
            let console = Arc::clone(&console);
            thread::spawn(move || {
                run_reporter(&coord, console.as_ref(), Duration::from_millis(1))
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!reporter.is_finished(), "reporter quit before any claim");

        coord.acquire_share(4096).unwrap();
        coord.worker_finished();
        reporter.join().expect("reporter should exit");
    }
}
