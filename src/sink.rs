//! Output sinks: shared console and per-core log files.
//!
//! # Design
//!
//! Workers format a line into a local `String`, then call `write_all(bytes)`
//! which takes a lock only for the actual I/O. Formatting never happens under
//! the lock, so workers do not serialize on each other's log traffic.
//!
//! Two sinks exist per run:
//! - one shared console sink (pin/completion announcements, spinner), where
//!   batches from different workers may interleave at line granularity but
//!   never at byte granularity;
//! - one private file sink per worker, where ordering is trivially total.
//!
//! # Panic Policy
//!
//! Sinks panic on I/O errors (fail-fast), except `BrokenPipe` on the console
//! which is silently ignored (standard behavior under `... | head`). A panic
//! while holding the lock poisons it and subsequent writers also panic; this
//! matches the fail-fast policy.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::Path;
use std::sync::Mutex;

/// Byte-oriented, thread-shared output sink.
///
/// Implementations must be `Send + Sync`: the console sink is shared by all
/// workers, and per-core sinks move into their worker's thread.
pub trait Sink: Send + Sync {
    /// Write one batch. Batches from different threads never interleave.
    fn write_all(&self, bytes: &[u8]);

    /// Push buffered bytes to the OS.
    fn flush(&self);

    /// Convenience: write a line, appending `\n`.
    fn write_line(&self, line: &str) {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.write_all(&buf);
    }
}

// ============================================================================
// ConsoleSink
// ============================================================================

/// Shared stdout sink for announcements and the progress spinner.
pub struct ConsoleSink {
    out: Mutex<BufWriter<io::Stdout>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(BufWriter::new(io::stdout())),
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for ConsoleSink {
    fn write_all(&self, bytes: &[u8]) {
        let mut out = self.out.lock().expect("console sink mutex poisoned");
        if let Err(e) = out.write_all(bytes) {
            if e.kind() == ErrorKind::BrokenPipe {
                return;
            }
            panic!("console write failed: {}", e);
        }
    }

    fn flush(&self) {
        let mut out = self.out.lock().expect("console sink mutex poisoned");
        if let Err(e) = out.flush() {
            if e.kind() == ErrorKind::BrokenPipe {
                return;
            }
            panic!("console flush failed: {}", e);
        }
    }
}

// ============================================================================
// CoreLogSink
// ============================================================================

/// Append-mode file sink, one per worker.
///
/// Append mode keeps the record of earlier runs, which is the useful default
/// for a diagnostic that is typically re-run until a machine is trusted.
pub struct CoreLogSink {
    out: Mutex<BufWriter<std::fs::File>>,
}

impl CoreLogSink {
    /// Open (or create) the log for one core, `memtest-core<N>.log`, in `dir`.
    pub fn for_core(dir: impl AsRef<Path>, core: usize) -> io::Result<Self> {
        let path = dir.as_ref().join(format!("memtest-core{}.log", core));
        Self::open(path)
    }

    /// Open (or create) an append-mode log at an explicit path.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl Sink for CoreLogSink {
    fn write_all(&self, bytes: &[u8]) {
        let mut out = self.out.lock().expect("log sink mutex poisoned");
        out.write_all(bytes).expect("log write failed");
    }

    fn flush(&self) {
        let mut out = self.out.lock().expect("log sink mutex poisoned");
        out.flush().expect("log flush failed");
    }
}

// ============================================================================
// VecSink / NullSink
// ============================================================================

/// Test sink: captures all bytes in memory. `take()` extracts them.
pub struct VecSink {
    buf: Mutex<Vec<u8>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self {
            buf: Mutex::new(Vec::new()),
        }
    }

    /// Extract captured bytes, leaving the buffer empty.
    pub fn take(&self) -> Vec<u8> {
        let mut g = self.buf.lock().expect("vec sink mutex poisoned");
        std::mem::take(&mut *g)
    }

    /// Captured bytes as (lossy) text, without draining.
    pub fn text(&self) -> String {
        let g = self.buf.lock().expect("vec sink mutex poisoned");
        String::from_utf8_lossy(&g).into_owned()
    }
}

impl Default for VecSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for VecSink {
    fn write_all(&self, bytes: &[u8]) {
        self.buf
            .lock()
            .expect("vec sink mutex poisoned")
            .extend_from_slice(bytes);
    }

    fn flush(&self) {}
}

/// Discards everything. Used when a per-core log file cannot be created and
/// the run should continue anyway.
pub struct NullSink;

impl Sink for NullSink {
    fn write_all(&self, _bytes: &[u8]) {}
    fn flush(&self) {}
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn vec_sink_captures_lines() {
        let sink = VecSink::new();
        sink.write_line("alpha");
        sink.write_line("beta");
        assert_eq!(sink.take(), b"alpha\nbeta\n");
    }

    #[test]
    fn concurrent_batches_do_not_interleave() {
        let sink = Arc::new(VecSink::new());
        let threads = 8;
        let lines = 500;

        let handles: Vec<_> = (0..threads)
            .map(|tid| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    for _ in 0..lines {
                        sink.write_line(&format!("worker-{}", tid));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let out = sink.take();
        let parsed: Vec<&[u8]> = out.split(|&b| b == b'\n').filter(|l| !l.is_empty()).collect();
        assert_eq!(parsed.len(), threads * lines);
        for line in parsed {
            let s = std::str::from_utf8(line).expect("utf8");
            assert!(s.starts_with("worker-"), "torn line: {:?}", s);
        }
    }

    #[test]
    fn core_log_appends_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = CoreLogSink::for_core(dir.path(), 3).unwrap();
            log.write_line("first run");
            log.flush();
        }
        {
            let log = CoreLogSink::for_core(dir.path(), 3).unwrap();
            log.write_line("second run");
            log.flush();
        }
        let text = std::fs::read_to_string(dir.path().join("memtest-core3.log")).unwrap();
        assert_eq!(text, "first run\nsecond run\n");
    }

    #[test]
    fn null_sink_discards() {
        let sink = NullSink;
        sink.write_line("gone");
        sink.flush();
    }
}
