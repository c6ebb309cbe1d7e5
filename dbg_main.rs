use memtester_rs::harness::{run_with, HarnessConfig};
use memtester_rs::probe::{FixedProbe, SystemProbe};
use memtester_rs::region::MmapRegionSource;
use memtester_rs::sink::{Sink, VecSink};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

struct SharedSink(Arc<VecSink>);
impl Sink for SharedSink {
    fn write_all(&self, b: &[u8]) { self.0.write_all(b) }
    fn flush(&self) { self.0.flush() }
}

fn main() {
    let probe = Arc::new(FixedProbe::new(4096, 32));
    let console = Arc::new(VecSink::new());
    let logs: Vec<Arc<VecSink>> = (0..2).map(|_| Arc::new(VecSink::new())).collect();
    let config = HarnessConfig { loops: 1, test_mask: 0b1, workers: Some(2), spin_interval: Duration::from_millis(1), log_dir: PathBuf::new() };
    let lf = logs.clone();
    let status = run_with(&config, probe as Arc<dyn SystemProbe>, Arc::new(MmapRegionSource::new()), Arc::clone(&console) as Arc<dyn Sink>, move |c| Ok(Box::new(SharedSink(Arc::clone(&lf[c]))) as Box<dyn Sink>)).unwrap();
    println!("STATUS = {}  clean={}", status, status.is_clean());
    println!("CONSOLE:\n{}", console.text());
    for (i,l) in logs.iter().enumerate() { println!("--- core {} ---\n{}", i, l.text()); }
}
