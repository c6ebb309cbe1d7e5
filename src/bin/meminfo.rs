//! One-shot memory/CPU inventory report.
//!
//! Prints the numbers the diagnostic harness sizes itself from: processor
//! counts, page size, total and currently-available physical memory, and the
//! resulting per-core fair share. Informational only; nothing is allocated
//! or pinned.

use std::io;
use std::process;

use memtester_rs::probe::{configured_cores, online_cores, SysconfProbe, SystemProbe};

const MIB: u64 = 1024 * 1024;

fn report(probe: &dyn SystemProbe) -> io::Result<()> {
    let page_size = probe.page_size()? as u64;
    let total_pages = probe.total_pages()?;
    let available_pages = probe.available_pages()?;
    let online = online_cores() as u64;

    println!(
        "processors: {} configured, {} online",
        configured_cores(),
        online
    );
    println!("page size:  {} bytes", page_size);
    println!(
        "memory:     {} pages total ({} MiB)",
        total_pages,
        total_pages * page_size / MIB
    );
    println!(
        "available:  {} pages ({} MiB)",
        available_pages,
        available_pages * page_size / MIB
    );
    println!(
        "fair share: {} pages per core ({} MiB)",
        available_pages / online,
        available_pages / online * page_size / MIB
    );
    Ok(())
}

fn main() {
    if let Err(e) = report(&SysconfProbe::new()) {
        eprintln!("meminfo: {}", e);
        process::exit(1);
    }
}
