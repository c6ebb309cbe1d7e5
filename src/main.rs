//! Memory-diagnostic CLI.
//!
//! Usage: `memtester-rs [loops]`
//!
//! One worker per usable core claims and (where permitted) pins a fair share
//! of the currently-available physical memory, then runs the fault-detection
//! suite `loops` times. A missing or zero loop count runs until the process
//! is killed. The environment variable `MEMTESTER_TEST_MASK` restricts which
//! registry detectors run (bit i enables detector i); the stuck-address
//! check always runs.
//!
//! # Exit Codes
//!
//! Bitwise OR across all workers:
//! - `0x01`: a worker (or the process) never started its test loop
//! - `0x02`: an address-line fault was found
//! - `0x04`: some pattern detector found a mismatch
//! - `0`: every worker completed cleanly

use std::env;
use std::process;

use memtester_rs::harness::{parse_loops, parse_mask, run, HarnessConfig};
use memtester_rs::{ExitStatus, Word};

fn print_usage(exe: &std::ffi::OsStr) {
    eprintln!(
        "usage: {} [loops]

    loops    number of verification passes per core; 0 or absent runs forever

environment:
    MEMTESTER_TEST_MASK    bitmask of registry detectors to run (decimal, 0x hex, 0o octal)",
        exe.to_string_lossy()
    );
}

fn main() {
    let mut args = env::args_os();
    let exe = args.next().unwrap_or_else(|| "memtester-rs".into());

    let mut loops: u64 = 0;
    let mut saw_positional = false;

    for arg in args {
        match arg.to_str() {
            Some("--help") | Some("-h") => {
                print_usage(&exe);
                process::exit(0);
            }
            Some(flag) if flag.starts_with('-') && flag.len() > 1 => {
                eprintln!("unknown flag: {}", flag);
                print_usage(&exe);
                process::exit(ExitStatus::NONSTARTER.bits() as i32);
            }
            Some(value) if !saw_positional => {
                loops = parse_loops(value).unwrap_or_else(|e| {
                    eprintln!("{}", e);
                    print_usage(&exe);
                    process::exit(ExitStatus::NONSTARTER.bits() as i32);
                });
                saw_positional = true;
            }
            _ => {
                print_usage(&exe);
                process::exit(ExitStatus::NONSTARTER.bits() as i32);
            }
        }
    }

    let mut test_mask = 0;
    if let Ok(raw) = env::var("MEMTESTER_TEST_MASK") {
        test_mask = parse_mask(&raw).unwrap_or_else(|e| {
            eprintln!("MEMTESTER_TEST_MASK: {}", e);
            print_usage(&exe);
            process::exit(ExitStatus::NONSTARTER.bits() as i32);
        });
        println!("using test mask {:#x}", test_mask);
    }

    println!(
        "memtester-rs {} ({}-bit)",
        env!("CARGO_PKG_VERSION"),
        Word::BITS
    );

    let config = HarnessConfig {
        loops,
        test_mask,
        ..HarnessConfig::default()
    };

    match run(&config) {
        Ok(status) => process::exit(status.bits() as i32),
        Err(e) => {
            eprintln!("fatal: {}", e);
            process::exit(ExitStatus::NONSTARTER.bits() as i32);
        }
    }
}
