//! Snapshot audit utility.
//!
//! Checks a twin state directory for out-of-range risk, duplicate records,
//! file/record day mismatches and non-contiguous patient histories.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin verify_snapshots -- [--dir <path>] [--quiet]
//! ```
//!
//! Exits 0 when clean, 1 when violations are found, 2 on usage or I/O errors.

use std::path::PathBuf;

use cardiotwin::application::audit_snapshots;
use cardiotwin::PipelinePaths;

const USAGE: &str = "Usage: verify_snapshots [--dir <path>] [--quiet]";

fn main() {
    let mut args = std::env::args().skip(1);
    let mut dir: Option<PathBuf> = None;
    let mut quiet = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dir" => {
                let p = args.next().unwrap_or_default();
                if p.is_empty() {
                    eprintln!("{USAGE}");
                    std::process::exit(2);
                }
                dir = Some(PathBuf::from(p));
            }
            "--quiet" | "-q" => quiet = true,
            "-h" | "--help" => {
                println!(
                    "{USAGE}\n\nAudits state_<YYYY-MM-DD>.jsonl files (default: data/twin_state)."
                );
                return;
            }
            _ => {
                eprintln!("Unknown arg: {arg}\n{USAGE}");
                std::process::exit(2);
            }
        }
    }

    let dir = dir.unwrap_or_else(|| PipelinePaths::default().state_root);

    let report = match audit_snapshots(&dir) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Cannot audit {}: {e}", dir.display());
            std::process::exit(2);
        }
    };

    if !quiet {
        for violation in &report.violations {
            println!("{violation}");
        }
    }
    println!(
        "{}: {} files, {} records, {} patients, {} violations",
        dir.display(),
        report.files,
        report.records,
        report.patients,
        report.violations.len()
    );

    if !report.is_clean() {
        std::process::exit(1);
    }
}
