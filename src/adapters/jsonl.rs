//! JSON-lines adapter: Implementation of SnapshotSink.
//!
//! One file per simulated day, `state_<YYYY-MM-DD>.jsonl`, one line per
//! patient. Files are opened with create-new semantics so a day can never be
//! overwritten once written.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::domain::PatientState;
use crate::ports::SnapshotSink;

const FILE_PREFIX: &str = "state_";
const FILE_SUFFIX: &str = ".jsonl";

/// Error type for snapshot operations.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot already exists and will not be overwritten: {0}")]
    AlreadyExists(PathBuf),

    #[error("Snapshot {path} line {line}: {source}")]
    Malformed {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// File name for a given day.
#[must_use]
pub fn snapshot_file_name(day: NaiveDate) -> String {
    format!("{FILE_PREFIX}{}{FILE_SUFFIX}", day.format("%Y-%m-%d"))
}

/// Day encoded in a snapshot file name, if it follows the convention.
#[must_use]
pub fn day_from_file_name(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

/// Writes per-day snapshot files under a root directory.
#[derive(Debug)]
pub struct JsonlSnapshotSink {
    root: PathBuf,
}

impl JsonlSnapshotSink {
    /// Create a sink rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SnapshotSink for JsonlSnapshotSink {
    type Error = SnapshotError;

    fn write_day(&mut self, day: NaiveDate, states: &[PatientState]) -> Result<PathBuf, Self::Error> {
        let path = self.root.join(snapshot_file_name(day));

        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(SnapshotError::AlreadyExists(path));
            }
            Err(e) => return Err(e.into()),
        };

        let mut writer = BufWriter::new(file);
        for state in states {
            serde_json::to_writer(&mut writer, state)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        tracing::debug!("Wrote {} states to {}", states.len(), path.display());
        Ok(path)
    }
}

/// Read one snapshot file.
///
/// # Errors
/// Returns error on I/O failure or a malformed line.
pub fn read_snapshot_file(path: &Path) -> Result<Vec<PatientState>, SnapshotError> {
    let text = fs::read_to_string(path)?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| SnapshotError::Malformed {
                path: path.to_path_buf(),
                line: idx + 1,
                source,
            })
        })
        .collect()
}

/// List snapshot files in a directory, ordered by day.
///
/// Files not following the naming convention are ignored.
///
/// # Errors
/// Returns error if the directory cannot be read.
pub fn list_snapshot_files(root: &Path) -> Result<Vec<(NaiveDate, PathBuf)>, SnapshotError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(day) = name.to_str().and_then(day_from_file_name) {
            files.push((day, entry.path()));
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PatientTwin;

    fn state(pid: &str, day: NaiveDate, risk: f64) -> PatientState {
        let mut twin = PatientTwin::new(14, 0.3, 55.0);
        twin.state.patient_id = pid.to_string();
        twin.state.day = day;
        twin.state.risk = risk;
        twin.state
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).expect("valid date")
    }

    #[test]
    fn test_file_name_round_trip() {
        assert_eq!(snapshot_file_name(day(5)), "state_2026-01-05.jsonl");
        assert_eq!(day_from_file_name("state_2026-01-05.jsonl"), Some(day(5)));
        assert!(day_from_file_name("state_2026-01-05.json").is_none());
        assert!(day_from_file_name("notes.txt").is_none());
    }

    #[test]
    fn test_write_and_read_day() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let mut sink = JsonlSnapshotSink::new(dir.path()).expect("Should create sink");

        let states = vec![state("pid_a", day(1), 0.2), state("pid_b", day(1), 0.4)];
        let path = sink.write_day(day(1), &states).expect("Should write");

        let text = fs::read_to_string(&path).expect("Should read");
        assert_eq!(text.lines().count(), 2);

        let back = read_snapshot_file(&path).expect("Should parse");
        assert_eq!(back, states);
    }

    #[test]
    fn test_never_overwrites() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let mut sink = JsonlSnapshotSink::new(dir.path()).expect("Should create sink");

        sink.write_day(day(1), &[state("pid_a", day(1), 0.2)])
            .expect("Should write");
        let err = sink
            .write_day(day(1), &[state("pid_a", day(1), 0.9)])
            .expect_err("Should refuse overwrite");
        assert!(matches!(err, SnapshotError::AlreadyExists(_)));

        let back = read_snapshot_file(&dir.path().join(snapshot_file_name(day(1))))
            .expect("Should parse");
        assert!((back[0].risk - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_day_writes_empty_file() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let mut sink = JsonlSnapshotSink::new(dir.path()).expect("Should create sink");
        let path = sink.write_day(day(2), &[]).expect("Should write");
        assert!(read_snapshot_file(&path).expect("Should parse").is_empty());
    }

    #[test]
    fn test_list_orders_by_day_and_skips_foreign_files() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let mut sink = JsonlSnapshotSink::new(dir.path()).expect("Should create sink");
        sink.write_day(day(3), &[]).expect("Should write");
        sink.write_day(day(1), &[]).expect("Should write");
        fs::write(dir.path().join("README.md"), "x").expect("Should write");

        let files = list_snapshot_files(dir.path()).expect("Should list");
        let days: Vec<_> = files.iter().map(|(d, _)| *d).collect();
        assert_eq!(days, vec![day(1), day(3)]);
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let path = dir.path().join(snapshot_file_name(day(1)));
        fs::write(&path, "{not json}\n").expect("Should write");
        assert!(matches!(
            read_snapshot_file(&path),
            Err(SnapshotError::Malformed { line: 1, .. })
        ));
    }
}
