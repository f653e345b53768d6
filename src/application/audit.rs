//! Read a snapshot directory back and check its invariants.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::adapters::jsonl::{list_snapshot_files, read_snapshot_file};
use crate::TwinError;

/// One broken invariant found in the snapshots.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Violation {
    #[error("{path}: unreadable snapshot ({reason})")]
    Unreadable { path: PathBuf, reason: String },

    #[error("{day}: risk {risk} for {patient_id} outside [0, 1]")]
    RiskOutOfBounds {
        day: NaiveDate,
        patient_id: String,
        risk: f64,
    },

    #[error("file for {file_day} holds a record for {record_day} ({patient_id})")]
    DayMismatch {
        file_day: NaiveDate,
        record_day: NaiveDate,
        patient_id: String,
    },

    #[error("{day}: more than one record for {patient_id}")]
    Duplicate { day: NaiveDate, patient_id: String },

    #[error("{patient_id}: day {next} does not follow {previous}")]
    NotContiguous {
        patient_id: String,
        previous: NaiveDate,
        next: NaiveDate,
    },
}

/// Outcome of an audit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditReport {
    pub files: usize,
    pub records: usize,
    pub patients: usize,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Audit every `state_<day>.jsonl` under `root`.
///
/// A malformed file is reported as a violation, not an error.
///
/// # Errors
/// Returns error only if the directory cannot be listed.
pub fn audit_snapshots(root: &Path) -> Result<AuditReport, TwinError> {
    let files = list_snapshot_files(root)?;
    let mut report = AuditReport {
        files: files.len(),
        ..AuditReport::default()
    };
    let mut last_seen: BTreeMap<String, NaiveDate> = BTreeMap::new();

    for (file_day, path) in files {
        let states = match read_snapshot_file(&path) {
            Ok(s) => s,
            Err(e) => {
                report.violations.push(Violation::Unreadable {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let mut seen_today = BTreeSet::new();
        for state in states {
            report.records += 1;
            let pid = state.patient_id;

            if !(0.0..=1.0).contains(&state.risk) {
                report.violations.push(Violation::RiskOutOfBounds {
                    day: state.day,
                    patient_id: pid.clone(),
                    risk: state.risk,
                });
            }
            if state.day != file_day {
                report.violations.push(Violation::DayMismatch {
                    file_day,
                    record_day: state.day,
                    patient_id: pid.clone(),
                });
            }
            if !seen_today.insert(pid.clone()) {
                report.violations.push(Violation::Duplicate {
                    day: file_day,
                    patient_id: pid,
                });
                continue;
            }

            if let Some(previous) = last_seen.insert(pid.clone(), state.day) {
                if previous.succ_opt() != Some(state.day) {
                    report.violations.push(Violation::NotContiguous {
                        patient_id: pid,
                        previous,
                        next: state.day,
                    });
                }
            }
        }
    }

    report.patients = last_seen.len();
    if report.is_clean() {
        tracing::info!(
            "Audit clean: {} files, {} records, {} patients",
            report.files,
            report.records,
            report.patients
        );
    } else {
        tracing::warn!("Audit found {} violations", report.violations.len());
    }
    Ok(report)
}
