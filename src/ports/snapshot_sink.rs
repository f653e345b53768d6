//! Snapshot sink port: append-only per-day state output.

use std::path::PathBuf;

use chrono::NaiveDate;

use crate::domain::PatientState;

/// Destination for per-day patient state snapshots.
///
/// Each day is written exactly once. Implementations must refuse to
/// overwrite a day that already exists.
pub trait SnapshotSink {
    /// Error type for sink operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Write all patient states for `day`.
    ///
    /// # Returns
    /// Location of the written snapshot.
    ///
    /// # Errors
    /// Returns error if the day was already written or the write fails.
    fn write_day(&mut self, day: NaiveDate, states: &[PatientState]) -> Result<PathBuf, Self::Error>;
}
