//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports to implement
//! the core use cases of the pipeline.

pub mod audit;
pub mod baseline;
pub mod cohort;
mod drift;
mod recalibration;
pub mod report;
mod update_loop;
mod update_step;

pub use audit::{audit_snapshots, AuditReport, Violation};
pub use baseline::{run_baseline, train_and_evaluate, BaselineConfig, BaselineError, BaselineMetrics};
pub use cohort::{aggregate_features, ingest_cohort, merge_synth_features};
pub use drift::{DriftCheck, DriftDetector};
pub use recalibration::{Recalibration, Recalibrator};
pub use report::{write_baseline_summary, write_summary};
pub use update_loop::{CohortIndex, DaySummary, RunSummary, TwinUpdateService, DEFAULT_AGE};
pub use update_step::{DayOutcome, UpdateStep};
