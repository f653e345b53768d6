//! Markdown summaries: the update-loop run and the baseline evaluation.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::baseline::BaselineMetrics;
use super::update_loop::RunSummary;
use crate::TwinError;

/// Default file name of the run summary.
pub const SUMMARY_FILE: &str = "update_summary.md";

/// Default file name of the baseline evaluation summary.
pub const BASELINE_SUMMARY_FILE: &str = "summary.md";

const DISCLAIMER: &str = "> Research prototype only. Risk values are heuristics over synthetic data; \
this project is non-clinical and must not be used for diagnosis or treatment decisions.";

/// Render the run summary as Markdown.
#[must_use]
pub fn render_summary(run: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Twin Update Summary");
    let _ = writeln!(out);
    let _ = writeln!(out, "Range: {} to {} ({} days)", run.start, run.end, run.days.len());
    let _ = writeln!(out, "Tracked patients: {}", run.tracked_patients);
    if run.skipped_patients > 0 {
        let _ = writeln!(out, "Skipped (not in cohort): {}", run.skipped_patients);
    }
    let _ = writeln!(out, "Drift flags: {}", run.total_drift_flags());
    let _ = writeln!(out, "Recalibrations: {}", run.total_recalibrations());
    let _ = writeln!(out);
    let _ = writeln!(out, "| Day | Patients | Observed | Mean risk | Drift | Recalibrated |");
    let _ = writeln!(out, "|---|---:|---:|---:|---:|---:|");
    for day in &run.days {
        let mean = day
            .mean_risk
            .map_or_else(|| "-".to_string(), |r| format!("{r:.4}"));
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            day.day, day.patients, day.observed, mean, day.drift_count, day.recalibrated_count
        );
    }
    let _ = writeln!(out);
    out.push_str(DISCLAIMER);
    out.push('\n');
    out
}

/// Render baseline metrics as a Markdown table.
#[must_use]
pub fn render_baseline_summary(metrics: &BaselineMetrics, generated: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Baseline Evaluation Summary");
    let _ = writeln!(out);
    let _ = writeln!(out, "Generated: {}", generated.to_rfc3339());
    let _ = writeln!(
        out,
        "Split: {} train / {} test rows",
        metrics.train_rows, metrics.test_rows
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "| Metric | Value |");
    let _ = writeln!(out, "|---|---:|");
    for (name, value) in [
        ("auroc", metrics.auroc),
        ("auprc", metrics.auprc),
        ("accuracy", metrics.accuracy),
        ("f1", metrics.f1),
        ("brier_score", metrics.brier_score),
    ] {
        let _ = writeln!(out, "| {name} | {value:.4} |");
    }
    let _ = writeln!(out);
    out.push_str(DISCLAIMER);
    out.push('\n');
    out
}

fn write_markdown(path: &Path, text: &str) -> Result<PathBuf, TwinError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    Ok(path.to_path_buf())
}

/// Write the summary to `path`, creating parent directories.
///
/// # Errors
/// Returns error on I/O failure.
pub fn write_summary(run: &RunSummary, path: &Path) -> Result<PathBuf, TwinError> {
    let written = write_markdown(path, &render_summary(run))?;
    tracing::info!("Wrote run summary to {}", path.display());
    Ok(written)
}

/// Write the baseline summary to `path`, stamped with the current time.
///
/// # Errors
/// Returns error on I/O failure.
pub fn write_baseline_summary(metrics: &BaselineMetrics, path: &Path) -> Result<PathBuf, TwinError> {
    let written = write_markdown(path, &render_baseline_summary(metrics, Utc::now()))?;
    tracing::info!("Wrote baseline summary to {}", path.display());
    Ok(written)
}
