//! Cohort ingestion and feature aggregation.
//!
//! `ingest_cohort` loads the UCI CSV into the `cohort_features` table.
//! `aggregate_features` joins that table with per-patient synthetic
//! summaries and stores the result as `features_with_synth`.

use std::path::Path;

use crate::adapters::synth::{SynthDirectory, WearableSummary};
use crate::adapters::uci::load_uci_csv;
use crate::domain::hemodynamics::round_to;
use crate::domain::risk::NEUTRAL_STEPS;
use crate::domain::{CohortRecord, FeatureSchema, FeatureValue, ImagingRow, RiskFactorRow};
use crate::ports::{FeatureStore, COHORT_TABLE, MERGED_TABLE};
use crate::TwinError;

// Fills for patients missing from a synthetic file.
const NEUTRAL_IMAGING: [(&str, f64); 5] = [
    ("lvef", 55.0),
    ("lvedv", 120.0),
    ("lvesv", 54.0),
    ("wall_thickness", 10.0),
    ("cac_score_proxy", 0.0),
];
const NEUTRAL_HR: f64 = 70.0;
const NEUTRAL_SLEEP_H: f64 = 7.0;
const NEUTRAL_DECILE: f64 = 5.0;

/// Load the UCI CSV and persist it as the cohort table.
///
/// # Errors
/// Returns error if the CSV cannot be loaded or the table cannot be saved.
pub fn ingest_cohort<F>(store: &F, csv_path: &Path) -> Result<FeatureSchema, TwinError>
where
    F: FeatureStore,
    F::Error: Into<TwinError>,
{
    tracing::info!("Ingesting cohort from {}", csv_path.display());
    let records = load_uci_csv(csv_path)?;
    store.save_table(COHORT_TABLE, &records).map_err(Into::into)
}

fn imaging_columns(row: Option<&ImagingRow>) -> [(&'static str, f64); 5] {
    match row {
        Some(r) => [
            ("lvef", r.lvef),
            ("lvedv", r.lvedv),
            ("lvesv", r.lvesv),
            ("wall_thickness", r.wall_thickness),
            ("cac_score_proxy", f64::from(r.cac_score_proxy)),
        ],
        None => NEUTRAL_IMAGING,
    }
}

fn wearable_columns(summary: Option<WearableSummary>) -> [(&'static str, f64); 5] {
    let (days, hr, steps, sleep, missing) = match summary {
        Some(s) => (
            s.days as f64,
            s.hr_mean.unwrap_or(NEUTRAL_HR),
            s.steps_mean.unwrap_or(NEUTRAL_STEPS),
            s.sleep_mean.unwrap_or(NEUTRAL_SLEEP_H),
            s.missing_rate,
        ),
        None => (0.0, NEUTRAL_HR, NEUTRAL_STEPS, NEUTRAL_SLEEP_H, 1.0),
    };
    [
        ("wearable_days", days),
        ("wearable_hr_mean", round_to(hr, 3)),
        ("wearable_steps_mean", round_to(steps, 3)),
        ("wearable_sleep_mean", round_to(sleep, 3)),
        ("wearable_missing_rate", round_to(missing, 4)),
    ]
}

fn risk_factor_columns(row: Option<&RiskFactorRow>) -> [(&'static str, f64); 3] {
    match row {
        Some(r) => [
            ("apoe4_carrier", f64::from(r.apoe4_carrier)),
            ("family_history_cvd", f64::from(r.family_history_cvd)),
            ("polygenic_risk_decile", f64::from(r.polygenic_risk_decile)),
        ],
        None => [
            ("apoe4_carrier", 0.0),
            ("family_history_cvd", 0.0),
            ("polygenic_risk_decile", NEUTRAL_DECILE),
        ],
    }
}

/// Join cohort rows with synthetic imaging, wearable and risk-factor data.
///
/// Every output row carries the same columns; missing joins get neutral
/// values. Synthetic columns overwrite cohort columns of the same name.
#[must_use]
pub fn merge_synth_features(cohort: &[CohortRecord], synth: &SynthDirectory) -> Vec<CohortRecord> {
    let mut unmatched = 0usize;
    let merged: Vec<CohortRecord> = cohort
        .iter()
        .map(|record| {
            let pid = record.patient_id.as_str();
            let summary = synth.wearable_summary(pid);
            if summary.is_none() {
                unmatched += 1;
            }

            let mut out = record.clone();
            let columns = imaging_columns(synth.imaging(pid))
                .into_iter()
                .chain(wearable_columns(summary))
                .chain(risk_factor_columns(synth.risk_factors(pid)));
            for (name, value) in columns {
                out.features.insert(name.to_string(), FeatureValue::Number(value));
            }
            out
        })
        .collect();

    if unmatched > 0 {
        tracing::warn!("{} cohort patients have no wearable data; filled with neutral values", unmatched);
    }
    merged
}

/// Build and persist the merged feature table.
///
/// # Errors
/// Returns error if the cohort table is missing or fails validation, or the
/// merged table cannot be saved.
pub fn aggregate_features<F>(store: &F, synth: &SynthDirectory) -> Result<FeatureSchema, TwinError>
where
    F: FeatureStore,
    F::Error: Into<TwinError>,
{
    let cohort = store.load_table(COHORT_TABLE).map_err(Into::into)?;
    let merged = merge_synth_features(&cohort, synth);
    store.save_table(MERGED_TABLE, &merged).map_err(Into::into)
}
