//! Seeded synthetic data generator.
//!
//! Each patient draws from its own `ChaCha20Rng` seeded with
//! `seed * 10_000 + index`, so adding or removing one patient does not
//! perturb anyone else's stream and a given seed always reproduces the same
//! files byte for byte.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration, NaiveDate};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde_json::json;

use super::{
    RecordsFile, SynthError, FHIR_DIR, FHIR_RESOURCES, IMAGING_FILE, RISK_FACTORS_FILE,
    WEARABLES_DIR,
};
use crate::domain::hemodynamics::round_to;
use crate::domain::{CohortRecord, ImagingRow, RiskFactorRow, WearableRow};

/// Generator parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthConfig {
    pub seed: u64,
    /// Number of wearable days per patient
    pub days: usize,
    /// Last generated day (inclusive)
    pub end_date: NaiveDate,
}

impl SynthConfig {
    /// Defaults: seed 42, 180 days ending today (UTC).
    #[must_use]
    pub fn ending_today() -> Self {
        Self {
            seed: 42,
            days: 180,
            end_date: chrono::Utc::now().date_naive(),
        }
    }
}

/// Paths of everything the generator wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthOutput {
    pub root: PathBuf,
    pub wearables: PathBuf,
    pub imaging: PathBuf,
    pub risk_factors: PathBuf,
    pub fhir_root: PathBuf,
}

fn clamp(value: f64, low: f64, high: f64) -> f64 {
    value.clamp(low, high)
}

/// Per-patient baseline derived from cohort features.
struct BaseMetrics {
    risk: f64,
    sbp: f64,
    dbp: f64,
    hr: f64,
    steps: f64,
    sleep_h: f64,
}

fn feature(record: &CohortRecord, column: &str, default: f64) -> f64 {
    record.number(column).unwrap_or(default)
}

fn baseline_risk(record: &CohortRecord) -> f64 {
    let age = feature(record, "age", 55.0);
    let chol = feature(record, "chol", 220.0);
    let trestbps = feature(record, "trestbps", 130.0);
    let thalch = feature(record, "thalch", 150.0);
    let oldpeak = feature(record, "oldpeak", 1.0);
    let label = f64::from(record.target);

    let risk = 0.2 + (age - 50.0) * 0.01 + (chol - 200.0) * 0.001 + (trestbps - 120.0) * 0.004
        - (thalch - 140.0) * 0.002
        + oldpeak * 0.05
        + label * 0.12;
    clamp(risk, 0.01, 0.98)
}

fn base_metrics(record: &CohortRecord, rng: &mut ChaCha20Rng) -> BaseMetrics {
    let age = feature(record, "age", 55.0);
    let bp = feature(record, "trestbps", 130.0);
    let thalch = feature(record, "thalch", 150.0);
    let label = f64::from(record.target);

    let hr = thalch * 0.55 + rng.gen_range(-8.0..8.0);
    let activity = 9000.0 - (age - 45.0) * 80.0 - label * 1000.0 + rng.gen_range(-800.0..800.0);
    let sleep_h = 7.2 - label * 0.4 + rng.gen_range(-0.6..0.4);

    BaseMetrics {
        risk: baseline_risk(record),
        sbp: clamp(bp + rng.gen_range(-8.0..10.0), 95.0, 210.0),
        dbp: clamp(0.62 * bp + rng.gen_range(-6.0..6.0), 55.0, 130.0),
        hr: clamp(hr, 45.0, 135.0),
        steps: clamp(activity, 1000.0, 18000.0),
        sleep_h: clamp(sleep_h, 4.5, 9.5),
    }
}

fn timestamp(day: NaiveDate) -> String {
    format!("{}T12:00:00+00:00", day.format("%Y-%m-%d"))
}

/// Drop the value with probability `p` on a missing day.
fn maybe(rng: &mut ChaCha20Rng, missing_day: bool, p: f64, value: f64) -> Option<f64> {
    if missing_day && rng.gen::<f64>() < p {
        None
    } else {
        Some(value)
    }
}

/// Generate the full synthetic dataset for a cohort.
///
/// # Errors
/// Returns error on invalid config or I/O failure.
pub fn generate_synthetic_data(
    cohort: &[CohortRecord],
    config: &SynthConfig,
    output_root: &Path,
) -> Result<SynthOutput, SynthError> {
    if config.days == 0 {
        return Err(SynthError::InvalidConfig("days must be at least 1".to_string()));
    }
    let start = i64::try_from(config.days - 1)
        .ok()
        .and_then(Duration::try_days)
        .and_then(|span| config.end_date.checked_sub_signed(span))
        .ok_or_else(|| SynthError::InvalidConfig(format!("days {} too large", config.days)))?;

    let wearable_root = output_root.join(WEARABLES_DIR);
    let fhir_root = output_root.join(FHIR_DIR);
    fs::create_dir_all(&wearable_root)?;
    fs::create_dir_all(&fhir_root)?;

    let mut resource_rows: BTreeMap<&str, Vec<serde_json::Value>> =
        FHIR_RESOURCES.iter().map(|r| (*r, Vec::new())).collect();
    let mut imaging_rows = Vec::with_capacity(cohort.len());
    let mut risk_rows = Vec::with_capacity(cohort.len());

    for (idx, record) in cohort.iter().enumerate() {
        let pid = record.patient_id.as_str();
        let mut rng =
            ChaCha20Rng::seed_from_u64(config.seed.wrapping_mul(10_000).wrapping_add(idx as u64));
        let base = base_metrics(record, &mut rng);

        imaging_rows.push(ImagingRow {
            patient_id: pid.to_string(),
            lvef: round_to(clamp(65.0 - base.risk * 28.0 + rng.gen_range(-5.0..4.0), 20.0, 75.0), 1),
            lvedv: round_to(clamp(110.0 + base.risk * 55.0 + rng.gen_range(-12.0..12.0), 65.0, 260.0), 1),
            lvesv: round_to(clamp(45.0 + base.risk * 40.0 + rng.gen_range(-9.0..10.0), 20.0, 180.0), 1),
            wall_thickness: round_to(clamp(9.0 + base.risk * 5.0 + rng.gen_range(-1.2..1.2), 6.0, 18.0), 2),
            cac_score_proxy: clamp(base.risk * 280.0 + rng.gen_range(0.0..140.0), 0.0, 700.0) as u32,
        });

        risk_rows.push(RiskFactorRow {
            patient_id: pid.to_string(),
            apoe4_carrier: u8::from(rng.gen::<f64>() < 0.1 + 0.2 * base.risk),
            family_history_cvd: u8::from(rng.gen::<f64>() < 0.2 + 0.5 * base.risk),
            polygenic_risk_decile: clamp((base.risk * 10.0 + rng.gen_range(-1.0..1.0)).round(), 1.0, 10.0) as u8,
        });

        let mut wearable_rows = Vec::with_capacity(config.days);
        for offset in 0..config.days {
            let day = start + Duration::days(offset as i64);
            let weekday = day.weekday().num_days_from_monday();
            let circadian = if weekday < 5 { 1.12 } else { 0.88 };
            let missing_day = rng.gen::<f64>() < 0.08;

            let hr = clamp(base.hr * circadian + rng.gen_range(-7.0..7.0), 40.0, 160.0);
            let sbp = clamp(base.sbp + rng.gen_range(-10.0..10.0), 85.0, 220.0);
            let dbp = clamp(base.dbp + rng.gen_range(-8.0..8.0), 45.0, 140.0);
            let weekend_factor = if weekday > 4 { 0.9 } else { 1.0 };
            let steps = clamp(
                base.steps * (0.75 + 0.35 * rng.gen::<f64>()) * weekend_factor,
                0.0,
                25000.0,
            );
            let sleep_h = clamp(base.sleep_h + rng.gen_range(-1.2..1.0), 3.5, 10.5);
            let sleep_eff = clamp(0.88 - base.risk * 0.13 + rng.gen_range(-0.08..0.05), 0.55, 0.98);

            wearable_rows.push(WearableRow {
                patient_id: pid.to_string(),
                timestamp: timestamp(day),
                hr: maybe(&mut rng, missing_day, 0.5, round_to(hr, 1)),
                sbp: maybe(&mut rng, missing_day, 0.6, round_to(sbp, 1)),
                dbp: maybe(&mut rng, missing_day, 0.6, round_to(dbp, 1)),
                steps: if missing_day { None } else { Some(steps.trunc()) },
                sleep_duration_h: maybe(&mut rng, missing_day, 0.5, round_to(sleep_h, 2)),
                sleep_efficiency: maybe(&mut rng, missing_day, 0.5, round_to(sleep_eff, 3)),
            });

            emit_events(&mut resource_rows, &mut rng, pid, day, offset, base.risk, (sbp, dbp, hr));
        }

        RecordsFile::new(wearable_rows)?.write(&wearable_root.join(format!("{pid}.json")))?;
    }

    for (resource, rows) in &resource_rows {
        let path = fhir_root.join(format!("{}.ndjson", resource.to_lowercase()));
        let mut file = fs::File::create(&path)?;
        for row in rows {
            serde_json::to_writer(&mut file, row)?;
            file.write_all(b"\n")?;
        }
    }

    let imaging = output_root.join(IMAGING_FILE);
    let risk_factors = output_root.join(RISK_FACTORS_FILE);
    RecordsFile::new(imaging_rows)?.write(&imaging)?;
    RecordsFile::new(risk_rows)?.write(&risk_factors)?;

    tracing::info!(
        "Generated synthetic data for {} patients over {} days ({} to {})",
        cohort.len(),
        config.days,
        start,
        config.end_date
    );

    Ok(SynthOutput {
        root: output_root.to_path_buf(),
        wearables: wearable_root,
        imaging,
        risk_factors,
        fhir_root,
    })
}

fn emit_events(
    rows: &mut BTreeMap<&str, Vec<serde_json::Value>>,
    rng: &mut ChaCha20Rng,
    pid: &str,
    day: NaiveDate,
    offset: usize,
    risk: f64,
    (sbp, dbp, hr): (f64, f64, f64),
) {
    let ts = timestamp(day);
    let date = day.format("%Y-%m-%d");
    let subject = json!({ "reference": format!("Patient/{pid}") });

    if rng.gen::<f64>() < 0.03 + risk * 0.08 {
        let class = if rng.gen::<f64>() < 0.8 { "outpatient" } else { "emergency" };
        push(rows, "Encounter", json!({
            "resourceType": "Encounter",
            "id": format!("enc-{pid}-{date}"),
            "subject": subject,
            "period": { "start": ts },
            "class": { "code": class },
        }));
    }

    if offset % 30 == 0 || rng.gen::<f64>() < 0.04 {
        push(rows, "Observation", json!({
            "resourceType": "Observation",
            "id": format!("obs-{pid}-{date}"),
            "subject": subject,
            "effectiveDateTime": ts,
            "code": { "coding": [{ "system": "placeholder-lab", "code": "bp_panel" }] },
            "component": [
                { "code": { "text": "SBP" }, "valueQuantity": { "value": round_to(sbp, 1) } },
                { "code": { "text": "DBP" }, "valueQuantity": { "value": round_to(dbp, 1) } },
                { "code": { "text": "HR" }, "valueQuantity": { "value": round_to(hr, 1) } },
            ],
        }));
    }

    if offset % 45 == 0 && rng.gen::<f64>() < 0.75 {
        push(rows, "MedicationRequest", json!({
            "resourceType": "MedicationRequest",
            "id": format!("med-{pid}-{date}"),
            "subject": subject,
            "authoredOn": ts,
            "medicationCodeableConcept": {
                "coding": [{ "system": "placeholder-rx", "code": "statin_or_bp_agent" }]
            },
            "status": "active",
        }));
    }

    if offset % 60 == 0 && rng.gen::<f64>() < 0.35 + risk * 0.4 {
        push(rows, "Condition", json!({
            "resourceType": "Condition",
            "id": format!("cond-{pid}-{date}"),
            "subject": subject,
            "recordedDate": ts,
            "code": { "coding": [{ "system": "placeholder-cond", "code": "cvd_risk_state" }] },
            "clinicalStatus": { "text": "active" },
        }));
    }

    if offset % 90 == 0 && rng.gen::<f64>() < 0.2 + risk * 0.3 {
        push(rows, "Procedure", json!({
            "resourceType": "Procedure",
            "id": format!("proc-{pid}-{date}"),
            "subject": subject,
            "performedDateTime": ts,
            "code": { "coding": [{ "system": "placeholder-proc", "code": "stress_test_or_echo" }] },
            "status": "completed",
        }));
    }
}

fn push(rows: &mut BTreeMap<&str, Vec<serde_json::Value>>, resource: &str, value: serde_json::Value) {
    if let Some(list) = rows.get_mut(resource) {
        list.push(value);
    }
}
