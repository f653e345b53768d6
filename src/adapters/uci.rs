//! UCI heart disease CSV loader.
//!
//! Cleans the raw CSV into cohort records:
//! - column names are normalized (`Resting BP` → `resting_bp`)
//! - numeric columns: median imputation
//! - categorical columns: mode imputation, fallback `"unknown"`
//! - target (`target` or `num`) is binarized
//! - every row gets a stable, content-derived patient id; exact duplicate
//!   rows are told apart by their occurrence number

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::domain::{CohortRecord, FeatureValue};

/// Error type for cohort loading.
#[derive(Debug, thiserror::Error)]
pub enum CohortLoadError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV has no header row")]
    NoHeader,

    #[error("Dataset is empty")]
    Empty,

    #[error("Expected target column 'target' or 'num'")]
    NoTarget,

    #[error("Target contains missing/non-numeric value on data row {0}")]
    BadTarget(usize),
}

const MISSING_TOKENS: [&str; 6] = ["", "na", "nan", "none", "null", "?"];

static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
static UNDERSCORES: OnceLock<Regex> = OnceLock::new();

/// Lowercase, replace non-alphanumeric runs with `_`, trim `_`.
#[must_use]
pub fn normalize_column_name(name: &str) -> String {
    let non_alnum = NON_ALNUM.get_or_init(|| Regex::new(r"[^0-9a-zA-Z]+").expect("Valid regex"));
    let underscores = UNDERSCORES.get_or_init(|| Regex::new(r"_+").expect("Valid regex"));

    let lowered = name.trim().to_lowercase();
    let cleaned = non_alnum.replace_all(&lowered, "_");
    underscores
        .replace_all(&cleaned, "_")
        .trim_matches('_')
        .to_string()
}

fn is_missing(raw: &str) -> bool {
    let lowered = raw.trim().to_lowercase();
    MISSING_TOKENS.contains(&lowered.as_str())
}

fn to_number(raw: &str) -> Option<f64> {
    if is_missing(raw) {
        return None;
    }
    let text = raw.trim();
    match text.to_lowercase().as_str() {
        "true" => return Some(1.0),
        "false" => return Some(0.0),
        _ => {}
    }
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut ordered = values.to_vec();
    ordered.sort_by(f64::total_cmp);
    let mid = ordered.len() / 2;
    if ordered.len() % 2 == 1 {
        ordered[mid]
    } else {
        (ordered[mid - 1] + ordered[mid]) / 2.0
    }
}

/// Most frequent value; ties go to the value that first reached the top count.
fn mode(values: &[String]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut best: Option<(&str, usize)> = None;
    for value in values {
        let count = counts.entry(value.as_str()).or_insert(0);
        *count += 1;
        if best.map_or(true, |(_, n)| *count > n) {
            best = Some((value.as_str(), *count));
        }
    }
    best.map_or_else(|| "unknown".to_string(), |(v, _)| v.to_string())
}

/// Stable id: `pid_` + first 16 hex chars of SHA-256 over sorted `k=v`
/// feature pairs. The target is not part of the hash.
#[must_use]
pub fn stable_patient_id(features: &BTreeMap<String, FeatureValue>) -> String {
    hash_patient_id(features, None)
}

/// Id for the `occurrence`-th repeat (1-based) of an identical feature row.
fn duplicate_patient_id(features: &BTreeMap<String, FeatureValue>, occurrence: usize) -> String {
    hash_patient_id(features, Some(occurrence))
}

fn hash_patient_id(features: &BTreeMap<String, FeatureValue>, occurrence: Option<usize>) -> String {
    let mut serial = features
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("|");
    if let Some(n) = occurrence {
        serial.push_str(&format!("#dup={n}"));
    }

    let digest = Sha256::digest(serial.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("pid_{hex}")
}

/// Load and clean a UCI heart CSV from disk.
///
/// # Errors
/// Returns error if the file cannot be read or lacks a usable target.
pub fn load_uci_csv(path: &Path) -> Result<Vec<CohortRecord>, CohortLoadError> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    load_uci_reader(reader)
}

/// Load and clean UCI heart CSV text.
///
/// # Errors
/// Returns error if the text lacks a header or usable target.
pub fn load_uci_str(text: &str) -> Result<Vec<CohortRecord>, CohortLoadError> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    load_uci_reader(reader)
}

fn load_uci_reader<R: std::io::Read>(
    mut reader: csv::Reader<R>,
) -> Result<Vec<CohortRecord>, CohortLoadError> {
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(normalize_column_name)
        .collect();
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return Err(CohortLoadError::NoHeader);
    }

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut cells: Vec<String> = record.iter().map(|c| c.trim().to_string()).collect();
        cells.resize(headers.len(), String::new());
        rows.push(cells);
    }
    if rows.is_empty() {
        return Err(CohortLoadError::Empty);
    }

    let target_idx = headers
        .iter()
        .position(|h| h == "target")
        .or_else(|| headers.iter().position(|h| h == "num"))
        .ok_or(CohortLoadError::NoTarget)?;

    let feature_idx: Vec<usize> = (0..headers.len()).filter(|&i| i != target_idx).collect();

    let numeric: BTreeMap<usize, bool> = feature_idx
        .iter()
        .map(|&i| {
            let all_numeric = rows
                .iter()
                .all(|row| is_missing(&row[i]) || to_number(&row[i]).is_some());
            (i, all_numeric)
        })
        .collect();

    let mut numeric_fill: BTreeMap<usize, f64> = BTreeMap::new();
    let mut text_fill: BTreeMap<usize, String> = BTreeMap::new();
    for &i in &feature_idx {
        if numeric[&i] {
            let values: Vec<f64> = rows.iter().filter_map(|row| to_number(&row[i])).collect();
            numeric_fill.insert(i, median(&values));
        } else {
            let values: Vec<String> = rows
                .iter()
                .filter(|row| !is_missing(&row[i]))
                .map(|row| row[i].clone())
                .collect();
            text_fill.insert(i, mode(&values));
        }
    }

    let mut records = Vec::with_capacity(rows.len());
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut duplicates = 0usize;
    for (row_no, row) in rows.iter().enumerate() {
        let raw_target = to_number(&row[target_idx]).ok_or(CohortLoadError::BadTarget(row_no + 1))?;
        let target = u8::from(raw_target != 0.0);

        let mut features = BTreeMap::new();
        for &i in &feature_idx {
            let value = if numeric[&i] {
                FeatureValue::Number(to_number(&row[i]).unwrap_or(numeric_fill[&i]))
            } else if is_missing(&row[i]) {
                FeatureValue::Text(text_fill[&i].clone())
            } else {
                FeatureValue::Text(row[i].clone())
            };
            features.insert(headers[i].clone(), value);
        }

        let mut patient_id = stable_patient_id(&features);
        let mut occurrence = 0;
        while seen.contains(&patient_id) {
            occurrence += 1;
            patient_id = duplicate_patient_id(&features, occurrence);
        }
        if occurrence > 0 {
            duplicates += 1;
            tracing::debug!("Data row {} repeats an earlier row; id {}", row_no + 1, patient_id);
        }
        seen.insert(patient_id.clone());

        records.push(CohortRecord {
            patient_id,
            features,
            target,
        });
    }

    if duplicates > 0 {
        tracing::warn!("{} duplicate rows kept under occurrence-suffixed ids", duplicates);
    }
    tracing::info!(
        "Loaded UCI cohort: {} rows, {} feature columns",
        records.len(),
        feature_idx.len()
    );
    Ok(records)
}

#[cfg(test)]
pub(crate) const MINI_CSV: &str = "\
id,age,sex,cp,trestbps,chol,fbs,restecg,thalch,exang,oldpeak,slope,ca,thal,num
1,63,Male,typical angina,145,233,TRUE,lv hypertrophy,150,FALSE,2.3,downsloping,0,fixed defect,0
2,67,Male,asymptomatic,160,286,FALSE,lv hypertrophy,108,TRUE,1.5,flat,3,normal,2
3,67,Male,asymptomatic,120,229,FALSE,lv hypertrophy,129,TRUE,2.6,flat,2,reversable defect,1
4,37,Male,non-anginal,130,250,FALSE,normal,187,FALSE,3.5,downsloping,0,normal,0
5,41,Female,atypical angina,130,204,FALSE,lv hypertrophy,172,FALSE,1.4,upsloping,0,normal,0
6,56,Male,atypical angina,120,236,FALSE,normal,178,FALSE,0.8,upsloping,0,normal,1
7,62,Female,asymptomatic,140,268,FALSE,normal,160,FALSE,3.6,downsloping,2,normal,3
8,57,Female,asymptomatic,120,354,FALSE,normal,163,TRUE,0.6,upsloping,0,normal,0
9,63,Male,asymptomatic,130,254,FALSE,lv hypertrophy,147,FALSE,1.4,flat,1,reversable defect,2
10,53,Male,asymptomatic,140,203,TRUE,lv hypertrophy,155,TRUE,3.1,downsloping,0,reversable defect,1
";
