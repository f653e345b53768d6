//! Synthetic directory reader: Implementation of ObservationSource.
//!
//! Loads the whole synth root into memory once. Malformed files and rows
//! are logged and skipped; they never abort the load.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::de::DeserializeOwned;

use super::{RecordsFile, SynthError, FHIR_DIR, IMAGING_FILE, RISK_FACTORS_FILE, WEARABLES_DIR};
use crate::domain::{parse_day, ImagingRow, ObservationBundle, RiskFactorRow, Vitals, WearableRow};
use crate::ports::ObservationSource;

type DayEvents = BTreeMap<NaiveDate, BTreeMap<String, u32>>;

/// Whole-history wearable summary for one patient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WearableSummary {
    pub days: usize,
    pub hr_mean: Option<f64>,
    pub steps_mean: Option<f64>,
    pub sleep_mean: Option<f64>,
    /// Fraction of days missing hr or steps
    pub missing_rate: f64,
}

/// In-memory view of a synthetic data directory.
#[derive(Debug, Default)]
pub struct SynthDirectory {
    root: PathBuf,
    wearables: BTreeMap<String, BTreeMap<NaiveDate, Vitals>>,
    imaging: BTreeMap<String, ImagingRow>,
    risk_factors: BTreeMap<String, RiskFactorRow>,
    events: BTreeMap<String, DayEvents>,
    skipped_rows: usize,
}

impl SynthDirectory {
    /// Load a synth root.
    ///
    /// # Errors
    /// Returns `SynthError::NotFound` if the wearables directory is missing,
    /// or an I/O error if it cannot be listed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SynthError> {
        let root = root.into();
        let wearable_root = root.join(WEARABLES_DIR);
        if !wearable_root.is_dir() {
            return Err(SynthError::NotFound(wearable_root));
        }

        let mut dir = Self {
            root: root.clone(),
            ..Self::default()
        };

        let mut files: Vec<PathBuf> = fs::read_dir(&wearable_root)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        for path in files {
            dir.load_wearable_file(&path);
        }

        dir.imaging = dir
            .load_keyed(&root.join(IMAGING_FILE), |r: &ImagingRow| r.patient_id.clone());
        dir.risk_factors = dir
            .load_keyed(&root.join(RISK_FACTORS_FILE), |r: &RiskFactorRow| r.patient_id.clone());
        dir.load_events(&root.join(FHIR_DIR));

        tracing::info!(
            "Loaded synthetic data from {}: {} patients, {} skipped rows",
            root.display(),
            dir.wearables.len(),
            dir.skipped_rows
        );
        Ok(dir)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rows dropped as malformed during load.
    #[must_use]
    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    fn read_records(&mut self, path: &Path) -> Option<Vec<serde_json::Value>> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("Skipping unreadable records file {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str::<RecordsFile<serde_json::Value>>(&text) {
            Ok(file) => Some(file.rows),
            Err(e) => {
                tracing::warn!("Skipping malformed records file {}: {}", path.display(), e);
                None
            }
        }
    }

    fn parse_rows<T: DeserializeOwned>(&mut self, path: &Path, rows: Vec<serde_json::Value>) -> Vec<T> {
        let mut parsed = Vec::with_capacity(rows.len());
        for (idx, row) in rows.into_iter().enumerate() {
            match serde_json::from_value::<T>(row) {
                Ok(r) => parsed.push(r),
                Err(e) => {
                    self.skipped_rows += 1;
                    tracing::warn!("Skipping malformed row {} in {}: {}", idx, path.display(), e);
                }
            }
        }
        parsed
    }

    fn load_wearable_file(&mut self, path: &Path) {
        let Some(raw) = self.read_records(path) else {
            return;
        };
        for row in self.parse_rows::<WearableRow>(path, raw) {
            let Some(day) = row.day() else {
                self.skipped_rows += 1;
                tracing::warn!("Skipping wearable row with bad timestamp {:?}", row.timestamp);
                continue;
            };
            let days = self.wearables.entry(row.patient_id.clone()).or_default();
            if days.contains_key(&day) {
                self.skipped_rows += 1;
                tracing::warn!("Skipping duplicate wearable row for {} on {}", row.patient_id, day);
                continue;
            }
            days.insert(day, row.vitals());
        }
    }

    fn load_keyed<T, F>(&mut self, path: &Path, key: F) -> BTreeMap<String, T>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> String,
    {
        if !path.exists() {
            tracing::debug!("Optional records file absent: {}", path.display());
            return BTreeMap::new();
        }
        let Some(raw) = self.read_records(path) else {
            return BTreeMap::new();
        };
        self.parse_rows::<T>(path, raw)
            .into_iter()
            .map(|r| (key(&r), r))
            .collect()
    }

    fn load_events(&mut self, fhir_root: &Path) {
        let Ok(entries) = fs::read_dir(fhir_root) else {
            tracing::debug!("No FHIR events directory at {}", fhir_root.display());
            return;
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "ndjson"))
            .collect();
        files.sort();

        for path in files {
            let text = match fs::read_to_string(&path) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!("Skipping unreadable event file {}: {}", path.display(), e);
                    continue;
                }
            };
            for (idx, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<serde_json::Value>(line)
                    .ok()
                    .and_then(|event| event_key(&event))
                {
                    Some((pid, day, resource)) => {
                        *self
                            .events
                            .entry(pid)
                            .or_default()
                            .entry(day)
                            .or_default()
                            .entry(resource)
                            .or_insert(0) += 1;
                    }
                    None => {
                        self.skipped_rows += 1;
                        tracing::warn!("Skipping malformed event line {} in {}", idx + 1, path.display());
                    }
                }
            }
        }
    }

    #[must_use]
    pub fn imaging(&self, patient_id: &str) -> Option<&ImagingRow> {
        self.imaging.get(patient_id)
    }

    #[must_use]
    pub fn risk_factors(&self, patient_id: &str) -> Option<&RiskFactorRow> {
        self.risk_factors.get(patient_id)
    }

    /// Summary over every wearable day recorded for a patient.
    #[must_use]
    pub fn wearable_summary(&self, patient_id: &str) -> Option<WearableSummary> {
        let days = self.wearables.get(patient_id)?;
        if days.is_empty() {
            return None;
        }
        let mean = |values: Vec<f64>| {
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
        };
        let missing = days
            .values()
            .filter(|v| v.hr.is_none() || v.steps.is_none())
            .count();

        Some(WearableSummary {
            days: days.len(),
            hr_mean: mean(days.values().filter_map(|v| v.hr).collect()),
            steps_mean: mean(days.values().filter_map(|v| v.steps).collect()),
            sleep_mean: mean(days.values().filter_map(|v| v.sleep_duration_h).collect()),
            missing_rate: missing as f64 / days.len() as f64,
        })
    }
}

/// (patient id, day, resource type) of a FHIR-shaped event.
fn event_key(event: &serde_json::Value) -> Option<(String, NaiveDate, String)> {
    let resource = event.get("resourceType")?.as_str()?.to_string();
    let pid = event
        .get("subject")?
        .get("reference")?
        .as_str()?
        .strip_prefix("Patient/")?
        .to_string();
    let ts = event
        .get("period")
        .and_then(|p| p.get("start"))
        .or_else(|| event.get("effectiveDateTime"))
        .or_else(|| event.get("authoredOn"))
        .or_else(|| event.get("recordedDate"))
        .or_else(|| event.get("performedDateTime"))?
        .as_str()?;
    Some((pid, parse_day(ts)?, resource))
}

impl ObservationSource for SynthDirectory {
    type Error = SynthError;

    fn patient_ids(&self) -> Vec<String> {
        self.wearables.keys().cloned().collect()
    }

    fn earliest_day(&self) -> Option<NaiveDate> {
        self.wearables
            .values()
            .filter_map(|days| days.keys().next().copied())
            .min()
    }

    fn latest_day(&self) -> Option<NaiveDate> {
        self.wearables
            .values()
            .filter_map(|days| days.keys().next_back().copied())
            .max()
    }

    fn observation(
        &self,
        patient_id: &str,
        day: NaiveDate,
    ) -> Result<Option<ObservationBundle>, Self::Error> {
        let vitals = self.wearables.get(patient_id).and_then(|d| d.get(&day)).copied();
        let events = self
            .events
            .get(patient_id)
            .and_then(|d| d.get(&day))
            .cloned()
            .unwrap_or_default();

        // Events without a wearable row still reach the snapshot; empty
        // vitals make the update step carry the twin forward.
        let vitals = match vitals {
            Some(v) => v,
            None if !events.is_empty() => Vitals::default(),
            None => return Ok(None),
        };

        Ok(Some(ObservationBundle {
            patient_id: patient_id.to_string(),
            day,
            vitals,
            risk_factors: self.risk_factors.get(patient_id).cloned(),
            imaging: self.imaging.get(patient_id).cloned(),
            events,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::synth::{generate_synthetic_data, SynthConfig};
    use crate::adapters::uci::{load_uci_str, MINI_CSV};

    fn end() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 28).expect("valid date")
    }

    #[test]
    fn test_reads_generated_directory() {
        let cohort = load_uci_str(MINI_CSV).expect("Should load");
        let dir = tempfile::tempdir().expect("Should create temp dir");
        generate_synthetic_data(
            &cohort,
            &SynthConfig { seed: 7, days: 12, end_date: end() },
            dir.path(),
        )
        .expect("Should generate");

        let source = SynthDirectory::open(dir.path()).expect("Should open");
        assert_eq!(source.patient_ids().len(), cohort.len());
        assert_eq!(source.latest_day(), Some(end()));
        assert_eq!(source.earliest_day(), Some(end() - chrono::Duration::days(11)));
        assert_eq!(source.skipped_rows(), 0);

        let pid = &cohort[0].patient_id;
        let bundle = source
            .observation(pid, end())
            .expect("Should read")
            .expect("Should have a row for the last day");
        assert_eq!(&bundle.patient_id, pid);
        assert!(bundle.risk_factors.is_some());
        assert!(bundle.imaging.is_some());

        let summary = source.wearable_summary(pid).expect("Should summarize");
        assert_eq!(summary.days, 12);
        assert!((0.0..=1.0).contains(&summary.missing_rate));

        let first_day = end() - chrono::Duration::days(11);
        let day0 = source
            .observation(pid, first_day)
            .expect("Should read")
            .expect("Should have day 0");
        // offset 0 always emits an observation panel
        assert_eq!(day0.events.get("Observation"), Some(&1));

        assert!(source
            .observation(pid, end() + chrono::Duration::days(1))
            .expect("Should read")
            .is_none());
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let wearables = dir.path().join(WEARABLES_DIR);
        fs::create_dir_all(&wearables).expect("Should create dir");

        let body = serde_json::json!({
            "schema": {},
            "rows": [
                { "patient_id": "pid_a", "timestamp": "2026-01-01T12:00:00+00:00",
                  "hr": 70.0, "sbp": 120.0, "dbp": 80.0, "steps": 7000.0,
                  "sleep_duration_h": 7.0, "sleep_efficiency": 0.9 },
                { "patient_id": "pid_a", "timestamp": "not-a-date",
                  "hr": 70.0, "sbp": 120.0, "dbp": 80.0, "steps": 7000.0,
                  "sleep_duration_h": 7.0, "sleep_efficiency": 0.9 },
                { "patient_id": "pid_a", "timestamp": "2026-01-02T12:00:00+00:00",
                  "hr": "fast" },
                { "patient_id": "pid_a", "timestamp": "2026-01-01T12:00:00+00:00",
                  "hr": 90.0, "sbp": 150.0, "dbp": 80.0, "steps": 7000.0,
                  "sleep_duration_h": 7.0, "sleep_efficiency": 0.9 }
            ]
        });
        fs::write(wearables.join("pid_a.json"), body.to_string()).expect("Should write");
        fs::write(wearables.join("pid_b.json"), "{ truncated").expect("Should write");

        let source = SynthDirectory::open(dir.path()).expect("Should open");
        assert_eq!(source.patient_ids(), vec!["pid_a".to_string()]);
        assert_eq!(source.skipped_rows(), 3);

        let day = NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid date");
        let bundle = source
            .observation("pid_a", day)
            .expect("Should read")
            .expect("Should exist");
        // first row for a day wins
        assert_eq!(bundle.vitals.hr, Some(70.0));
        assert!(bundle.risk_factors.is_none());
    }

    #[test]
    fn test_events_survive_missing_wearable_row() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let wearables = dir.path().join(WEARABLES_DIR);
        fs::create_dir_all(&wearables).expect("Should create dir");
        let body = serde_json::json!({
            "schema": {},
            "rows": [
                { "patient_id": "pid_a", "timestamp": "2026-01-01T12:00:00+00:00",
                  "hr": 70.0, "sbp": 120.0, "dbp": 80.0, "steps": 7000.0,
                  "sleep_duration_h": 7.0, "sleep_efficiency": 0.9 }
            ]
        });
        fs::write(wearables.join("pid_a.json"), body.to_string()).expect("Should write");

        let fhir = dir.path().join(FHIR_DIR);
        fs::create_dir_all(&fhir).expect("Should create dir");
        let encounter = serde_json::json!({
            "resourceType": "Encounter",
            "subject": { "reference": "Patient/pid_a" },
            "period": { "start": "2026-01-02T09:00:00+00:00" }
        });
        fs::write(fhir.join("Encounter.ndjson"), format!("{encounter}\n")).expect("Should write");

        let source = SynthDirectory::open(dir.path()).expect("Should open");
        let day2 = NaiveDate::from_ymd_opt(2026, 1, 2).expect("valid date");
        let bundle = source
            .observation("pid_a", day2)
            .expect("Should read")
            .expect("Events alone should yield a bundle");
        assert!(!bundle.vitals.is_usable());
        assert_eq!(bundle.events.get("Encounter"), Some(&1));

        let day3 = NaiveDate::from_ymd_opt(2026, 1, 3).expect("valid date");
        assert!(source.observation("pid_a", day3).expect("Should read").is_none());
    }

    #[test]
    fn test_missing_root() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        assert!(matches!(
            SynthDirectory::open(dir.path().join("absent")),
            Err(SynthError::NotFound(_))
        ));
    }

    #[test]
    fn test_event_key_variants() {
        let enc = serde_json::json!({
            "resourceType": "Encounter",
            "subject": { "reference": "Patient/pid_a" },
            "period": { "start": "2026-01-03T12:00:00+00:00" }
        });
        let (pid, day, resource) = event_key(&enc).expect("Should key");
        assert_eq!(pid, "pid_a");
        assert_eq!(day, NaiveDate::from_ymd_opt(2026, 1, 3).expect("valid date"));
        assert_eq!(resource, "Encounter");

        let med = serde_json::json!({
            "resourceType": "MedicationRequest",
            "subject": { "reference": "Patient/pid_b" },
            "authoredOn": "2026-01-04T12:00:00+00:00"
        });
        assert!(event_key(&med).is_some());

        let orphan = serde_json::json!({ "resourceType": "Procedure" });
        assert!(event_key(&orphan).is_none());
    }
}
