//! Twin update service: the day-by-day loop over the whole cohort.
//!
//! This service coordinates:
//! - Resolving the simulated day range from the observation source
//! - Advancing every tracked patient once per day
//! - Weekly recalibration on period boundaries
//! - Writing one append-only snapshot per day

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};

use super::recalibration::Recalibrator;
use super::update_step::{DayOutcome, UpdateStep};
use crate::config::UpdateConfig;
use crate::domain::{CohortRecord, ColumnType, FeatureSchema, PatientState, PatientTwin, SchemaError};
use crate::ports::{FeatureStore, ObservationSource, SnapshotSink, COHORT_TABLE};
use crate::TwinError;

/// Age assumed when a cohort row carries no usable age.
pub const DEFAULT_AGE: f64 = 55.0;

/// Columns the update loop reads from the cohort table.
const REQUIRED_COLUMNS: [(&str, ColumnType); 1] = [("age", ColumnType::Real)];

/// Cohort membership and the static attributes the loop needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CohortIndex {
    ages: BTreeMap<String, f64>,
}

impl CohortIndex {
    /// Build from cohort rows after checking the schema.
    ///
    /// # Errors
    /// Returns `SchemaError` if the rows are inconsistent or lack a real `age`.
    pub fn from_records(records: &[CohortRecord]) -> Result<Self, SchemaError> {
        let schema = FeatureSchema::infer(records)?;
        schema.validate(records)?;
        schema.require(&REQUIRED_COLUMNS)?;

        let ages = records
            .iter()
            .map(|r| (r.patient_id.clone(), r.number("age").unwrap_or(DEFAULT_AGE)))
            .collect();
        Ok(Self { ages })
    }

    /// Load the cohort table from a feature store.
    ///
    /// # Errors
    /// Returns error if the table is missing or fails schema checks.
    pub fn load<F>(store: &F) -> Result<Self, TwinError>
    where
        F: FeatureStore,
        F::Error: Into<TwinError>,
    {
        let records = store.load_table(COHORT_TABLE).map_err(Into::into)?;
        Ok(Self::from_records(&records)?)
    }

    #[must_use]
    pub fn age(&self, patient_id: &str) -> Option<f64> {
        self.ages.get(patient_id).copied()
    }

    #[must_use]
    pub fn contains(&self, patient_id: &str) -> bool {
        self.ages.contains_key(patient_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ages.is_empty()
    }
}

/// Aggregates for one simulated day.
#[derive(Debug, Clone, PartialEq)]
pub struct DaySummary {
    pub day: NaiveDate,
    pub snapshot: PathBuf,
    /// Patients with a snapshot line for the day
    pub patients: usize,
    pub observed: usize,
    pub mean_risk: Option<f64>,
    pub drift_count: usize,
    pub recalibrated_count: usize,
}

impl DaySummary {
    fn from_states(day: NaiveDate, snapshot: PathBuf, states: &[PatientState]) -> Self {
        let mean_risk = if states.is_empty() {
            None
        } else {
            Some(states.iter().map(|s| s.risk).sum::<f64>() / states.len() as f64)
        };
        Self {
            day,
            snapshot,
            patients: states.len(),
            observed: states.iter().filter(|s| s.observed).count(),
            mean_risk,
            drift_count: states.iter().filter(|s| s.drift_flag).count(),
            recalibrated_count: states.iter().filter(|s| s.recalibrated).count(),
        }
    }
}

/// Result of a full update-loop run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: Vec<DaySummary>,
    /// Patients that produced at least one snapshot
    pub tracked_patients: usize,
    /// Source patients absent from the cohort table
    pub skipped_patients: usize,
}

impl RunSummary {
    #[must_use]
    pub fn snapshots(&self) -> Vec<&Path> {
        self.days.iter().map(|d| d.snapshot.as_path()).collect()
    }

    #[must_use]
    pub fn total_drift_flags(&self) -> usize {
        self.days.iter().map(|d| d.drift_count).sum()
    }

    #[must_use]
    pub fn total_recalibrations(&self) -> usize {
        self.days.iter().map(|d| d.recalibrated_count).sum()
    }
}

/// Service running the daily twin update loop.
///
/// Single-threaded: each day is fully processed for every patient before
/// the next day starts.
pub struct TwinUpdateService<O, K>
where
    O: ObservationSource,
    K: SnapshotSink,
{
    source: O,
    sink: K,
    config: UpdateConfig,
    step: UpdateStep,
    recalibrator: Recalibrator,
}

impl<O, K> TwinUpdateService<O, K>
where
    O: ObservationSource,
    K: SnapshotSink,
    K::Error: Into<TwinError>,
{
    /// Create a new update service.
    ///
    /// # Errors
    /// Returns `TwinError::Config` if the config is invalid.
    pub fn new(source: O, sink: K, config: UpdateConfig) -> Result<Self, TwinError> {
        config.validate()?;
        Ok(Self {
            step: UpdateStep::new(&config),
            recalibrator: Recalibrator::from_config(&config),
            source,
            sink,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Calendar days to simulate: the last `days` days ending at the
    /// source's latest observation, never starting before its earliest.
    ///
    /// # Errors
    /// Returns error if the source is empty.
    pub fn day_range(&self) -> Result<Vec<NaiveDate>, TwinError> {
        let (first, end) = match (self.source.earliest_day(), self.source.latest_day()) {
            (Some(first), Some(end)) => (first, end),
            _ => {
                return Err(TwinError::Validation(
                    "observation source holds no days".to_string(),
                ))
            }
        };
        let start = i64::try_from(self.config.days - 1)
            .ok()
            .and_then(Duration::try_days)
            .and_then(|span| end.checked_sub_signed(span))
            .map_or(first, |s| s.max(first));
        Ok(start.iter_days().take_while(|d| *d <= end).collect())
    }

    /// Run the loop over the configured day range.
    ///
    /// Missing or unreadable observations are logged and the patient's
    /// prior state is carried forward. Snapshot write failures abort.
    ///
    /// # Errors
    /// Returns error if the day range cannot be resolved or a snapshot
    /// cannot be written.
    pub fn run(&mut self, cohort: &CohortIndex) -> Result<RunSummary, TwinError> {
        let days = self.day_range()?;
        let (start, end) = match (days.first(), days.last()) {
            (Some(s), Some(e)) => (*s, *e),
            _ => return Err(TwinError::Validation("empty day range".to_string())),
        };

        let mut patients = Vec::new();
        let mut skipped_patients = 0;
        for pid in self.source.patient_ids() {
            if cohort.contains(&pid) {
                patients.push(pid);
            } else {
                skipped_patients += 1;
                tracing::warn!("Skipping {}: not in cohort table", pid);
            }
        }
        patients.sort();

        tracing::info!(
            "Running twin update loop: {} patients, {} days ({} to {})",
            patients.len(),
            days.len(),
            start,
            end
        );

        let mut twins: BTreeMap<String, PatientTwin> = BTreeMap::new();
        let mut summaries = Vec::with_capacity(days.len());

        for (index, &day) in days.iter().enumerate() {
            let boundary = self.recalibrator.is_boundary(index);
            let mut states = Vec::with_capacity(patients.len());

            for pid in &patients {
                let bundle = match self.source.observation(pid, day) {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::warn!("Unreadable observation for {} on {}: {}", pid, day, e);
                        None
                    }
                };
                if bundle.is_none() && twins.contains_key(pid) {
                    tracing::warn!("No observation for {} on {}; carrying forward", pid, day);
                }

                let age = cohort.age(pid).unwrap_or(DEFAULT_AGE);
                let prior = twins.remove(pid);
                let (twin, outcome) = self.step.advance(prior, pid, day, bundle.as_ref(), age);
                let Some(mut twin) = twin else {
                    debug_assert_eq!(outcome, DayOutcome::NotStarted);
                    continue;
                };

                if boundary {
                    self.recalibrator.recalibrate(&mut twin, day);
                }
                states.push(twin.state.clone());
                twins.insert(pid.clone(), twin);
            }

            let path = self.sink.write_day(day, &states).map_err(Into::into)?;
            let summary = DaySummary::from_states(day, path, &states);
            tracing::debug!(
                "Day {}: {} states, {} drift, {} recalibrated",
                day,
                summary.patients,
                summary.drift_count,
                summary.recalibrated_count
            );
            summaries.push(summary);
        }

        let run = RunSummary {
            start,
            end,
            days: summaries,
            tracked_patients: twins.len(),
            skipped_patients,
        };
        tracing::info!(
            "Update loop complete: {} snapshots, {} tracked patients, {} drift flags, {} recalibrations",
            run.days.len(),
            run.tracked_patients,
            run.total_drift_flags(),
            run.total_recalibrations()
        );
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::jsonl::{read_snapshot_file, JsonlSnapshotSink};
    use crate::adapters::synth::{generate_synthetic_data, SynthConfig, SynthDirectory};
    use crate::adapters::uci::{load_uci_str, MINI_CSV};
    use crate::adapters::SnapshotError;
    use crate::domain::{FeatureValue, ObservationBundle, Vitals};
    use proptest::prelude::*;

    /// In-memory source keyed by (patient, day).
    #[derive(Default)]
    struct MemorySource {
        rows: BTreeMap<(String, NaiveDate), ObservationBundle>,
    }

    impl MemorySource {
        fn add(&mut self, pid: &str, day: NaiveDate, hr: f64, sbp: f64, steps: f64) {
            let vitals = Vitals {
                hr: Some(hr),
                sbp: Some(sbp),
                dbp: Some(80.0),
                steps: Some(steps),
                ..Vitals::default()
            };
            self.rows.insert(
                (pid.to_string(), day),
                ObservationBundle::from_vitals(pid, day, vitals),
            );
        }
    }

    impl ObservationSource for MemorySource {
        type Error = std::io::Error;

        fn patient_ids(&self) -> Vec<String> {
            let mut ids: Vec<String> = self.rows.keys().map(|(p, _)| p.clone()).collect();
            ids.dedup();
            ids
        }

        fn earliest_day(&self) -> Option<NaiveDate> {
            self.rows.keys().map(|(_, d)| *d).min()
        }

        fn latest_day(&self) -> Option<NaiveDate> {
            self.rows.keys().map(|(_, d)| *d).max()
        }

        fn observation(
            &self,
            patient_id: &str,
            day: NaiveDate,
        ) -> Result<Option<ObservationBundle>, Self::Error> {
            Ok(self.rows.get(&(patient_id.to_string(), day)).cloned())
        }
    }

    /// In-memory sink that refuses to rewrite a day.
    #[derive(Default)]
    struct MemorySink {
        days: BTreeMap<NaiveDate, Vec<PatientState>>,
    }

    impl SnapshotSink for MemorySink {
        type Error = SnapshotError;

        fn write_day(&mut self, day: NaiveDate, states: &[PatientState]) -> Result<PathBuf, Self::Error> {
            let path = PathBuf::from(format!("mem/{day}"));
            if self.days.contains_key(&day) {
                return Err(SnapshotError::AlreadyExists(path));
            }
            self.days.insert(day, states.to_vec());
            Ok(path)
        }
    }

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid date") + Duration::days(offset)
    }

    fn cohort(ids: &[&str]) -> CohortIndex {
        let records: Vec<CohortRecord> = ids
            .iter()
            .map(|id| CohortRecord {
                patient_id: (*id).to_string(),
                features: BTreeMap::from([("age".to_string(), FeatureValue::Number(60.0))]),
                target: 0,
            })
            .collect();
        CohortIndex::from_records(&records).expect("Should build cohort")
    }

    fn run_memory(source: MemorySource, config: UpdateConfig, ids: &[&str]) -> (RunSummary, MemorySink) {
        let mut service =
            TwinUpdateService::new(source, MemorySink::default(), config).expect("Should create service");
        let summary = service.run(&cohort(ids)).expect("Should run");
        (summary, service.sink)
    }

    fn history<'a>(sink: &'a MemorySink, pid: &str) -> Vec<&'a PatientState> {
        sink.days
            .values()
            .flat_map(|states| states.iter().filter(|s| s.patient_id == pid))
            .collect()
    }

    #[test]
    fn test_constant_stream_converges_without_drift() {
        let mut source = MemorySource::default();
        for d in 0..30 {
            source.add("pid_a", day(d), 82.0, 138.0, 5200.0);
        }
        let (summary, sink) = run_memory(source, UpdateConfig::default(), &["pid_a"]);
        assert_eq!(summary.days.len(), 30);

        let states = history(&sink, "pid_a");
        assert_eq!(states.len(), 30);
        assert!(states.iter().all(|s| !s.drift_flag));

        let last = states[29].risk;
        for s in &states[5..] {
            assert!((s.risk - last).abs() < 1e-4);
        }
    }

    #[test]
    fn test_day_range_ends_at_latest_observation() {
        let mut source = MemorySource::default();
        for d in 0..40 {
            source.add("pid_a", day(d), 70.0, 120.0, 7000.0);
        }
        let config = UpdateConfig {
            days: 10,
            ..UpdateConfig::default()
        };
        let (summary, sink) = run_memory(source, config, &["pid_a"]);
        assert_eq!(summary.start, day(30));
        assert_eq!(summary.end, day(39));
        assert_eq!(sink.days.len(), 10);
    }

    #[test]
    fn test_day_range_starts_at_earliest_observation() {
        let mut source = MemorySource::default();
        for d in 5..12 {
            source.add("pid_a", day(d), 70.0, 120.0, 7000.0);
        }
        let (summary, sink) = run_memory(source, UpdateConfig::default(), &["pid_a"]);
        assert_eq!(summary.start, day(5));
        assert_eq!(summary.end, day(11));
        assert_eq!(summary.days.len(), 7);
        assert!(sink.days.values().all(|states| states.len() == 1));
    }

    #[test]
    fn test_oversized_day_count_covers_whole_history() {
        let mut source = MemorySource::default();
        for d in 0..3 {
            source.add("pid_a", day(d), 70.0, 120.0, 7000.0);
        }
        let config = UpdateConfig {
            days: usize::MAX,
            ..UpdateConfig::default()
        };
        let service =
            TwinUpdateService::new(source, MemorySink::default(), config).expect("Should create service");
        let days = service.day_range().expect("Should resolve range");
        assert_eq!(days, vec![day(0), day(1), day(2)]);
    }

    #[test]
    fn test_late_start_and_gaps_stay_contiguous() {
        let mut source = MemorySource::default();
        for d in 0..14 {
            source.add("pid_a", day(d), 70.0, 120.0, 7000.0);
            if d >= 3 && d != 6 && d != 7 {
                source.add("pid_b", day(d), 90.0, 150.0, 3000.0);
            }
        }
        let (summary, sink) = run_memory(source, UpdateConfig::default(), &["pid_a", "pid_b"]);

        let b = history(&sink, "pid_b");
        assert_eq!(b.len(), 11);
        assert_eq!(b[0].day, day(3));
        for pair in b.windows(2) {
            assert_eq!(pair[1].day, pair[0].day + Duration::days(1));
        }
        assert!(!b[3].observed && !b[4].observed);
        assert!((b[3].risk - b[2].risk).abs() < f64::EPSILON);
        assert!(b[5].observed);

        assert_eq!(summary.days[0].patients, 1);
        assert_eq!(summary.days[5].patients, 2);
        assert_eq!(summary.tracked_patients, 2);
    }

    #[test]
    fn test_recalibration_exactly_on_boundaries() {
        let mut source = MemorySource::default();
        for d in 0..22 {
            source.add("pid_a", day(d), 70.0 + (d % 3) as f64 * 8.0, 125.0, 7000.0);
        }
        let (summary, sink) = run_memory(source, UpdateConfig::default(), &["pid_a"]);

        let flagged: Vec<usize> = history(&sink, "pid_a")
            .iter()
            .enumerate()
            .filter(|(_, s)| s.recalibrated)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(flagged, vec![7, 14, 21]);
        assert_eq!(summary.total_recalibrations(), 3);

        let states = history(&sink, "pid_a");
        assert_eq!(states[10].last_recalibrated, Some(day(7)));
        assert_eq!(states[21].last_recalibrated, Some(day(21)));
    }

    #[test]
    fn test_recalibration_disabled() {
        let mut source = MemorySource::default();
        for d in 0..22 {
            source.add("pid_a", day(d), 70.0, 125.0, 7000.0);
        }
        let config = UpdateConfig {
            recalibrate_weekly: false,
            ..UpdateConfig::default()
        };
        let (summary, _) = run_memory(source, config, &["pid_a"]);
        assert_eq!(summary.total_recalibrations(), 0);
    }

    #[test]
    fn test_unknown_patients_are_skipped() {
        let mut source = MemorySource::default();
        for d in 0..3 {
            source.add("pid_a", day(d), 70.0, 120.0, 7000.0);
            source.add("pid_stranger", day(d), 70.0, 120.0, 7000.0);
        }
        let (summary, sink) = run_memory(source, UpdateConfig::default(), &["pid_a"]);
        assert_eq!(summary.skipped_patients, 1);
        assert!(history(&sink, "pid_stranger").is_empty());
    }

    #[test]
    fn test_empty_source_is_an_error() {
        let mut service =
            TwinUpdateService::new(MemorySource::default(), MemorySink::default(), UpdateConfig::default())
                .expect("Should create service");
        assert!(matches!(
            service.run(&cohort(&["pid_a"])),
            Err(TwinError::Validation(_))
        ));
    }

    #[test]
    fn test_cohort_requires_real_age() {
        let records = vec![CohortRecord {
            patient_id: "pid_a".to_string(),
            features: BTreeMap::from([("sex".to_string(), FeatureValue::Text("Male".to_string()))]),
            target: 0,
        }];
        assert!(matches!(
            CohortIndex::from_records(&records),
            Err(SchemaError::MissingColumn(_))
        ));

        let records = vec![CohortRecord {
            patient_id: "pid_a".to_string(),
            features: BTreeMap::from([("age".to_string(), FeatureValue::Text("old".to_string()))]),
            target: 0,
        }];
        assert!(matches!(
            CohortIndex::from_records(&records),
            Err(SchemaError::Dtype { .. })
        ));
    }

    fn run_synth_pipeline(base: &Path) -> Vec<(String, Vec<u8>)> {
        let records = load_uci_str(MINI_CSV).expect("Should load cohort");
        let config = SynthConfig {
            seed: 7,
            days: 40,
            end_date: NaiveDate::from_ymd_opt(2026, 3, 31).expect("valid date"),
        };
        let synth_root = base.join("synth");
        generate_synthetic_data(&records, &config, &synth_root).expect("Should generate");

        let source = SynthDirectory::open(&synth_root).expect("Should open synth dir");
        let sink = JsonlSnapshotSink::new(base.join("state")).expect("Should create sink");
        let mut service =
            TwinUpdateService::new(source, sink, UpdateConfig::default()).expect("Should create service");
        let cohort = CohortIndex::from_records(&records).expect("Should build cohort");
        let summary = service.run(&cohort).expect("Should run");

        summary
            .snapshots()
            .iter()
            .map(|p| {
                let name = p
                    .file_name()
                    .and_then(|n| n.to_str())
                    .expect("file name")
                    .to_string();
                (name, std::fs::read(p).expect("Should read snapshot"))
            })
            .collect()
    }

    #[test]
    fn test_identical_inputs_give_byte_identical_snapshots() {
        let a = tempfile::tempdir().expect("Should create temp dir");
        let b = tempfile::tempdir().expect("Should create temp dir");

        let first = run_synth_pipeline(a.path());
        let second = run_synth_pipeline(b.path());
        assert_eq!(first.len(), 30);
        assert_eq!(first, second);
        assert!(first.iter().all(|(_, bytes)| !bytes.is_empty()));
    }

    #[test]
    fn test_snapshots_read_back_in_bounds() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        run_synth_pipeline(dir.path());

        let state_root = dir.path().join("state");
        for entry in std::fs::read_dir(&state_root).expect("Should list") {
            let path = entry.expect("entry").path();
            for state in read_snapshot_file(&path).expect("Should parse") {
                assert!((0.0..=1.0).contains(&state.risk));
            }
        }
    }

    #[test]
    fn test_rerun_refuses_to_overwrite() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let mut source = MemorySource::default();
        source.add("pid_a", day(0), 70.0, 120.0, 7000.0);
        let config = UpdateConfig {
            days: 1,
            ..UpdateConfig::default()
        };

        let sink = JsonlSnapshotSink::new(dir.path()).expect("Should create sink");
        let mut service = TwinUpdateService::new(source, sink, config.clone()).expect("Should create service");
        service.run(&cohort(&["pid_a"])).expect("First run should succeed");

        let mut source = MemorySource::default();
        source.add("pid_a", day(0), 70.0, 120.0, 7000.0);
        let sink = JsonlSnapshotSink::new(dir.path()).expect("Should create sink");
        let mut service = TwinUpdateService::new(source, sink, config).expect("Should create service");
        assert!(matches!(
            service.run(&cohort(&["pid_a"])),
            Err(TwinError::Snapshot(SnapshotError::AlreadyExists(_)))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Risk stays in [0, 1] and days stay contiguous for any stream,
        /// including gaps and extreme readings.
        #[test]
        fn prop_risk_bounded_and_days_contiguous(
            readings in proptest::collection::vec(
                proptest::option::of((20.0..220.0f64, 60.0..260.0f64, 0.0..40_000.0f64)),
                1..60
            ),
            weight in 0.1..0.6f64,
        ) {
            let mut source = MemorySource::default();
            for (d, reading) in readings.iter().enumerate() {
                if let Some((hr, sbp, steps)) = reading {
                    source.add("pid_a", day(d as i64), *hr, *sbp, *steps);
                }
            }
            prop_assume!(source.latest_day().is_some());
            let config = UpdateConfig {
                days: readings.len(),
                smoothing_weight: weight,
                ..UpdateConfig::default()
            };
            let (_, sink) = run_memory(source, config, &["pid_a"]);

            let states = history(&sink, "pid_a");
            prop_assert!(!states.is_empty());
            for s in &states {
                prop_assert!((0.0..=1.0).contains(&s.risk));
                prop_assert!(s.smoothing_weight >= 0.1 - 1e-9 && s.smoothing_weight <= 0.6 + 1e-9);
            }
            for pair in states.windows(2) {
                prop_assert_eq!(pair[1].day, pair[0].day + Duration::days(1));
            }
        }
    }
}
