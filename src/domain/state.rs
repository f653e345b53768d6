//! Patient twin state.
//!
//! `PatientState` is the immutable per-day snapshot that gets written out.
//! `PatientTwin` is the mutable rolling state behind it: trend windows,
//! the per-patient smoothing weight and the residuals accumulated since
//! the last recalibration.

use std::collections::{BTreeMap, VecDeque};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::hemodynamics::Hemodynamics;
use super::risk::RiskLevel;

/// Fixed-length rolling window with an incrementally maintained sum.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingWindow {
    values: VecDeque<f64>,
    sum: f64,
    capacity: usize,
}

impl RollingWindow {
    /// Create an empty window. A zero capacity is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            sum: 0.0,
            capacity,
        }
    }

    /// Push a value, evicting the oldest one when full.
    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
            }
        }
        self.values.push_back(value);
        self.sum += value;
    }

    /// Rolling mean, `None` while empty.
    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.sum / self.values.len() as f64)
        }
    }

    /// Keep only the `keep` most recent values.
    ///
    /// The sum is recomputed from scratch so accumulated float error does
    /// not survive a baseline reset.
    pub fn retain_recent(&mut self, keep: usize) {
        while self.values.len() > keep {
            self.values.pop_front();
        }
        self.sum = self.values.iter().sum();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One patient's state on one simulated day.
///
/// Field order is the serialized order of the snapshot line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientState {
    pub patient_id: String,

    pub day: NaiveDate,

    /// Smoothed risk estimate in [0, 1]
    pub risk: f64,

    pub risk_level: RiskLevel,

    /// Rolling mean systolic BP (mmHg)
    pub bp_trend: f64,

    /// Rolling mean daily steps
    pub activity_trend: f64,

    pub drift_flag: bool,

    /// |today's sbp - prior bp trend|, 0 when not observed
    pub bp_deviation: f64,

    /// |today's steps - prior activity trend|, 0 when not observed
    pub activity_deviation: f64,

    /// False when the day's observation was missing and state was carried forward
    pub observed: bool,

    /// True on the day a recalibration pass ran for this patient
    pub recalibrated: bool,

    pub last_recalibrated: Option<NaiveDate>,

    /// Smoothing weight in force after today's update
    pub smoothing_weight: f64,

    pub events_today: BTreeMap<String, u32>,

    pub hemodynamics: Option<Hemodynamics>,
}

/// Rolling state for one patient, carried between days.
#[derive(Debug, Clone)]
pub struct PatientTwin {
    /// Latest snapshot (what was written for the most recent day)
    pub state: PatientState,

    /// Unrounded risk carried into the next smoothing step
    pub risk: f64,

    pub bp_window: RollingWindow,
    pub activity_window: RollingWindow,
    pub hr_window: RollingWindow,
    pub dbp_window: RollingWindow,

    pub smoothing_weight: f64,

    /// |score - risk| for each observed day since the last recalibration
    pub residuals: Vec<f64>,

    /// Age from the cohort table (hemodynamics stub input)
    pub age: f64,
}

impl PatientTwin {
    /// Empty rolling state for a patient not yet observed.
    #[must_use]
    pub fn new(window_days: usize, smoothing_weight: f64, age: f64) -> Self {
        Self {
            state: PatientState {
                patient_id: String::new(),
                day: NaiveDate::MIN,
                risk: 0.0,
                risk_level: RiskLevel::Low,
                bp_trend: 0.0,
                activity_trend: 0.0,
                drift_flag: false,
                bp_deviation: 0.0,
                activity_deviation: 0.0,
                observed: false,
                recalibrated: false,
                last_recalibrated: None,
                smoothing_weight,
                events_today: BTreeMap::new(),
                hemodynamics: None,
            },
            risk: 0.0,
            bp_window: RollingWindow::new(window_days),
            activity_window: RollingWindow::new(window_days),
            hr_window: RollingWindow::new(window_days),
            dbp_window: RollingWindow::new(window_days),
            smoothing_weight,
            residuals: Vec::new(),
            age,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_mean_and_eviction() {
        let mut w = RollingWindow::new(3);
        assert!(w.mean().is_none());

        w.push(1.0);
        w.push(2.0);
        w.push(3.0);
        assert!((w.mean().expect("Should have mean") - 2.0).abs() < 1e-12);

        w.push(10.0);
        assert_eq!(w.len(), 3);
        assert!((w.mean().expect("Should have mean") - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_window_retain_recent() {
        let mut w = RollingWindow::new(14);
        for v in 1..=10 {
            w.push(f64::from(v));
        }
        w.retain_recent(4);
        assert_eq!(w.len(), 4);
        assert!((w.mean().expect("Should have mean") - 8.5).abs() < 1e-12);
        assert_eq!(w.capacity(), 14);
    }

    #[test]
    fn test_zero_capacity_window() {
        let mut w = RollingWindow::new(0);
        w.push(5.0);
        w.push(7.0);
        assert_eq!(w.len(), 1);
        assert!((w.mean().expect("Should have mean") - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_snapshot_field_order() {
        let twin = PatientTwin::new(14, 0.3, 55.0);
        let json = serde_json::to_string(&twin.state).expect("Should serialize");
        let pid = json.find("\"patient_id\"").expect("patient_id present");
        let day = json.find("\"day\"").expect("day present");
        let risk = json.find("\"risk\"").expect("risk present");
        let hemo = json.find("\"hemodynamics\"").expect("hemodynamics present");
        assert!(pid < day && day < risk && risk < hemo);
    }
}
