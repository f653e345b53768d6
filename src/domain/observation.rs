//! Per-day observation types consumed by the twin update loop.
//!
//! Rows mirror the synthetic generator's output files. Every vital is
//! optional because the generator deliberately drops values on some days.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One wearable summary row (one patient, one day).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WearableRow {
    pub patient_id: String,

    /// ISO-8601 timestamp; only the date part is significant.
    pub timestamp: String,

    /// Heart rate (bpm)
    pub hr: Option<f64>,

    /// Systolic blood pressure (mmHg)
    pub sbp: Option<f64>,

    /// Diastolic blood pressure (mmHg)
    pub dbp: Option<f64>,

    /// Daily step count
    pub steps: Option<f64>,

    pub sleep_duration_h: Option<f64>,

    pub sleep_efficiency: Option<f64>,
}

impl WearableRow {
    /// Calendar day of this row, if the timestamp is well formed.
    #[must_use]
    pub fn day(&self) -> Option<NaiveDate> {
        parse_day(&self.timestamp)
    }

    #[must_use]
    pub fn vitals(&self) -> Vitals {
        Vitals {
            hr: self.hr,
            sbp: self.sbp,
            dbp: self.dbp,
            steps: self.steps,
            sleep_duration_h: self.sleep_duration_h,
            sleep_efficiency: self.sleep_efficiency,
        }
    }
}

/// Parse the leading `YYYY-MM-DD` of a timestamp string.
#[must_use]
pub fn parse_day(timestamp: &str) -> Option<NaiveDate> {
    let head = timestamp.get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Vital and wearable readings for a single day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    pub hr: Option<f64>,
    pub sbp: Option<f64>,
    pub dbp: Option<f64>,
    pub steps: Option<f64>,
    pub sleep_duration_h: Option<f64>,
    pub sleep_efficiency: Option<f64>,
}

impl Vitals {
    /// A day can drive an update only when heart rate and systolic BP are
    /// both present and finite.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self.hr, Some(v) if v.is_finite()) && matches!(self.sbp, Some(v) if v.is_finite())
    }

    /// Steps, ignoring non-finite values.
    #[must_use]
    pub fn finite_steps(&self) -> Option<f64> {
        self.steps.filter(|v| v.is_finite())
    }

    #[must_use]
    pub fn finite_dbp(&self) -> Option<f64> {
        self.dbp.filter(|v| v.is_finite())
    }
}

/// Static imaging-derived features for a patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagingRow {
    pub patient_id: String,
    /// Left-ventricular ejection fraction (%)
    pub lvef: f64,
    pub lvedv: f64,
    pub lvesv: f64,
    pub wall_thickness: f64,
    pub cac_score_proxy: u32,
}

/// Static genetic/familial risk factors for a patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactorRow {
    pub patient_id: String,
    pub apoe4_carrier: u8,
    pub family_history_cvd: u8,
    /// 1..=10
    pub polygenic_risk_decile: u8,
}

impl RiskFactorRow {
    /// Additive adjustment to the daily heuristic risk score.
    #[must_use]
    pub fn risk_adjustment(&self) -> f64 {
        let decile = f64::from(self.polygenic_risk_decile.clamp(1, 10));
        0.02 * f64::from(self.apoe4_carrier.min(1))
            + 0.02 * f64::from(self.family_history_cvd.min(1))
            + 0.005 * (decile - 5.0)
    }
}

/// Everything known about one patient on one simulated day.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationBundle {
    pub patient_id: String,
    pub day: NaiveDate,
    pub vitals: Vitals,
    pub risk_factors: Option<RiskFactorRow>,
    pub imaging: Option<ImagingRow>,
    /// Clinical event counts for the day, keyed by resource type.
    pub events: BTreeMap<String, u32>,
}

impl ObservationBundle {
    /// Bundle with only vitals attached.
    #[must_use]
    pub fn from_vitals(patient_id: impl Into<String>, day: NaiveDate, vitals: Vitals) -> Self {
        Self {
            patient_id: patient_id.into(),
            day,
            vitals,
            risk_factors: None,
            imaging: None,
            events: BTreeMap::new(),
        }
    }
}
