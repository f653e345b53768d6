//! Weekly recalibration of per-patient smoothing parameters.
//!
//! Recalibration never touches snapshots already written. It only changes
//! what the twin carries into the following days.

use chrono::NaiveDate;

use crate::config::{UpdateConfig, RECALIBRATION_PERIOD_DAYS};
use crate::domain::hemodynamics::round_to;
use crate::domain::PatientTwin;

/// What a recalibration pass did to one twin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recalibration {
    pub previous_weight: f64,
    pub new_weight: f64,
    /// Mean |score - risk| over the observed days since the last pass
    pub mean_residual: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recalibrator {
    enabled: bool,
    period: usize,
    bounds: (f64, f64),
    step: f64,
    volatility_band: f64,
}

impl Recalibrator {
    #[must_use]
    pub fn from_config(config: &UpdateConfig) -> Self {
        Self {
            enabled: config.recalibrate_weekly,
            period: RECALIBRATION_PERIOD_DAYS,
            bounds: config.smoothing_bounds,
            step: config.smoothing_step,
            volatility_band: config.volatility_band,
        }
    }

    /// Whether run-day `day_index` (0-based) closes a recalibration period.
    #[must_use]
    pub fn is_boundary(&self, day_index: usize) -> bool {
        self.enabled && day_index > 0 && day_index % self.period == 0
    }

    /// Recalibrate one twin for `day`.
    ///
    /// Trims the rolling windows to the last period, then moves the
    /// smoothing weight one step up when the week was volatile and one step
    /// down otherwise, staying within bounds. Returns `None` if the twin was
    /// already recalibrated on `day`.
    pub fn recalibrate(&self, twin: &mut PatientTwin, day: NaiveDate) -> Option<Recalibration> {
        if twin.state.last_recalibrated == Some(day) {
            return None;
        }

        for window in [
            &mut twin.bp_window,
            &mut twin.activity_window,
            &mut twin.hr_window,
            &mut twin.dbp_window,
        ] {
            window.retain_recent(self.period);
        }

        let previous_weight = twin.smoothing_weight;
        let mean_residual = if twin.residuals.is_empty() {
            None
        } else {
            Some(twin.residuals.iter().sum::<f64>() / twin.residuals.len() as f64)
        };

        let (lo, hi) = self.bounds;
        let new_weight = match mean_residual {
            Some(r) if r > self.volatility_band => (previous_weight + self.step).min(hi),
            Some(_) => (previous_weight - self.step).max(lo),
            None => previous_weight,
        };
        let new_weight = round_to(new_weight, 4);

        twin.smoothing_weight = new_weight;
        twin.residuals.clear();

        let state = &mut twin.state;
        if let Some(bp) = twin.bp_window.mean() {
            state.bp_trend = round_to(bp, 4);
        }
        if let Some(steps) = twin.activity_window.mean() {
            state.activity_trend = round_to(steps, 4);
        }
        state.smoothing_weight = new_weight;
        state.recalibrated = true;
        state.last_recalibrated = Some(day);

        tracing::debug!(
            "Recalibrated {} on {}: weight {:.2} -> {:.2}",
            state.patient_id,
            day,
            previous_weight,
            new_weight
        );

        Some(Recalibration {
            previous_weight,
            new_weight,
            mean_residual,
        })
    }
}
