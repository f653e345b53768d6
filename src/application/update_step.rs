//! The daily update step for a single patient.

use chrono::NaiveDate;

use super::drift::{DriftCheck, DriftDetector};
use crate::config::UpdateConfig;
use crate::domain::hemodynamics::round_to;
use crate::domain::risk::{heuristic_score, smooth, ScoreInputs};
use crate::domain::{Hemodynamics, ObservationBundle, PatientTwin, RiskLevel};

/// Decimal places kept for risk and deviations in snapshots.
const RISK_DECIMALS: i32 = 5;

/// Decimal places kept for trends in snapshots.
const TREND_DECIMALS: i32 = 4;

/// How a patient's day was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayOutcome {
    /// A usable observation was folded in.
    Observed,
    /// No usable observation; prior state carried forward.
    CarriedForward,
    /// No prior state and nothing usable to start from.
    NotStarted,
}

/// Folds one day's observation bundle into a patient's twin.
#[derive(Debug, Clone)]
pub struct UpdateStep {
    window_days: usize,
    smoothing_weight: f64,
    drift: DriftDetector,
}

impl UpdateStep {
    #[must_use]
    pub fn new(config: &UpdateConfig) -> Self {
        Self {
            window_days: config.window_days,
            smoothing_weight: config.smoothing_weight,
            drift: DriftDetector::from_config(config),
        }
    }

    /// Advance a patient by one day.
    ///
    /// `prior` is `None` until the patient's first usable observation; `age`
    /// is only read when a twin is created.
    pub fn advance(
        &self,
        prior: Option<PatientTwin>,
        patient_id: &str,
        day: NaiveDate,
        bundle: Option<&ObservationBundle>,
        age: f64,
    ) -> (Option<PatientTwin>, DayOutcome) {
        let usable = bundle.filter(|b| b.vitals.is_usable());

        match (prior, usable) {
            (None, None) => (None, DayOutcome::NotStarted),
            (Some(twin), None) => (
                Some(Self::carry_forward(twin, day, bundle)),
                DayOutcome::CarriedForward,
            ),
            (prior, Some(obs)) => {
                let is_new = prior.is_none();
                let twin = prior.unwrap_or_else(|| {
                    tracing::debug!("Starting twin for {} on {}", patient_id, day);
                    PatientTwin::new(self.window_days, self.smoothing_weight, age)
                });
                self.observe(twin, patient_id, day, obs, is_new)
            }
        }
    }

    fn observe(
        &self,
        mut twin: PatientTwin,
        patient_id: &str,
        day: NaiveDate,
        obs: &ObservationBundle,
        is_new: bool,
    ) -> (Option<PatientTwin>, DayOutcome) {
        let prior_bp = twin.bp_window.mean();
        let prior_activity = twin.activity_window.mean();

        let Some(score) = heuristic_score(&ScoreInputs {
            vitals: &obs.vitals,
            prior_bp_trend: prior_bp,
            prior_activity_trend: prior_activity,
            risk_factors: obs.risk_factors.as_ref(),
        }) else {
            return if is_new {
                (None, DayOutcome::NotStarted)
            } else {
                (
                    Some(Self::carry_forward(twin, day, Some(obs))),
                    DayOutcome::CarriedForward,
                )
            };
        };

        let drift: DriftCheck = self.drift.check(&obs.vitals, prior_bp, prior_activity);

        let risk = if is_new {
            score
        } else {
            smooth(twin.risk, score, twin.smoothing_weight)
        };
        twin.residuals.push((score - risk).abs());
        twin.risk = risk;

        let vitals = &obs.vitals;
        if let Some(sbp) = vitals.sbp {
            twin.bp_window.push(sbp);
        }
        if let Some(hr) = vitals.hr {
            twin.hr_window.push(hr);
        }
        if let Some(steps) = vitals.finite_steps() {
            twin.activity_window.push(steps);
        }
        if let Some(dbp) = vitals.finite_dbp() {
            twin.dbp_window.push(dbp);
        }

        let hemodynamics = match (
            twin.hr_window.mean(),
            twin.bp_window.mean(),
            twin.dbp_window.mean(),
        ) {
            (Some(hr), Some(sbp), Some(dbp)) => Some(Hemodynamics::estimate(twin.age, hr, sbp, dbp)),
            _ => twin.state.hemodynamics,
        };

        let rounded_risk = round_to(risk, RISK_DECIMALS);
        let state = &mut twin.state;
        state.patient_id = patient_id.to_string();
        state.day = day;
        state.risk = rounded_risk;
        state.risk_level = RiskLevel::from_risk(rounded_risk);
        state.bp_trend = round_to(twin.bp_window.mean().unwrap_or_default(), TREND_DECIMALS);
        state.activity_trend = round_to(
            twin.activity_window.mean().unwrap_or(state.activity_trend),
            TREND_DECIMALS,
        );
        state.drift_flag = drift.flagged;
        state.bp_deviation = round_to(drift.bp_deviation, RISK_DECIMALS);
        state.activity_deviation = round_to(drift.activity_deviation, RISK_DECIMALS);
        state.observed = true;
        state.recalibrated = false;
        state.smoothing_weight = twin.smoothing_weight;
        state.events_today = obs.events.clone();
        state.hemodynamics = hemodynamics;

        if drift.flagged {
            tracing::debug!(
                "Drift for {} on {}: bp {:.1}, activity {:.0}",
                patient_id,
                day,
                drift.bp_deviation,
                drift.activity_deviation
            );
        }

        (Some(twin), DayOutcome::Observed)
    }

    /// Keep yesterday's estimate, trends and parameters under a new day.
    fn carry_forward(
        mut twin: PatientTwin,
        day: NaiveDate,
        bundle: Option<&ObservationBundle>,
    ) -> PatientTwin {
        let state = &mut twin.state;
        state.day = day;
        state.drift_flag = false;
        state.bp_deviation = 0.0;
        state.activity_deviation = 0.0;
        state.observed = false;
        state.recalibrated = false;
        state.events_today = bundle.map(|b| b.events.clone()).unwrap_or_default();
        tracing::debug!("Carried forward {} on {}", state.patient_id, day);
        twin
    }
}
