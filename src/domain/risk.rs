//! Heuristic cardiovascular risk scoring.
//!
//! Not a clinical model. The score is a linear heuristic over the day's
//! vitals, bounded so that smoothing can never leave the unit interval.

use serde::{Deserialize, Serialize};

use super::observation::{RiskFactorRow, Vitals};

/// Lower bound of any heuristic score.
pub const RISK_FLOOR: f64 = 0.01;

/// Upper bound of any heuristic score.
pub const RISK_CEILING: f64 = 0.99;

/// Step count treated as neutral when no activity history exists.
pub const NEUTRAL_STEPS: f64 = 7000.0;

/// Risk level classification for a twin snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Low risk
    Low,
    /// Moderate risk, monitoring recommended
    Moderate,
    /// High risk
    High,
}

impl RiskLevel {
    /// Classify a risk estimate.
    #[must_use]
    pub fn from_risk(risk: f64) -> Self {
        if risk < 0.3 {
            Self::Low
        } else if risk < 0.7 {
            Self::Moderate
        } else {
            Self::High
        }
    }

    /// Get a human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Low => "Low risk - No significant indicators",
            Self::Moderate => "Moderate risk - Follow-up recommended",
            Self::High => "High risk - Review trend history",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Moderate => write!(f, "MODERATE"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// Inputs to the daily heuristic score.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs<'a> {
    pub vitals: &'a Vitals,
    /// Blood-pressure trend before today's reading was folded in.
    pub prior_bp_trend: Option<f64>,
    /// Activity trend before today's reading; used when steps are missing.
    pub prior_activity_trend: Option<f64>,
    pub risk_factors: Option<&'a RiskFactorRow>,
}

/// Compute the raw heuristic score for one day.
///
/// Returns `None` when the vitals are not usable.
#[must_use]
pub fn heuristic_score(inputs: &ScoreInputs<'_>) -> Option<f64> {
    if !inputs.vitals.is_usable() {
        return None;
    }
    let hr = inputs.vitals.hr?;
    let sbp = inputs.vitals.sbp?;
    let steps = inputs
        .vitals
        .finite_steps()
        .or(inputs.prior_activity_trend)
        .unwrap_or(NEUTRAL_STEPS);

    let mut score =
        0.25 + (sbp - 120.0) * 0.004 + (hr - 70.0) * 0.003 - (steps - NEUTRAL_STEPS) / 100_000.0;

    if let Some(trend) = inputs.prior_bp_trend {
        score += (sbp - trend).max(0.0) * 0.001;
    }
    if let Some(factors) = inputs.risk_factors {
        score += factors.risk_adjustment();
    }

    Some(clamp_risk(score))
}

/// Clamp into `[RISK_FLOOR, RISK_CEILING]`.
#[must_use]
pub fn clamp_risk(value: f64) -> f64 {
    value.clamp(RISK_FLOOR, RISK_CEILING)
}

/// Exponential smoothing of today's score into the prior risk.
#[must_use]
pub fn smooth(prior: f64, score: f64, weight: f64) -> f64 {
    weight * score + (1.0 - weight) * prior
}
