//! Heuristic drift check against a patient's rolling trend.

use crate::config::UpdateConfig;
use crate::domain::Vitals;

/// Outcome of one drift check.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriftCheck {
    /// |sbp - prior bp trend|, 0 without a trend or reading
    pub bp_deviation: f64,
    /// |steps - prior activity trend|, 0 without a trend or reading
    pub activity_deviation: f64,
    pub flagged: bool,
}

/// Fixed-threshold comparison of today's readings against the trends that
/// existed before today was folded in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftDetector {
    bp_threshold: f64,
    activity_threshold: f64,
}

impl DriftDetector {
    #[must_use]
    pub fn new(bp_threshold: f64, activity_threshold: f64) -> Self {
        Self {
            bp_threshold,
            activity_threshold,
        }
    }

    #[must_use]
    pub fn from_config(config: &UpdateConfig) -> Self {
        Self::new(config.drift_bp_threshold, config.drift_activity_threshold)
    }

    /// Compare today's vitals with the prior trends.
    ///
    /// A channel flags only when its deviation is strictly greater than its
    /// threshold. Channels without a prior trend never flag.
    #[must_use]
    pub fn check(
        &self,
        vitals: &Vitals,
        prior_bp_trend: Option<f64>,
        prior_activity_trend: Option<f64>,
    ) -> DriftCheck {
        let bp_deviation = deviation(vitals.sbp.filter(|v| v.is_finite()), prior_bp_trend);
        let activity_deviation = deviation(vitals.finite_steps(), prior_activity_trend);

        DriftCheck {
            bp_deviation,
            activity_deviation,
            flagged: exceeds(bp_deviation, self.bp_threshold)
                || exceeds(activity_deviation, self.activity_threshold),
        }
    }
}

fn deviation(value: Option<f64>, trend: Option<f64>) -> f64 {
    match (value, trend) {
        (Some(v), Some(t)) => (v - t).abs(),
        _ => 0.0,
    }
}

/// Strict threshold comparison shared by every drift channel.
#[must_use]
pub fn exceeds(deviation: f64, threshold: f64) -> bool {
    deviation > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vitals(sbp: f64, steps: f64) -> Vitals {
        Vitals {
            hr: Some(70.0),
            sbp: Some(sbp),
            steps: Some(steps),
            ..Vitals::default()
        }
    }

    fn detector() -> DriftDetector {
        DriftDetector::from_config(&UpdateConfig::default())
    }

    #[test]
    fn test_bp_boundary() {
        let d = detector();
        let at = d.check(&vitals(140.0, 7000.0), Some(120.0), Some(7000.0));
        assert!((at.bp_deviation - 20.0).abs() < 1e-12);
        assert!(!at.flagged);

        let above = d.check(&vitals(140.001, 7000.0), Some(120.0), Some(7000.0));
        assert!(above.flagged);

        let below = d.check(&vitals(139.999, 7000.0), Some(120.0), Some(7000.0));
        assert!(!below.flagged);

        let drop = d.check(&vitals(99.0, 7000.0), Some(120.0), Some(7000.0));
        assert!(drop.flagged);
    }

    #[test]
    fn test_activity_boundary() {
        let d = detector();
        assert!(!d.check(&vitals(120.0, 11_000.0), Some(120.0), Some(7000.0)).flagged);
        assert!(d.check(&vitals(120.0, 11_000.5), Some(120.0), Some(7000.0)).flagged);
        assert!(!d.check(&vitals(120.0, 3000.5), Some(120.0), Some(7000.0)).flagged);
    }

    #[test]
    fn test_no_trend_never_flags() {
        let check = detector().check(&vitals(200.0, 30_000.0), None, None);
        assert_eq!(check, DriftCheck::default());
    }

    #[test]
    fn test_missing_steps_skip_activity_channel() {
        let v = Vitals {
            steps: None,
            ..vitals(120.0, 0.0)
        };
        let check = detector().check(&v, Some(120.0), Some(7000.0));
        assert!(check.activity_deviation.abs() < f64::EPSILON);
        assert!(!check.flagged);
    }

    #[test]
    fn test_zero_threshold_flags_any_change() {
        let d = DriftDetector::new(0.0, 0.0);
        assert!(!d.check(&vitals(120.0, 7000.0), Some(120.0), Some(7000.0)).flagged);
        assert!(d.check(&vitals(120.5, 7000.0), Some(120.0), Some(7000.0)).flagged);
    }
}
