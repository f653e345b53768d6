//! Runtime configuration for the update loop and pipeline paths.

use std::path::{Path, PathBuf};

use crate::TwinError;

/// Length of the recalibration cycle in simulated days.
pub const RECALIBRATION_PERIOD_DAYS: usize = 7;

/// Tunables of the daily update loop.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateConfig {
    /// Number of most recent calendar days to simulate
    pub days: usize,

    /// Rolling trend window length (days)
    pub window_days: usize,

    /// Initial exponential smoothing weight given to today's score
    pub smoothing_weight: f64,

    /// Recalibration keeps the smoothing weight inside these bounds
    pub smoothing_bounds: (f64, f64),

    /// Amount a recalibration moves the smoothing weight
    pub smoothing_step: f64,

    /// Mean |score - risk| above which a week counts as volatile
    pub volatility_band: f64,

    /// Systolic BP deviation (mmHg) that flags drift when exceeded
    pub drift_bp_threshold: f64,

    /// Step-count deviation that flags drift when exceeded
    pub drift_activity_threshold: f64,

    pub recalibrate_weekly: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            days: 30,
            window_days: 14,
            smoothing_weight: 0.3,
            smoothing_bounds: (0.1, 0.6),
            smoothing_step: 0.05,
            volatility_band: 0.05,
            drift_bp_threshold: 20.0,
            drift_activity_threshold: 4000.0,
            recalibrate_weekly: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes" | "YES"))
}

impl UpdateConfig {
    /// Load config overrides from environment (best-effort).
    ///
    /// Supported:
    /// - CARDIOTWIN_DAYS
    /// - CARDIOTWIN_WINDOW_DAYS
    /// - CARDIOTWIN_SMOOTHING_WEIGHT
    /// - CARDIOTWIN_DRIFT_BP_THRESHOLD
    /// - CARDIOTWIN_DRIFT_ACTIVITY_THRESHOLD
    /// - CARDIOTWIN_RECALIBRATE_WEEKLY
    ///
    /// Unparseable or out-of-range values are ignored.
    #[must_use]
    pub fn from_env_or_default() -> Self {
        let mut cfg = Self::default();

        if let Some(days) = env_parse::<usize>("CARDIOTWIN_DAYS").filter(|&d| d > 0) {
            cfg.days = days;
        }
        if let Some(window) = env_parse::<usize>("CARDIOTWIN_WINDOW_DAYS").filter(|&w| w > 0) {
            cfg.window_days = window;
        }
        if let Some(w) = env_parse::<f64>("CARDIOTWIN_SMOOTHING_WEIGHT")
            .filter(|w| w.is_finite() && *w > 0.0 && *w <= 1.0)
        {
            cfg.smoothing_weight = w;
        }
        if let Some(t) = env_parse::<f64>("CARDIOTWIN_DRIFT_BP_THRESHOLD")
            .filter(|t| t.is_finite() && *t >= 0.0)
        {
            cfg.drift_bp_threshold = t;
        }
        if let Some(t) = env_parse::<f64>("CARDIOTWIN_DRIFT_ACTIVITY_THRESHOLD")
            .filter(|t| t.is_finite() && *t >= 0.0)
        {
            cfg.drift_activity_threshold = t;
        }
        if let Some(flag) = env_flag("CARDIOTWIN_RECALIBRATE_WEEKLY") {
            cfg.recalibrate_weekly = flag;
        }

        cfg
    }

    /// Check that every value is usable.
    ///
    /// # Errors
    /// Returns `TwinError::Config` naming the first bad value.
    pub fn validate(&self) -> Result<(), TwinError> {
        let (lo, hi) = self.smoothing_bounds;

        if self.days == 0 {
            return Err(TwinError::Config("days must be at least 1".to_string()));
        }
        if self.window_days == 0 {
            return Err(TwinError::Config("window_days must be at least 1".to_string()));
        }
        if !(lo.is_finite() && hi.is_finite() && 0.0 < lo && lo <= hi && hi <= 1.0) {
            return Err(TwinError::Config(format!(
                "smoothing bounds ({lo}, {hi}) must satisfy 0 < lo <= hi <= 1"
            )));
        }
        if !(self.smoothing_weight.is_finite() && (lo..=hi).contains(&self.smoothing_weight)) {
            return Err(TwinError::Config(format!(
                "smoothing_weight {} outside bounds [{lo}, {hi}]",
                self.smoothing_weight
            )));
        }
        if !(self.smoothing_step.is_finite() && self.smoothing_step >= 0.0) {
            return Err(TwinError::Config(format!(
                "smoothing_step {} must be non-negative",
                self.smoothing_step
            )));
        }
        if !(self.volatility_band.is_finite() && self.volatility_band >= 0.0) {
            return Err(TwinError::Config(format!(
                "volatility_band {} must be non-negative",
                self.volatility_band
            )));
        }
        for (name, value) in [
            ("drift_bp_threshold", self.drift_bp_threshold),
            ("drift_activity_threshold", self.drift_activity_threshold),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(TwinError::Config(format!(
                    "{name} {value} must be a non-negative number"
                )));
            }
        }
        Ok(())
    }
}

/// Conventional on-disk layout of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePaths {
    pub raw_csv: PathBuf,
    pub raw_csv_fallback: PathBuf,
    pub feature_store: PathBuf,
    pub synth_root: PathBuf,
    pub state_root: PathBuf,
    pub reports_root: PathBuf,
}

impl Default for PipelinePaths {
    fn default() -> Self {
        Self::under(Path::new("."))
    }
}

impl PipelinePaths {
    /// Standard layout rooted at `base`.
    #[must_use]
    pub fn under(base: &Path) -> Self {
        Self {
            raw_csv: base.join("data/raw/uci_heart/heart_disease_uci.csv"),
            raw_csv_fallback: base.join("heart_disease_uci.csv"),
            feature_store: base.join("data/processed/feature_store.db"),
            synth_root: base.join("data/synth"),
            state_root: base.join("data/twin_state"),
            reports_root: base.join("reports"),
        }
    }

    /// Explicit path if given, else the primary raw CSV when it exists,
    /// else the fallback next to the working directory.
    #[must_use]
    pub fn resolve_csv(&self, explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if self.raw_csv.exists() {
            self.raw_csv.clone()
        } else {
            self.raw_csv_fallback.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(UpdateConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cfg = UpdateConfig {
            days: 0,
            ..UpdateConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(TwinError::Config(_))));

        let cfg = UpdateConfig {
            smoothing_weight: 0.9,
            ..UpdateConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(TwinError::Config(_))));

        let cfg = UpdateConfig {
            drift_bp_threshold: f64::NAN,
            ..UpdateConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(TwinError::Config(_))));
    }

    #[test]
    fn test_resolve_csv_prefers_explicit_then_primary() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let paths = PipelinePaths::under(dir.path());

        assert_eq!(paths.resolve_csv(None), paths.raw_csv_fallback);

        std::fs::create_dir_all(paths.raw_csv.parent().expect("has parent"))
            .expect("Should create dirs");
        std::fs::write(&paths.raw_csv, "age,num\n").expect("Should write");
        assert_eq!(paths.resolve_csv(None), paths.raw_csv);

        let explicit = dir.path().join("other.csv");
        assert_eq!(paths.resolve_csv(Some(&explicit)), explicit);
    }
}
