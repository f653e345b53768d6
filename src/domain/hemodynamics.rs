//! Hemodynamics placeholder.
//!
//! NOT physiologically validated. These proxies exist so downstream views have
//! something shaped like hemodynamic output; no mechanistic simulation happens.

use serde::{Deserialize, Serialize};

/// Proxy values attached to a twin snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hemodynamics {
    /// Mean arterial pressure estimate (mmHg)
    pub map_estimate: f64,
    pub compliance_proxy: f64,
    pub cardiac_strain_proxy: f64,
}

impl Hemodynamics {
    /// Derive proxies from age and mean vitals.
    #[must_use]
    pub fn estimate(age: f64, hr: f64, sbp: f64, dbp: f64) -> Self {
        let map = dbp + (sbp - dbp) / 3.0;
        let pulse_pressure = (sbp - dbp).max(1.0);
        let compliance = ((1.0 / pulse_pressure) * (70.0 / age.max(18.0))).max(0.1);
        let strain = (hr / 60.0) * (map / 93.0);

        Self {
            map_estimate: round_to(map, 3),
            compliance_proxy: round_to(compliance, 5),
            cardiac_strain_proxy: round_to(strain, 5),
        }
    }
}

/// Round half away from zero to `places` decimals.
#[must_use]
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
