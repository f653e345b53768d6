//! Domain layer: Core types and rules of the cardiovascular twin.
//!
//! Pure Rust types with no I/O. Everything here is deterministic given
//! its inputs.

mod cohort;
pub mod hemodynamics;
mod observation;
pub mod risk;
mod state;

pub use cohort::{CohortRecord, ColumnType, FeatureSchema, FeatureValue, SchemaError};
pub use hemodynamics::Hemodynamics;
pub use observation::{parse_day, ImagingRow, ObservationBundle, RiskFactorRow, Vitals, WearableRow};
pub use risk::RiskLevel;
pub use state::{PatientState, PatientTwin, RollingWindow};
