//! Synthetic multimodal data: seeded generator and directory reader.
//!
//! Layout under the synth root:
//! - `wearables/<patient_id>.json`: one wearable row per day
//! - `imaging_features.json`, `risk_factors.json`: one row per patient
//! - `fhir_ndjson/<resource>.ndjson`: FHIR-shaped clinical events
//!
//! The `.json` files are records files: `{ "schema": {...}, "rows": [...] }`.

mod generate;
mod source;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use generate::{generate_synthetic_data, SynthConfig, SynthOutput};
pub use source::{SynthDirectory, WearableSummary};

pub(crate) const WEARABLES_DIR: &str = "wearables";
pub(crate) const FHIR_DIR: &str = "fhir_ndjson";
pub(crate) const IMAGING_FILE: &str = "imaging_features.json";
pub(crate) const RISK_FACTORS_FILE: &str = "risk_factors.json";

/// FHIR resource types emitted by the generator.
pub const FHIR_RESOURCES: [&str; 5] = [
    "Encounter",
    "Condition",
    "MedicationRequest",
    "Observation",
    "Procedure",
];

/// Error type for synthetic data operations.
#[derive(Debug, thiserror::Error)]
pub enum SynthError {
    #[error("Invalid synthetic data config: {0}")]
    InvalidConfig(String),

    #[error("Synthetic data root not found: {0}")]
    NotFound(PathBuf),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A records file: column type hints plus rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsFile<T> {
    #[serde(default)]
    pub schema: BTreeMap<String, String>,
    pub rows: Vec<T>,
}

impl<T: Serialize> RecordsFile<T> {
    /// Wrap rows, deriving type hints from the first row.
    ///
    /// # Errors
    /// Returns error if a row cannot be serialized.
    pub fn new(rows: Vec<T>) -> Result<Self, serde_json::Error> {
        let mut schema = BTreeMap::new();
        if let Some(first) = rows.first() {
            if let serde_json::Value::Object(map) = serde_json::to_value(first)? {
                for (key, value) in map {
                    schema.insert(key, json_type_name(&value).to_string());
                }
            }
        }
        Ok(Self { schema, rows })
    }

    /// Write to `path`, creating parent directories.
    ///
    /// # Errors
    /// Returns error on serialization or I/O failure.
    pub fn write(&self, path: &Path) -> Result<(), SynthError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(n) if n.is_f64() => "float",
        serde_json::Value::Number(_) => "int",
        serde_json::Value::String(_) => "str",
        serde_json::Value::Array(_) => "list",
        serde_json::Value::Object(_) => "dict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ImagingRow;

    #[test]
    fn test_records_file_schema_hints() {
        let rows = vec![ImagingRow {
            patient_id: "pid_x".to_string(),
            lvef: 55.5,
            lvedv: 120.0,
            lvesv: 50.0,
            wall_thickness: 9.5,
            cac_score_proxy: 12,
        }];
        let file = RecordsFile::new(rows).expect("Should wrap");
        assert_eq!(file.schema["patient_id"], "str");
        assert_eq!(file.schema["lvef"], "float");
        assert_eq!(file.schema["cac_score_proxy"], "int");
    }

    #[test]
    fn test_records_file_empty_rows() {
        let file: RecordsFile<ImagingRow> = RecordsFile::new(Vec::new()).expect("Should wrap");
        assert!(file.schema.is_empty());
    }
}
