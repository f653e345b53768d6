//! Cohort feature table types and schema validation.
//!
//! A feature table is a set of rows keyed by stable patient id. Each table
//! carries a schema (column name → type) that every row must match exactly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single feature cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Text(String),
}

impl FeatureValue {
    #[must_use]
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Number(_) => ColumnType::Real,
            Self::Text(_) => ColumnType::Text,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

impl std::fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Storage type of a feature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Real,
    Text,
}

impl ColumnType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::Text => "text",
        }
    }

    /// Parse a stored type name.
    ///
    /// # Errors
    /// Returns `SchemaError::UnknownType` for anything but `real`/`text`.
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        match s {
            "real" => Ok(Self::Real),
            "text" => Ok(Self::Text),
            other => Err(SchemaError::UnknownType(other.to_string())),
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised when a feature table does not match its schema.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("Cannot validate an empty feature table")]
    Empty,

    #[error("Schema columns mismatch for patient {patient_id}: expected {expected:?}, actual {actual:?}")]
    Columns {
        patient_id: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Schema dtype mismatch for column {column}: expected {expected}, actual {actual}")]
    Dtype {
        column: String,
        expected: ColumnType,
        actual: ColumnType,
    },

    #[error("Required column missing: {0}")]
    MissingColumn(String),

    #[error("Unknown column type: {0}")]
    UnknownType(String),

    #[error("Duplicate patient id: {0}")]
    DuplicatePatient(String),
}

/// One row of a cohort feature table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortRecord {
    /// Stable identifier; join key across every data source
    pub patient_id: String,

    pub features: BTreeMap<String, FeatureValue>,

    /// Binary outcome label (0 = no disease, 1 = disease present)
    pub target: u8,
}

impl CohortRecord {
    /// Numeric feature lookup.
    #[must_use]
    pub fn number(&self, column: &str) -> Option<f64> {
        self.features.get(column).and_then(FeatureValue::as_f64)
    }
}

/// Column name → type mapping for a feature table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub columns: BTreeMap<String, ColumnType>,
}

impl FeatureSchema {
    /// Infer the schema from the first row.
    ///
    /// # Errors
    /// Returns `SchemaError::Empty` when there are no rows.
    pub fn infer(rows: &[CohortRecord]) -> Result<Self, SchemaError> {
        let first = rows.first().ok_or(SchemaError::Empty)?;
        let columns = first
            .features
            .iter()
            .map(|(name, value)| (name.clone(), value.column_type()))
            .collect();
        Ok(Self { columns })
    }

    /// Check that every row has exactly the schema's columns with the
    /// schema's types, and that patient ids are unique.
    ///
    /// # Errors
    /// Returns the first mismatch found.
    pub fn validate(&self, rows: &[CohortRecord]) -> Result<(), SchemaError> {
        if rows.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut seen = std::collections::BTreeSet::new();
        for row in rows {
            if !seen.insert(row.patient_id.as_str()) {
                return Err(SchemaError::DuplicatePatient(row.patient_id.clone()));
            }

            if row.features.len() != self.columns.len()
                || !row.features.keys().all(|k| self.columns.contains_key(k))
            {
                return Err(SchemaError::Columns {
                    patient_id: row.patient_id.clone(),
                    expected: self.columns.keys().cloned().collect(),
                    actual: row.features.keys().cloned().collect(),
                });
            }

            for (column, expected) in &self.columns {
                let actual = row.features[column].column_type();
                if actual != *expected {
                    return Err(SchemaError::Dtype {
                        column: column.clone(),
                        expected: *expected,
                        actual,
                    });
                }
            }
        }
        Ok(())
    }

    /// Ensure the listed columns exist with the given types.
    ///
    /// # Errors
    /// `MissingColumn` or `Dtype` on the first unmet requirement.
    pub fn require(&self, required: &[(&str, ColumnType)]) -> Result<(), SchemaError> {
        for (column, expected) in required {
            match self.columns.get(*column) {
                None => return Err(SchemaError::MissingColumn((*column).to_string())),
                Some(actual) if actual != expected => {
                    return Err(SchemaError::Dtype {
                        column: (*column).to_string(),
                        expected: *expected,
                        actual: *actual,
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pid: &str, age: FeatureValue) -> CohortRecord {
        let mut features = BTreeMap::new();
        features.insert("age".to_string(), age);
        features.insert("sex".to_string(), FeatureValue::Text("Male".to_string()));
        CohortRecord {
            patient_id: pid.to_string(),
            features,
            target: 0,
        }
    }

    #[test]
    fn test_infer_and_validate() {
        let rows = vec![
            record("a", FeatureValue::Number(63.0)),
            record("b", FeatureValue::Number(41.0)),
        ];
        let schema = FeatureSchema::infer(&rows).expect("Should infer");
        assert_eq!(schema.columns["age"], ColumnType::Real);
        assert_eq!(schema.columns["sex"], ColumnType::Text);
        assert!(schema.validate(&rows).is_ok());
    }

    #[test]
    fn test_dtype_mismatch_fails() {
        let rows = vec![
            record("a", FeatureValue::Number(63.0)),
            record("b", FeatureValue::Text("sixty".to_string())),
        ];
        let schema = FeatureSchema::infer(&rows).expect("Should infer");
        assert!(matches!(
            schema.validate(&rows),
            Err(SchemaError::Dtype { ref column, .. }) if column == "age"
        ));
    }

    #[test]
    fn test_column_mismatch_fails() {
        let mut extra = record("b", FeatureValue::Number(41.0));
        extra
            .features
            .insert("chol".to_string(), FeatureValue::Number(200.0));
        let rows = vec![record("a", FeatureValue::Number(63.0)), extra];
        let schema = FeatureSchema::infer(&rows).expect("Should infer");
        assert!(matches!(
            schema.validate(&rows),
            Err(SchemaError::Columns { .. })
        ));
    }

    #[test]
    fn test_empty_and_duplicates() {
        assert_eq!(FeatureSchema::infer(&[]), Err(SchemaError::Empty));

        let rows = vec![
            record("a", FeatureValue::Number(63.0)),
            record("a", FeatureValue::Number(64.0)),
        ];
        let schema = FeatureSchema::infer(&rows).expect("Should infer");
        assert_eq!(
            schema.validate(&rows),
            Err(SchemaError::DuplicatePatient("a".to_string()))
        );
    }

    #[test]
    fn test_require() {
        let rows = vec![record("a", FeatureValue::Number(63.0))];
        let schema = FeatureSchema::infer(&rows).expect("Should infer");
        assert!(schema.require(&[("age", ColumnType::Real)]).is_ok());
        assert_eq!(
            schema.require(&[("chol", ColumnType::Real)]),
            Err(SchemaError::MissingColumn("chol".to_string()))
        );
        assert!(matches!(
            schema.require(&[("sex", ColumnType::Real)]),
            Err(SchemaError::Dtype { .. })
        ));
    }

    #[test]
    fn test_feature_value_untagged_serde() {
        let json = r#"{"age":63.0,"sex":"Male"}"#;
        let parsed: BTreeMap<String, FeatureValue> =
            serde_json::from_str(json).expect("Should parse");
        assert_eq!(parsed["age"], FeatureValue::Number(63.0));
        assert_eq!(parsed["sex"], FeatureValue::Text("Male".to_string()));
    }
}
