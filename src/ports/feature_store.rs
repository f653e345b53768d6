//! Feature store port: cached cohort feature tables with schema validation.
//!
//! This trait abstracts the storage backend (SQLite) from the pipeline.

use crate::domain::{CohortRecord, FeatureSchema};

/// Table holding the cleaned UCI cohort.
pub const COHORT_TABLE: &str = "cohort_features";

/// Table holding cohort rows merged with synthetic summaries.
pub const MERGED_TABLE: &str = "features_with_synth";

/// Trait for feature table storage.
pub trait FeatureStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Replace a table's contents.
    ///
    /// The schema is inferred from the first row and every row is validated
    /// against it before anything is written.
    ///
    /// # Errors
    /// Returns error on schema mismatch or storage failure.
    fn save_table(&self, table: &str, rows: &[CohortRecord]) -> Result<FeatureSchema, Self::Error>;

    /// Load a table, re-validating it against its stored schema.
    ///
    /// # Errors
    /// Returns error if the table is missing, does not match its schema, or
    /// storage fails.
    fn load_table(&self, table: &str) -> Result<Vec<CohortRecord>, Self::Error>;

    /// Stored schema of a table.
    ///
    /// # Returns
    /// `None` if the table does not exist.
    fn table_schema(&self, table: &str) -> Result<Option<FeatureSchema>, Self::Error>;

    /// Number of rows in a table (0 if missing).
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn count_rows(&self, table: &str) -> Result<usize, Self::Error>;
}
