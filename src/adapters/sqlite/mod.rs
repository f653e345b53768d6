//! SQLite adapter: Implementation of FeatureStore.
//!
//! Provides local persistence for cohort feature tables. Each table's schema
//! is stored next to its rows and every load re-validates the rows against
//! it, so a table edited out-of-band fails fast instead of feeding corrupt
//! features into the update loop.
//!
//! # Mutex Behavior
//!
//! The connection is protected by `Mutex`. A poisoned mutex surfaces as
//! `StorageError::Poisoned` rather than a panic.
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{CohortRecord, ColumnType, FeatureSchema, FeatureValue, SchemaError};
use crate::ports::FeatureStore;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Feature table not found: {0}")]
    NotFound(String),

    #[error("Schema validation failed: {0}")]
    Schema(#[from] SchemaError),

    #[error("Database connection lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// SQLite feature store adapter.
pub struct SqliteFeatureStore {
    conn: Mutex<Connection>,
}

impl SqliteFeatureStore {
    /// Open (or create) a feature store at the given database path.
    ///
    /// Parent directories are created as needed.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or initialized.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing).
    ///
    /// # Errors
    /// Returns error if database cannot be created.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS feature_columns (
                table_name TEXT NOT NULL,
                column_name TEXT NOT NULL,
                dtype TEXT NOT NULL,
                PRIMARY KEY (table_name, column_name)
            );

            CREATE TABLE IF NOT EXISTS feature_rows (
                table_name TEXT NOT NULL,
                position INTEGER NOT NULL,
                patient_id TEXT NOT NULL,
                features TEXT NOT NULL,
                target INTEGER NOT NULL,
                PRIMARY KEY (table_name, patient_id)
            );

            CREATE INDEX IF NOT EXISTS idx_feature_rows_position
                ON feature_rows(table_name, position);
            ",
        )?;

        Ok(())
    }

    fn read_schema(conn: &Connection, table: &str) -> Result<Option<FeatureSchema>, StorageError> {
        let mut stmt = conn.prepare(
            "SELECT column_name, dtype FROM feature_columns WHERE table_name = ?1 ORDER BY column_name",
        )?;
        let rows = stmt.query_map(params![table], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut columns = BTreeMap::new();
        for row in rows {
            let (name, dtype) = row?;
            columns.insert(name, ColumnType::parse(&dtype)?);
        }

        if columns.is_empty() {
            let has_rows: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM feature_rows WHERE table_name = ?1 LIMIT 1",
                    params![table],
                    |row| row.get(0),
                )
                .optional()?;
            if has_rows.is_none() {
                return Ok(None);
            }
        }
        Ok(Some(FeatureSchema { columns }))
    }
}

impl FeatureStore for SqliteFeatureStore {
    type Error = StorageError;

    fn save_table(&self, table: &str, rows: &[CohortRecord]) -> Result<FeatureSchema, Self::Error> {
        let schema = FeatureSchema::infer(rows)?;
        schema.validate(rows)?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM feature_columns WHERE table_name = ?1", params![table])?;
        tx.execute("DELETE FROM feature_rows WHERE table_name = ?1", params![table])?;

        for (column, dtype) in &schema.columns {
            tx.execute(
                "INSERT INTO feature_columns (table_name, column_name, dtype) VALUES (?1, ?2, ?3)",
                params![table, column, dtype.as_str()],
            )?;
        }

        {
            let mut insert = tx.prepare(
                r"
                INSERT INTO feature_rows (table_name, position, patient_id, features, target)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
            )?;
            for (position, row) in rows.iter().enumerate() {
                let features = serde_json::to_string(&row.features)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                insert.execute(params![
                    table,
                    position as i64,
                    row.patient_id,
                    features,
                    i64::from(row.target),
                ])?;
            }
        }

        tx.commit()?;

        tracing::info!(
            "Saved feature table {} ({} rows, {} columns)",
            table,
            rows.len(),
            schema.columns.len()
        );
        Ok(schema)
    }

    fn load_table(&self, table: &str) -> Result<Vec<CohortRecord>, Self::Error> {
        let conn = self.lock()?;

        let schema = Self::read_schema(&conn, table)?
            .ok_or_else(|| StorageError::NotFound(table.to_string()))?;

        let mut stmt = conn.prepare(
            r"
            SELECT patient_id, features, target FROM feature_rows
            WHERE table_name = ?1
            ORDER BY position ASC
            ",
        )?;
        let raw = stmt.query_map(params![table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in raw {
            let (patient_id, features_json, target) = row?;
            let features: BTreeMap<String, FeatureValue> = serde_json::from_str(&features_json)
                .map_err(|e| StorageError::Serialization(format!("{patient_id}: {e}")))?;
            let target = u8::try_from(target).map_err(|_| {
                StorageError::Serialization(format!("{patient_id}: target {target} out of range"))
            })?;
            records.push(CohortRecord {
                patient_id,
                features,
                target,
            });
        }

        schema.validate(&records)?;
        Ok(records)
    }

    fn table_schema(&self, table: &str) -> Result<Option<FeatureSchema>, Self::Error> {
        let conn = self.lock()?;
        Self::read_schema(&conn, table)
    }

    fn count_rows(&self, table: &str) -> Result<usize, Self::Error> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM feature_rows WHERE table_name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
