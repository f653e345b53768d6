//! # cardiotwin
//!
//! Daily digital-twin update loop over a cardiovascular patient cohort.
//!
//! This crate provides:
//! - UCI cohort ingestion into a schema-validated feature store
//! - A seeded synthetic multimodal data generator
//! - A logistic-regression baseline scored on a stratified hold-out split
//! - The daily twin update loop: smoothed heuristic risk, rolling trends,
//!   drift flags and weekly recalibration, persisted as append-only
//!   per-day JSON-lines snapshots
//!
//! Not a clinical tool. Scores are heuristics over synthetic data.
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core types (observations, patient state, risk heuristic, cohort schema)
//! - `ports`: Trait definitions for external operations
//! - `adapters`: Concrete implementations (JSON-lines, SQLite, synthetic data, CSV)
//! - `application`: Use cases orchestrating domain and ports

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use config::{PipelinePaths, UpdateConfig};
pub use domain::{ObservationBundle, PatientState, RiskLevel};

/// Result type for cardiotwin operations
pub type Result<T> = std::result::Result<T, TwinError>;

/// Main error type for cardiotwin
#[derive(Debug, thiserror::Error)]
pub enum TwinError {
    #[error("Storage operation failed: {0}")]
    Storage(#[from] adapters::StorageError),

    #[error("Snapshot operation failed: {0}")]
    Snapshot(#[from] adapters::SnapshotError),

    #[error("Synthetic data error: {0}")]
    Synth(#[from] adapters::SynthError),

    #[error("Cohort load failed: {0}")]
    CohortLoad(#[from] adapters::CohortLoadError),

    #[error("Feature schema mismatch: {0}")]
    Schema(#[from] domain::SchemaError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Baseline training failed: {0}")]
    Baseline(#[from] application::BaselineError),

    #[error("Invalid data: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
