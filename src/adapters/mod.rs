//! Adapters layer: Concrete implementations of ports.
//!
//! These modules contain the actual integration with external libraries:
//! - `jsonl`: append-only JSON-lines snapshot files
//! - `sqlite`: SQLite feature store
//! - `synth`: seeded synthetic data generator and directory reader
//! - `uci`: UCI heart disease CSV loader
//! - `sanitize`: identifier filtering for logs

pub mod jsonl;
pub mod sanitize;
pub mod sqlite;
pub mod synth;
pub mod uci;

// Re-export adapter errors for lib.rs
pub use jsonl::SnapshotError;
pub use sqlite::StorageError;
pub use synth::SynthError;
pub use uci::CohortLoadError;
