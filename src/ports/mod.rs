//! Ports layer: Trait definitions for external operations.
//!
//! These traits define the boundaries between the update loop and the
//! outside world: where observations come from, where snapshots go, and
//! where cohort feature tables are cached.

mod feature_store;
mod observation_source;
mod snapshot_sink;

pub use feature_store::{FeatureStore, COHORT_TABLE, MERGED_TABLE};
pub use observation_source::ObservationSource;
pub use snapshot_sink::SnapshotSink;
