//! Observation source port: per-day observation bundles for each patient.

use chrono::NaiveDate;

use crate::domain::ObservationBundle;

/// Source of synthetic daily observations.
pub trait ObservationSource {
    /// Error type for source operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Patient ids known to the source, in ascending order.
    fn patient_ids(&self) -> Vec<String>;

    /// Earliest calendar day carrying any observation.
    ///
    /// # Returns
    /// `None` if the source holds no observations at all.
    fn earliest_day(&self) -> Option<NaiveDate>;

    /// Latest calendar day carrying any observation.
    ///
    /// # Returns
    /// `None` if the source holds no observations at all.
    fn latest_day(&self) -> Option<NaiveDate>;

    /// Observation bundle for one patient on one day.
    ///
    /// # Returns
    /// `None` if nothing was recorded for that patient on that day.
    ///
    /// # Errors
    /// Returns error if the underlying data cannot be read.
    fn observation(
        &self,
        patient_id: &str,
        day: NaiveDate,
    ) -> Result<Option<ObservationBundle>, Self::Error>;
}
