//! Medication and dose history records.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::timer::parse_dose_time;

/// A medication tracked by the adherence engine.
///
/// `status` is the confirmed adherence of the last dose: `true` when it was
/// taken, `false` while pending or after a miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
    pub id: String,
    pub name: String,
    /// Time of day (`HH:MM`) of the next scheduled dose.
    pub hour_next_dose: String,
    pub interval_hours: u32,
    #[serde(default)]
    pub period_start: Option<NaiveDate>,
    #[serde(default)]
    pub period_end: Option<NaiveDate>,
    #[serde(default)]
    pub status: bool,
}

impl Medication {
    pub fn new(id: impl Into<String>, hour_next_dose: impl Into<String>, interval_hours: u32) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            hour_next_dose: hour_next_dose.into(),
            interval_hours,
            period_start: None,
            period_end: None,
            status: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_status(mut self, status: bool) -> Self {
        self.status = status;
        self
    }

    pub fn with_period(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.period_start = start;
        self.period_end = end;
        self
    }

    /// Check the fields the engine relies on.
    ///
    /// # Errors
    /// Returns an error for an empty id, a malformed dose time, a zero
    /// interval or a treatment window that ends before it starts.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::invalid("id", "must not be empty"));
        }
        if self.interval_hours == 0 {
            return Err(ValidationError::invalid("interval_hours", "must be positive"));
        }
        parse_dose_time(&self.hour_next_dose)?;
        if let (Some(start), Some(end)) = (self.period_start, self.period_end) {
            if end < start {
                return Err(ValidationError::InvalidPeriod { start, end });
            }
        }
        Ok(())
    }

    /// Whether a dose due on `date` falls inside the treatment window.
    /// Open bounds never exclude a date.
    pub fn in_treatment_on(&self, date: NaiveDate) -> bool {
        let after_start = self.period_start.map_or(true, |start| date >= start);
        let before_end = self.period_end.map_or(true, |end| date <= end);
        after_start && before_end
    }
}

/// Authoritative state returned by the gateway after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoseUpdate {
    pub status: bool,
    pub hour_next_dose: String,
}

/// Immutable history record written once per resolved dose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoseEvent {
    pub medication_id: String,
    /// When the dose was due.
    pub taken_date: NaiveDateTime,
    pub taken: bool,
    /// When the dose was resolved.
    pub created_at: NaiveDateTime,
}
