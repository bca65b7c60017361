//! Dose countdown calculator.
//!
//! Pure wall-clock arithmetic: given the time of day of the next dose and the
//! dosing interval, find the next due instant that is not in the past and
//! the whole seconds left until it.
//!
//! ## Rollover
//!
//! ```text
//! candidate = today at hour_next_dose
//! while candidate < now { candidate += interval }
//! ```
//!
//! The loop is evaluated with whole-interval arithmetic so an app that was
//! closed for weeks costs the same as one closed for a minute. A candidate
//! that is already in the future is the gateway's schedule and is returned
//! as is, however far ahead it lies.

use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The next due instant and the countdown to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextDose {
    pub due_at: NaiveDateTime,
    pub seconds_remaining: u64,
}

impl NextDose {
    /// `HH:MM:SS` rendering of the countdown.
    pub fn countdown(&self) -> String {
        format_countdown(self.seconds_remaining)
    }

    pub fn is_due(&self) -> bool {
        self.seconds_remaining == 0
    }
}

/// Parse a dose time of day, `HH:MM` or `HH:MM:SS`.
///
/// # Errors
/// Returns a validation error if the text is not a valid time of day.
pub fn parse_dose_time(value: &str) -> Result<NaiveTime, ValidationError> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| {
            ValidationError::invalid("hour_next_dose", format!("'{value}' is not a HH:MM time"))
        })
}

/// Compute the next due instant at or after `now`.
///
/// # Errors
/// Returns a validation error for a malformed dose time, a zero interval, or
/// an interval so large the rolled-forward instant is not representable.
pub fn next_dose(
    now: NaiveDateTime,
    hour_next_dose: &str,
    interval_hours: u32,
) -> Result<NextDose, ValidationError> {
    if interval_hours == 0 {
        return Err(ValidationError::invalid("interval_hours", "must be positive"));
    }
    let time = parse_dose_time(hour_next_dose)?;
    let candidate = now.date().and_time(time);
    if candidate >= now {
        return Ok(NextDose {
            due_at: candidate,
            seconds_remaining: seconds_until(now, candidate),
        });
    }

    let step_secs = i64::from(interval_hours) * 3600;
    let shift = |steps: i64| {
        steps
            .checked_mul(step_secs)
            .and_then(Duration::try_seconds)
            .and_then(|delta| candidate.checked_add_signed(delta))
            .ok_or_else(|| ValidationError::invalid("interval_hours", "too large"))
    };
    let behind = (now - candidate).num_seconds();
    let mut due_at = shift(behind / step_secs)?;
    if due_at < now {
        due_at = shift(behind / step_secs + 1)?;
    }

    // Rolled forward: strictly less than one interval away.
    Ok(NextDose {
        due_at,
        seconds_remaining: seconds_until(now, due_at).min((step_secs - 1) as u64),
    })
}

/// Seconds remaining until the next dose. Zero means the dose is due now.
///
/// # Errors
/// Returns a validation error for a malformed dose time or a zero interval.
pub fn compute_remaining(
    now: NaiveDateTime,
    hour_next_dose: &str,
    interval_hours: u32,
) -> Result<u64, ValidationError> {
    next_dose(now, hour_next_dose, interval_hours).map(|next| next.seconds_remaining)
}

/// Render seconds as `HH:MM:SS` using floor division for each component.
pub fn format_countdown(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

/// Whole seconds from `now` to `due_at`, rounded up so a fraction of a
/// second left never reads as zero.
fn seconds_until(now: NaiveDateTime, due_at: NaiveDateTime) -> u64 {
    let gap = due_at - now;
    if gap <= Duration::zero() {
        return 0;
    }
    let whole = gap.num_seconds();
    let secs = if gap > Duration::seconds(whole) { whole + 1 } else { whole };
    secs as u64
}
