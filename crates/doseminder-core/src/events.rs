use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::adherence::{DoseAction, ResolutionOrigin};

/// Every state change of a tracked medication produces an Event.
/// The presentation layer subscribes to them; the CLI prints them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// Countdown reached zero and the dose cycle opened.
    DoseDue {
        medication_id: String,
        due_at: NaiveDateTime,
        at: NaiveDateTime,
    },
    /// The countdown crossed a dose time outside the treatment window.
    DoseOutsideTreatment {
        medication_id: String,
        due_at: NaiveDateTime,
        at: NaiveDateTime,
    },
    TimersArmed {
        medication_id: String,
        generation: u64,
        grace_secs: u64,
        auto_resolve_secs: u64,
        at: NaiveDateTime,
    },
    TimersCancelled {
        medication_id: String,
        generation: u64,
        at: NaiveDateTime,
    },
    /// A gateway call left the engine; the medication is RESOLVING.
    ResolutionStarted {
        medication_id: String,
        action: DoseAction,
        origin: ResolutionOrigin,
        at: NaiveDateTime,
    },
    /// The gateway confirmed a resolution and returned the next dose time.
    DoseResolved {
        medication_id: String,
        action: DoseAction,
        origin: ResolutionOrigin,
        status: bool,
        hour_next_dose: String,
        taken_date: NaiveDateTime,
        at: NaiveDateTime,
    },
    ResolutionFailed {
        medication_id: String,
        action: DoseAction,
        origin: ResolutionOrigin,
        error: String,
        at: NaiveDateTime,
    },
    /// State pushed from another path (another device, a manual edit).
    RemoteCorrection {
        medication_id: String,
        status: bool,
        hour_next_dose: String,
        at: NaiveDateTime,
    },
    TrackerDisposed {
        medication_id: String,
        at: NaiveDateTime,
    },
}

impl Event {
    pub fn medication_id(&self) -> &str {
        match self {
            Event::DoseDue { medication_id, .. }
            | Event::DoseOutsideTreatment { medication_id, .. }
            | Event::TimersArmed { medication_id, .. }
            | Event::TimersCancelled { medication_id, .. }
            | Event::ResolutionStarted { medication_id, .. }
            | Event::DoseResolved { medication_id, .. }
            | Event::ResolutionFailed { medication_id, .. }
            | Event::RemoteCorrection { medication_id, .. }
            | Event::TrackerDisposed { medication_id, .. } => medication_id,
        }
    }
}
