use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::events::Event;
use crate::medication::DoseEvent;

/// Lifecycle of the current dose cycle.
///
/// ```text
/// Pending -> Due -> Resolving -> Pending
///    \_____________/^
///     manual toggle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdherenceState {
    /// Countdown running toward the next dose.
    Pending,
    /// Countdown reached zero; grace and auto-resolve timers are armed.
    Due,
    /// A gateway call is in flight.
    Resolving,
}

/// Mutation sent to the remote adherence gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseAction {
    MarkTaken,
    RegisterMissed,
    UpdateStatus { status: bool },
}

/// What caused a resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOrigin {
    Grace,
    AutoResolve,
    Manual,
    /// Re-issue of an automatic call that failed earlier.
    Retry,
}

impl ResolutionOrigin {
    pub fn is_automatic(self) -> bool {
        !matches!(self, ResolutionOrigin::Manual)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    Grace,
    AutoResolve,
}

/// A gateway call the driver must perform and report back with
/// [`AdherenceMachine::complete`](super::AdherenceMachine::complete).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRequest {
    pub id: u64,
    pub action: DoseAction,
    pub origin: ResolutionOrigin,
}

/// Side effects requested by the state machine.
///
/// The machine never touches timers, the network or storage itself; the
/// driver applies these in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Arm the timer pair. Delays are relative to the moment of arming.
    ArmTimers {
        generation: u64,
        grace: Duration,
        auto_resolve: Duration,
    },
    /// Drop both timers of the given generation.
    CancelTimers { generation: u64 },
    Call(CallRequest),
    Record(DoseEvent),
    Emit(Event),
}

impl Effect {
    pub fn as_call(&self) -> Option<&CallRequest> {
        match self {
            Effect::Call(request) => Some(request),
            _ => None,
        }
    }
}

/// Read-only view handed to the presentation layer.
///
/// `status` only ever reflects state confirmed by the gateway; `resolving`
/// is the pending marker shown while a call is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseSnapshot {
    pub medication_id: String,
    pub state: AdherenceState,
    pub status: bool,
    pub hour_next_dose: String,
    pub seconds_remaining: u64,
    pub countdown: String,
    pub resolving: bool,
    /// Due instant of the open dose cycle, if any.
    pub due_at: Option<NaiveDateTime>,
}
