//! Dose adherence engine: the per-medication state machine and the async
//! tracker that drives it with a tick, a grace/auto-resolve timer pair and
//! the remote gateway.

mod clock;
mod machine;
mod state;
mod tracker;

pub use clock::{Clock, SystemClock};
pub use machine::AdherenceMachine;
pub use state::{
    AdherenceState, CallRequest, DoseAction, DoseSnapshot, Effect, ResolutionOrigin, TimerKind,
};
pub use tracker::{DoseTracker, TrackerHandle};
