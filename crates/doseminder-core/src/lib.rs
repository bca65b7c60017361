//! # Doseminder Core Library
//!
//! This library provides the dose scheduling and adherence engine behind the
//! Doseminder medication reminder. Every operation is available through the
//! standalone CLI binary; any other front end is a thin layer over the same
//! core library.
//!
//! ## Architecture
//!
//! - **Countdown**: pure calculation of the next dose instant from a
//!   `HH:MM` dose time and an interval, rolling stale data forward
//! - **Adherence engine**: a wall-clock state machine (`Pending -> Due ->
//!   Resolving`) plus an async tracker that owns the tick, the grace and
//!   auto-resolve timers and the in-flight gateway call
//! - **Gateway**: trait for the remote service that owns the authoritative
//!   schedule, with a JSON-over-HTTP implementation
//! - **Storage**: SQLite dose history and TOML configuration
//!
//! ## Key Components
//!
//! - [`next_dose`]: Countdown calculation
//! - [`AdherenceMachine`]: Core adherence state machine
//! - [`DoseTracker`]: Spawns one tracker task per medication
//! - [`HttpGateway`]: Remote adherence gateway client
//! - [`HistoryDb`]: Dose history persistence
//! - [`Config`]: Application configuration management

pub mod adherence;
pub mod error;
pub mod events;
pub mod gateway;
pub mod medication;
pub mod storage;
pub mod timer;

pub use adherence::{
    AdherenceMachine, AdherenceState, Clock, DoseAction, DoseSnapshot, DoseTracker, Effect,
    ResolutionOrigin, SystemClock, TimerKind, TrackerHandle,
};
pub use error::{ConfigError, CoreError, DatabaseError, EngineError, GatewayError, ValidationError};
pub use events::Event;
pub use gateway::{dispatch, AdherenceGateway, HttpGateway};
pub use medication::{DoseEvent, DoseUpdate, Medication};
pub use storage::{AdherenceStats, Config, DoseLog, HistoryDb, MemoryDoseLog};
pub use timer::{format_countdown, next_dose, parse_dose_time, NextDose, ResolutionPolicy};
