//! Adherence state machine.
//!
//! Like the countdown calculator this is a wall-clock-driven state machine
//! with no internal threads: every entry point takes `now` and returns the
//! [`Effect`]s the driver must apply. That keeps the resolution protocol
//! deterministic and testable without a runtime.
//!
//! ## Transitions
//!
//! ```text
//! Pending   --countdown=0-------> Due        (arm timer pair)
//! Due       --grace fires-------> Resolving  (mark_taken)
//! Due       --auto fires--------> Resolving  (register_missed)
//! Pending/Due --confirm_toggle--> Resolving  (update_status(!status))
//! Resolving --success-----------> Pending    (adopt update, cancel timers)
//! Resolving --failure-----------> prior state
//! ```
//!
//! At most one gateway call is in flight per medication: every trigger is
//! gated on the machine not being `Resolving`.

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use super::state::{
    AdherenceState, CallRequest, DoseAction, DoseSnapshot, Effect, ResolutionOrigin, TimerKind,
};
use crate::error::{CoreError, EngineError, GatewayError, ValidationError};
use crate::events::Event;
use crate::medication::{DoseEvent, DoseUpdate, Medication};
use crate::timer::{format_countdown, next_dose, parse_dose_time, NextDose, ResolutionPolicy};

/// Bookkeeping for an open dose cycle (from `Due` until resolution).
#[derive(Debug, Clone)]
struct DueCycle {
    due_at: NaiveDateTime,
    timers_armed: bool,
    grace_fired: bool,
    auto_fired: bool,
    /// The user asked for "missed"; silence no longer implies compliance.
    explicit_miss: bool,
    /// Set when an automatic call failed; cleared when a new call starts.
    last_failure: Option<NaiveDateTime>,
}

impl DueCycle {
    fn new(due_at: NaiveDateTime) -> Self {
        Self {
            due_at,
            timers_armed: false,
            grace_fired: false,
            auto_fired: false,
            explicit_miss: false,
            last_failure: None,
        }
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    request: CallRequest,
    prior: AdherenceState,
    taken_date: NaiveDateTime,
}

/// Per-medication adherence state machine.
#[derive(Debug, Clone)]
pub struct AdherenceMachine {
    medication: Medication,
    policy: ResolutionPolicy,
    state: AdherenceState,
    cycle: Option<DueCycle>,
    in_flight: Option<InFlight>,
    /// Due instant the countdown was heading for on the previous tick.
    watched_due: Option<NaiveDateTime>,
    /// Last due instant that was resolved or skipped; never re-enters `Due`.
    last_settled_due: Option<NaiveDateTime>,
    generation: u64,
    next_call_id: u64,
    disposed: bool,
}

impl AdherenceMachine {
    /// # Errors
    /// Returns an error if the medication or the policy is invalid.
    pub fn new(medication: Medication, policy: ResolutionPolicy) -> Result<Self, CoreError> {
        medication.validate()?;
        policy.validate()?;
        Ok(Self {
            medication,
            policy,
            state: AdherenceState::Pending,
            cycle: None,
            in_flight: None,
            watched_due: None,
            last_settled_due: None,
            generation: 0,
            next_call_id: 1,
            disposed: false,
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn medication(&self) -> &Medication {
        &self.medication
    }

    pub fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    pub fn state(&self) -> AdherenceState {
        self.state
    }

    pub fn is_resolving(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight_call_id(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|f| f.request.id)
    }

    pub fn timers_armed(&self) -> bool {
        self.cycle.as_ref().is_some_and(|cycle| cycle.timers_armed)
    }

    pub fn due_at(&self) -> Option<NaiveDateTime> {
        self.cycle.as_ref().map(|cycle| cycle.due_at)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn next_dose(&self, now: NaiveDateTime) -> Result<NextDose, ValidationError> {
        next_dose(now, &self.medication.hour_next_dose, self.medication.interval_hours)
    }

    pub fn snapshot(&self, now: NaiveDateTime) -> DoseSnapshot {
        let seconds_remaining = if self.cycle.is_some() {
            0
        } else {
            self.next_dose(now)
                .map(|next| next.seconds_remaining)
                .unwrap_or(0)
        };
        DoseSnapshot {
            medication_id: self.medication.id.clone(),
            state: self.state,
            status: self.medication.status,
            hour_next_dose: self.medication.hour_next_dose.clone(),
            seconds_remaining,
            countdown: format_countdown(seconds_remaining),
            resolving: self.is_resolving(),
            due_at: self.due_at(),
        }
    }

    // ── Triggers ─────────────────────────────────────────────────────

    /// Call once per tick. Detects the dose becoming due and retries a
    /// failed automatic resolution once the cooldown has passed.
    pub fn tick(&mut self, now: NaiveDateTime) -> Vec<Effect> {
        if self.disposed {
            return Vec::new();
        }
        match self.state {
            AdherenceState::Pending => self.watch_countdown(now),
            AdherenceState::Due => self.retry_if_stalled(now),
            AdherenceState::Resolving => Vec::new(),
        }
    }

    /// A timer of the pair armed with `generation` has fired.
    pub fn timer_fired(
        &mut self,
        kind: TimerKind,
        generation: u64,
        now: NaiveDateTime,
    ) -> Vec<Effect> {
        if self.disposed || generation != self.generation {
            debug!(medication_id = %self.medication.id, ?kind, generation, "ignoring stale timer");
            return Vec::new();
        }
        let resolving = self.is_resolving();
        let Some(cycle) = self.cycle.as_mut() else {
            return Vec::new();
        };
        if !cycle.timers_armed {
            return Vec::new();
        }
        match kind {
            TimerKind::Grace => cycle.grace_fired = true,
            TimerKind::AutoResolve => {
                cycle.auto_fired = true;
                cycle.timers_armed = false;
            }
        }
        if resolving {
            debug!(medication_id = %self.medication.id, ?kind, "deadline passed while a call is in flight");
            return Vec::new();
        }

        match kind {
            TimerKind::Grace if cycle.explicit_miss => {
                debug!(medication_id = %self.medication.id, "grace window ignored after explicit miss");
                Vec::new()
            }
            TimerKind::Grace => self.begin(DoseAction::MarkTaken, ResolutionOrigin::Grace, now),
            TimerKind::AutoResolve => {
                self.begin(DoseAction::RegisterMissed, ResolutionOrigin::AutoResolve, now)
            }
        }
    }

    /// The user's double-confirm gesture: flip the confirmed status.
    ///
    /// # Errors
    /// Fails if a call is already in flight or the machine was disposed.
    pub fn confirm_toggle(&mut self, now: NaiveDateTime) -> Result<Vec<Effect>, EngineError> {
        if self.disposed {
            return Err(EngineError::Disposed {
                medication_id: self.medication.id.clone(),
            });
        }
        if self.is_resolving() {
            return Err(EngineError::AlreadyResolving {
                medication_id: self.medication.id.clone(),
            });
        }

        let intended = !self.medication.status;
        let mut effects = Vec::new();
        if let Some(cycle) = self.cycle.as_mut() {
            cycle.explicit_miss = !intended;
        }
        effects.extend(self.cancel_timers(now));
        effects.extend(self.begin(
            DoseAction::UpdateStatus { status: intended },
            ResolutionOrigin::Manual,
            now,
        ));
        Ok(effects)
    }

    /// Report the outcome of the call identified by `call_id`.
    pub fn complete(
        &mut self,
        call_id: u64,
        outcome: &Result<DoseUpdate, GatewayError>,
        now: NaiveDateTime,
    ) -> Vec<Effect> {
        if self.disposed {
            return Vec::new();
        }
        if self.in_flight_call_id() != Some(call_id) {
            debug!(medication_id = %self.medication.id, call_id, "ignoring result of unknown call");
            return Vec::new();
        }
        let Some(in_flight) = self.in_flight.take() else {
            return Vec::new();
        };

        match outcome {
            Ok(update) => match parse_dose_time(&update.hour_next_dose) {
                Ok(_) => self.settle(in_flight, update, now),
                Err(err) => self.fail(in_flight, err.to_string(), now),
            },
            Err(err) => self.fail(in_flight, err.to_string(), now),
        }
    }

    /// Adopt state pushed from outside the engine.
    ///
    /// A new `hour_next_dose` means the dose was resolved through another
    /// path, so an open cycle is closed and its timers cancelled. Ignored
    /// while a call is in flight: that call's answer is authoritative.
    pub fn apply_remote_update(&mut self, update: &DoseUpdate, now: NaiveDateTime) -> Vec<Effect> {
        if self.disposed {
            return Vec::new();
        }
        if self.is_resolving() {
            debug!(medication_id = %self.medication.id, "remote update ignored while resolving");
            return Vec::new();
        }
        if let Err(err) = parse_dose_time(&update.hour_next_dose) {
            warn!(medication_id = %self.medication.id, error = %err, "remote update rejected");
            return Vec::new();
        }

        let mut effects = Vec::new();
        self.medication.status = update.status;
        if update.hour_next_dose != self.medication.hour_next_dose {
            effects.extend(self.cancel_timers(now));
            self.medication.hour_next_dose = update.hour_next_dose.clone();
            self.watched_due = None;
            if let Some(cycle) = self.cycle.take() {
                self.last_settled_due = Some(cycle.due_at);
                self.state = AdherenceState::Pending;
            }
        }
        info!(
            medication_id = %self.medication.id,
            status = update.status,
            hour_next_dose = %update.hour_next_dose,
            "remote correction applied"
        );
        effects.push(Effect::Emit(Event::RemoteCorrection {
            medication_id: self.medication.id.clone(),
            status: update.status,
            hour_next_dose: update.hour_next_dose.clone(),
            at: now,
        }));
        effects
    }

    /// Retire the machine. Cancels the timer pair and abandons any call in
    /// flight; every later trigger is a no-op.
    pub fn dispose(&mut self, now: NaiveDateTime) -> Vec<Effect> {
        if self.disposed {
            return Vec::new();
        }
        let mut effects = self.cancel_timers(now);
        self.disposed = true;
        if let Some(in_flight) = self.in_flight.take() {
            debug!(
                medication_id = %self.medication.id,
                call_id = in_flight.request.id,
                "abandoning in-flight call"
            );
        }
        effects.push(Effect::Emit(Event::TrackerDisposed {
            medication_id: self.medication.id.clone(),
            at: now,
        }));
        effects
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn watch_countdown(&mut self, now: NaiveDateTime) -> Vec<Effect> {
        let next = match self.next_dose(now) {
            Ok(next) => next,
            Err(err) => {
                warn!(medication_id = %self.medication.id, error = %err, "cannot compute countdown");
                return Vec::new();
            }
        };
        // A tick may land after the due second; the watched instant catches it.
        let crossed = self.watched_due.filter(|due| *due <= now);
        self.watched_due = Some(next.due_at);

        let due_at = match (next.is_due(), crossed) {
            (true, _) => next.due_at,
            (false, Some(due_at)) => due_at,
            (false, None) => return Vec::new(),
        };
        if self.last_settled_due == Some(due_at) {
            return Vec::new();
        }
        if !self.medication.in_treatment_on(due_at.date()) {
            debug!(medication_id = %self.medication.id, %due_at, "dose outside treatment window");
            self.last_settled_due = Some(due_at);
            return vec![Effect::Emit(Event::DoseOutsideTreatment {
                medication_id: self.medication.id.clone(),
                due_at,
                at: now,
            })];
        }
        self.enter_due(due_at, now)
    }

    fn enter_due(&mut self, due_at: NaiveDateTime, now: NaiveDateTime) -> Vec<Effect> {
        info!(medication_id = %self.medication.id, %due_at, "dose due");
        self.state = AdherenceState::Due;
        self.cycle = Some(DueCycle::new(due_at));
        let mut effects = vec![Effect::Emit(Event::DoseDue {
            medication_id: self.medication.id.clone(),
            due_at,
            at: now,
        })];
        effects.extend(self.arm_timers(now));
        effects
    }

    fn arm_timers(&mut self, now: NaiveDateTime) -> Vec<Effect> {
        let Some(cycle) = self.cycle.as_mut() else {
            return Vec::new();
        };
        self.generation += 1;
        cycle.timers_armed = true;

        let elapsed = (now - cycle.due_at).to_std().unwrap_or_default();
        let grace = self.policy.grace.saturating_sub(elapsed);
        let auto_resolve = self.policy.auto_resolve.saturating_sub(elapsed);
        debug!(
            medication_id = %self.medication.id,
            generation = self.generation,
            grace_secs = grace.as_secs(),
            auto_resolve_secs = auto_resolve.as_secs(),
            "timer pair armed"
        );
        vec![
            Effect::ArmTimers {
                generation: self.generation,
                grace,
                auto_resolve,
            },
            Effect::Emit(Event::TimersArmed {
                medication_id: self.medication.id.clone(),
                generation: self.generation,
                grace_secs: grace.as_secs(),
                auto_resolve_secs: auto_resolve.as_secs(),
                at: now,
            }),
        ]
    }

    fn cancel_timers(&mut self, now: NaiveDateTime) -> Vec<Effect> {
        match self.cycle.as_mut() {
            Some(cycle) if cycle.timers_armed => {
                cycle.timers_armed = false;
                debug!(medication_id = %self.medication.id, generation = self.generation, "timer pair cancelled");
                vec![
                    Effect::CancelTimers {
                        generation: self.generation,
                    },
                    Effect::Emit(Event::TimersCancelled {
                        medication_id: self.medication.id.clone(),
                        generation: self.generation,
                        at: now,
                    }),
                ]
            }
            _ => Vec::new(),
        }
    }

    fn retry_if_stalled(&mut self, now: NaiveDateTime) -> Vec<Effect> {
        let Some(cycle) = self.cycle.as_ref() else {
            return Vec::new();
        };
        let Some(failed_at) = cycle.last_failure else {
            return Vec::new();
        };
        if (now - failed_at).to_std().unwrap_or_default() < self.policy.retry_cooldown {
            return Vec::new();
        }
        let action = if cycle.auto_fired {
            DoseAction::RegisterMissed
        } else if cycle.grace_fired && !cycle.explicit_miss {
            DoseAction::MarkTaken
        } else {
            return Vec::new();
        };
        self.begin(action, ResolutionOrigin::Retry, now)
    }

    fn begin(
        &mut self,
        action: DoseAction,
        origin: ResolutionOrigin,
        now: NaiveDateTime,
    ) -> Vec<Effect> {
        let taken_date = match self.cycle.as_mut() {
            Some(cycle) => {
                cycle.last_failure = None;
                cycle.due_at
            }
            None => self.next_dose(now).map(|next| next.due_at).unwrap_or(now),
        };
        let request = CallRequest {
            id: self.next_call_id,
            action,
            origin,
        };
        self.next_call_id += 1;
        self.in_flight = Some(InFlight {
            request,
            prior: self.state,
            taken_date,
        });
        self.state = AdherenceState::Resolving;

        info!(medication_id = %self.medication.id, ?action, ?origin, %taken_date, "resolving dose");
        vec![
            Effect::Emit(Event::ResolutionStarted {
                medication_id: self.medication.id.clone(),
                action,
                origin,
                at: now,
            }),
            Effect::Call(request),
        ]
    }

    fn settle(&mut self, in_flight: InFlight, update: &DoseUpdate, now: NaiveDateTime) -> Vec<Effect> {
        let mut effects = self.cancel_timers(now);
        self.cycle = None;
        self.medication.status = update.status;
        self.medication.hour_next_dose = update.hour_next_dose.clone();
        self.state = AdherenceState::Pending;
        self.watched_due = None;

        let InFlight {
            request, taken_date, ..
        } = in_flight;
        if self.last_settled_due == Some(taken_date) {
            debug!(medication_id = %self.medication.id, %taken_date, "dose already recorded");
        } else {
            effects.push(Effect::Record(DoseEvent {
                medication_id: self.medication.id.clone(),
                taken_date,
                taken: update.status,
                created_at: now,
            }));
        }
        self.last_settled_due = Some(taken_date);

        info!(
            medication_id = %self.medication.id,
            action = ?request.action,
            status = update.status,
            hour_next_dose = %update.hour_next_dose,
            "dose resolved"
        );
        effects.push(Effect::Emit(Event::DoseResolved {
            medication_id: self.medication.id.clone(),
            action: request.action,
            origin: request.origin,
            status: update.status,
            hour_next_dose: update.hour_next_dose.clone(),
            taken_date,
            at: now,
        }));
        effects
    }

    fn fail(&mut self, in_flight: InFlight, error: String, now: NaiveDateTime) -> Vec<Effect> {
        let request = in_flight.request;
        self.state = in_flight.prior;
        warn!(
            medication_id = %self.medication.id,
            action = ?request.action,
            origin = ?request.origin,
            %error,
            "dose resolution failed"
        );

        let mut effects = vec![Effect::Emit(Event::ResolutionFailed {
            medication_id: self.medication.id.clone(),
            action: request.action,
            origin: request.origin,
            error,
            at: now,
        })];
        if request.origin.is_automatic() {
            if let Some(cycle) = self.cycle.as_mut() {
                cycle.last_failure = Some(now);
            }
        } else if self.cycle.is_some() {
            // The cycle is still open; give it a fresh timer pair so it
            // reaches a terminal state without the user.
            effects.extend(self.arm_timers(now));
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn machine(status: bool) -> AdherenceMachine {
        let med = Medication::new("med-1", "09:00", 8).with_status(status);
        AdherenceMachine::new(med, ResolutionPolicy::default()).unwrap()
    }

    fn calls(effects: &[Effect]) -> Vec<CallRequest> {
        effects.iter().filter_map(Effect::as_call).copied().collect()
    }

    fn armed_generation(effects: &[Effect]) -> Option<u64> {
        effects.iter().find_map(|e| match e {
            Effect::ArmTimers { generation, .. } => Some(*generation),
            _ => None,
        })
    }

    fn records(effects: &[Effect]) -> Vec<DoseEvent> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Record(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    fn ok(status: bool, hour: &str) -> Result<DoseUpdate, GatewayError> {
        Ok(DoseUpdate {
            status,
            hour_next_dose: hour.into(),
        })
    }

    fn down() -> Result<DoseUpdate, GatewayError> {
        Err(GatewayError::Unavailable("connection refused".into()))
    }

    /// Drive the machine into `Due` at 09:00 and return the timer generation.
    fn make_due(m: &mut AdherenceMachine) -> u64 {
        assert!(m.tick(at(8, 59, 59)).is_empty());
        let effects = m.tick(at(9, 0, 0));
        assert_eq!(m.state(), AdherenceState::Due);
        armed_generation(&effects).expect("timer pair armed")
    }

    #[test]
    fn rejects_invalid_medication() {
        let med = Medication::new("med-1", "9am", 8);
        assert!(AdherenceMachine::new(med, ResolutionPolicy::default()).is_err());
    }

    #[test]
    fn countdown_at_zero_arms_timer_pair_once() {
        let mut m = machine(false);
        let first = m.tick(at(9, 0, 0));
        assert_eq!(
            first
                .iter()
                .filter(|e| matches!(e, Effect::ArmTimers { .. }))
                .count(),
            1
        );
        assert!(matches!(
            first[1],
            Effect::ArmTimers { grace, auto_resolve, .. }
                if grace == std::time::Duration::from_secs(300)
                    && auto_resolve == std::time::Duration::from_secs(2400)
        ));
        // Duplicate zero tick and later ticks do not re-arm.
        assert!(m.tick(at(9, 0, 0)).is_empty());
        assert!(m.tick(at(9, 0, 1)).is_empty());
        assert!(m.timers_armed());
    }

    #[test]
    fn tick_that_skips_the_due_second_still_detects_the_dose() {
        let mut m = machine(false);
        assert!(m.tick(at(8, 59, 58)).is_empty());
        let effects = m.tick(at(9, 0, 3));
        assert_eq!(m.state(), AdherenceState::Due);
        assert_eq!(m.due_at(), Some(at(9, 0, 0)));
        // Timers are shortened by the three seconds already elapsed.
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::ArmTimers { grace, .. } if *grace == std::time::Duration::from_secs(297)
        )));
    }

    #[test]
    fn first_tick_after_long_absence_only_counts_down() {
        let mut m = machine(false);
        let effects = m.tick(at(10, 0, 0));
        assert!(effects.is_empty());
        assert_eq!(m.state(), AdherenceState::Pending);
        assert_eq!(m.snapshot(at(10, 0, 0)).countdown, "07:00:00");
    }

    #[test]
    fn grace_timer_marks_taken() {
        let mut m = machine(false);
        let generation = make_due(&mut m);
        let effects = m.timer_fired(TimerKind::Grace, generation, at(9, 5, 0));
        let issued = calls(&effects);
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].action, DoseAction::MarkTaken);
        assert_eq!(issued[0].origin, ResolutionOrigin::Grace);
        assert_eq!(m.state(), AdherenceState::Resolving);
    }

    #[test]
    fn successful_resolution_cancels_timers_and_records_once() {
        let mut m = machine(false);
        let generation = make_due(&mut m);
        let effects = m.timer_fired(TimerKind::Grace, generation, at(9, 5, 0));
        let id = calls(&effects)[0].id;

        let effects = m.complete(id, &ok(true, "17:00"), at(9, 5, 1));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::CancelTimers { generation: g } if *g == generation)));
        let recorded = records(&effects);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].taken_date, at(9, 0, 0));
        assert!(recorded[0].taken);
        assert_eq!(m.state(), AdherenceState::Pending);
        assert!(m.medication().status);
        assert_eq!(m.medication().hour_next_dose, "17:00");

        // A late auto-resolve firing for the closed cycle is a no-op.
        assert!(m.timer_fired(TimerKind::AutoResolve, generation, at(9, 40, 0)).is_empty());
        assert!(m.tick(at(9, 40, 0)).is_empty());
    }

    #[test]
    fn auto_resolve_registers_missed_when_unresolved() {
        let mut m = machine(false);
        let generation = make_due(&mut m);
        let grace = m.timer_fired(TimerKind::Grace, generation, at(9, 5, 0));
        let id = calls(&grace)[0].id;
        // Grace call fails and is not retried before the deadline.
        m.complete(id, &down(), at(9, 5, 1));
        assert_eq!(m.state(), AdherenceState::Due);

        let effects = m.timer_fired(TimerKind::AutoResolve, generation, at(9, 40, 0));
        let issued = calls(&effects);
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].action, DoseAction::RegisterMissed);
        assert_eq!(issued[0].origin, ResolutionOrigin::AutoResolve);
    }

    #[test]
    fn auto_resolve_during_flight_is_deferred_to_retry() {
        let mut m = machine(false);
        let generation = make_due(&mut m);
        let grace = m.timer_fired(TimerKind::Grace, generation, at(9, 5, 0));
        let id = calls(&grace)[0].id;

        // Still in flight at the auto-resolve deadline: no second call.
        assert!(calls(&m.timer_fired(TimerKind::AutoResolve, generation, at(9, 40, 0))).is_empty());

        m.complete(id, &down(), at(9, 41, 0));
        assert!(m.tick(at(9, 41, 10)).is_empty());
        let retry = m.tick(at(9, 41, 30));
        let issued = calls(&retry);
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].action, DoseAction::RegisterMissed);
        assert_eq!(issued[0].origin, ResolutionOrigin::Retry);
    }

    #[test]
    fn failed_grace_call_is_retried_after_cooldown() {
        let mut m = machine(false);
        let generation = make_due(&mut m);
        let grace = m.timer_fired(TimerKind::Grace, generation, at(9, 5, 0));
        let effects = m.complete(calls(&grace)[0].id, &down(), at(9, 5, 0));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Emit(Event::ResolutionFailed { .. }))));
        assert!(!m.is_resolving());
        assert!(m.timers_armed(), "auto-resolve timer stays armed");

        assert!(m.tick(at(9, 5, 29)).is_empty());
        let retry = calls(&m.tick(at(9, 5, 30)));
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].action, DoseAction::MarkTaken);
        assert_eq!(retry[0].origin, ResolutionOrigin::Retry);
    }

    #[test]
    fn manual_toggle_while_due_cancels_timers() {
        let mut m = machine(true);
        let generation = make_due(&mut m);
        let effects = m.confirm_toggle(at(9, 2, 0)).unwrap();
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::CancelTimers { generation: g } if *g == generation)));
        let issued = calls(&effects);
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].action, DoseAction::UpdateStatus { status: false });

        // Timers of the cancelled generation no longer do anything.
        assert!(m.timer_fired(TimerKind::Grace, generation, at(9, 5, 0)).is_empty());
        assert!(m.timer_fired(TimerKind::AutoResolve, generation, at(9, 40, 0)).is_empty());

        let effects = m.complete(issued[0].id, &ok(false, "17:00"), at(9, 2, 1));
        let recorded = records(&effects);
        assert_eq!(recorded.len(), 1);
        assert!(!recorded[0].taken);
        assert!(!m.medication().status);
    }

    #[test]
    fn manual_toggle_while_pending_targets_upcoming_dose() {
        let mut m = machine(false);
        m.tick(at(8, 0, 0));
        let effects = m.confirm_toggle(at(8, 0, 0)).unwrap();
        assert_eq!(
            calls(&effects)[0].action,
            DoseAction::UpdateStatus { status: true }
        );
        let id = calls(&effects)[0].id;
        // Gateway keeps the same hour: the 09:00 dose is settled early.
        let effects = m.complete(id, &ok(true, "09:00"), at(8, 0, 1));
        assert_eq!(records(&effects)[0].taken_date, at(9, 0, 0));
        m.tick(at(8, 59, 59));
        assert!(m.tick(at(9, 0, 0)).is_empty());
        assert_eq!(m.state(), AdherenceState::Pending);
    }

    #[test]
    fn confirm_rejected_while_resolving() {
        let mut m = machine(false);
        let generation = make_due(&mut m);
        m.timer_fired(TimerKind::Grace, generation, at(9, 5, 0));
        assert_eq!(
            m.confirm_toggle(at(9, 5, 1)),
            Err(EngineError::AlreadyResolving {
                medication_id: "med-1".into()
            })
        );
    }

    #[test]
    fn failed_manual_toggle_leaves_status_and_rearms() {
        let mut m = machine(true);
        let generation = make_due(&mut m);
        let effects = m.confirm_toggle(at(9, 2, 0)).unwrap();
        let id = calls(&effects)[0].id;

        let effects = m.complete(id, &down(), at(9, 2, 1));
        assert!(m.medication().status, "status unchanged until confirmed");
        assert_eq!(m.state(), AdherenceState::Due);
        let rearmed = armed_generation(&effects).expect("fresh timer pair");
        assert!(rearmed > generation);

        // The user asked for "missed": the grace window no longer presumes taken.
        assert!(m.timer_fired(TimerKind::Grace, rearmed, at(9, 5, 0)).is_empty());
        let auto = calls(&m.timer_fired(TimerKind::AutoResolve, rearmed, at(9, 40, 0)));
        assert_eq!(auto[0].action, DoseAction::RegisterMissed);
    }

    #[test]
    fn malformed_gateway_hour_is_treated_as_failure() {
        let mut m = machine(false);
        let generation = make_due(&mut m);
        let grace = m.timer_fired(TimerKind::Grace, generation, at(9, 5, 0));
        let effects = m.complete(calls(&grace)[0].id, &ok(true, "later"), at(9, 5, 1));
        assert!(records(&effects).is_empty());
        assert_eq!(m.state(), AdherenceState::Due);
        assert_eq!(m.medication().hour_next_dose, "09:00");
    }

    #[test]
    fn result_for_unknown_call_is_ignored() {
        let mut m = machine(false);
        let generation = make_due(&mut m);
        m.timer_fired(TimerKind::Grace, generation, at(9, 5, 0));
        assert!(m.complete(999, &ok(true, "17:00"), at(9, 5, 1)).is_empty());
        assert!(m.is_resolving());
    }

    #[test]
    fn remote_reschedule_closes_open_cycle() {
        let mut m = machine(false);
        let generation = make_due(&mut m);
        let effects = m.apply_remote_update(
            &DoseUpdate {
                status: true,
                hour_next_dose: "17:00".into(),
            },
            at(9, 1, 0),
        );
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::CancelTimers { generation: g } if *g == generation)));
        assert_eq!(m.state(), AdherenceState::Pending);
        assert!(m.medication().status);
        assert!(records(&effects).is_empty());
        assert_eq!(m.snapshot(at(9, 1, 0)).seconds_remaining, 8 * 3600 - 60);
    }

    #[test]
    fn remote_time_far_ahead_is_honoured() {
        let mut m = machine(false);
        m.tick(at(8, 0, 0));
        m.apply_remote_update(
            &DoseUpdate {
                status: false,
                hour_next_dose: "20:00".into(),
            },
            at(8, 0, 0),
        );
        let snapshot = m.snapshot(at(8, 0, 0));
        assert_eq!(snapshot.seconds_remaining, 12 * 3600);
        assert_eq!(snapshot.countdown, "12:00:00");

        // Four hours later is not a dose time on the new schedule.
        for now in [at(11, 59, 59), at(12, 0, 0), at(12, 0, 1)] {
            assert!(calls(&m.tick(now)).is_empty());
            assert_eq!(m.state(), AdherenceState::Pending);
        }
        assert_eq!(m.snapshot(at(12, 0, 0)).seconds_remaining, 8 * 3600);

        m.tick(at(19, 59, 59));
        m.tick(at(20, 0, 0));
        assert_eq!(m.state(), AdherenceState::Due);
    }

    #[test]
    fn remote_update_ignored_while_resolving() {
        let mut m = machine(false);
        let generation = make_due(&mut m);
        m.timer_fired(TimerKind::Grace, generation, at(9, 5, 0));
        let update = DoseUpdate {
            status: false,
            hour_next_dose: "13:00".into(),
        };
        assert!(m.apply_remote_update(&update, at(9, 5, 1)).is_empty());
        assert_eq!(m.medication().hour_next_dose, "09:00");
    }

    #[test]
    fn dispose_cancels_timers_and_silences_everything() {
        let mut m = machine(false);
        let generation = make_due(&mut m);
        let effects = m.dispose(at(9, 1, 0));
        assert!(matches!(effects[0], Effect::CancelTimers { .. }));
        assert!(m.timer_fired(TimerKind::Grace, generation, at(9, 5, 0)).is_empty());
        assert!(m.tick(at(9, 5, 0)).is_empty());
        assert!(m.confirm_toggle(at(9, 5, 0)).is_err());
        assert!(m.dispose(at(9, 6, 0)).is_empty());
    }

    #[test]
    fn dose_outside_treatment_window_is_not_armed() {
        let med = Medication::new("med-1", "09:00", 8).with_period(
            Some(NaiveDate::from_ymd_opt(2026, 11, 1).unwrap()),
            None,
        );
        let mut m = AdherenceMachine::new(med, ResolutionPolicy::default()).unwrap();
        m.tick(at(8, 59, 59));
        let effects = m.tick(at(9, 0, 0));
        assert!(matches!(
            effects.as_slice(),
            [Effect::Emit(Event::DoseOutsideTreatment { .. })]
        ));
        assert_eq!(m.state(), AdherenceState::Pending);
        assert!(m.tick(at(9, 0, 1)).is_empty());
    }

    #[test]
    fn snapshot_marks_pending_resolution() {
        let mut m = machine(false);
        let generation = make_due(&mut m);
        m.timer_fired(TimerKind::Grace, generation, at(9, 5, 0));
        let snap = m.snapshot(at(9, 5, 0));
        assert!(snap.resolving);
        assert!(!snap.status);
        assert_eq!(snap.countdown, "00:00:00");
        assert_eq!(snap.due_at, Some(at(9, 0, 0)));
    }

    #[test]
    fn elapsed_due_time_shortens_timers_to_zero() {
        let mut m = machine(false);
        m.tick(at(8, 59, 59));
        // Paused process resumes 10 minutes late.
        let effects = m.tick(at(8, 59, 59) + Duration::minutes(10));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::ArmTimers { grace, .. } if grace.is_zero()
        )));
    }
}
