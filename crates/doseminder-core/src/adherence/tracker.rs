//! Async driver for [`AdherenceMachine`].
//!
//! Each tracked medication gets one task that owns the machine, the tick
//! interval, both one-shot timers and the gateway call in flight. Nothing
//! else can touch them: the presentation layer only holds a
//! [`TrackerHandle`] with `confirm_toggle()` and `dispose()`.
//!
//! Dropping the handle aborts the task, which drops the timers and aborts
//! any gateway call, so teardown is guaranteed on every exit path.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep, MissedTickBehavior, Sleep};
use tracing::{debug, info, info_span, warn, Instrument};

use super::clock::Clock;
use super::machine::AdherenceMachine;
use super::state::{DoseSnapshot, Effect, ResolutionOrigin, TimerKind};
use crate::error::{CoreError, EngineError, GatewayError, Result};
use crate::events::Event;
use crate::gateway::{dispatch, AdherenceGateway};
use crate::medication::{DoseUpdate, Medication};
use crate::storage::DoseLog;
use crate::timer::ResolutionPolicy;

const COMMAND_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 64;

type CallOutcome = (u64, std::result::Result<DoseUpdate, GatewayError>);

enum Command {
    ConfirmToggle(oneshot::Sender<Result<DoseUpdate>>),
    RemoteUpdate(DoseUpdate),
    Dispose(oneshot::Sender<()>),
}

/// Shared context used to spawn one tracker per medication.
pub struct DoseTracker<G, C> {
    user_id: String,
    gateway: Arc<G>,
    clock: Arc<C>,
    policy: ResolutionPolicy,
    log: Option<Arc<dyn DoseLog>>,
}

impl<G, C> Clone for DoseTracker<G, C> {
    fn clone(&self) -> Self {
        Self {
            user_id: self.user_id.clone(),
            gateway: Arc::clone(&self.gateway),
            clock: Arc::clone(&self.clock),
            policy: self.policy,
            log: self.log.clone(),
        }
    }
}

impl<G: AdherenceGateway, C: Clock> DoseTracker<G, C> {
    pub fn new(user_id: impl Into<String>, gateway: Arc<G>, clock: Arc<C>) -> Self {
        Self {
            user_id: user_id.into(),
            gateway,
            clock,
            policy: ResolutionPolicy::default(),
            log: None,
        }
    }

    pub fn with_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Append every resolved dose to `log`.
    pub fn with_log(mut self, log: Arc<dyn DoseLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Start tracking `medication`. Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns an error if the medication or the policy is invalid.
    pub fn spawn(&self, medication: Medication) -> Result<TrackerHandle> {
        let machine = AdherenceMachine::new(medication, self.policy)?;
        let medication_id = machine.medication().id.clone();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot(self.clock.now()));
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

        let worker = Worker {
            machine,
            user_id: self.user_id.clone(),
            gateway: Arc::clone(&self.gateway),
            clock: Arc::clone(&self.clock),
            log: self.log.clone(),
            commands: command_rx,
            snapshots: snapshot_tx,
            events: event_tx.clone(),
            timers: TimerPair::default(),
            calls: JoinSet::new(),
            manual_reply: None,
        };
        let span = info_span!("dose_tracker", medication_id = %medication_id);
        let task = tokio::spawn(worker.run().instrument(span));
        info!(medication_id = %medication_id, "tracker started");

        Ok(TrackerHandle {
            medication_id,
            commands: command_tx,
            snapshots: snapshot_rx,
            events: event_tx,
            task: Some(task),
        })
    }
}

/// Owned handle to one medication's tracker.
pub struct TrackerHandle {
    medication_id: String,
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<DoseSnapshot>,
    events: broadcast::Sender<Event>,
    task: Option<JoinHandle<()>>,
}

impl TrackerHandle {
    pub fn medication_id(&self) -> &str {
        &self.medication_id
    }

    /// Latest countdown and confirmed status.
    pub fn snapshot(&self) -> DoseSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DoseSnapshot> {
        self.snapshots.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Flip the confirmed status and wait for the gateway's answer.
    ///
    /// # Errors
    /// Returns the gateway error when the call fails (local state is left
    /// untouched), or an engine error if a call is already in flight or the
    /// tracker is gone.
    pub async fn confirm_toggle(&self) -> Result<DoseUpdate> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::ConfirmToggle(reply_tx))
            .await
            .map_err(|_| self.disposed())?;
        reply_rx.await.map_err(|_| self.disposed())?
    }

    /// Push state obtained outside the engine.
    ///
    /// # Errors
    /// Fails if the tracker is gone.
    pub async fn apply_remote_update(&self, update: DoseUpdate) -> Result<()> {
        self.commands
            .send(Command::RemoteUpdate(update))
            .await
            .map_err(|_| self.disposed())?;
        Ok(())
    }

    /// Stop tracking. Cancels the tick, both timers and any call in flight,
    /// then waits for the task to finish.
    ///
    /// # Errors
    /// Fails if the tracker task already stopped on its own.
    pub async fn dispose(mut self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let sent = self.commands.send(Command::Dispose(ack_tx)).await;
        let acked = match sent {
            Ok(()) => ack_rx.await.is_ok(),
            Err(_) => false,
        };
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(medication_id = %self.medication_id, error = %err, "tracker task ended abnormally");
            }
        }
        if acked {
            Ok(())
        } else {
            Err(self.disposed())
        }
    }

    fn disposed(&self) -> CoreError {
        EngineError::Disposed {
            medication_id: self.medication_id.clone(),
        }
        .into()
    }
}

impl Drop for TrackerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!(medication_id = %self.medication_id, "tracker handle dropped, aborting task");
            task.abort();
        }
    }
}

/// The grace and auto-resolve one-shots of the current generation.
#[derive(Default)]
struct TimerPair {
    generation: u64,
    grace: Option<Pin<Box<Sleep>>>,
    auto_resolve: Option<Pin<Box<Sleep>>>,
}

impl TimerPair {
    fn arm(&mut self, generation: u64, grace: Duration, auto_resolve: Duration) {
        self.generation = generation;
        self.grace = Some(Box::pin(sleep(grace)));
        self.auto_resolve = Some(Box::pin(sleep(auto_resolve)));
    }

    fn cancel(&mut self) {
        self.grace = None;
        self.auto_resolve = None;
    }
}

async fn fire(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot {
        Some(timer) => timer.as_mut().await,
        None => pending::<()>().await,
    }
}

struct Worker<G, C> {
    machine: AdherenceMachine,
    user_id: String,
    gateway: Arc<G>,
    clock: Arc<C>,
    log: Option<Arc<dyn DoseLog>>,
    commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<DoseSnapshot>,
    events: broadcast::Sender<Event>,
    timers: TimerPair,
    calls: JoinSet<CallOutcome>,
    manual_reply: Option<(u64, oneshot::Sender<Result<DoseUpdate>>)>,
}

impl<G: AdherenceGateway, C: Clock> Worker<G, C> {
    async fn run(mut self) {
        let mut ticker = interval(self.machine.policy().tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let effects = self.machine.tick(self.clock.now());
                    self.apply(effects);
                }
                _ = fire(&mut self.timers.grace), if self.timers.grace.is_some() => {
                    self.timers.grace = None;
                    let effects = self.machine.timer_fired(
                        TimerKind::Grace,
                        self.timers.generation,
                        self.clock.now(),
                    );
                    self.apply(effects);
                }
                _ = fire(&mut self.timers.auto_resolve), if self.timers.auto_resolve.is_some() => {
                    self.timers.auto_resolve = None;
                    let effects = self.machine.timer_fired(
                        TimerKind::AutoResolve,
                        self.timers.generation,
                        self.clock.now(),
                    );
                    self.apply(effects);
                }
                Some(joined) = self.calls.join_next(), if !self.calls.is_empty() => {
                    self.finish_call(joined);
                }
                command = self.commands.recv() => match command {
                    Some(Command::ConfirmToggle(reply)) => self.confirm_toggle(reply),
                    Some(Command::RemoteUpdate(update)) => {
                        let effects = self.machine.apply_remote_update(&update, self.clock.now());
                        self.apply(effects);
                    }
                    Some(Command::Dispose(ack)) => {
                        self.shutdown();
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
            }
        }
        info!("tracker stopped");
    }

    fn confirm_toggle(&mut self, reply: oneshot::Sender<Result<DoseUpdate>>) {
        match self.machine.confirm_toggle(self.clock.now()) {
            Ok(effects) => {
                let call_id = effects.iter().find_map(Effect::as_call).map(|call| call.id);
                if let Some(call_id) = call_id {
                    self.manual_reply = Some((call_id, reply));
                }
                self.apply(effects);
            }
            Err(err) => {
                let _ = reply.send(Err(err.into()));
            }
        }
    }

    fn finish_call(
        &mut self,
        joined: std::result::Result<CallOutcome, tokio::task::JoinError>,
    ) {
        let (call_id, outcome) = match joined {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => return,
            Err(err) => {
                // The gateway future panicked; release the gate like any failure.
                let Some(call_id) = self.machine.in_flight_call_id() else {
                    return;
                };
                (call_id, Err(GatewayError::Unavailable(format!("gateway task failed: {err}"))))
            }
        };

        let effects = self.machine.complete(call_id, &outcome, self.clock.now());
        if let Some((waiting_id, _)) = &self.manual_reply {
            if *waiting_id == call_id {
                if let Some((_, reply)) = self.manual_reply.take() {
                    let _ = reply.send(outcome.map_err(CoreError::from));
                }
            }
        }
        self.apply(effects);
    }

    fn shutdown(&mut self) {
        let effects = self.machine.dispose(self.clock.now());
        self.apply(effects);
        self.timers.cancel();
        self.calls.abort_all();
        if let Some((_, reply)) = self.manual_reply.take() {
            let _ = reply.send(Err(EngineError::Disposed {
                medication_id: self.machine.medication().id.clone(),
            }
            .into()));
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ArmTimers {
                    generation,
                    grace,
                    auto_resolve,
                } => self.timers.arm(generation, grace, auto_resolve),
                Effect::CancelTimers { generation } => {
                    if generation == self.timers.generation {
                        self.timers.cancel();
                    }
                }
                Effect::Call(request) => {
                    let gateway = Arc::clone(&self.gateway);
                    let user_id = self.user_id.clone();
                    let medication_id = self.machine.medication().id.clone();
                    if request.origin == ResolutionOrigin::Manual {
                        debug!(call_id = request.id, "manual resolution dispatched");
                    }
                    self.calls.spawn(async move {
                        let outcome =
                            dispatch(gateway.as_ref(), &user_id, &medication_id, request.action)
                                .await;
                        (request.id, outcome)
                    });
                }
                Effect::Record(event) => {
                    // Storage blocks; keep it off the tracker task.
                    if let Some(log) = self.log.clone() {
                        tokio::task::spawn_blocking(move || match log.append(&event) {
                            Ok(true) => {}
                            Ok(false) => debug!(taken_date = %event.taken_date, "dose already in history"),
                            Err(err) => warn!(error = %err, "failed to append dose history"),
                        });
                    }
                }
                Effect::Emit(event) => {
                    let _ = self.events.send(event);
                }
            }
        }
        self.snapshots
            .send_replace(self.machine.snapshot(self.clock.now()));
    }
}
