//! Live session glue: drives one `WorkoutPlayer` against one `TrainerLink`.
//!
//! Two independent 1 Hz interval tasks run here, one advancing playback and
//! one appending recorded samples. The trainer notification path never
//! touches the player; it only feeds the metrics snapshot the tasks read.

use crate::analytics::{self, CompletedWorkoutSummary};
use crate::player::scheduler::WorkoutPlayer;
use crate::player::types::{ControlMode, PlayerError, PlayerEvent, PlayerState, Workout};
use crate::recording::RecordedDataPoint;
use crate::sensors::{LinkState, TrainerLink};
use crossbeam::channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

/// Consecutive failed control writes before ERG pushing is degraded.
const CONTROL_FAILURE_LIMIT: u32 = 10;

/// Events surfaced to the session's consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Playback event forwarded from the player
    Player(PlayerEvent),
    /// Control writes kept failing; ERG targets are no longer pushed
    ControlDegraded,
}

/// Shared control-write path used by both the tick task and the transport
/// operations.
#[derive(Clone)]
struct ControlContext {
    trainer: Arc<TrainerLink>,
    failure_streak: Arc<AtomicU32>,
    degraded: Arc<AtomicBool>,
    event_tx: Sender<SessionEvent>,
    default_resistance_pct: u8,
}

impl ControlContext {
    /// Forward player events and push the implied trainer commands.
    ///
    /// A failed write is "command not applied"; the next target change
    /// retries it implicitly. An unbroken failure streak degrades control
    /// rather than hammering a dead characteristic forever.
    async fn dispatch(&self, events: Vec<PlayerEvent>) {
        for event in events {
            match &event {
                PlayerEvent::TargetPowerChanged { watts } => {
                    if self.should_push() {
                        let result = self.trainer.set_target_power(*watts).await;
                        self.record_write(result.is_ok());
                    }
                }
                PlayerEvent::ControlModeChanged {
                    mode: ControlMode::Manual,
                } => {
                    if self.should_push() {
                        let result = self
                            .trainer
                            .set_resistance(self.default_resistance_pct)
                            .await;
                        self.record_write(result.is_ok());
                    }
                }
                _ => {}
            }
            let _ = self.event_tx.send(SessionEvent::Player(event));
        }
    }

    fn should_push(&self) -> bool {
        !self.degraded.load(Ordering::Relaxed)
            && self.trainer.state() == LinkState::Connected
            && self.trainer.capabilities().supports_erg()
    }

    fn record_write(&self, ok: bool) {
        if ok {
            self.failure_streak.store(0, Ordering::Relaxed);
            return;
        }

        let streak = self.failure_streak.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!("Control write failed ({} in a row)", streak);
        if streak >= CONTROL_FAILURE_LIMIT && !self.degraded.swap(true, Ordering::Relaxed) {
            tracing::error!("Trainer control degraded; no longer pushing targets");
            let _ = self.event_tx.send(SessionEvent::ControlDegraded);
        }
    }
}

/// A live workout session.
pub struct Session {
    player: Arc<Mutex<WorkoutPlayer>>,
    ctx: ControlContext,
    event_rx: Receiver<SessionEvent>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Session {
    /// Create a session over a player and a trainer link.
    pub fn new(player: WorkoutPlayer, trainer: Arc<TrainerLink>) -> Self {
        let (event_tx, event_rx) = crossbeam::channel::unbounded();
        let default_resistance_pct = player.config().default_resistance_pct;
        Self {
            player: Arc::new(Mutex::new(player)),
            ctx: ControlContext {
                trainer,
                failure_streak: Arc::new(AtomicU32::new(0)),
                degraded: Arc::new(AtomicBool::new(false)),
                event_tx,
                default_resistance_pct,
            },
            event_rx,
            tasks: Vec::new(),
        }
    }

    /// Receiver for session events.
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.event_rx.clone()
    }

    /// Spawn the two 1 Hz tasks. Idempotent.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }

        let player = self.player.clone();
        let ctx = self.ctx.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let live = ctx.trainer.metrics();
                let events = {
                    let mut player = player.lock().unwrap_or_else(|e| e.into_inner());
                    player.tick(Instant::now(), &live);
                    player.drain_events()
                };
                ctx.dispatch(events).await;
            }
        }));

        let player = self.player.clone();
        let trainer = self.ctx.trainer.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let live = trainer.metrics();
                let mut player = player.lock().unwrap_or_else(|e| e.into_inner());
                player.record_tick(&live);
            }
        }));

        tracing::info!("Session tasks started");
    }

    /// Load a workout into the player.
    pub fn load(&self, workout: Workout) -> Result<(), PlayerError> {
        self.with_player(|p| p.load(workout))
    }

    /// Start or resume playback.
    pub async fn play(&self) -> Result<(), PlayerError> {
        let (result, events) = {
            let mut player = self.player.lock().unwrap_or_else(|e| e.into_inner());
            let result = player.play();
            (result, player.drain_events())
        };
        self.ctx.dispatch(events).await;
        result
    }

    /// Pause playback.
    pub async fn pause(&self) {
        self.run(|p| p.pause()).await;
    }

    /// Stop playback and reset position.
    pub async fn stop(&self) {
        self.run(|p| p.stop()).await;
    }

    /// Skip to the next segment.
    pub async fn skip_forward(&self) {
        self.run(|p| p.skip_forward()).await;
    }

    /// Skip backward.
    pub async fn skip_backward(&self) {
        self.run(|p| p.skip_backward()).await;
    }

    /// Switch control mode.
    pub async fn set_control_mode(&self, mode: ControlMode) {
        self.run(|p| p.set_control_mode(mode)).await;
    }

    /// Adjust the intensity offset.
    pub async fn adjust_intensity(&self, delta: i8) {
        self.run(|p| p.adjust_intensity(delta)).await;
    }

    /// End the workout and hand off the trace with its summary.
    ///
    /// Returns `None` when there is nothing to hand off (never played, or
    /// the trace was already taken).
    pub async fn finish(&self) -> Option<(Vec<RecordedDataPoint>, CompletedWorkoutSummary)> {
        let (trace, threshold, events) = {
            let mut player = self.player.lock().unwrap_or_else(|e| e.into_inner());
            player.end_workout();
            let trace = player.take_trace();
            let threshold = player.config().threshold_watts;
            (trace, threshold, player.drain_events())
        };
        self.ctx.dispatch(events).await;

        trace.map(|points| {
            let summary = analytics::summarize(&points, threshold);
            (points, summary)
        })
    }

    /// Snapshot of the playback state.
    pub fn state(&self) -> PlayerState {
        self.player
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .state()
    }

    /// Abort the 1 Hz tasks. No timers survive teardown.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        tracing::info!("Session tasks stopped");
    }

    fn with_player<R>(&self, f: impl FnOnce(&mut WorkoutPlayer) -> R) -> R {
        let mut player = self.player.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut player)
    }

    async fn run(&self, f: impl FnOnce(&mut WorkoutPlayer)) {
        let events = {
            let mut player = self.player.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut player);
            player.drain_events()
        };
        self.ctx.dispatch(events).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
