//! Workout playback scheduler.
//!
//! `WorkoutPlayer` is a pure state machine driven by `Instant` values passed
//! into `tick`, so the whole playback model runs under test without a runtime
//! or a trainer. The async glue lives in `session`.

use crate::player::types::{
    expand_segments, validate_segments, ControlMode, PlayerConfig, PlayerError, PlayerEvent,
    PlayerState, PlayerStatus, Segment, Workout,
};
use crate::recording::{RecordedDataPoint, Recorder, RecorderConfig};
use crate::sensors::TrainerMetrics;
use chrono::Utc;
use std::time::Instant;

/// Within this many seconds of a segment start, skipping backward goes to the
/// previous segment instead of restarting the current one.
const SKIP_BACK_GRACE_SECS: f64 = 3.0;

/// Intensity offset bound in percent points.
const MAX_INTENSITY_OFFSET: i8 = 50;

/// Workout playback state machine.
///
/// Owns the expanded segment list, the playback position, the ERG target and
/// the sample recorder. All mutation happens in the transport operations and
/// the two tick entry points; nothing else writes `PlayerState`.
pub struct WorkoutPlayer {
    config: PlayerConfig,
    workout: Option<Workout>,
    segments: Vec<Segment>,
    total_secs: f64,
    state: PlayerState,
    last_tick: Option<Instant>,
    idle_secs: f64,
    sensor_seen: bool,
    last_emitted_target: Option<u16>,
    completed_emitted: bool,
    trace_taken: bool,
    recorder: Recorder,
    pending_events: Vec<PlayerEvent>,
}

impl WorkoutPlayer {
    /// Create a new player.
    pub fn new(config: PlayerConfig) -> Self {
        let recorder = Recorder::new(RecorderConfig {
            max_power_watts: config.power_spike_filter_watts,
        });
        Self {
            config,
            workout: None,
            segments: Vec::new(),
            total_secs: 0.0,
            state: PlayerState::default(),
            last_tick: None,
            idle_secs: 0.0,
            sensor_seen: false,
            last_emitted_target: None,
            completed_emitted: false,
            trace_taken: false,
            recorder,
            pending_events: Vec::new(),
        }
    }

    /// Load a workout, replacing any previous one and resetting playback.
    pub fn load(&mut self, workout: Workout) -> Result<(), PlayerError> {
        validate_segments(&workout.segments)?;

        let expanded = expand_segments(&workout.segments);
        self.total_secs = expanded.iter().map(|s| s.duration_secs as f64).sum();
        self.segments = expanded;

        let mode = self.state.control_mode;
        self.state = PlayerState {
            control_mode: mode,
            ..PlayerState::default()
        };
        self.last_tick = None;
        self.idle_secs = 0.0;
        self.sensor_seen = false;
        self.last_emitted_target = None;
        self.completed_emitted = false;
        self.trace_taken = false;
        self.recorder.discard();

        tracing::info!(
            "Workout loaded: {} ({} segments, {}s)",
            workout.name,
            self.segments.len(),
            self.total_secs
        );
        self.workout = Some(workout);
        Ok(())
    }

    /// Start or resume playback.
    ///
    /// From `Paused` this resumes in place; from `Stopped` or `Completed` it
    /// starts a fresh run, resetting position, offsets and the recording
    /// buffer. A no-op while already playing.
    pub fn play(&mut self) -> Result<(), PlayerError> {
        if self.segments.is_empty() {
            return Err(PlayerError::NoWorkoutLoaded);
        }

        match self.state.status {
            PlayerStatus::Playing => Ok(()),
            PlayerStatus::Paused => {
                self.state.status = PlayerStatus::Playing;
                self.last_tick = None;
                self.idle_secs = 0.0;
                tracing::info!("Workout resumed");
                self.emit(PlayerEvent::Started);
                Ok(())
            }
            PlayerStatus::Stopped | PlayerStatus::Completed => {
                let mode = self.state.control_mode;
                self.state = PlayerState {
                    status: PlayerStatus::Playing,
                    control_mode: mode,
                    ..PlayerState::default()
                };
                self.last_tick = None;
                self.idle_secs = 0.0;
                self.sensor_seen = false;
                self.last_emitted_target = None;
                self.completed_emitted = false;
                self.trace_taken = false;
                self.recorder.start();

                tracing::info!("Workout started");
                self.emit(PlayerEvent::Started);
                self.update_target();
                Ok(())
            }
        }
    }

    /// Pause playback, freezing the clock in place.
    pub fn pause(&mut self) {
        if self.state.status != PlayerStatus::Playing {
            return;
        }
        self.state.status = PlayerStatus::Paused;
        self.last_tick = None;
        self.idle_secs = 0.0;
        tracing::info!("Workout paused");
        self.emit(PlayerEvent::Paused { auto: false });
    }

    /// Stop playback and reset the position. The recording buffer is kept.
    pub fn stop(&mut self) {
        if self.state.status == PlayerStatus::Stopped {
            return;
        }
        let mode = self.state.control_mode;
        self.state = PlayerState {
            control_mode: mode,
            ..PlayerState::default()
        };
        self.last_tick = None;
        self.idle_secs = 0.0;
        self.last_emitted_target = None;
        tracing::info!("Workout stopped");
        self.emit(PlayerEvent::Stopped);
    }

    /// End the workout early, keeping everything recorded so far.
    pub fn end_workout(&mut self) {
        if !matches!(
            self.state.status,
            PlayerStatus::Playing | PlayerStatus::Paused
        ) {
            return;
        }
        self.complete();
    }

    /// Advance playback to `now`.
    ///
    /// Progression uses the measured wall-clock delta since the previous
    /// tick, so late or coalesced timer fires never lose workout time. A
    /// no-op unless playing.
    pub fn tick(&mut self, now: Instant, live: &TrainerMetrics) {
        if self.state.status != PlayerStatus::Playing {
            return;
        }

        let delta = match self.last_tick {
            Some(prev) => now.saturating_duration_since(prev).as_secs_f64(),
            None => 0.0,
        };
        self.last_tick = Some(now);
        self.state.elapsed_secs += delta;

        if self.state.elapsed_secs >= self.total_secs {
            self.complete();
            return;
        }

        self.resolve_position();
        self.update_target();
        self.update_autopause(delta, live);
    }

    /// Append one recorded sample for the current instant.
    ///
    /// Live metric fields always win; when no sensor reports any effort and
    /// synthetic metrics are enabled, plausible values correlated with the
    /// target are recorded instead. A no-op unless playing.
    pub fn record_tick(&mut self, live: &TrainerMetrics) {
        if self.state.status != PlayerStatus::Playing {
            return;
        }

        let synthetic = if self.config.synthetic_metrics && !live.reports_effort() {
            Some(self.synthetic_sample())
        } else {
            None
        };

        let point = RecordedDataPoint {
            timestamp: Utc::now(),
            elapsed_secs: self.state.elapsed_secs as u32,
            target_power: self.state.target_power_watts,
            power_watts: live.power_watts.or(synthetic.map(|s| s.0)),
            cadence_rpm: live.cadence_rpm.or(synthetic.map(|s| s.1)),
            heart_rate_bpm: live.heart_rate_bpm.or(synthetic.map(|s| s.2)),
            segment_index: self.state.current_segment,
        };

        if let Err(e) = self.recorder.append(point) {
            tracing::warn!("Dropped sample: {}", e);
        }
    }

    /// Jump to the start of the next segment, or complete from the last one.
    pub fn skip_forward(&mut self) {
        if !matches!(
            self.state.status,
            PlayerStatus::Playing | PlayerStatus::Paused
        ) {
            return;
        }

        let boundary =
            self.segment_start(self.state.current_segment)
                + self.segments[self.state.current_segment].duration_secs as f64;
        self.state.elapsed_secs = boundary;
        self.idle_secs = 0.0;

        if boundary >= self.total_secs {
            self.complete();
        } else {
            self.resolve_position();
            self.update_target();
        }
    }

    /// Jump backward: shortly after a segment boundary this goes to the
    /// previous segment, otherwise it restarts the current one.
    pub fn skip_backward(&mut self) {
        if !matches!(
            self.state.status,
            PlayerStatus::Playing | PlayerStatus::Paused
        ) {
            return;
        }

        let target_index = if self.state.segment_elapsed <= SKIP_BACK_GRACE_SECS
            && self.state.current_segment > 0
        {
            self.state.current_segment - 1
        } else {
            self.state.current_segment
        };

        self.state.elapsed_secs = self.segment_start(target_index);
        self.idle_secs = 0.0;
        self.resolve_position();
        self.update_target();
    }

    /// Switch between ERG and manual control.
    ///
    /// Entering ERG re-emits the current target so the trainer is brought
    /// back in line immediately.
    pub fn set_control_mode(&mut self, mode: ControlMode) {
        if self.state.control_mode == mode {
            return;
        }
        self.state.control_mode = mode;
        tracing::info!("Control mode: {:?}", mode);
        self.emit(PlayerEvent::ControlModeChanged { mode });

        match mode {
            ControlMode::Erg => {
                let watts = self.state.target_power_watts;
                self.last_emitted_target = Some(watts);
                self.emit(PlayerEvent::TargetPowerChanged { watts });
            }
            ControlMode::Manual => {
                self.last_emitted_target = None;
            }
        }
    }

    /// Adjust the intensity offset by `delta` percent points, bounded.
    pub fn adjust_intensity(&mut self, delta: i8) {
        let offset = (self.state.intensity_offset as i16 + delta as i16)
            .clamp(-(MAX_INTENSITY_OFFSET as i16), MAX_INTENSITY_OFFSET as i16)
            as i8;
        if offset == self.state.intensity_offset {
            return;
        }
        self.state.intensity_offset = offset;
        tracing::info!("Intensity offset: {:+}", offset);
        self.emit(PlayerEvent::IntensityChanged { offset });

        if matches!(
            self.state.status,
            PlayerStatus::Playing | PlayerStatus::Paused
        ) {
            self.update_target();
        }
    }

    /// Take the finished trace. Returns `Some` exactly once per completed
    /// run; `None` before completion or on any later call.
    pub fn take_trace(&mut self) -> Option<Vec<RecordedDataPoint>> {
        if self.state.status != PlayerStatus::Completed || self.trace_taken {
            return None;
        }
        self.trace_taken = true;
        self.recorder.finish().ok()
    }

    /// Drain the events produced since the last drain.
    pub fn drain_events(&mut self) -> Vec<PlayerEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Snapshot of the playback state.
    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// The loaded workout, if any.
    pub fn workout(&self) -> Option<&Workout> {
        self.workout.as_ref()
    }

    /// The expanded segment list being played.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of samples recorded so far in this run.
    pub fn sample_count(&self) -> usize {
        self.recorder.len()
    }

    /// Read-only view of the samples buffered so far.
    ///
    /// The buffer survives `stop`, so a stopped session can still be
    /// exported; starting the next run clears it.
    pub fn recorded_samples(&self) -> &[RecordedDataPoint] {
        self.recorder.samples()
    }

    /// Playback configuration.
    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    fn emit(&mut self, event: PlayerEvent) {
        self.pending_events.push(event);
    }

    /// Cumulative start time of a segment in the expanded list.
    fn segment_start(&self, index: usize) -> f64 {
        self.segments[..index]
            .iter()
            .map(|s| s.duration_secs as f64)
            .sum()
    }

    /// Resolve the current segment from elapsed time by cumulative scan.
    fn resolve_position(&mut self) {
        let mut offset = 0.0;
        for (i, segment) in self.segments.iter().enumerate() {
            let duration = segment.duration_secs as f64;
            if self.state.elapsed_secs < offset + duration {
                if i != self.state.current_segment {
                    tracing::debug!("Segment {} -> {}", self.state.current_segment, i);
                    self.emit(PlayerEvent::SegmentChanged { index: i });
                }
                self.state.current_segment = i;
                self.state.segment_elapsed = self.state.elapsed_secs - offset;
                return;
            }
            offset += duration;
        }
        self.complete();
    }

    /// Recompute the ERG target for the current position, emitting
    /// `TargetPowerChanged` only when the integer wattage changes.
    fn update_target(&mut self) {
        let Some(segment) = self.segments.get(self.state.current_segment) else {
            return;
        };

        let progress = if segment.duration_secs > 0 {
            (self.state.segment_elapsed / segment.duration_secs as f64) as f32
        } else {
            0.0
        };

        let pct = segment.power_pct_at(progress) + self.state.intensity_offset as f32;
        let threshold = self.config.threshold_watts as f32;
        let watts = (pct / 100.0 * threshold)
            .round()
            .clamp(0.0, 2.0 * threshold) as u16;

        self.state.target_power_watts = watts;

        if self.state.control_mode == ControlMode::Erg && self.last_emitted_target != Some(watts) {
            self.last_emitted_target = Some(watts);
            self.emit(PlayerEvent::TargetPowerChanged { watts });
        }
    }

    /// Accumulate idle time and autopause once the threshold is crossed.
    ///
    /// Only armed after a real sensor has reported power or cadence at least
    /// once this run; synthetic-only sessions never autopause.
    fn update_autopause(&mut self, delta: f64, live: &TrainerMetrics) {
        if live.reports_effort() {
            self.sensor_seen = true;
        }
        if !self.sensor_seen {
            return;
        }

        let idle = live.power_watts.unwrap_or(0) == 0 && live.cadence_rpm.unwrap_or(0) == 0;
        if !idle {
            self.idle_secs = 0.0;
            return;
        }

        self.idle_secs += delta;
        if self.idle_secs >= self.config.autopause_idle_secs {
            self.idle_secs = 0.0;
            self.last_tick = None;
            self.state.status = PlayerStatus::Paused;
            tracing::info!(
                "Autopaused after {:.0}s idle",
                self.config.autopause_idle_secs
            );
            self.emit(PlayerEvent::Paused { auto: true });
        }
    }

    /// Enter `Completed`, pinning the position to the final instant.
    fn complete(&mut self) {
        self.state.elapsed_secs = self.total_secs;
        if let Some(last) = self.segments.len().checked_sub(1) {
            self.state.current_segment = last;
            self.state.segment_elapsed = self.segments[last].duration_secs as f64;
        }
        self.state.status = PlayerStatus::Completed;
        self.last_tick = None;

        if !self.completed_emitted {
            self.completed_emitted = true;
            tracing::info!("Workout completed");
            self.emit(PlayerEvent::Completed);
        }
    }

    /// Plausible power/cadence/heart-rate correlated with the current target.
    fn synthetic_sample(&self) -> (u16, u8, u8) {
        let t = self.state.elapsed_secs;
        let target = self.state.target_power_watts as f64;
        let threshold = self.config.threshold_watts.max(1) as f64;

        let power = (target + 6.0 * (t * 0.8).sin()).max(0.0).round() as u16;
        let cadence = (90.0 + 4.0 * (t * 0.3).sin()).round() as u8;
        let heart_rate = (95.0 + 75.0 * (target / (2.0 * threshold)) + 2.0 * (t * 0.1).sin())
            .clamp(50.0, 200.0)
            .round() as u8;

        (power, cadence, heart_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::types::SegmentType;
    use std::time::Duration;

    fn two_block_workout() -> Workout {
        Workout::new(
            "test",
            vec![
                Segment::steady(SegmentType::Warmup, 300, 50.0),
                Segment::steady(SegmentType::Interval, 600, 100.0),
            ],
        )
    }

    fn player_with(workout: Workout) -> WorkoutPlayer {
        let mut player = WorkoutPlayer::new(PlayerConfig::default());
        player.load(workout).unwrap();
        player
    }

    fn at(t0: Instant, secs: f64) -> Instant {
        t0 + Duration::from_secs_f64(secs)
    }

    fn no_metrics() -> TrainerMetrics {
        TrainerMetrics::default()
    }

    fn metrics_with_power(watts: u16) -> TrainerMetrics {
        TrainerMetrics {
            power_watts: Some(watts),
            ..TrainerMetrics::default()
        }
    }

    #[test]
    fn test_elapsed_resolves_to_correct_segment() {
        let mut player = player_with(two_block_workout());
        let t0 = Instant::now();

        player.play().unwrap();
        player.tick(t0, &no_metrics());
        player.tick(at(t0, 450.0), &no_metrics());

        let state = player.state();
        assert_eq!(state.status, PlayerStatus::Playing);
        assert_eq!(state.current_segment, 1);
        assert!((state.segment_elapsed - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_wall_clock_delta_survives_late_ticks() {
        let mut player = player_with(two_block_workout());
        let t0 = Instant::now();

        player.play().unwrap();
        player.tick(t0, &no_metrics());
        // One tick arriving 3s late still accounts for all 3 seconds.
        player.tick(at(t0, 3.0), &no_metrics());
        assert!((player.state().elapsed_secs - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_paused_clock_does_not_advance() {
        let mut player = player_with(two_block_workout());
        let t0 = Instant::now();

        player.play().unwrap();
        player.tick(t0, &no_metrics());
        player.tick(at(t0, 10.0), &no_metrics());
        player.pause();

        player.tick(at(t0, 100.0), &no_metrics());
        assert!((player.state().elapsed_secs - 10.0).abs() < 1e-6);

        // Resuming measures from the resume point, not the pause point.
        player.play().unwrap();
        player.tick(at(t0, 200.0), &no_metrics());
        player.tick(at(t0, 205.0), &no_metrics());
        assert!((player.state().elapsed_secs - 15.0).abs() < 1e-6);
    }

    #[test]
    fn test_steady_target_emitted_once() {
        let mut player = player_with(two_block_workout());
        let t0 = Instant::now();

        player.play().unwrap();
        let events = player.drain_events();
        // 50% of 200W threshold.
        assert!(events.contains(&PlayerEvent::TargetPowerChanged { watts: 100 }));

        player.tick(t0, &no_metrics());
        player.tick(at(t0, 5.0), &no_metrics());
        player.tick(at(t0, 10.0), &no_metrics());
        let repeats = player
            .drain_events()
            .iter()
            .filter(|e| matches!(e, PlayerEvent::TargetPowerChanged { .. }))
            .count();
        assert_eq!(repeats, 0);
    }

    #[test]
    fn test_ramp_interpolates_target() {
        let workout = Workout::new(
            "ramp",
            vec![Segment::ramp(SegmentType::Warmup, 300, 40.0, 80.0)],
        );
        let mut player = player_with(workout);
        let t0 = Instant::now();

        player.play().unwrap();
        player.tick(t0, &no_metrics());
        player.tick(at(t0, 150.0), &no_metrics());

        // Midpoint: 60% of 200W.
        assert_eq!(player.state().target_power_watts, 120);
    }

    #[test]
    fn test_target_clamped_to_twice_threshold() {
        let workout = Workout::new(
            "sprint",
            vec![Segment::steady(SegmentType::Interval, 60, 250.0)],
        );
        let mut player = player_with(workout);

        player.play().unwrap();
        assert_eq!(player.state().target_power_watts, 400);
    }

    #[test]
    fn test_intensity_offset_bounded() {
        let mut player = player_with(two_block_workout());
        player.play().unwrap();

        player.adjust_intensity(30);
        player.adjust_intensity(30);
        assert_eq!(player.state().intensity_offset, 50);

        player.adjust_intensity(-128);
        assert_eq!(player.state().intensity_offset, -50);

        // 50% - 50 points = 0% of threshold, clamped at zero.
        assert_eq!(player.state().target_power_watts, 0);
    }

    #[test]
    fn test_autopause_after_sustained_idle() {
        let mut player = player_with(two_block_workout());
        let t0 = Instant::now();

        player.play().unwrap();
        player.drain_events();

        player.tick(t0, &metrics_with_power(0));
        player.tick(at(t0, 3.0), &metrics_with_power(0));
        assert_eq!(player.state().status, PlayerStatus::Playing);

        player.tick(at(t0, 5.2), &metrics_with_power(0));
        assert_eq!(player.state().status, PlayerStatus::Paused);

        let pauses = player
            .drain_events()
            .into_iter()
            .filter(|e| *e == PlayerEvent::Paused { auto: true })
            .count();
        assert_eq!(pauses, 1);

        // Paused: further ticks are no-ops, no second autopause.
        player.tick(at(t0, 20.0), &metrics_with_power(0));
        assert!(player.drain_events().is_empty());
    }

    #[test]
    fn test_activity_resets_idle_timer() {
        let mut player = player_with(two_block_workout());
        let t0 = Instant::now();

        player.play().unwrap();
        player.tick(t0, &metrics_with_power(0));
        player.tick(at(t0, 4.0), &metrics_with_power(0));
        player.tick(at(t0, 4.5), &metrics_with_power(150));
        player.tick(at(t0, 9.0), &metrics_with_power(0));

        // Only 4.5s idle since the reset.
        assert_eq!(player.state().status, PlayerStatus::Playing);
    }

    #[test]
    fn test_no_sensor_never_autopauses() {
        let mut player = player_with(two_block_workout());
        let t0 = Instant::now();

        player.play().unwrap();
        player.tick(t0, &no_metrics());
        player.tick(at(t0, 60.0), &no_metrics());

        assert_eq!(player.state().status, PlayerStatus::Playing);
    }

    #[test]
    fn test_skip_backward_near_boundary_goes_to_previous() {
        let mut player = player_with(two_block_workout());
        let t0 = Instant::now();

        player.play().unwrap();
        player.tick(t0, &no_metrics());
        player.tick(at(t0, 302.0), &no_metrics());
        assert_eq!(player.state().current_segment, 1);

        // 2s into segment 1: back to segment 0.
        player.skip_backward();
        let state = player.state();
        assert_eq!(state.current_segment, 0);
        assert!((state.elapsed_secs - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_skip_backward_mid_segment_restarts_it() {
        let mut player = player_with(two_block_workout());
        let t0 = Instant::now();

        player.play().unwrap();
        player.tick(t0, &no_metrics());
        player.tick(at(t0, 310.0), &no_metrics());

        // 10s into segment 1: restart segment 1.
        player.skip_backward();
        let state = player.state();
        assert_eq!(state.current_segment, 1);
        assert!((state.elapsed_secs - 300.0).abs() < 1e-6);
        assert!((state.segment_elapsed - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_skip_forward_advances_and_completes() {
        let mut player = player_with(two_block_workout());

        player.play().unwrap();
        player.skip_forward();
        assert_eq!(player.state().current_segment, 1);

        player.skip_forward();
        assert_eq!(player.state().status, PlayerStatus::Completed);
    }

    #[test]
    fn test_completion_pins_final_position() {
        let mut player = player_with(two_block_workout());
        let t0 = Instant::now();

        player.play().unwrap();
        player.tick(t0, &no_metrics());
        player.tick(at(t0, 905.0), &no_metrics());

        let state = player.state();
        assert_eq!(state.status, PlayerStatus::Completed);
        assert!((state.elapsed_secs - 900.0).abs() < 1e-6);
        assert_eq!(state.current_segment, 1);
        assert!((state.segment_elapsed - 600.0).abs() < 1e-6);
    }

    #[test]
    fn test_completed_event_fires_once() {
        let mut player = player_with(two_block_workout());
        let t0 = Instant::now();

        player.play().unwrap();
        player.tick(t0, &no_metrics());
        player.tick(at(t0, 901.0), &no_metrics());
        player.end_workout();
        player.tick(at(t0, 910.0), &no_metrics());

        let completions = player
            .drain_events()
            .into_iter()
            .filter(|e| *e == PlayerEvent::Completed)
            .count();
        assert_eq!(completions, 1);
    }

    #[test]
    fn test_restart_from_completed_resets_everything() {
        let mut player = player_with(two_block_workout());
        let t0 = Instant::now();

        player.play().unwrap();
        player.tick(t0, &no_metrics());
        player.record_tick(&no_metrics());
        player.end_workout();
        assert!(player.take_trace().is_some());

        player.play().unwrap();
        let state = player.state();
        assert_eq!(state.status, PlayerStatus::Playing);
        assert!((state.elapsed_secs - 0.0).abs() < 1e-6);
        assert_eq!(state.current_segment, 0);
        assert_eq!(player.sample_count(), 0);
    }

    #[test]
    fn test_stop_preserves_recorded_samples() {
        let mut player = player_with(two_block_workout());

        player.play().unwrap();
        player.record_tick(&no_metrics());
        player.record_tick(&no_metrics());
        player.stop();

        // The buffer stays readable after stop, for export.
        assert_eq!(player.state().status, PlayerStatus::Stopped);
        let samples = player.recorded_samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].target_power, 100);

        // The next run starts from an empty buffer.
        player.play().unwrap();
        assert!(player.recorded_samples().is_empty());
    }

    #[test]
    fn test_take_trace_only_once_after_completion() {
        let mut player = player_with(two_block_workout());

        player.play().unwrap();
        player.record_tick(&no_metrics());
        assert!(player.take_trace().is_none());

        player.end_workout();
        let trace = player.take_trace().unwrap();
        assert_eq!(trace.len(), 1);
        assert!(player.take_trace().is_none());
    }

    #[test]
    fn test_live_metrics_win_over_synthetic() {
        let mut player = player_with(two_block_workout());
        player.play().unwrap();

        player.record_tick(&metrics_with_power(137));
        let samples = player.recorded_samples();
        assert_eq!(samples[0].power_watts, Some(137));
    }

    #[test]
    fn test_synthetic_metrics_track_target() {
        let mut player = player_with(two_block_workout());
        player.play().unwrap();

        player.record_tick(&no_metrics());
        let samples = player.recorded_samples();
        let sample = samples[0];
        // Target is 100W; synthetic power wobbles within a few watts.
        let power = sample.power_watts.unwrap() as i32;
        assert!((power - 100).abs() <= 10);
        assert!(sample.cadence_rpm.is_some());
        assert!(sample.heart_rate_bpm.is_some());
    }

    #[test]
    fn test_synthetic_disabled_records_absent_fields() {
        let config = PlayerConfig {
            synthetic_metrics: false,
            ..PlayerConfig::default()
        };
        let mut player = WorkoutPlayer::new(config);
        player.load(two_block_workout()).unwrap();
        player.play().unwrap();

        player.record_tick(&no_metrics());
        let samples = player.recorded_samples();
        assert_eq!(samples[0].power_watts, None);
        assert_eq!(samples[0].cadence_rpm, None);
        assert_eq!(samples[0].heart_rate_bpm, None);
    }

    #[test]
    fn test_control_mode_switch_reemits_target() {
        let mut player = player_with(two_block_workout());
        player.play().unwrap();
        player.drain_events();

        player.set_control_mode(ControlMode::Manual);
        player.set_control_mode(ControlMode::Erg);

        let events = player.drain_events();
        assert!(events.contains(&PlayerEvent::ControlModeChanged {
            mode: ControlMode::Manual
        }));
        assert!(events.contains(&PlayerEvent::TargetPowerChanged { watts: 100 }));
    }
}
