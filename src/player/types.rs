//! Workout and playback types.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Type of workout segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    /// Gradual power increase
    Warmup,
    /// Work block
    Interval,
    /// Easy spinning between work blocks
    Recovery,
    /// Constant power
    Steady,
    /// Gradual power decrease
    Cooldown,
}

impl std::fmt::Display for SegmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentType::Warmup => write!(f, "Warmup"),
            SegmentType::Interval => write!(f, "Interval"),
            SegmentType::Recovery => write!(f, "Recovery"),
            SegmentType::Steady => write!(f, "Steady"),
            SegmentType::Cooldown => write!(f, "Cooldown"),
        }
    }
}

/// A single segment within a workout.
///
/// Power is expressed as a percentage of the rider's threshold power. A
/// segment with `power_end_pct` set is a ramp interpolated linearly over its
/// duration; without it the target is flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Unique identifier; repeat-expanded copies share their source's id
    pub id: Uuid,
    /// Type of segment
    pub segment_type: SegmentType,
    /// Duration in seconds
    pub duration_secs: u32,
    /// Power target at the start of the segment, percent of threshold
    pub power_start_pct: f32,
    /// Power target at the end of the segment; `None` means flat
    pub power_end_pct: Option<f32>,
    /// Optional cadence guidance in RPM
    pub cadence_rpm: Option<u8>,
    /// Repeat count; `None` or `Some(1)` means the segment runs once
    pub repeat: Option<u32>,
}

impl Segment {
    /// A flat segment at a fixed percentage of threshold power.
    pub fn steady(segment_type: SegmentType, duration_secs: u32, power_pct: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            segment_type,
            duration_secs,
            power_start_pct: power_pct,
            power_end_pct: None,
            cadence_rpm: None,
            repeat: None,
        }
    }

    /// A ramp between two percentages of threshold power.
    pub fn ramp(
        segment_type: SegmentType,
        duration_secs: u32,
        start_pct: f32,
        end_pct: f32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            segment_type,
            duration_secs,
            power_start_pct: start_pct,
            power_end_pct: Some(end_pct),
            cadence_rpm: None,
            repeat: None,
        }
    }

    /// Power percentage at a point in the segment (progress 0.0 to 1.0).
    pub fn power_pct_at(&self, progress: f32) -> f32 {
        match self.power_end_pct {
            Some(end) => {
                let progress = progress.clamp(0.0, 1.0);
                self.power_start_pct + (end - self.power_start_pct) * progress
            }
            None => self.power_start_pct,
        }
    }
}

/// A structured workout: an ordered list of segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workout {
    /// Unique identifier
    pub id: Uuid,
    /// Workout name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Ordered list of segments, before repeat expansion
    pub segments: Vec<Segment>,
}

impl Workout {
    /// Create a new workout with the given name and segments.
    pub fn new(name: impl Into<String>, segments: Vec<Segment>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            segments,
        }
    }

    /// Total duration in seconds, after repeat expansion.
    pub fn total_duration_secs(&self) -> u32 {
        self.segments
            .iter()
            .map(|s| s.duration_secs * s.repeat.unwrap_or(1).max(1))
            .sum()
    }
}

/// Flatten repeat counts into a plain segment list for scheduling.
///
/// A segment with `repeat: Some(n)` becomes `n` consecutive copies with
/// `repeat` cleared, so the scheduler only ever sees a linear timeline.
pub fn expand_segments(segments: &[Segment]) -> Vec<Segment> {
    let mut expanded = Vec::new();
    for segment in segments {
        let count = segment.repeat.unwrap_or(1).max(1);
        for _ in 0..count {
            let mut copy = segment.clone();
            copy.repeat = None;
            expanded.push(copy);
        }
    }
    expanded
}

/// Reject workouts the scheduler cannot run before a session starts.
pub fn validate_segments(segments: &[Segment]) -> Result<(), PlayerError> {
    if segments.is_empty() {
        return Err(PlayerError::InvalidWorkout(
            "workout has no segments".to_string(),
        ));
    }

    for (i, segment) in segments.iter().enumerate() {
        if segment.duration_secs == 0 {
            return Err(PlayerError::InvalidWorkout(format!(
                "segment {} has zero duration",
                i
            )));
        }
        if !segment.power_start_pct.is_finite()
            || segment.power_end_pct.is_some_and(|p| !p.is_finite())
        {
            return Err(PlayerError::InvalidWorkout(format!(
                "segment {} has a non-finite power target",
                i
            )));
        }
        if segment.power_start_pct < 0.0 || segment.power_end_pct.is_some_and(|p| p < 0.0) {
            return Err(PlayerError::InvalidWorkout(format!(
                "segment {} has a negative power target",
                i
            )));
        }
    }

    Ok(())
}

/// Playback status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerStatus {
    /// Nothing running
    #[default]
    Stopped,
    /// Clock advancing, targets being pushed
    Playing,
    /// Clock frozen, position retained
    Paused,
    /// Final segment finished or workout ended by the rider
    Completed,
}

impl std::fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerStatus::Stopped => write!(f, "Stopped"),
            PlayerStatus::Playing => write!(f, "Playing"),
            PlayerStatus::Paused => write!(f, "Paused"),
            PlayerStatus::Completed => write!(f, "Completed"),
        }
    }
}

/// How targets are sent to the trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Trainer holds the scheduled wattage
    #[default]
    Erg,
    /// Fixed resistance level, rider chooses their own power
    Manual,
}

/// Current playback position and targets. Owned and mutated only by the
/// player; everything else reads cloned snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayerState {
    /// Playback status
    pub status: PlayerStatus,
    /// Total elapsed playing time in seconds (fractional)
    pub elapsed_secs: f64,
    /// Index into the expanded segment list
    pub current_segment: usize,
    /// Elapsed time within the current segment
    pub segment_elapsed: f64,
    /// Active control mode
    pub control_mode: ControlMode,
    /// Current ERG target in watts
    pub target_power_watts: u16,
    /// Bounded intensity adjustment in percent points
    pub intensity_offset: i8,
}

/// Playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Rider threshold power in watts
    pub threshold_watts: u16,
    /// Idle time before autopause triggers, in seconds
    pub autopause_idle_secs: f64,
    /// Generate plausible power/cadence/heart-rate when no sensor reports
    pub synthetic_metrics: bool,
    /// Resistance level pushed when switching to manual mode
    pub default_resistance_pct: u8,
    /// Power readings above this are recorded as absent
    pub power_spike_filter_watts: u16,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            threshold_watts: 200,
            autopause_idle_secs: 5.0,
            synthetic_metrics: true,
            default_resistance_pct: 30,
            power_spike_filter_watts: 2000,
        }
    }
}

/// Events emitted by the player as playback advances.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Playback started or resumed
    Started,
    /// Playback paused; `auto` marks an autopause
    Paused { auto: bool },
    /// Playback stopped and reset
    Stopped,
    /// The active segment changed
    SegmentChanged { index: usize },
    /// The integer ERG target changed
    TargetPowerChanged { watts: u16 },
    /// Control mode switched
    ControlModeChanged { mode: ControlMode },
    /// Intensity offset changed
    IntensityChanged { offset: i8 },
    /// The workout ran to completion or was ended by the rider
    Completed,
}

/// Errors from workout playback.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// Workout fails scheduling invariants
    #[error("Invalid workout: {0}")]
    InvalidWorkout(String),

    /// No workout loaded
    #[error("No workout loaded")]
    NoWorkoutLoaded,
}
