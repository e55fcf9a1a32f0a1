//! Workout playback: scheduler state machine and live session glue.

pub mod scheduler;
pub mod session;
pub mod types;

pub use scheduler::WorkoutPlayer;
pub use session::{Session, SessionEvent};
pub use types::{
    expand_segments, validate_segments, ControlMode, PlayerConfig, PlayerError, PlayerEvent,
    PlayerState, PlayerStatus, Segment, SegmentType, Workout,
};
