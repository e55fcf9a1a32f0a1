//! ErgMode - Smart-Trainer Control and Workout Playback Engine
//!
//! A headless engine for driving a BLE smart trainer through structured
//! workouts: wire codec for the trainer protocols, a single-trainer
//! transport link, an ERG-mode playback scheduler with 1 Hz recording, and
//! post-ride analytics.

pub mod analytics;
pub mod config;
pub mod player;
pub mod recording;
pub mod sensors;

// Re-export commonly used types
pub use analytics::CompletedWorkoutSummary;
pub use config::{EngineConfig, RiderProfile};
pub use player::{Session, Workout, WorkoutPlayer};
pub use recording::{RecordedDataPoint, Recorder};
pub use sensors::TrainerLink;
