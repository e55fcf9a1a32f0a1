//! Workout recording: 1 Hz sample buffer and hand-off.

pub mod recorder;
pub mod types;

pub use recorder::Recorder;
pub use types::{RecordedDataPoint, RecorderConfig, RecorderError, RecorderStatus};
