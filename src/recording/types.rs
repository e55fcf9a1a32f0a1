//! Recording types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One recorded sample, appended at 1 Hz while a workout plays.
///
/// Metric fields are `Option`: absence means the value was not reported at
/// that instant, never zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordedDataPoint {
    /// Wall-clock timestamp
    pub timestamp: DateTime<Utc>,
    /// Elapsed playing time in whole seconds
    pub elapsed_secs: u32,
    /// ERG target at the time of the sample
    pub target_power: u16,
    /// Measured (or synthetic) power in watts
    pub power_watts: Option<u16>,
    /// Measured (or synthetic) cadence in RPM
    pub cadence_rpm: Option<u8>,
    /// Measured (or synthetic) heart rate in BPM
    pub heart_rate_bpm: Option<u8>,
    /// Index of the segment active when the sample was taken
    pub segment_index: usize,
}

/// Recorder lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderStatus {
    /// No recording in progress
    #[default]
    Idle,
    /// Accepting samples
    Recording,
    /// Samples handed off; buffer empty
    Finished,
}

/// Recorder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Power readings above this are recorded as absent
    pub max_power_watts: u16,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_power_watts: 2000,
        }
    }
}

/// Errors from the recorder.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Operation requires an active recording
    #[error("No recording in progress")]
    NotRecording,
}
