//! Append-only sample buffer for one workout run.

use crate::recording::types::{RecordedDataPoint, RecorderConfig, RecorderError, RecorderStatus};

/// Owns the sample buffer between `start` and `finish`.
///
/// `finish` hands the samples off exactly once; after that the buffer is
/// empty and a new `start` begins a fresh run.
pub struct Recorder {
    config: RecorderConfig,
    status: RecorderStatus,
    samples: Vec<RecordedDataPoint>,
}

impl Recorder {
    /// Create a new recorder.
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            status: RecorderStatus::Idle,
            samples: Vec::new(),
        }
    }

    /// Begin a new recording, discarding any samples from a previous run.
    pub fn start(&mut self) {
        self.samples.clear();
        self.status = RecorderStatus::Recording;
        tracing::info!("Recording started");
    }

    /// Append one sample.
    ///
    /// Power readings above the spike filter are recorded as absent rather
    /// than dropping the whole sample.
    pub fn append(&mut self, mut point: RecordedDataPoint) -> Result<(), RecorderError> {
        if self.status != RecorderStatus::Recording {
            return Err(RecorderError::NotRecording);
        }

        if let Some(power) = point.power_watts {
            if power > self.config.max_power_watts {
                tracing::debug!("Filtered power spike: {}W", power);
                point.power_watts = None;
            }
        }

        self.samples.push(point);
        Ok(())
    }

    /// Finish the recording and hand off the samples.
    pub fn finish(&mut self) -> Result<Vec<RecordedDataPoint>, RecorderError> {
        if self.status != RecorderStatus::Recording {
            return Err(RecorderError::NotRecording);
        }

        self.status = RecorderStatus::Finished;
        let samples = std::mem::take(&mut self.samples);
        tracing::info!("Recording finished: {} samples", samples.len());
        Ok(samples)
    }

    /// Drop the current recording without handing anything off.
    pub fn discard(&mut self) {
        self.samples.clear();
        self.status = RecorderStatus::Idle;
        tracing::info!("Recording discarded");
    }

    /// Current lifecycle status.
    pub fn status(&self) -> RecorderStatus {
        self.status
    }

    /// Number of samples buffered so far.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Read-only view of the buffered samples.
    pub fn samples(&self) -> &[RecordedDataPoint] {
        &self.samples
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(RecorderConfig::default())
    }
}
