//! Post-ride analytics: downsampling, normalized power, TSS, peak powers.

pub mod session;

pub use session::{
    downsample, intensity_factor, normalized_power, peak_powers, summarize,
    training_stress, CompletedWorkoutSummary, PeakPower, DEFAULT_BUCKET_SECS,
};
