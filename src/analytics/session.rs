//! Post-ride analysis over a recorded trace.
//!
//! All functions here are pure over `&[RecordedDataPoint]`; absent metric
//! fields are excluded from every aggregate rather than treated as zero.

use crate::recording::RecordedDataPoint;
use serde::{Deserialize, Serialize};

/// Rolling-average window for normalized power, in seconds.
const NP_WINDOW_SECS: u32 = 30;

/// Default downsampling bucket width, in seconds.
pub const DEFAULT_BUCKET_SECS: u32 = 5;

/// Peak-power durations, in seconds.
const PEAK_DURATIONS_SECS: [u32; 8] = [5, 30, 60, 300, 600, 1200, 1800, 3600];

/// Minimum fraction of a peak window that must hold samples with power.
const PEAK_COVERAGE: f64 = 0.8;

/// Best average power over one duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakPower {
    /// Window length in seconds
    pub duration_secs: u32,
    /// Best average power over any window of that length
    pub watts: u16,
}

/// Summary of a completed workout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedWorkoutSummary {
    /// Recorded duration in seconds
    pub duration_secs: u32,
    /// Average power over samples that reported power
    pub avg_power: Option<u16>,
    /// Maximum instantaneous power
    pub max_power: Option<u16>,
    /// Normalized power
    pub normalized_power: Option<u16>,
    /// Intensity factor (NP / threshold)
    pub intensity_factor: Option<f64>,
    /// Training stress score
    pub tss: Option<u16>,
    /// Average heart rate over samples that reported it
    pub avg_heart_rate: Option<u8>,
    /// Maximum heart rate
    pub max_heart_rate: Option<u8>,
    /// Average cadence over samples that reported it
    pub avg_cadence: Option<u8>,
    /// Peak powers per ladder duration
    pub peak_powers: Vec<PeakPower>,
}

/// Downsample a trace into fixed-width buckets.
///
/// Elapsed time and target power are averaged over all samples in the
/// bucket; each optional metric is averaged independently over the samples
/// in which it is present, and a metric absent from the whole bucket stays
/// absent. The bucket inherits its timestamp and segment index from its
/// first sample.
pub fn downsample(points: &[RecordedDataPoint], bucket_secs: u32) -> Vec<RecordedDataPoint> {
    if points.is_empty() || bucket_secs == 0 {
        return Vec::new();
    }

    let mut buckets: Vec<RecordedDataPoint> = Vec::new();
    let mut index = 0;
    while index < points.len() {
        let bucket_start = points[index].elapsed_secs / bucket_secs * bucket_secs;
        let mut end = index;
        while end < points.len() && points[end].elapsed_secs < bucket_start + bucket_secs {
            end += 1;
        }
        let slice = &points[index..end];

        let mut bucket = slice[0];
        let elapsed_sum: u64 = slice.iter().map(|p| p.elapsed_secs as u64).sum();
        bucket.elapsed_secs = (elapsed_sum as f64 / slice.len() as f64).round() as u32;
        bucket.target_power = average_u16(slice.iter().map(|p| Some(p.target_power))).unwrap_or(0);
        bucket.power_watts = average_u16(slice.iter().map(|p| p.power_watts));
        bucket.cadence_rpm = average_u8(slice.iter().map(|p| p.cadence_rpm));
        bucket.heart_rate_bpm = average_u8(slice.iter().map(|p| p.heart_rate_bpm));
        buckets.push(bucket);

        index = end;
    }

    buckets
}

fn average_u16(values: impl Iterator<Item = Option<u16>>) -> Option<u16> {
    let mut sum = 0u64;
    let mut count = 0u64;
    for value in values.flatten() {
        sum += value as u64;
        count += 1;
    }
    (count > 0).then(|| (sum as f64 / count as f64).round() as u16)
}

fn average_u8(values: impl Iterator<Item = Option<u8>>) -> Option<u8> {
    let mut sum = 0u64;
    let mut count = 0u64;
    for value in values.flatten() {
        sum += value as u64;
        count += 1;
    }
    (count > 0).then(|| (sum as f64 / count as f64).round() as u8)
}

/// Normalized power over a trace.
///
/// Fourth root of the mean fourth power of the 30 s trailing rolling
/// average, over samples with positive recorded power. Short efforts (fewer
/// than 30 valid samples) fall back to the plain mean; an effort with no
/// valid power at all yields `None`.
pub fn normalized_power(points: &[RecordedDataPoint]) -> Option<u16> {
    let valid: Vec<(u32, u16)> = points
        .iter()
        .filter_map(|p| p.power_watts.map(|w| (p.elapsed_secs, w)))
        .filter(|(_, w)| *w > 0)
        .collect();

    if valid.is_empty() {
        return None;
    }

    if valid.len() < NP_WINDOW_SECS as usize {
        let mean = valid.iter().map(|(_, w)| *w as f64).sum::<f64>() / valid.len() as f64;
        return Some(mean.round() as u16);
    }

    let mut fourth_power_sum = 0.0f64;
    for (i, (now, _)) in valid.iter().enumerate() {
        // Trailing window: strictly newer than now - 30, inclusive of now.
        let cutoff = now.saturating_sub(NP_WINDOW_SECS);
        let mut sum = 0.0f64;
        let mut count = 0u32;
        for (t, w) in valid[..=i].iter().rev() {
            if *now >= NP_WINDOW_SECS && *t <= cutoff {
                break;
            }
            sum += *w as f64;
            count += 1;
        }
        let rolling = sum / count as f64;
        fourth_power_sum += rolling.powi(4);
    }

    let mean_fourth = fourth_power_sum / valid.len() as f64;
    Some(mean_fourth.powf(0.25).round() as u16)
}

/// Intensity factor: NP relative to threshold power.
pub fn intensity_factor(normalized_power: u16, threshold_watts: u16) -> Option<f64> {
    (threshold_watts > 0).then(|| normalized_power as f64 / threshold_watts as f64)
}

/// Training stress score for a ride.
pub fn training_stress(
    normalized_power: u16,
    threshold_watts: u16,
    duration_secs: u32,
) -> Option<u16> {
    let if_value = intensity_factor(normalized_power, threshold_watts)?;
    let tss = duration_secs as f64 * normalized_power as f64 * if_value
        / (threshold_watts as f64 * 3600.0)
        * 100.0;
    Some(tss.round() as u16)
}

/// Best average power for each ladder duration the ride is long enough for.
///
/// A window only counts when at least 80 % of its seconds carry a sample
/// with power. The shortest rung reports the maximum instantaneous power.
pub fn peak_powers(points: &[RecordedDataPoint]) -> Vec<PeakPower> {
    let Some(first) = points.first() else {
        return Vec::new();
    };
    let Some(last) = points.last() else {
        return Vec::new();
    };
    let session_secs = last.elapsed_secs - first.elapsed_secs + 1;

    let samples: Vec<(u32, u16)> = points
        .iter()
        .filter_map(|p| p.power_watts.map(|w| (p.elapsed_secs, w)))
        .collect();

    let mut peaks = Vec::new();
    for duration in PEAK_DURATIONS_SECS {
        if session_secs < duration {
            break;
        }

        let best = if duration == PEAK_DURATIONS_SECS[0] {
            samples.iter().map(|(_, w)| *w).max()
        } else {
            best_window_average(&samples, first.elapsed_secs, last.elapsed_secs, duration)
        };

        if let Some(watts) = best {
            peaks.push(PeakPower {
                duration_secs: duration,
                watts,
            });
        }
    }

    peaks
}

fn best_window_average(
    samples: &[(u32, u16)],
    first_secs: u32,
    last_secs: u32,
    duration: u32,
) -> Option<u16> {
    let min_samples = (duration as f64 * PEAK_COVERAGE).ceil() as u32;
    let mut best: Option<f64> = None;

    // Two-pointer sweep over window start times.
    let mut lo = 0usize;
    let mut hi = 0usize;
    let mut sum = 0u64;
    for start in first_secs..=last_secs.saturating_sub(duration - 1) {
        let end = start + duration;
        while hi < samples.len() && samples[hi].0 < end {
            sum += samples[hi].1 as u64;
            hi += 1;
        }
        while lo < hi && samples[lo].0 < start {
            sum -= samples[lo].1 as u64;
            lo += 1;
        }

        let count = (hi - lo) as u32;
        if count >= min_samples {
            let avg = sum as f64 / count as f64;
            if best.map_or(true, |b| avg > b) {
                best = Some(avg);
            }
        }
    }

    best.map(|b| b.round() as u16)
}

/// Build the full post-ride summary.
pub fn summarize(points: &[RecordedDataPoint], threshold_watts: u16) -> CompletedWorkoutSummary {
    let duration_secs = match (points.first(), points.last()) {
        (Some(first), Some(last)) => last.elapsed_secs - first.elapsed_secs + 1,
        _ => 0,
    };

    let np = normalized_power(points);
    let if_value = np.and_then(|np| intensity_factor(np, threshold_watts));
    let tss = np.and_then(|np| training_stress(np, threshold_watts, duration_secs));

    CompletedWorkoutSummary {
        duration_secs,
        avg_power: average_u16(points.iter().map(|p| p.power_watts)),
        max_power: points.iter().filter_map(|p| p.power_watts).max(),
        normalized_power: np,
        intensity_factor: if_value,
        tss,
        avg_heart_rate: average_u8(points.iter().map(|p| p.heart_rate_bpm)),
        max_heart_rate: points.iter().filter_map(|p| p.heart_rate_bpm).max(),
        avg_cadence: average_u8(points.iter().map(|p| p.cadence_rpm)),
        peak_powers: peak_powers(points),
    }
}
