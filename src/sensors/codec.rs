//! Wire codec for trainer and sensor packets.
//!
//! Pure functions translating fixed-layout binary notifications to semantic
//! values and control commands back to bytes. No state (except the crank
//! cadence estimator, which is pure over its own sample history), no I/O.
//! Malformed input never panics: fields that cannot be decoded come back
//! absent.

use uuid::Uuid;

/// FTMS Service UUID (0x1826)
pub const FTMS_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1826_0000_1000_8000_0080_5f9b_34fb);

/// Indoor Bike Data Characteristic UUID (0x2AD2)
pub const INDOOR_BIKE_DATA_UUID: Uuid = Uuid::from_u128(0x0000_2ad2_0000_1000_8000_0080_5f9b_34fb);

/// Fitness Machine Control Point UUID (0x2AD9)
pub const FTMS_CONTROL_POINT_UUID: Uuid =
    Uuid::from_u128(0x0000_2ad9_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Service UUID (0x1818)
pub const CYCLING_POWER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1818_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Measurement UUID (0x2A63)
pub const CYCLING_POWER_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a63_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Service UUID (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Measurement UUID (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);

/// Vendor trainer-control service UUID (manufacturer extension).
pub const VENDOR_SERVICE_UUID: Uuid = Uuid::from_u128(0xa026_ee01_0a7d_4ab3_97fa_f150_0f9f_eb8b);

/// Vendor trainer-control characteristic UUID.
pub const VENDOR_CONTROL_UUID: Uuid = Uuid::from_u128(0xa026_e005_0a7d_4ab3_97fa_f150_0f9f_eb8b);

/// Maximum encodable target power in watts.
pub const MAX_TARGET_POWER_WATTS: i16 = 2000;

/// A crank revolution sample from a power measurement packet.
///
/// Both fields are cumulative 16-bit counters that wrap at 65536; the event
/// time is in 1/1024 s units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrankSample {
    /// Cumulative crank revolutions
    pub revolutions: u16,
    /// Last crank event time in 1/1024 s units
    pub event_time: u16,
}

/// Parsed Cycling Power Measurement notification.
#[derive(Debug, Clone, Default)]
pub struct PowerMeasurement {
    /// Instantaneous power in watts (always present)
    pub power_watts: i16,
    /// Pedal power balance (if present)
    pub pedal_balance: Option<u8>,
    /// Accumulated torque (if present)
    pub accumulated_torque: Option<u16>,
    /// Crank revolution data (if present)
    pub crank: Option<CrankSample>,
}

/// Parse a Cycling Power Measurement notification.
///
/// Layout: bytes 0-1 flags (LE), bytes 2-3 signed instantaneous power, then
/// conditional fields in flag-bit order. Every optional field consumes its
/// fixed width even when the caller has no use for it, because offsets are
/// cumulative. Truncation mid-field yields whatever decoded so far.
pub fn decode_power_measurement(data: &[u8]) -> Option<PowerMeasurement> {
    if data.len() < 4 {
        return None;
    }

    let flags = u16::from_le_bytes([data[0], data[1]]);
    let power = i16::from_le_bytes([data[2], data[3]]);

    let mut result = PowerMeasurement {
        power_watts: power,
        ..Default::default()
    };

    let mut offset = 4usize;

    // Pedal Power Balance (bit 0)
    if (flags & 0x0001) != 0 {
        if offset + 1 > data.len() {
            return Some(result);
        }
        result.pedal_balance = Some(data[offset]);
        offset += 1;
    }

    // Accumulated Torque (bit 2)
    if (flags & 0x0004) != 0 {
        if offset + 2 > data.len() {
            return Some(result);
        }
        result.accumulated_torque = Some(u16::from_le_bytes([data[offset], data[offset + 1]]));
        offset += 2;
    }

    // Wheel Revolution Data (bit 4): 4B cumulative revs + 2B event time.
    // Not surfaced, but the width must be skipped for the crank offset.
    if (flags & 0x0010) != 0 {
        if offset + 6 > data.len() {
            return Some(result);
        }
        offset += 6;
    }

    // Crank Revolution Data (bit 5)
    if (flags & 0x0020) != 0 {
        if offset + 4 > data.len() {
            return Some(result);
        }
        result.crank = Some(CrankSample {
            revolutions: u16::from_le_bytes([data[offset], data[offset + 1]]),
            event_time: u16::from_le_bytes([data[offset + 2], data[offset + 3]]),
        });
    }

    Some(result)
}

/// Parsed Indoor Bike Data notification.
#[derive(Debug, Clone, Default)]
pub struct IndoorBikeData {
    /// Instantaneous speed in km/h (if present)
    pub speed_kmh: Option<f32>,
    /// Instantaneous cadence in RPM (if present)
    pub cadence_rpm: Option<u16>,
    /// Instantaneous power in watts (if present)
    pub power_watts: Option<i16>,
    /// Heart rate in BPM (if present)
    pub heart_rate_bpm: Option<u8>,
}

/// Parse an Indoor Bike Data notification.
///
/// Fields are consumed strictly in flag-bit order, each occupying its fixed
/// width whether or not it is surfaced. Presence polarity is per-field:
/// instantaneous speed is present when bit 0 is *clear*, all other optional
/// fields when their bit is set.
pub fn decode_indoor_bike_data(data: &[u8]) -> Option<IndoorBikeData> {
    if data.len() < 2 {
        return None;
    }

    let flags = u16::from_le_bytes([data[0], data[1]]);
    let mut result = IndoorBikeData::default();
    let mut offset = 2usize;

    // Instantaneous speed (present if More Data flag is 0), 0.01 km/h units
    if (flags & 0x0001) == 0 {
        if offset + 2 > data.len() {
            return None;
        }
        let raw = u16::from_le_bytes([data[offset], data[offset + 1]]);
        result.speed_kmh = Some(raw as f32 / 100.0);
        offset += 2;
    }

    // Average speed (bit 1), skipped
    if (flags & 0x0002) != 0 {
        if offset + 2 > data.len() {
            return None;
        }
        offset += 2;
    }

    // Instantaneous cadence (bit 2), 0.5 rpm units
    if (flags & 0x0004) != 0 {
        if offset + 2 > data.len() {
            return None;
        }
        let raw = u16::from_le_bytes([data[offset], data[offset + 1]]);
        result.cadence_rpm = Some(raw / 2);
        offset += 2;
    }

    // Average cadence (bit 3), skipped
    if (flags & 0x0008) != 0 {
        if offset + 2 > data.len() {
            return None;
        }
        offset += 2;
    }

    // Total distance (bit 4), 3 bytes, skipped
    if (flags & 0x0010) != 0 {
        if offset + 3 > data.len() {
            return None;
        }
        offset += 3;
    }

    // Resistance level (bit 5), skipped
    if (flags & 0x0020) != 0 {
        if offset + 2 > data.len() {
            return None;
        }
        offset += 2;
    }

    // Instantaneous power (bit 6)
    if (flags & 0x0040) != 0 {
        if offset + 2 > data.len() {
            return None;
        }
        result.power_watts = Some(i16::from_le_bytes([data[offset], data[offset + 1]]));
        offset += 2;
    }

    // Average power (bit 7), skipped
    if (flags & 0x0080) != 0 {
        if offset + 2 > data.len() {
            return None;
        }
        offset += 2;
    }

    // Expended energy (bit 8): total 2B + per hour 2B + per minute 1B, skipped
    if (flags & 0x0100) != 0 {
        if offset + 5 > data.len() {
            return None;
        }
        offset += 5;
    }

    // Heart rate (bit 9)
    if (flags & 0x0200) != 0 {
        if offset + 1 > data.len() {
            return None;
        }
        result.heart_rate_bpm = Some(data[offset]);
    }

    Some(result)
}

/// Parse a Heart Rate Measurement notification.
///
/// Byte 0 flags bit 0 selects an 8-bit vs 16-bit value at byte 1.
pub fn decode_heart_rate(data: &[u8]) -> Option<u16> {
    if data.len() < 2 {
        return None;
    }

    let flags = data[0];
    if (flags & 0x01) != 0 {
        if data.len() < 3 {
            return None;
        }
        Some(u16::from_le_bytes([data[1], data[2]]))
    } else {
        Some(data[1] as u16)
    }
}

/// Control point opcodes for the standard trainer-control profile.
#[repr(u8)]
pub enum ControlOpcode {
    /// Request control of the trainer
    RequestControl = 0x00,
    /// Set target resistance level
    SetTargetResistance = 0x04,
    /// Set target power (ERG mode)
    SetTargetPower = 0x05,
    /// Start or resume training
    StartOrResume = 0x07,
}

/// Vendor-extension opcodes; parameter layouts mirror the standard profile.
#[repr(u8)]
pub enum VendorOpcode {
    /// Set resistance level
    SetResistance = 0x40,
    /// Set target power (ERG mode)
    SetTargetPower = 0x42,
}

/// Build a request-control command.
pub fn encode_request_control() -> Vec<u8> {
    vec![ControlOpcode::RequestControl as u8]
}

/// Build a start-or-resume command.
pub fn encode_start_resume() -> Vec<u8> {
    vec![ControlOpcode::StartOrResume as u8]
}

/// Build a set-target-power command. Watts are clamped to [0, 2000].
pub fn encode_set_target_power(watts: i16) -> Vec<u8> {
    let watts = watts.clamp(0, MAX_TARGET_POWER_WATTS);
    let mut cmd = vec![ControlOpcode::SetTargetPower as u8];
    cmd.extend_from_slice(&watts.to_le_bytes());
    cmd
}

/// Build a set-target-resistance command. Percent is clamped to [0, 100].
pub fn encode_set_resistance(percent: u8) -> Vec<u8> {
    vec![ControlOpcode::SetTargetResistance as u8, percent.min(100)]
}

/// Build a vendor set-target-power command. Watts are clamped to [0, 2000].
pub fn encode_vendor_set_target_power(watts: i16) -> Vec<u8> {
    let watts = watts.clamp(0, MAX_TARGET_POWER_WATTS);
    let mut cmd = vec![VendorOpcode::SetTargetPower as u8];
    cmd.extend_from_slice(&watts.to_le_bytes());
    cmd
}

/// Build a vendor set-resistance command. Percent is clamped to [0, 100].
pub fn encode_vendor_set_resistance(percent: u8) -> Vec<u8> {
    vec![VendorOpcode::SetResistance as u8, percent.min(100)]
}

/// Maximum plausible revolution delta between consecutive crank samples.
const MAX_CRANK_REV_DELTA: u16 = 100;

/// Maximum plausible cadence in RPM; anything at or above is sensor noise.
const MAX_CADENCE_RPM: f64 = 200.0;

/// Event-time gap (seconds) beyond which zero revolutions means stopped
/// pedalling rather than a data gap.
const CADENCE_ZERO_GAP_SECS: f64 = 2.0;

/// Derives cadence from consecutive crank revolution samples.
///
/// Cadence is not transmitted directly by power meters; it falls out of the
/// delta between two cumulative (wrapping) crank counters. The estimator
/// rejects corrupt and noisy deltas and must be reset whenever a connection
/// is (re)established so stale samples never cross connections.
#[derive(Debug, Default)]
pub struct CadenceEstimator {
    last: Option<CrankSample>,
}

impl CadenceEstimator {
    /// Create an estimator with no sample history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a crank sample; returns a cadence update when one can be derived.
    ///
    /// Returns `None` on the first sample, on duplicate timestamps, and on
    /// deltas rejected as corrupt (Δrev ≥ 100) or noise (≥ 200 rpm).
    /// A gap over 2 s with zero revolutions yields `Some(0)`.
    pub fn update(&mut self, sample: CrankSample) -> Option<u8> {
        let last = match self.last.replace(sample) {
            Some(l) => l,
            None => return None,
        };

        let delta_revs = sample.revolutions.wrapping_sub(last.revolutions);
        let delta_ticks = sample.event_time.wrapping_sub(last.event_time);

        if delta_ticks == 0 {
            return None;
        }
        let delta_secs = delta_ticks as f64 / 1024.0;

        if delta_revs == 0 {
            // Stopped pedalling once the gap is long enough to be trusted.
            if delta_secs > CADENCE_ZERO_GAP_SECS {
                return Some(0);
            }
            return None;
        }

        if delta_revs >= MAX_CRANK_REV_DELTA {
            return None;
        }

        let rpm = delta_revs as f64 / delta_secs * 60.0;
        if rpm >= MAX_CADENCE_RPM {
            return None;
        }

        Some(rpm.round() as u8)
    }

    /// Clear the held sample. Called on every (re)connect.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_power_measurement_plain() {
        // Flags: 0x0000, power: 200W
        let data = [0x00, 0x00, 0xC8, 0x00];
        let result = decode_power_measurement(&data).unwrap();

        assert_eq!(result.power_watts, 200);
        assert!(result.pedal_balance.is_none());
        assert!(result.crank.is_none());
    }

    #[test]
    fn test_decode_power_measurement_all_optionals() {
        // Flags: balance + torque + wheel + crank (0x0035)
        let data = [
            0x35, 0x00, // flags
            0xFA, 0x00, // power = 250
            0x32, // balance = 50
            0x10, 0x00, // torque
            0x01, 0x00, 0x00, 0x00, 0x00, 0x04, // wheel revs + time
            0x64, 0x00, 0x00, 0x02, // crank: revs=100, time=512
        ];
        let result = decode_power_measurement(&data).unwrap();

        assert_eq!(result.power_watts, 250);
        assert_eq!(result.pedal_balance, Some(50));
        assert_eq!(result.accumulated_torque, Some(16));
        assert_eq!(
            result.crank,
            Some(CrankSample {
                revolutions: 100,
                event_time: 512
            })
        );
    }

    #[test]
    fn test_decode_power_measurement_truncated_optionals_absent() {
        // Crank flag set but the crank bytes are missing: power still decodes.
        let data = [0x20, 0x00, 0xC8, 0x00, 0x01, 0x02];
        let result = decode_power_measurement(&data).unwrap();

        assert_eq!(result.power_watts, 200);
        assert!(result.crank.is_none());
    }

    #[test]
    fn test_decode_power_measurement_short_input() {
        assert!(decode_power_measurement(&[]).is_none());
        assert!(decode_power_measurement(&[0x00, 0x00, 0xC8]).is_none());
    }

    #[test]
    fn test_decode_power_measurement_consumes_exact_widths() {
        // Wheel data (6B) must be skipped for the crank offset to land right.
        let data = [
            0x30, 0x00, // flags: wheel + crank
            0x64, 0x00, // power = 100
            0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, // wheel (ignored)
            0x0A, 0x00, 0x00, 0x01, // crank: revs=10, time=256
        ];
        let result = decode_power_measurement(&data).unwrap();
        assert_eq!(
            result.crank,
            Some(CrankSample {
                revolutions: 10,
                event_time: 256
            })
        );
    }

    #[test]
    fn test_decode_indoor_bike_data_speed_only() {
        // Flags 0x0000: speed present because bit 0 is clear. 2500 = 25.00 km/h
        let data = [0x00, 0x00, 0xC4, 0x09];
        let result = decode_indoor_bike_data(&data).unwrap();

        assert!((result.speed_kmh.unwrap() - 25.0).abs() < 0.01);
        assert!(result.power_watts.is_none());
        assert!(result.cadence_rpm.is_none());
    }

    #[test]
    fn test_decode_indoor_bike_data_inverted_speed_polarity() {
        // Bit 0 set: no speed field at all; power only (bit 6).
        let data = [0x41, 0x00, 0xFA, 0x00];
        let result = decode_indoor_bike_data(&data).unwrap();

        assert!(result.speed_kmh.is_none());
        assert_eq!(result.power_watts, Some(250));
    }

    #[test]
    fn test_decode_indoor_bike_data_with_power_cadence_hr() {
        // speed + cadence (bit 2) + power (bit 6) + heart rate (bit 9)
        let data = [
            0x44, 0x02, // flags
            0xB8, 0x0B, // speed = 30.00 km/h
            0xB4, 0x00, // cadence = 180 * 0.5 = 90 rpm
            0xFA, 0x00, // power = 250
            0x91, // hr = 145
        ];
        let result = decode_indoor_bike_data(&data).unwrap();

        assert!((result.speed_kmh.unwrap() - 30.0).abs() < 0.01);
        assert_eq!(result.cadence_rpm, Some(90));
        assert_eq!(result.power_watts, Some(250));
        assert_eq!(result.heart_rate_bpm, Some(145));
    }

    #[test]
    fn test_decode_indoor_bike_data_truncated() {
        // Power flag set but bytes missing: packet dropped.
        let data = [0x41, 0x00, 0xFA];
        assert!(decode_indoor_bike_data(&data).is_none());
    }

    #[test]
    fn test_decode_heart_rate_u8() {
        assert_eq!(decode_heart_rate(&[0x00, 0x91]), Some(145));
    }

    #[test]
    fn test_decode_heart_rate_u16() {
        assert_eq!(decode_heart_rate(&[0x01, 0x91, 0x00]), Some(145));
        assert!(decode_heart_rate(&[0x01, 0x91]).is_none());
    }

    #[test]
    fn test_encode_set_target_power() {
        assert_eq!(encode_set_target_power(250), vec![0x05, 0xFA, 0x00]);
    }

    #[test]
    fn test_encode_set_target_power_clamps() {
        assert_eq!(encode_set_target_power(-50), vec![0x05, 0x00, 0x00]);
        assert_eq!(
            encode_set_target_power(5000),
            encode_set_target_power(2000)
        );
    }

    #[test]
    fn test_encode_set_resistance_clamps() {
        assert_eq!(encode_set_resistance(30), vec![0x04, 30]);
        assert_eq!(encode_set_resistance(150), vec![0x04, 100]);
    }

    #[test]
    fn test_encode_control_commands() {
        assert_eq!(encode_request_control(), vec![0x00]);
        assert_eq!(encode_start_resume(), vec![0x07]);
    }

    #[test]
    fn test_vendor_encoding_mirrors_standard_params() {
        assert_eq!(encode_vendor_set_target_power(250), vec![0x42, 0xFA, 0x00]);
        assert_eq!(encode_vendor_set_resistance(40), vec![0x40, 40]);
    }

    #[test]
    fn test_cadence_first_sample_yields_nothing() {
        let mut est = CadenceEstimator::new();
        assert_eq!(
            est.update(CrankSample {
                revolutions: 100,
                event_time: 0
            }),
            None
        );
    }

    #[test]
    fn test_cadence_rejects_noise_above_200_rpm() {
        // revs 100 -> 110 over 512 ticks (0.5s) implies 1200 rpm: rejected.
        let mut est = CadenceEstimator::new();
        est.update(CrankSample {
            revolutions: 100,
            event_time: 0,
        });
        assert_eq!(
            est.update(CrankSample {
                revolutions: 110,
                event_time: 512
            }),
            None
        );
    }

    #[test]
    fn test_cadence_normal_derivation() {
        // 1 rev in 0.666s -> ~90 rpm
        let mut est = CadenceEstimator::new();
        est.update(CrankSample {
            revolutions: 10,
            event_time: 1000,
        });
        let rpm = est
            .update(CrankSample {
                revolutions: 11,
                event_time: 1000 + 683,
            })
            .unwrap();
        assert!((89..=91).contains(&rpm));
    }

    #[test]
    fn test_cadence_wraparound() {
        let mut est = CadenceEstimator::new();
        est.update(CrankSample {
            revolutions: 65534,
            event_time: 65000,
        });
        // Wraps both counters: +2 revs over 1560 ticks (~1.52s) -> ~79 rpm
        let rpm = est
            .update(CrankSample {
                revolutions: 0,
                event_time: 1024,
            })
            .unwrap();
        assert!((77..=81).contains(&rpm));
    }

    #[test]
    fn test_cadence_zero_after_long_gap() {
        let mut est = CadenceEstimator::new();
        est.update(CrankSample {
            revolutions: 50,
            event_time: 0,
        });
        // 3 seconds with no revolutions: legitimately stopped.
        assert_eq!(
            est.update(CrankSample {
                revolutions: 50,
                event_time: 3 * 1024
            }),
            Some(0)
        );
    }

    #[test]
    fn test_cadence_short_gap_zero_revs_is_not_an_update() {
        let mut est = CadenceEstimator::new();
        est.update(CrankSample {
            revolutions: 50,
            event_time: 0,
        });
        assert_eq!(
            est.update(CrankSample {
                revolutions: 50,
                event_time: 512
            }),
            None
        );
    }

    #[test]
    fn test_cadence_rejects_duplicate_timestamp() {
        let mut est = CadenceEstimator::new();
        est.update(CrankSample {
            revolutions: 50,
            event_time: 100,
        });
        assert_eq!(
            est.update(CrankSample {
                revolutions: 51,
                event_time: 100
            }),
            None
        );
    }

    #[test]
    fn test_cadence_rejects_corrupt_rev_delta() {
        let mut est = CadenceEstimator::new();
        est.update(CrankSample {
            revolutions: 0,
            event_time: 0,
        });
        // 120 revs in one minute-equivalent sample is a corrupt counter.
        assert_eq!(
            est.update(CrankSample {
                revolutions: 120,
                event_time: 61440
            }),
            None
        );
    }
}
