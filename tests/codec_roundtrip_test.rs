//! Wire-level scenarios that span several notifications, exercised through
//! the public codec surface.

use ergmode::sensors::codec::{
    decode_heart_rate, decode_indoor_bike_data, decode_power_measurement, encode_set_target_power,
    encode_start_resume, encode_vendor_set_target_power, CadenceEstimator,
};

/// Build a power measurement packet with crank data.
fn power_packet(watts: i16, revolutions: u16, event_time: u16) -> Vec<u8> {
    let mut packet = vec![0x20, 0x00];
    packet.extend_from_slice(&watts.to_le_bytes());
    packet.extend_from_slice(&revolutions.to_le_bytes());
    packet.extend_from_slice(&event_time.to_le_bytes());
    packet
}

#[test]
fn cadence_derivation_over_a_notification_stream() {
    let mut estimator = CadenceEstimator::new();
    let mut cadences = Vec::new();

    // ~90 rpm: one revolution every 683/1024 s, counters wrapping at 65535.
    let mut revs: u16 = 65530;
    let mut time: u16 = 65000;
    for _ in 0..10 {
        let packet = power_packet(200, revs, time);
        let parsed = decode_power_measurement(&packet).unwrap();
        if let Some(rpm) = estimator.update(parsed.crank.unwrap()) {
            cadences.push(rpm);
        }
        revs = revs.wrapping_add(1);
        time = time.wrapping_add(683);
    }

    // First sample has no predecessor; the rest survive the wraparound.
    assert_eq!(cadences.len(), 9);
    assert!(cadences.iter().all(|rpm| (88..=92).contains(rpm)));
}

#[test]
fn coasting_reads_as_cadence_zero() {
    let mut estimator = CadenceEstimator::new();

    let first = decode_power_measurement(&power_packet(0, 100, 1000)).unwrap();
    estimator.update(first.crank.unwrap());

    // Same revolution count 3 s later: legitimately stopped pedaling.
    let later = decode_power_measurement(&power_packet(0, 100, 1000 + 3 * 1024)).unwrap();
    assert_eq!(estimator.update(later.crank.unwrap()), Some(0));
}

#[test]
fn glitched_counter_jump_is_rejected_but_stream_recovers() {
    let mut estimator = CadenceEstimator::new();

    estimator.update(decode_power_measurement(&power_packet(200, 10, 0)).unwrap().crank.unwrap());

    // 150 revolutions in one notification is counter noise.
    let glitch = decode_power_measurement(&power_packet(200, 160, 683)).unwrap();
    assert_eq!(estimator.update(glitch.crank.unwrap()), None);

    // The next plausible delta produces a reading again.
    let next = decode_power_measurement(&power_packet(200, 161, 1366)).unwrap();
    assert!(estimator.update(next.crank.unwrap()).is_some());
}

#[test]
fn indoor_bike_and_heart_rate_agree_on_shared_fields() {
    // Flags 0x0240: speed present (bit0 clear), power (bit6), HR (bit9).
    let packet = [0x40, 0x02, 0x10, 0x0E, 0x2C, 0x01, 0x98];
    let bike = decode_indoor_bike_data(&packet).unwrap();
    assert!((bike.speed_kmh.unwrap() - 36.0).abs() < 0.01);
    assert_eq!(bike.power_watts, Some(300));
    assert_eq!(bike.heart_rate_bpm, Some(152));

    // The dedicated HR characteristic carries the same value, 16-bit format.
    let hr_packet = [0x01, 0x98, 0x00];
    assert_eq!(decode_heart_rate(&hr_packet), Some(152));
}

#[test]
fn standard_and_vendor_power_frames_share_parameter_layout() {
    let standard = encode_set_target_power(250);
    let vendor = encode_vendor_set_target_power(250);

    assert_eq!(standard, vec![0x05, 0xFA, 0x00]);
    assert_eq!(vendor, vec![0x42, 0xFA, 0x00]);
    // Same i16 LE payload behind different opcodes.
    assert_eq!(standard[1..], vendor[1..]);

    assert_eq!(encode_start_resume(), vec![0x07]);
}

#[test]
fn out_of_range_targets_are_clamped_on_the_wire() {
    assert_eq!(encode_set_target_power(-50), vec![0x05, 0x00, 0x00]);

    let maxed = encode_set_target_power(i16::MAX);
    let watts = i16::from_le_bytes([maxed[1], maxed[2]]);
    assert_eq!(watts, 2000);
}
