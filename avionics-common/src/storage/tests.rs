use std::cell::Cell;

use approx::assert_relative_eq;

use super::*;
use crate::flight_phase::{FlightPhase, PhaseTransition, TransitionRecord};
use crate::sensor_reading::SensorSample;
use crate::tests::{FlakyBackend, init_logger, sample_at};
use crate::time::ManualClock;

fn blank_pages(count: usize) -> Vec<PageBuf> {
    vec![erased_page(); count]
}

fn test_config() -> StorageConfig {
    StorageConfig {
        low_water_pages: 0,
        ..StorageConfig::default()
    }
}

fn transition(from: FlightPhase, to: FlightPhase, timestamp_us: u64) -> TransitionRecord {
    TransitionRecord {
        transition: PhaseTransition {
            from,
            to,
            timestamp_us,
        },
        altitude_agl: 12.0,
        velocity: 3.5,
        ground_altitude_asl: 180.0,
        ground_pressure: 99_200.0,
        accelerometer_bias: -0.04,
    }
}

fn samples(count: u64, start_us: u64, spacing_us: u64) -> Vec<SensorSample> {
    (0..count)
        .map(|i| sample_at(start_us + i * spacing_us, 150.0 + i as f32 * 0.75))
        .collect()
}

fn read_back<B: StorageBackend>(backend: &mut B) -> (Vec<StoredSample>, Vec<TransitionRecord>) {
    let mut stored = Vec::new();
    let mut transitions = Vec::new();
    for page in RecordReader::open(backend).unwrap() {
        match page.unwrap().body {
            PageBody::Samples { samples, .. } => stored.extend(samples.iter().copied()),
            PageBody::Transition(record) => transitions.push(record),
        }
    }
    (stored, transitions)
}

#[test]
fn round_trip_full_format() {
    init_logger();
    let mut pages = blank_pages(64);
    let now = Cell::new(0);
    let (mut writer, report) =
        StorageWriter::open(RamBackend::new(&mut pages), ManualClock::new(&now), test_config())
            .unwrap();
    assert_eq!(report.outcome, RecoveryOutcome::Fresh);
    writer.set_target_rate(1000);

    let originals = samples(23, 1_000_000, 1_000);
    for sample in &originals {
        assert_eq!(writer.push_sample(sample), Ok(true));
    }
    writer.flush().unwrap();
    assert_eq!(writer.status().sample_count, 23);
    assert_eq!(writer.status().record_count, 6);

    let mut backend = writer.into_backend();
    let (stored, transitions) = read_back(&mut backend);
    assert!(transitions.is_empty());
    assert_eq!(stored.len(), originals.len());
    for (original, stored) in originals.iter().zip(stored.iter()) {
        assert_eq!(stored.timestamp_us, original.timestamp_us);
        assert_eq!(stored.acc, original.data.imu.acc);
        assert_eq!(stored.gyro, Some(original.data.imu.gyro));
        assert_eq!(stored.mag, Some(original.data.mag.mag));
        assert_eq!(stored.altitude_asl, original.data.baro.altitude());
    }
}

#[test]
fn round_trip_across_phase_formats() {
    init_logger();
    let mut pages = blank_pages(64);
    let now = Cell::new(0);
    let (mut writer, _) =
        StorageWriter::open(RamBackend::new(&mut pages), ManualClock::new(&now), test_config())
            .unwrap();
    writer.set_target_rate(1000);

    let ground = samples(10, 1_000_000, 1_000);
    let ascent = samples(13, 2_000_000, 1_000);
    let descent = samples(15, 3_000_000, 1_000);

    for sample in &ground {
        writer.push_sample(sample).unwrap();
    }
    writer
        .record_transition(&transition(FlightPhase::Idle, FlightPhase::Armed, 1_500_000))
        .unwrap();
    writer
        .record_transition(&transition(FlightPhase::Armed, FlightPhase::PoweredAscent, 1_900_000))
        .unwrap();
    assert_eq!(writer.active_format(), PageFormat::NoMag);
    for sample in &ascent {
        writer.push_sample(sample).unwrap();
    }
    writer
        .record_transition(&transition(FlightPhase::PoweredAscent, FlightPhase::Descent, 2_900_000))
        .unwrap();
    assert_eq!(writer.active_format(), PageFormat::Packed);
    for sample in &descent {
        writer.push_sample(sample).unwrap();
    }
    writer.flush().unwrap();

    let mut backend = writer.into_backend();
    let (stored, transitions) = read_back(&mut backend);
    let originals: Vec<&SensorSample> = ground.iter().chain(&ascent).chain(&descent).collect();
    assert_eq!(stored.len(), originals.len());
    assert_eq!(
        transitions.iter().map(|r| r.transition.to).collect::<Vec<_>>(),
        vec![FlightPhase::Armed, FlightPhase::PoweredAscent, FlightPhase::Descent]
    );

    for (i, (original, stored)) in originals.iter().zip(stored.iter()).enumerate() {
        assert_eq!(stored.timestamp_us, original.timestamp_us);
        assert_eq!(stored.mag.is_some(), i < ground.len());
        assert_relative_eq!(stored.altitude_asl, original.data.baro.altitude(), epsilon = 0.01);
        for axis in 0..3 {
            assert_relative_eq!(stored.acc[axis], original.data.imu.acc[axis], epsilon = 0.01);
        }
    }
}

#[test]
fn recovery_is_idempotent() {
    init_logger();
    let mut pages = blank_pages(32);
    let now = Cell::new(0);
    let (mut writer, _) =
        StorageWriter::open(RamBackend::new(&mut pages), ManualClock::new(&now), test_config())
            .unwrap();
    writer.set_target_rate(1000);
    for sample in samples(30, 1_000, 1_000).iter() {
        writer.push_sample(sample).unwrap();
    }
    writer
        .record_transition(&transition(FlightPhase::Idle, FlightPhase::Armed, 40_000))
        .unwrap();

    let mut backend = writer.into_backend();
    let first = recover(&mut backend, PageFormat::Full).unwrap();
    let second = recover(&mut backend, PageFormat::Full).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.outcome, RecoveryOutcome::Consistent);
    assert_eq!(first.scan.sample_count, 30);
    assert_eq!(first.scan.record_count, 9);
    assert_eq!(first.scan.next_page, 10);
    assert_eq!(first.scan.last_phase, Some(FlightPhase::Armed));
}

#[test]
fn metadata_left_behind_by_power_loss_is_repaired() {
    init_logger();
    let mut pages = blank_pages(32);
    let now = Cell::new(0);
    let clock = ManualClock::new(&now);
    let (mut writer, _) =
        StorageWriter::open(RamBackend::new(&mut pages), clock, test_config()).unwrap();
    writer.set_target_rate(1000);

    let all = samples(16, 1_000, 1_000);
    for sample in &all[..8] {
        writer.push_sample(sample).unwrap();
    }
    let stale_metadata = writer.backend().pages()[METADATA_PAGE as usize];
    for sample in &all[8..] {
        writer.push_sample(sample).unwrap();
    }

    let mut backend = writer.into_backend();
    backend.pages_mut()[METADATA_PAGE as usize] = stale_metadata;

    // the reader follows the pages, not the write offset page 0 still claims
    let (stored, _) = read_back(&mut backend);
    assert_eq!(stored.len(), 16);

    let report = recover(&mut backend, PageFormat::Full).unwrap();
    assert_eq!(
        report.outcome,
        RecoveryOutcome::Repaired(MetadataInconsistency::Mismatch {
            claimed_records: 2,
            found_records: 4,
        })
    );
    assert_eq!(report.metadata.next_page, 5);
    assert_eq!(report.metadata.sample_count, 16);

    let (writer, report) = StorageWriter::open(backend, clock, test_config()).unwrap();
    assert!(matches!(report.outcome, RecoveryOutcome::Repaired(_)));
    assert_eq!(writer.next_sequence(), 4);

    let mut backend = writer.into_backend();
    assert_eq!(
        recover(&mut backend, PageFormat::Full).unwrap().outcome,
        RecoveryOutcome::Consistent
    );

    // a damaged metadata block still leaves every record readable
    backend.pages_mut()[METADATA_PAGE as usize][3] ^= 0xFF;
    let (stored, _) = read_back(&mut backend);
    assert_eq!(stored.len(), 16);
}

#[test]
fn stream_is_truncated_at_first_corrupt_page() {
    init_logger();
    let mut pages = blank_pages(32);
    let now = Cell::new(0);
    let clock = ManualClock::new(&now);
    let (mut writer, _) =
        StorageWriter::open(RamBackend::new(&mut pages), clock, test_config()).unwrap();
    writer.set_target_rate(1000);
    for sample in samples(20, 1_000, 1_000).iter() {
        writer.push_sample(sample).unwrap();
    }
    assert_eq!(writer.status().record_count, 5);

    let mut backend = writer.into_backend();
    backend.pages_mut()[3][40] ^= 0x01;

    let report = recover(&mut backend, PageFormat::Full).unwrap();
    assert_eq!(report.scan.record_count, 2);
    assert_eq!(report.scan.sample_count, 8);
    assert_eq!(report.scan.truncated_at, Some(3));

    let (mut writer, _) = StorageWriter::open(backend, clock, test_config()).unwrap();
    assert_eq!(writer.next_sequence(), 2);
    writer.set_target_rate(1000);
    for sample in samples(4, 100_000, 1_000).iter() {
        writer.push_sample(sample).unwrap();
    }

    let mut backend = writer.into_backend();
    let report = recover(&mut backend, PageFormat::Full).unwrap();
    assert_eq!(report.outcome, RecoveryOutcome::Consistent);
    assert_eq!(report.scan.record_count, 3);
    assert_eq!(report.scan.truncated_at, None);
    assert_eq!(backend.pages()[4], erased_page());
}

#[test]
fn capacity_exhaustion_fails_closed_without_wrapping() {
    init_logger();
    let mut pages = blank_pages(6);
    let now = Cell::new(0);
    let (mut writer, _) =
        StorageWriter::open(RamBackend::new(&mut pages), ManualClock::new(&now), test_config())
            .unwrap();
    let batch = samples(4, 1_000, 1_000);

    let record_pages = writer.backend().capacity_pages() - FIRST_RECORD_PAGE;
    for n in 0..record_pages {
        let (page, _) =
            encode_samples_page(PageFormat::Full, FlightPhase::Idle, writer.next_sequence(), false, &batch)
                .unwrap();
        assert_eq!(writer.append_page(&page), Ok(FIRST_RECORD_PAGE + n));
    }
    let first_record = writer.backend().pages()[FIRST_RECORD_PAGE as usize];

    let (page, _) =
        encode_samples_page(PageFormat::Full, FlightPhase::Idle, writer.next_sequence(), false, &batch)
            .unwrap();
    assert_eq!(writer.append_page(&page), Err(StorageError::CapacityExhausted));
    assert_eq!(writer.state(), WriterState::FailedClosed);
    assert_eq!(writer.status().record_count, record_pages);

    writer.set_target_rate(1000);
    assert_eq!(
        writer.push_sample(&sample_at(50_000, 10.0)),
        Err(StorageError::CapacityExhausted)
    );
    assert!(writer.metadata().exhausted);
    assert_eq!(writer.backend().pages()[FIRST_RECORD_PAGE as usize], first_record);

    let backend = writer.into_backend();
    let (mut writer, _) = StorageWriter::open(backend, ManualClock::new(&now), test_config()).unwrap();
    assert_eq!(writer.state(), WriterState::FailedClosed);
    assert_eq!(writer.status().last_error, Some(StorageError::CapacityExhausted));
    writer.set_target_rate(1000);
    assert_eq!(
        writer.push_sample(&sample_at(60_000, 10.0)),
        Err(StorageError::CapacityExhausted)
    );
}

#[test]
fn landed_protects_the_flight_record() {
    init_logger();
    let mut pages = blank_pages(64);
    let now = Cell::new(0);
    let clock = ManualClock::new(&now);
    let (mut writer, _) =
        StorageWriter::open(RamBackend::new(&mut pages), clock, test_config()).unwrap();
    writer.set_target_rate(1000);

    let phases = [
        FlightPhase::Idle,
        FlightPhase::Armed,
        FlightPhase::PoweredAscent,
        FlightPhase::Coast,
        FlightPhase::Apogee,
        FlightPhase::Descent,
        FlightPhase::Landed,
    ];
    let mut t = 1_000;
    for pair in phases.windows(2) {
        for _ in 0..5 {
            writer.push_sample(&sample_at(t, 200.0)).unwrap();
            t += 1_000;
        }
        writer
            .record_transition(&transition(pair[0], pair[1], t))
            .unwrap();
    }

    assert_eq!(writer.state(), WriterState::Protected);
    let before = writer.status().record_count;
    let landed_at = writer.metadata().landed_timestamp_us;
    assert_eq!(landed_at, t);

    assert_eq!(writer.push_sample(&sample_at(t + 5_000, 200.0)), Err(StorageError::WriteProtected));
    assert_eq!(writer.flush(), Err(StorageError::WriteProtected));
    assert_eq!(
        writer.record_transition(&transition(FlightPhase::Landed, FlightPhase::Landed, t + 6_000)),
        Err(StorageError::WriteProtected)
    );
    let (page, _) = encode_samples_page(
        PageFormat::Full,
        FlightPhase::Landed,
        writer.next_sequence(),
        false,
        &[sample_at(t + 7_000, 200.0)],
    )
    .unwrap();
    assert_eq!(writer.append_page(&page), Err(StorageError::WriteProtected));
    assert_eq!(writer.status().record_count, before);

    let backend = writer.into_backend();
    let (mut writer, report) = StorageWriter::open(backend, clock, test_config()).unwrap();
    assert_eq!(report.outcome, RecoveryOutcome::Consistent);
    assert_eq!(writer.state(), WriterState::Protected);
    assert_eq!(writer.status().record_count, before);
    assert_eq!(writer.metadata().landed_timestamp_us, landed_at);

    writer.reformat().unwrap();
    assert_eq!(writer.state(), WriterState::Recording);
    assert_eq!(writer.status().record_count, 0);
    assert_eq!(writer.backend().pages()[FIRST_RECORD_PAGE as usize], erased_page());
}

#[test]
fn busy_device_is_retried_then_degrades() {
    init_logger();
    let mut pages = blank_pages(32);
    let now = Cell::new(0);
    let (mut writer, _) = StorageWriter::open(
        FlakyBackend::new(&mut pages),
        ManualClock::new(&now),
        test_config(),
    )
    .unwrap();
    writer.set_target_rate(1000);
    let batch = samples(8, 1_000, 1_000);

    writer.backend().busy_writes = 2;
    for sample in &batch[..4] {
        assert_eq!(writer.push_sample(sample), Ok(true));
    }
    assert_eq!(writer.status().record_count, 1);
    assert!(!writer.status().degraded);

    writer.backend().busy_writes = 3;
    for sample in &batch[4..7] {
        assert_eq!(writer.push_sample(sample), Ok(true));
    }
    assert_eq!(writer.push_sample(&batch[7]), Err(StorageError::DeviceNotReady));
    let status = writer.status();
    assert!(status.degraded);
    assert_eq!(status.state, WriterState::Recording);
    assert_eq!(status.active_format, PageFormat::NoMag);
    assert_eq!(status.pending_samples, 4);
    assert_eq!(status.last_error, Some(StorageError::DeviceNotReady));

    writer.flush().unwrap();
    assert_eq!(writer.status().record_count, 2);
    assert_eq!(writer.status().sample_count, 8);

    let last = decode_page(&writer.backend().inner().pages()[2]).unwrap();
    assert!(last.degraded);
    assert!(matches!(
        last.body,
        PageBody::Samples {
            format: PageFormat::NoMag,
            ..
        }
    ));
}

#[test]
fn transition_refused_by_busy_device_stays_behind_its_samples() {
    init_logger();
    let mut pages = blank_pages(32);
    let now = Cell::new(0);
    let (mut writer, _) = StorageWriter::open(
        FlakyBackend::new(&mut pages),
        ManualClock::new(&now),
        test_config(),
    )
    .unwrap();
    writer.set_target_rate(1000);

    for sample in samples(3, 1_000, 1_000).iter() {
        assert_eq!(writer.push_sample(sample), Ok(true));
    }
    writer.backend().busy_writes = 3;
    assert_eq!(
        writer.record_transition(&transition(FlightPhase::Idle, FlightPhase::Armed, 3_500)),
        Err(StorageError::DeviceNotReady)
    );
    assert_eq!(writer.state(), WriterState::Recording);

    assert_eq!(writer.push_sample(&sample_at(10_000, 150.0)), Ok(true));
    writer.flush().unwrap();

    let mut backend = writer.into_backend();
    let stream: Vec<(FlightPhase, Option<FlightPhase>, Vec<u64>)> =
        RecordReader::open(backend.inner())
            .unwrap()
            .map(|page| {
                let page = page.unwrap();
                match page.body {
                    PageBody::Samples { samples, .. } => (
                        page.phase,
                        None,
                        samples.iter().map(|s| s.timestamp_us).collect(),
                    ),
                    PageBody::Transition(record) => {
                        (page.phase, Some(record.transition.to), vec![record.transition.timestamp_us])
                    }
                }
            })
            .collect();
    assert_eq!(
        stream,
        vec![
            (FlightPhase::Idle, None, vec![1_000, 2_000, 3_000]),
            (FlightPhase::Armed, Some(FlightPhase::Armed), vec![3_500]),
            (FlightPhase::Armed, None, vec![10_000]),
        ]
    );
}

#[test]
fn persistent_verify_failure_fails_closed() {
    init_logger();
    let mut pages = blank_pages(32);
    let now = Cell::new(0);
    let config = StorageConfig {
        ground_format: PageFormat::Minimal,
        ..test_config()
    };
    let (mut writer, _) =
        StorageWriter::open(FlakyBackend::new(&mut pages), ManualClock::new(&now), config).unwrap();
    writer.set_target_rate(1000);
    writer.backend().corrupt_writes = u32::MAX;

    let batch = samples(21, 1_000, 1_000);
    for sample in &batch[..19] {
        assert_eq!(writer.push_sample(sample), Ok(true));
    }
    assert_eq!(writer.push_sample(&batch[19]), Err(StorageError::WriteVerifyFailed));
    assert_eq!(writer.backend().write_attempts, 1 + 3);
    assert_eq!(writer.state(), WriterState::FailedClosed);
    assert_eq!(writer.status().record_count, 0);
    assert_eq!(writer.push_sample(&batch[20]), Err(StorageError::WriteVerifyFailed));
}

#[test]
fn slow_device_degrades_format() {
    init_logger();
    let mut pages = blank_pages(32);
    let now = Cell::new(0);
    let clock = ManualClock::new(&now);
    let mut backend = FlakyBackend::new(&mut pages).with_clock(clock);
    backend.write_delay_us = 5_000;
    let (mut writer, _) = StorageWriter::open(backend, clock, test_config()).unwrap();
    writer.set_target_rate(500);

    let batch = samples(10, 1_000, 2_000);
    for sample in &batch[..4] {
        writer.push_sample(sample).unwrap();
    }
    // 4 samples at 500 Hz fill a page in 8 ms, the write took 5 ms
    assert!(writer.status().degraded);
    assert_eq!(writer.active_format(), PageFormat::NoMag);

    for sample in &batch[4..] {
        writer.push_sample(sample).unwrap();
    }
    assert_eq!(writer.status().record_count, 2);
    assert_eq!(writer.active_format(), PageFormat::NoMag);
}

#[test]
fn low_water_mark_forces_most_compact_format() {
    init_logger();
    let mut pages = blank_pages(12);
    let now = Cell::new(0);
    let config = StorageConfig {
        low_water_pages: 4,
        ..StorageConfig::default()
    };
    let (mut writer, _) =
        StorageWriter::open(RamBackend::new(&mut pages), ManualClock::new(&now), config).unwrap();
    writer.set_target_rate(1000);

    let batch = samples(32, 1_000, 1_000);
    for sample in &batch[..28] {
        writer.push_sample(sample).unwrap();
    }
    assert_eq!(writer.active_format(), PageFormat::Full);
    for sample in &batch[28..] {
        writer.push_sample(sample).unwrap();
    }
    assert_eq!(writer.status().free_pages, 3);
    assert_eq!(writer.active_format(), PageFormat::Minimal);
}

#[test]
fn samples_are_decimated_to_target_rate() {
    init_logger();
    let mut pages = blank_pages(16);
    let now = Cell::new(0);
    let (mut writer, _) =
        StorageWriter::open(RamBackend::new(&mut pages), ManualClock::new(&now), test_config())
            .unwrap();

    writer.set_target_rate(10);
    let accepted = samples(100, 0, 10_000)
        .iter()
        .filter(|sample| writer.push_sample(sample).unwrap())
        .count();
    assert_eq!(accepted, 10);

    writer.set_target_rate(0);
    assert_eq!(writer.push_sample(&sample_at(5_000_000, 0.0)), Ok(false));
}
