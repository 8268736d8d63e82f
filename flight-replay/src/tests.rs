use std::fs;
use std::path::Path;

use approx::assert_relative_eq;
use avionics_common::storage::{RecoveryOutcome, WriterState};
use avionics_common::{BaroData, FlightPhase, STANDARD_GRAVITY};
use log::LevelFilter;
use tempfile::TempDir;

use crate::args::{DumpCli, ReformatCli, ReplayCli, VariantArg};
use crate::image::{dump, reformat};
use crate::replay::replay;
use crate::sensor_log::SensorLogRow;

const GROUND_ASL: f32 = 120.0;
const LAUNCH_S: f32 = 2.0;
const BURN_S: f32 = 2.0;
const THRUST: f32 = 30.0;
const DESCENT_RATE: f32 = 10.0;

fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .filter(Some("flight_replay"), LevelFilter::Trace)
        .is_test(true)
        .try_init();
}

/// Altitude AGL and vertical specific force of a drag free flight.
fn truth(t: f32) -> (f32, f32) {
    let g = STANDARD_GRAVITY;
    if t < LAUNCH_S {
        return (0.0, g);
    }
    let t_burn = t - LAUNCH_S;
    if t_burn < BURN_S {
        return (0.5 * THRUST * t_burn * t_burn, THRUST + g);
    }
    let v0 = THRUST * BURN_S;
    let h0 = 0.5 * THRUST * BURN_S * BURN_S;
    let t_coast = t_burn - BURN_S;
    let t_canopy = (v0 + DESCENT_RATE) / g;
    if t_coast < t_canopy {
        return (h0 + v0 * t_coast - 0.5 * g * t_coast * t_coast, 0.0);
    }
    let h_canopy = h0 + v0 * t_canopy - 0.5 * g * t_canopy * t_canopy;
    ((h_canopy - DESCENT_RATE * (t_coast - t_canopy)).max(0.0), g)
}

fn write_flight_log(path: &Path, duration_s: u64) {
    let mut writer = csv::Writer::from_path(path).unwrap();
    for i in 0..duration_s * 100 {
        let timestamp_us = i * 10_000;
        let (altitude_agl, specific_force) = truth(timestamp_us as f32 / 1_000_000.0);
        let baro = BaroData::from_altitude(GROUND_ASL + altitude_agl, 12.0);
        writer
            .serialize(SensorLogRow {
                timestamp_us,
                acc_x: 0.05,
                acc_y: 0.1,
                acc_z: specific_force,
                gyro_x: Some(0.0),
                gyro_y: Some(0.0),
                gyro_z: Some(0.0),
                mag_x: None,
                mag_y: None,
                mag_z: None,
                pressure: baro.pressure,
                temperature: Some(baro.temperature),
                battery_voltage: Some(7.9),
            })
            .unwrap();
    }
    writer.flush().unwrap();
}

fn replay_args(dir: &TempDir) -> ReplayCli {
    ReplayCli {
        log_path: dir.path().join("flight.csv"),
        image_path: dir.path().join("flight.img"),
        config: None,
        variant: VariantArg::Burnout,
        arm_at: Some(1.5),
        capacity_pages: 2048,
        trace: Some(dir.path().join("trace.csv")),
    }
}

#[test]
fn replay_then_dump_reconstructs_the_flight() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let args = replay_args(&dir);
    write_flight_log(&args.log_path, 45);

    let summary = replay(&args).unwrap();
    assert_eq!(summary.recovery.outcome, RecoveryOutcome::Fresh);
    assert_eq!(summary.cycles, 4500);
    let phases: Vec<FlightPhase> = summary.transitions.iter().map(|(t, _)| t.to).collect();
    assert_eq!(
        phases,
        vec![
            FlightPhase::Armed,
            FlightPhase::PoweredAscent,
            FlightPhase::Coast,
            FlightPhase::Apogee,
            FlightPhase::Descent,
            FlightPhase::Landed,
        ]
    );
    assert_eq!(summary.snapshot.storage_state, WriterState::Protected);
    assert_eq!(summary.snapshot.last_storage_error, None);

    let trace = fs::read_to_string(&args.trace.clone().unwrap()).unwrap();
    assert_eq!(trace.lines().count(), 4500 + 1);

    let dumped = dump(&DumpCli {
        image_path: args.image_path.clone(),
        samples: Some(dir.path().join("samples.csv")),
    })
    .unwrap();
    assert_eq!(dumped.recovery.outcome, RecoveryOutcome::Consistent);
    assert!(dumped.recovery.metadata.protected);
    assert_eq!(dumped.unreadable_pages, 0);
    assert_eq!(dumped.sample_count, summary.snapshot.sample_count);
    assert_eq!(
        dumped.transitions.iter().map(|r| r.transition).collect::<Vec<_>>(),
        summary.transitions.iter().map(|(t, _)| *t).collect::<Vec<_>>()
    );
    assert_relative_eq!(dumped.transitions[0].ground_altitude_asl, GROUND_ASL, epsilon = 1.0);

    let samples = fs::read_to_string(dir.path().join("samples.csv")).unwrap();
    assert_eq!(samples.lines().count() as u32, dumped.sample_count + 1);
}

#[test]
fn second_replay_leaves_protected_record_alone() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let mut args = replay_args(&dir);
    args.trace = None;
    write_flight_log(&args.log_path, 45);

    let first = replay(&args).unwrap();
    let second = replay(&args).unwrap();
    assert_eq!(second.recovery.outcome, RecoveryOutcome::Consistent);
    assert_eq!(second.snapshot.storage_state, WriterState::Protected);
    assert_eq!(second.snapshot.record_count, first.snapshot.record_count);

    let report = reformat(&ReformatCli {
        image_path: args.image_path.clone(),
    })
    .unwrap();
    assert!(report.metadata.protected);

    let third = replay(&args).unwrap();
    assert_eq!(third.recovery.metadata.record_count, 0);
    assert_eq!(third.snapshot.storage_state, WriterState::Protected);
    assert_eq!(third.snapshot.record_count, first.snapshot.record_count);
}

#[test]
fn dump_of_missing_image_fails() {
    let dir = TempDir::new().unwrap();
    assert!(
        dump(&DumpCli {
            image_path: dir.path().join("missing.img"),
            samples: None,
        })
        .is_err()
    );
}
