use std::cell::Cell;
use std::path::Path;

use anyhow::{Result, anyhow};
use avionics_common::storage::{FileBackend, RecoveryReport};
use avionics_common::{FlightPhase, ManualClock, PhaseTransition};
use flight_core::{Command, FlightComputer, TelemetrySnapshot, VerticalEstimate};
use log::{info, warn};

use crate::args::ReplayCli;
use crate::config::ReplayConfig;
use crate::sensor_log::{SensorLogRow, TraceRow};

pub struct ReplaySummary {
    pub recovery: RecoveryReport,
    pub transitions: Vec<(PhaseTransition, VerticalEstimate)>,
    pub cycles: u64,
    pub snapshot: TelemetrySnapshot,
}

pub fn replay(args: &ReplayCli) -> Result<ReplaySummary> {
    let config = match &args.config {
        Some(path) => ReplayConfig::load(path)?,
        None => ReplayConfig::default(),
    };

    // storage deadlines run on log time so a replay is deterministic
    let now = Cell::new(0);
    let clock = ManualClock::new(&now);
    let backend = FileBackend::new(&args.image_path, args.capacity_pages);
    let (mut computer, recovery) = FlightComputer::new(
        &config.profile,
        args.variant.into(),
        backend,
        clock,
        config.storage.clone(),
    )
    .map_err(|e| anyhow!("failed to open {}: {:?}", args.image_path.display(), e))?;
    info!(
        "image {}: {:?}, {} records already on it",
        args.image_path.display(),
        recovery.outcome,
        recovery.scan.record_count
    );

    let mut trace = match &args.trace {
        Some(path) => Some(csv::Writer::from_path(path)?),
        None => None,
    };
    let arm_at_us = args.arm_at.map(|s| (s * 1_000_000.0) as u64);
    let mut arm_sent = false;
    let mut transitions = Vec::new();
    let mut cycles = 0;

    let mut reader = csv::Reader::from_path(&args.log_path)?;
    for row in reader.deserialize() {
        let row: SensorLogRow = row?;
        let sample = row.to_sample();
        clock.set(sample.timestamp_us);

        if !arm_sent && arm_at_us.is_none_or(|at| sample.timestamp_us >= at) {
            arm_sent = true;
            match computer.command(Command::Arm, sample.timestamp_us) {
                Ok(Some(transition)) => transitions.push((transition, *computer.estimate())),
                Ok(None) => {}
                Err(e) => warn!("arm command rejected: {:?}", e),
            }
        }

        if let Some(transition) = computer.cycle(&sample) {
            let estimate = computer.estimate();
            info!(
                "{:?} -> {:?} at {:.3}s, {:.1}m AGL, {:.1}m/s",
                transition.from,
                transition.to,
                sample.timestamp_s(),
                estimate.altitude_agl,
                estimate.velocity
            );
            transitions.push((transition, *estimate));
        }

        if let Some(trace) = trace.as_mut() {
            let time_to_apogee_s = computer.prediction().ok().map(|p| p.time_to_apogee_s);
            trace.serialize(TraceRow::new(
                computer.phase(),
                computer.estimate(),
                time_to_apogee_s,
            ))?;
        }
        cycles += 1;
    }

    if let Some(trace) = trace.as_mut() {
        trace.flush()?;
    }
    if let Err(e) = computer.flush() {
        warn!("final flush failed: {:?}", e);
    }

    Ok(ReplaySummary {
        recovery,
        transitions,
        cycles,
        snapshot: computer.snapshot(),
    })
}

pub fn print_summary(log_path: &Path, summary: &ReplaySummary) {
    println!("replayed {} samples from {}", summary.cycles, log_path.display());
    for (transition, estimate) in &summary.transitions {
        println!(
            "{:>10.3}s  {:<13}  {:>8.1}m AGL  {:>7.1}m/s",
            transition.timestamp_us as f64 / 1_000_000.0,
            format!("{:?}", transition.to),
            estimate.altitude_agl,
            estimate.velocity
        );
    }

    let snapshot = &summary.snapshot;
    if snapshot.phase != FlightPhase::Landed {
        println!("ended in {:?}", snapshot.phase);
    }
    if let Some(initial) = snapshot.initial_state {
        println!(
            "ground {:.1}m ASL ±{:.2}m, {:.0}Pa, accelerometer bias {:.3}m/s²",
            initial.ground_altitude_asl,
            snapshot.ground_noise,
            initial.ground_pressure,
            initial.accelerometer_bias
        );
    }
    println!(
        "storage {:?}{}: {} records, {} samples, {} pages free",
        snapshot.storage_state,
        if snapshot.degraded { " (degraded)" } else { "" },
        snapshot.record_count,
        snapshot.sample_count,
        snapshot.free_pages
    );
    if let Some(e) = snapshot.last_storage_error {
        println!("last storage error: {:?}", e);
    }
    if snapshot.rejected_transitions > 0 {
        println!("{} rejected transitions", snapshot.rejected_transitions);
    }
}
