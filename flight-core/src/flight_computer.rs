use avionics_common::storage::{
    RecoveryReport, StorageBackend, StorageConfig, StorageError, StorageWriter, WriterState,
};
use avionics_common::sensor::{SensorDriver, SensorSuite};
use avionics_common::{
    BaroData, BatteryData, Clock, FlightPhase, IMUData, MagData, PhaseTransition, SensorSample,
    TransitionRecord,
};

use crate::detector::{DetectorSuite, LaunchStatus};
use crate::estimator::{
    GroundLevelEstimator, InitialState, VerticalEstimate, VerticalVelocityEstimator,
};
use crate::predictor::{NotConfident, Prediction};
use crate::profile::FlightProfile;
use crate::state_machine::{Command, FlightPhaseMachine, MachineVariant, TransitionRejected};

/// Velocity samples in the apogee predictor's fit window.
pub const PREDICTOR_WINDOW: usize = 8;

/// Everything telemetry needs, copied out once per cycle.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySnapshot {
    pub phase: FlightPhase,
    pub estimate: VerticalEstimate,
    pub initial_state: Option<InitialState>,
    /// Standard deviation of the pad altitude while the ground level settled (m).
    pub ground_noise: f32,
    pub launch_status: LaunchStatus,
    pub prediction: Option<Prediction>,
    pub record_count: u32,
    pub sample_count: u32,
    pub free_pages: u32,
    pub storage_state: WriterState,
    pub degraded: bool,
    pub rejected_transitions: u32,
    pub last_storage_error: Option<StorageError>,
}

/// One flight computer: estimators, detectors, the phase machine and the flight record,
/// driven by [`FlightComputer::cycle`] once per sensor sample.
pub struct FlightComputer<B: StorageBackend, C: Clock> {
    ground: GroundLevelEstimator,
    velocity: VerticalVelocityEstimator,
    detectors: DetectorSuite<PREDICTOR_WINDOW>,
    machine: FlightPhaseMachine,
    writer: StorageWriter<B, C>,
    estimate: VerticalEstimate,
    initial_state: Option<InitialState>,
    last_storage_error: Option<StorageError>,
}

impl<B: StorageBackend, C: Clock> FlightComputer<B, C> {
    /// Opens the flight record on `backend`, recovering whatever is already on it.
    pub fn new(
        profile: &FlightProfile,
        variant: MachineVariant,
        backend: B,
        clock: C,
        storage_config: StorageConfig,
    ) -> Result<(Self, RecoveryReport), StorageError> {
        let (mut writer, report) = StorageWriter::open(backend, clock, storage_config)?;
        let machine = FlightPhaseMachine::new(variant, profile);
        writer.set_target_rate(machine.target_rate_hz());

        if writer.state() != WriterState::Recording {
            log_warn!(
                "flight record not writable ({:?}), this flight will not be recorded",
                writer.state()
            );
        }

        let computer = Self {
            ground: GroundLevelEstimator::new(profile),
            velocity: VerticalVelocityEstimator::new(profile),
            detectors: DetectorSuite::new(profile),
            machine,
            writer,
            estimate: VerticalEstimate::default(),
            initial_state: None,
            last_storage_error: None,
        };
        Ok((computer, report))
    }

    /// Runs one sample through the estimators, detectors, phase machine and storage.
    pub fn cycle(&mut self, sample: &SensorSample) -> Option<PhaseTransition> {
        let phase = self.machine.phase();

        let specific_force = self.velocity.vertical_specific_force(&sample.data.imu.acc);
        if phase.is_on_pad() {
            self.ground.update(
                sample.data.baro.altitude(),
                sample.data.baro.pressure,
                specific_force,
            );
        } else {
            self.ground.freeze();
        }

        self.estimate = self.velocity.update(sample, &self.ground);
        let events = self
            .detectors
            .update(phase, self.machine.variant(), &self.estimate);
        let transition = self.machine.on_sample(sample, &self.estimate, &events);

        // the sample belongs to the phase it was taken in
        if self.writer.state() == WriterState::Recording {
            let result = self.writer.push_sample(sample);
            self.note_storage(result);
        }
        if let Some(transition) = transition {
            self.persist_transition(transition);
        }
        transition
    }

    /// Polls the sensors at the current clock time and cycles on the sample they produce.
    /// Nothing runs when the IMU or the barometer had no fresh reading.
    pub fn poll_and_cycle<Imu, Mag, Baro, Batt>(
        &mut self,
        sensors: &mut SensorSuite<Imu, Mag, Baro, Batt>,
    ) -> Option<PhaseTransition>
    where
        Imu: SensorDriver<Reading = IMUData>,
        Mag: SensorDriver<Reading = MagData>,
        Baro: SensorDriver<Reading = BaroData>,
        Batt: SensorDriver<Reading = BatteryData>,
    {
        let sample = sensors.poll(self.writer.clock().now_us())?;
        self.cycle(&sample)
    }

    pub fn command(
        &mut self,
        command: Command,
        timestamp_us: u64,
    ) -> Result<Option<PhaseTransition>, TransitionRejected> {
        let transition = self.machine.command(command, timestamp_us)?;
        if let Some(transition) = transition {
            self.persist_transition(transition);
        }
        Ok(transition)
    }

    /// Writes out buffered samples, e.g. before power down.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        if self.writer.state() != WriterState::Recording {
            return Ok(());
        }
        let result = self.writer.flush();
        self.note_storage(result);
        result
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let storage = self.writer.status();
        TelemetrySnapshot {
            phase: self.machine.phase(),
            estimate: self.estimate,
            initial_state: self.initial_state,
            ground_noise: self.ground.altitude_noise(),
            launch_status: self.detectors.last_launch_status(),
            prediction: self.detectors.last_prediction().ok(),
            record_count: storage.record_count,
            sample_count: storage.sample_count,
            free_pages: storage.free_pages,
            storage_state: storage.state,
            degraded: storage.degraded,
            rejected_transitions: self.machine.rejected_transitions(),
            last_storage_error: self.last_storage_error,
        }
    }

    pub fn phase(&self) -> FlightPhase {
        self.machine.phase()
    }

    pub fn estimate(&self) -> &VerticalEstimate {
        &self.estimate
    }

    pub fn initial_state(&self) -> Option<InitialState> {
        self.initial_state
    }

    pub fn prediction(&self) -> Result<Prediction, NotConfident> {
        self.detectors.last_prediction()
    }

    pub fn writer(&mut self) -> &mut StorageWriter<B, C> {
        &mut self.writer
    }

    pub fn into_backend(self) -> B {
        self.writer.into_backend()
    }

    fn persist_transition(&mut self, transition: PhaseTransition) {
        if transition.to == FlightPhase::Armed {
            if !self.ground.is_settled() {
                log_warn!("armed before the ground level settled");
            }
            let initial = self.ground.initial_state(transition.timestamp_us);
            log_info!(
                "initial state: {}m ASL, {}Pa, bias {}m/s²",
                initial.ground_altitude_asl,
                initial.ground_pressure,
                initial.accelerometer_bias
            );
            self.initial_state = Some(initial);
        }

        let record = TransitionRecord {
            transition,
            altitude_agl: self.estimate.altitude_agl,
            velocity: self.estimate.velocity,
            ground_altitude_asl: self.ground.ground_altitude_asl(),
            ground_pressure: self.ground.ground_pressure(),
            accelerometer_bias: self.ground.accelerometer_bias(),
        };
        self.writer.set_target_rate(self.machine.target_rate_hz());
        if self.writer.state() == WriterState::Recording {
            let result = self.writer.record_transition(&record);
            self.note_storage(result);
        }
    }

    fn note_storage<T>(&mut self, result: Result<T, StorageError>) {
        if let Err(e) = result {
            if self.last_storage_error != Some(e) {
                log_warn!("storage error: {:?}", e);
            }
            self.last_storage_error = Some(e);
        }
    }
}
