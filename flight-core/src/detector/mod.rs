//! Launch and apogee detection. Detectors only raise events, the phase machine decides what
//! to do with them.

mod apogee;
mod launch;

use avionics_common::FlightPhase;
use heapless::Vec;

pub use apogee::ApogeeDetector;
pub use launch::{LaunchDetector, LaunchStatus};

use crate::estimator::VerticalEstimate;
use crate::predictor::{ApogeePredictor, NotConfident, Prediction};
use crate::profile::FlightProfile;
use crate::state_machine::MachineVariant;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Idle,
    Armed,
    Detected,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorEvent {
    Launch,
    Apogee,
}

pub type DetectorEvents = Vec<DetectorEvent, 2>;

/// Both detectors and the predictor, armed according to the current flight phase.
#[derive(Debug, Clone)]
pub struct DetectorSuite<const K: usize> {
    pub launch: LaunchDetector,
    pub apogee: ApogeeDetector,
    pub predictor: ApogeePredictor<K>,
    last_launch_status: LaunchStatus,
    last_prediction: Result<Prediction, NotConfident>,
}

impl<const K: usize> DetectorSuite<K> {
    pub fn new(profile: &FlightProfile) -> Self {
        Self {
            launch: LaunchDetector::new(profile),
            apogee: ApogeeDetector::new(profile),
            predictor: ApogeePredictor::new(profile),
            last_launch_status: LaunchStatus::NotArmed,
            last_prediction: Err(NotConfident::InsufficientSamples),
        }
    }

    /// Runs one estimate through the detectors for the phase the machine is in.
    pub fn update(
        &mut self,
        phase: FlightPhase,
        variant: MachineVariant,
        estimate: &VerticalEstimate,
    ) -> DetectorEvents {
        let mut events = DetectorEvents::new();

        match phase {
            FlightPhase::Idle => self.launch.disarm(),
            FlightPhase::Armed => self.launch.arm(),
            _ => {}
        }
        self.last_launch_status = self.launch.update(estimate);
        if self.last_launch_status == LaunchStatus::Detected {
            let _ = events.push(DetectorEvent::Launch);
        }

        if phase.is_in_flight() {
            self.predictor.push(estimate);
            self.last_prediction = self.predictor.predict();
        }
        if phase == variant.apogee_watch_phase() {
            self.apogee.arm();
        }
        if self.apogee.update(estimate, &self.last_prediction) {
            let _ = events.push(DetectorEvent::Apogee);
        }

        events
    }

    pub fn last_launch_status(&self) -> LaunchStatus {
        self.last_launch_status
    }

    pub fn last_prediction(&self) -> Result<Prediction, NotConfident> {
        self.last_prediction
    }
}
