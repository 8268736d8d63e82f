// only use std when feature = "std" is enabled or during testing
#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
extern crate avionics_common;

pub mod detector;
pub mod estimator;
mod flight_computer;
pub mod predictor;
mod profile;
pub mod state_machine;

pub use detector::{DetectorEvent, DetectorState, DetectorSuite};
pub use estimator::{InitialState, VerticalEstimate};
pub use flight_computer::{FlightComputer, PREDICTOR_WINDOW, TelemetrySnapshot};
pub use predictor::{ApogeePredictor, NotConfident, Prediction};
pub use profile::{FlightProfile, InvalidProfile, SampleRatePolicy};
pub use state_machine::{Command, FlightPhaseMachine, MachineVariant, TransitionRejected};

#[cfg(test)]
mod tests;
