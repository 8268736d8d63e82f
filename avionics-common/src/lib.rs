// only use std when feature = "std" is enabled or during testing
#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
mod fmt;

pub mod flight_phase;
pub mod readings;
pub mod ring_buffer;
pub mod sensor;
pub mod sensor_reading;
pub mod storage;
pub mod time;
pub mod variance;

pub use flight_phase::{FlightPhase, PhaseTransition, TransitionRecord};
pub use readings::{BaroData, BatteryData, IMUData, MagData, STANDARD_GRAVITY, SampleData};
pub use ring_buffer::RingBuffer;
pub use sensor_reading::{SensorReading, SensorSample};
pub use time::{BootTimestamp, Clock, ManualClock};

#[cfg(test)]
mod tests;
