//! Vertical state estimation from the barometer and the accelerometer.

mod ground_level;
mod vertical_velocity;

use serde::{Deserialize, Serialize};

pub use ground_level::GroundLevelEstimator;
pub use vertical_velocity::{VerticalAxis, VerticalVelocityEstimator};

/// Snapshot of the vertical state, copied out of the estimator every cycle.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VerticalEstimate {
    pub timestamp_us: u64,
    pub altitude_agl: f32,
    pub velocity: f32,
    /// Inertial vertical acceleration, gravity and bias removed.
    pub acceleration: f32,
    /// 0 right after (re)initialization, 1 once the filter has converged.
    pub confidence: f32,
    /// The sample behind this estimate was out of order or came after a gap, the values
    /// are held from the last good update.
    pub stale: bool,
}

/// Pad conditions captured when the vehicle is armed.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitialState {
    pub ground_pressure: f32,
    pub ground_altitude_asl: f32,
    pub accelerometer_bias: f32,
    pub captured_at_us: u64,
}
