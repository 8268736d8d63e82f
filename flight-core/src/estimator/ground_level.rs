use avionics_common::STANDARD_GRAVITY;
use avionics_common::variance::RunningStats;

use super::InitialState;
use crate::profile::FlightProfile;

const ALTITUDE: usize = 0;
const PRESSURE: usize = 1;
const SPECIFIC_FORCE: usize = 2;

/// Ground level altitude, pressure and accelerometer bias, tracked on the pad.
///
/// The first `ground_init_samples` readings are averaged, after that an exponential moving
/// average follows slow weather drift. Frozen for good once the vehicle leaves the pad.
#[derive(Debug, Clone)]
pub struct GroundLevelEstimator {
    init_samples: u32,
    alpha: f32,
    settling: RunningStats<3>,
    level: [f32; 3],
    frozen: bool,
}

impl GroundLevelEstimator {
    pub fn new(profile: &FlightProfile) -> Self {
        Self {
            init_samples: profile.ground_init_samples.max(1),
            alpha: profile.ground_alpha,
            settling: RunningStats::new(),
            level: [0.0; 3],
            frozen: false,
        }
    }

    /// Feeds one pad reading. `vertical_specific_force` is the raw accelerometer reading on
    /// the vertical axis, about +g at rest.
    pub fn update(&mut self, altitude_asl: f32, pressure: f32, vertical_specific_force: f32) {
        if self.frozen {
            return;
        }

        let reading = [altitude_asl, pressure, vertical_specific_force];
        if self.settling.count() < self.init_samples {
            self.settling.update(reading);
            self.level = self.settling.mean();
            if self.settling.count() == self.init_samples {
                log_info!(
                    "ground level settled: {}m ASL, {}Pa, noise {}m",
                    self.level[ALTITUDE],
                    self.level[PRESSURE],
                    self.altitude_noise()
                );
            }
        } else {
            for (level, x) in self.level.iter_mut().zip(reading) {
                *level += self.alpha * (x - *level);
            }
        }
    }

    pub fn freeze(&mut self) {
        if !self.frozen {
            log_info!("ground level frozen at {}m ASL", self.level[ALTITUDE]);
            self.frozen = true;
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// At least one pad reading has been seen.
    pub fn is_initialized(&self) -> bool {
        self.settling.count() > 0
    }

    pub fn is_settled(&self) -> bool {
        self.settling.count() >= self.init_samples
    }

    pub fn ground_altitude_asl(&self) -> f32 {
        self.level[ALTITUDE]
    }

    pub fn ground_pressure(&self) -> f32 {
        self.level[PRESSURE]
    }

    /// Spread of the altitude readings averaged while settling.
    pub fn altitude_noise(&self) -> f32 {
        self.settling.std_dev()[ALTITUDE]
    }

    pub fn accelerometer_bias(&self) -> f32 {
        if self.is_initialized() {
            self.level[SPECIFIC_FORCE] - STANDARD_GRAVITY
        } else {
            0.0
        }
    }

    pub fn altitude_agl(&self, altitude_asl: f32) -> f32 {
        altitude_asl - self.level[ALTITUDE]
    }

    pub fn initial_state(&self, captured_at_us: u64) -> InitialState {
        InitialState {
            ground_pressure: self.ground_pressure(),
            ground_altitude_asl: self.ground_altitude_asl(),
            accelerometer_bias: self.accelerometer_bias(),
            captured_at_us,
        }
    }
}
