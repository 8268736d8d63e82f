use avionics_common::{STANDARD_GRAVITY, SensorSample};

use super::{GroundLevelEstimator, VerticalEstimate};
use crate::profile::FlightProfile;

/// Accelerometer axis pointing up, picked from the gravity reading on the pad.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerticalAxis {
    pub index: usize,
    /// +1 when the axis points up, -1 when the unit is mounted upside down.
    pub sign: f32,
}

impl VerticalAxis {
    /// Axis with the largest magnitude, keeping its sign.
    pub fn dominant(acc: &[f32; 3]) -> Self {
        let mut index = 0;
        for i in 1..3 {
            if libm::fabsf(acc[i]) > libm::fabsf(acc[index]) {
                index = i;
            }
        }
        Self {
            index,
            sign: if acc[index] < 0.0 { -1.0 } else { 1.0 },
        }
    }

    pub fn project(&self, acc: &[f32; 3]) -> f32 {
        acc[self.index] * self.sign
    }
}

#[derive(Debug, Clone, Copy)]
struct BaroSeed {
    timestamp_us: u64,
    altitude_agl: f32,
}

/// Fixed gain complementary filter blending the integrated accelerometer with the
/// differentiated barometric altitude.
#[derive(Debug, Clone)]
pub struct VerticalVelocityEstimator {
    alpha: f32,
    stale_threshold_us: u64,
    convergence_samples: u32,
    axis: Option<VerticalAxis>,
    seed: Option<BaroSeed>,
    fresh_updates: u32,
    estimate: VerticalEstimate,
}

impl VerticalVelocityEstimator {
    pub fn new(profile: &FlightProfile) -> Self {
        Self {
            alpha: profile.complementary_alpha,
            stale_threshold_us: profile.stale_threshold_us,
            convergence_samples: profile.convergence_samples.max(1),
            axis: None,
            seed: None,
            fresh_updates: 0,
            estimate: VerticalEstimate::default(),
        }
    }

    /// Raw specific force along the vertical axis. The axis is fixed by the first call.
    pub fn vertical_specific_force(&mut self, acc: &[f32; 3]) -> f32 {
        let axis = *self.axis.get_or_insert_with(|| {
            let axis = VerticalAxis::dominant(acc);
            log_info!("vertical axis {} sign {}", axis.index, axis.sign);
            axis
        });
        axis.project(acc)
    }

    pub fn update(&mut self, sample: &SensorSample, ground: &GroundLevelEstimator) -> VerticalEstimate {
        let timestamp_us = sample.timestamp_us;
        let acceleration = self.vertical_specific_force(&sample.data.imu.acc)
            - STANDARD_GRAVITY
            - ground.accelerometer_bias();
        let baro_agl = ground.altitude_agl(sample.data.baro.altitude());

        let Some(seed) = self.seed else {
            self.seed = Some(BaroSeed {
                timestamp_us,
                altitude_agl: baro_agl,
            });
            self.fresh_updates = 1;
            self.estimate = VerticalEstimate {
                timestamp_us,
                altitude_agl: baro_agl,
                velocity: 0.0,
                acceleration,
                confidence: self.confidence(),
                stale: false,
            };
            return self.estimate;
        };

        if timestamp_us <= seed.timestamp_us {
            log_debug!(
                "out of order sample at {}us, last {}us",
                timestamp_us,
                seed.timestamp_us
            );
            self.fresh_updates = 0;
            return VerticalEstimate {
                confidence: 0.0,
                stale: true,
                ..self.estimate
            };
        }

        let gap_us = timestamp_us - seed.timestamp_us;
        self.seed = Some(BaroSeed {
            timestamp_us,
            altitude_agl: baro_agl,
        });

        if gap_us > self.stale_threshold_us {
            log_warn!("sensor gap of {}us, holding estimate", gap_us);
            self.fresh_updates = 0;
            self.estimate = VerticalEstimate {
                timestamp_us,
                confidence: 0.0,
                stale: true,
                ..self.estimate
            };
            return self.estimate;
        }

        let dt = gap_us as f32 / 1_000_000.0;
        let baro_rate = (baro_agl - seed.altitude_agl) / dt;
        let alpha = self.alpha;
        let previous = self.estimate;

        let velocity =
            alpha * (previous.velocity + acceleration * dt) + (1.0 - alpha) * baro_rate;
        let altitude_agl =
            alpha * (previous.altitude_agl + velocity * dt) + (1.0 - alpha) * baro_agl;

        self.fresh_updates = self.fresh_updates.saturating_add(1);
        self.estimate = VerticalEstimate {
            timestamp_us,
            altitude_agl,
            velocity,
            acceleration,
            confidence: self.confidence(),
            stale: false,
        };
        self.estimate
    }

    pub fn estimate(&self) -> &VerticalEstimate {
        &self.estimate
    }

    pub fn axis(&self) -> Option<VerticalAxis> {
        self.axis
    }

    fn confidence(&self) -> f32 {
        (self.fresh_updates as f32 / self.convergence_samples as f32).min(1.0)
    }
}
