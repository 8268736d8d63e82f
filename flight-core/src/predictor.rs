//! Apogee prediction from a least squares fit of the recent velocity history.

use avionics_common::RingBuffer;
use nalgebra::{SMatrix, SVector};

use crate::estimator::VerticalEstimate;
use crate::profile::FlightProfile;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Negative once the apex has passed.
    pub time_to_apogee_s: f32,
    pub predicted_altitude_agl: f32,
    pub deceleration: f32,
}

/// Why the predictor abstained.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotConfident {
    InsufficientSamples,
    /// All samples in the window share one timestamp.
    Degenerate,
    ResidualTooLarge,
    NoDeceleration,
}

#[derive(Debug, Clone, Copy)]
struct VelocitySample {
    timestamp_us: u64,
    velocity: f32,
    altitude_agl: f32,
}

/// Fits `v(t) = v0 - a·t` over the last `K` fresh estimates.
#[derive(Debug, Clone)]
pub struct ApogeePredictor<const K: usize> {
    history: RingBuffer<VelocitySample, K>,
    residual_tolerance: f32,
    min_deceleration: f32,
}

impl<const K: usize> ApogeePredictor<K> {
    pub fn new(profile: &FlightProfile) -> Self {
        Self::with_limits(
            profile.predictor_residual_tolerance,
            profile.predictor_min_deceleration,
        )
    }

    pub fn with_limits(residual_tolerance: f32, min_deceleration: f32) -> Self {
        Self {
            history: RingBuffer::new(),
            residual_tolerance,
            min_deceleration,
        }
    }

    /// Adds an estimate to the window. Stale estimates are skipped.
    pub fn push(&mut self, estimate: &VerticalEstimate) {
        if estimate.stale {
            return;
        }
        self.history.push(VelocitySample {
            timestamp_us: estimate.timestamp_us,
            velocity: estimate.velocity,
            altitude_agl: estimate.altitude_agl,
        });
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn predict(&self) -> Result<Prediction, NotConfident> {
        let newest = match self.history.back() {
            Some(newest) if K >= 2 && self.history.is_full() => *newest,
            _ => return Err(NotConfident::InsufficientSamples),
        };

        // time relative to the newest sample keeps the fit well conditioned in f32
        let mut design = SMatrix::<f32, K, 2>::zeros();
        let mut velocities = SVector::<f32, K>::zeros();
        for (i, sample) in self.history.iter().enumerate() {
            let age_us = newest.timestamp_us - sample.timestamp_us;
            design[(i, 0)] = 1.0;
            design[(i, 1)] = -(age_us as f32 / 1_000_000.0);
            velocities[i] = sample.velocity;
        }

        let normal = design.transpose() * design;
        let coefficients = normal
            .try_inverse()
            .ok_or(NotConfident::Degenerate)?
            * (design.transpose() * velocities);
        let velocity_now = coefficients[0];
        let deceleration = -coefficients[1];

        let residual = velocities - design * coefficients;
        let mean_square = residual.norm_squared() / K as f32;
        if mean_square > self.residual_tolerance * self.residual_tolerance {
            return Err(NotConfident::ResidualTooLarge);
        }
        if deceleration < self.min_deceleration {
            return Err(NotConfident::NoDeceleration);
        }

        let time_to_apogee_s = velocity_now / deceleration;
        let predicted_altitude_agl = newest.altitude_agl + velocity_now * time_to_apogee_s
            - 0.5 * deceleration * time_to_apogee_s * time_to_apogee_s;

        Ok(Prediction {
            time_to_apogee_s,
            predicted_altitude_agl,
            deceleration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{estimate_at, init_logger};
    use approx::assert_relative_eq;

    fn predictor() -> ApogeePredictor<8> {
        ApogeePredictor::with_limits(2.0, 0.5)
    }

    #[test]
    fn abstains_until_window_is_full() {
        init_logger();
        let mut predictor = predictor();
        for i in 0..7u64 {
            predictor.push(&estimate_at(i * 100_000, 100.0, 50.0 - i as f32, -10.0));
            assert_eq!(predictor.predict(), Err(NotConfident::InsufficientSamples));
        }
        predictor.push(&estimate_at(700_000, 100.0, 43.0, -10.0));
        assert!(predictor.predict().is_ok());
    }

    #[test]
    fn ballistic_coast_predicts_apex() {
        init_logger();
        let mut predictor = predictor();
        // v = 50 - 9.8 t, h = 500 + 50 t - 4.9 t²
        for i in 0..8u64 {
            let t = i as f32 * 0.1;
            let v = 50.0 - 9.8 * t;
            let h = 500.0 + 50.0 * t - 4.9 * t * t;
            predictor.push(&estimate_at(i * 100_000, h, v, -9.8));
        }
        let prediction = predictor.predict().unwrap();
        let t_newest = 0.7f32;
        let v_newest = 50.0 - 9.8 * t_newest;
        assert_relative_eq!(prediction.deceleration, 9.8, epsilon = 1e-3);
        assert_relative_eq!(prediction.time_to_apogee_s, v_newest / 9.8, epsilon = 1e-3);
        // apex of the true trajectory
        assert_relative_eq!(
            prediction.predicted_altitude_agl,
            500.0 + 50.0 * 50.0 / (2.0 * 9.8),
            epsilon = 0.2
        );
    }

    #[test]
    fn negative_time_after_apex() {
        let mut predictor = predictor();
        for i in 0..8u64 {
            predictor.push(&estimate_at(i * 100_000, 900.0, 2.0 - 9.8 * (i as f32 * 0.1), -9.8));
        }
        assert!(predictor.predict().unwrap().time_to_apogee_s < 0.0);
    }

    #[test]
    fn alternating_noise_is_not_confident() {
        init_logger();
        let mut predictor = predictor();
        for i in 0..16u64 {
            let noise = if i % 2 == 0 { 10.0 } else { -10.0 };
            predictor.push(&estimate_at(i * 10_000, 300.0, 30.0 - 0.1 * i as f32 + noise, -9.8));
        }
        assert_eq!(predictor.predict(), Err(NotConfident::ResidualTooLarge));
    }

    #[test]
    fn accelerating_vehicle_has_no_apogee() {
        let mut predictor = predictor();
        for i in 0..8u64 {
            predictor.push(&estimate_at(i * 10_000, 10.0, 5.0 + 0.3 * i as f32, 30.0));
        }
        assert_eq!(predictor.predict(), Err(NotConfident::NoDeceleration));
    }

    #[test]
    fn identical_timestamps_are_degenerate() {
        let mut predictor = predictor();
        for _ in 0..8 {
            predictor.push(&estimate_at(1_000_000, 10.0, 5.0, -9.8));
        }
        assert_eq!(predictor.predict(), Err(NotConfident::Degenerate));
    }

    #[test]
    fn stale_estimates_are_skipped() {
        let mut predictor = predictor();
        let mut stale = estimate_at(0, 10.0, 5.0, -9.8);
        stale.stale = true;
        predictor.push(&stale);
        assert!(predictor.is_empty());
    }
}
