use avionics_common::{FlightPhase, STANDARD_GRAVITY};
use serde::{Deserialize, Serialize};

/// Storage sample rate per phase, 0 halts recording.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleRatePolicy {
    pub idle_hz: u16,
    pub armed_hz: u16,
    /// PoweredAscent through Descent.
    pub flight_hz: u16,
    pub landed_hz: u16,
}

impl SampleRatePolicy {
    pub fn rate_for(&self, phase: FlightPhase) -> u16 {
        match phase {
            FlightPhase::Idle => self.idle_hz,
            FlightPhase::Armed => self.armed_hz,
            FlightPhase::PoweredAscent
            | FlightPhase::Coast
            | FlightPhase::Apogee
            | FlightPhase::Descent => self.flight_hz,
            FlightPhase::Landed => self.landed_hz,
        }
    }
}

impl Default for SampleRatePolicy {
    fn default() -> Self {
        Self {
            idle_hz: 10,
            armed_hz: 50,
            flight_hz: 500,
            landed_hz: 1,
        }
    }
}

/// Tuned constants for the estimators, detectors and the phase machine.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightProfile {
    /// Pad samples averaged before the ground level switches to slow tracking.
    pub ground_init_samples: u32,
    pub ground_alpha: f32,
    /// Weight of the integrated accelerometer in the complementary filter.
    pub complementary_alpha: f32,
    pub stale_threshold_us: u64,
    pub convergence_samples: u32,

    /// Inertial vertical acceleration, gravity removed (m/s²).
    pub launch_acc_threshold: f32,
    pub launch_consecutive_samples: u32,
    pub burnout_acc_threshold: f32,
    pub burnout_consecutive_samples: u32,

    pub apogee_min_climb_velocity: f32,
    pub apogee_confirmation_window_s: f32,
    pub apogee_fallback_drop_m: f32,
    /// RMS of the velocity fit residual (m/s).
    pub predictor_residual_tolerance: f32,
    pub predictor_min_deceleration: f32,

    pub landing_velocity: f32,
    pub landing_altitude_agl: f32,
    pub landing_hold_us: u64,
    pub max_descent_us: u64,

    pub sample_rates: SampleRatePolicy,
}

impl Default for FlightProfile {
    fn default() -> Self {
        Self {
            ground_init_samples: 100,
            ground_alpha: 0.001,
            complementary_alpha: 0.95,
            stale_threshold_us: 250_000,
            convergence_samples: 50,

            launch_acc_threshold: 2.0 * STANDARD_GRAVITY,
            launch_consecutive_samples: 5,
            burnout_acc_threshold: 1.0,
            burnout_consecutive_samples: 5,

            apogee_min_climb_velocity: 1.0,
            apogee_confirmation_window_s: 1.0,
            apogee_fallback_drop_m: 10.0,
            predictor_residual_tolerance: 2.0,
            predictor_min_deceleration: 0.5,

            landing_velocity: 2.0,
            landing_altitude_agl: 15.0,
            landing_hold_us: 5_000_000,
            max_descent_us: 300_000_000,

            sample_rates: SampleRatePolicy::default(),
        }
    }
}

/// Names the first profile field holding an unusable value.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidProfile(pub &'static str);

impl FlightProfile {
    pub fn validate(&self) -> Result<(), InvalidProfile> {
        let unit = |x: f32| (0.0..=1.0).contains(&x);

        if self.ground_init_samples == 0 {
            return Err(InvalidProfile("ground_init_samples"));
        }
        if !unit(self.ground_alpha) {
            return Err(InvalidProfile("ground_alpha"));
        }
        if !unit(self.complementary_alpha) {
            return Err(InvalidProfile("complementary_alpha"));
        }
        if self.stale_threshold_us == 0 {
            return Err(InvalidProfile("stale_threshold_us"));
        }
        if self.launch_consecutive_samples == 0 {
            return Err(InvalidProfile("launch_consecutive_samples"));
        }
        if self.burnout_consecutive_samples == 0 {
            return Err(InvalidProfile("burnout_consecutive_samples"));
        }
        if !(self.launch_acc_threshold > self.burnout_acc_threshold) {
            return Err(InvalidProfile("launch_acc_threshold"));
        }
        if !(self.predictor_residual_tolerance > 0.0) {
            return Err(InvalidProfile("predictor_residual_tolerance"));
        }
        if !(self.predictor_min_deceleration > 0.0) {
            return Err(InvalidProfile("predictor_min_deceleration"));
        }
        if !(self.landing_velocity > 0.0) {
            return Err(InvalidProfile("landing_velocity"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_is_valid() {
        assert_eq!(FlightProfile::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_out_of_range_gain() {
        let profile = FlightProfile {
            complementary_alpha: 1.5,
            ..FlightProfile::default()
        };
        assert_eq!(profile.validate(), Err(InvalidProfile("complementary_alpha")));
    }

    #[test]
    fn flight_phases_share_one_rate() {
        let rates = SampleRatePolicy::default();
        assert_eq!(rates.rate_for(FlightPhase::Idle), 10);
        assert_eq!(rates.rate_for(FlightPhase::Armed), 50);
        for phase in FlightPhase::ALL.iter().filter(|p| p.is_in_flight()) {
            assert_eq!(rates.rate_for(*phase), 500);
        }
        assert_eq!(rates.rate_for(FlightPhase::Landed), 1);
    }
}
