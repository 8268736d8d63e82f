use super::DetectorState;
use crate::estimator::VerticalEstimate;
use crate::predictor::{NotConfident, Prediction};
use crate::profile::FlightProfile;

/// Confirms apogee from the velocity zero crossing and the predictor.
///
/// A drop of `apogee_fallback_drop_m` below the highest altitude seen after the crossing
/// also counts, so a predictor that never becomes confident cannot block descent.
#[derive(Debug, Clone)]
pub struct ApogeeDetector {
    min_climb_velocity: f32,
    confirmation_window_s: f32,
    fallback_drop_m: f32,
    state: DetectorState,
    has_climbed: bool,
    max_altitude_agl: f32,
    apogee: Option<(u64, f32)>,
}

impl ApogeeDetector {
    pub fn new(profile: &FlightProfile) -> Self {
        Self {
            min_climb_velocity: profile.apogee_min_climb_velocity,
            confirmation_window_s: profile.apogee_confirmation_window_s,
            fallback_drop_m: profile.apogee_fallback_drop_m,
            state: DetectorState::Idle,
            has_climbed: false,
            max_altitude_agl: f32::MIN,
            apogee: None,
        }
    }

    pub fn arm(&mut self) {
        if self.state == DetectorState::Idle {
            log_debug!("apogee detector armed");
            self.state = DetectorState::Armed;
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn max_altitude_agl(&self) -> Option<f32> {
        (self.max_altitude_agl > f32::MIN).then_some(self.max_altitude_agl)
    }

    /// Timestamp and altitude of the detected apogee.
    pub fn apogee(&self) -> Option<(u64, f32)> {
        self.apogee
    }

    /// Returns true on the update that detects apogee.
    pub fn update(
        &mut self,
        estimate: &VerticalEstimate,
        prediction: &Result<Prediction, NotConfident>,
    ) -> bool {
        if self.state != DetectorState::Armed || estimate.stale {
            return false;
        }

        self.max_altitude_agl = self.max_altitude_agl.max(estimate.altitude_agl);
        if estimate.velocity > self.min_climb_velocity {
            self.has_climbed = true;
        }
        if !self.has_climbed || estimate.velocity > 0.0 {
            return false;
        }

        let confirmed = matches!(
            prediction,
            Ok(p) if p.time_to_apogee_s <= self.confirmation_window_s
        );
        let dropped = self.max_altitude_agl - estimate.altitude_agl >= self.fallback_drop_m;
        if !confirmed && !dropped {
            return false;
        }

        self.state = DetectorState::Detected;
        self.apogee = Some((estimate.timestamp_us, self.max_altitude_agl));
        log_info!(
            "apogee detected at {}us, max {}m AGL ({})",
            estimate.timestamp_us,
            self.max_altitude_agl,
            if confirmed { "predictor" } else { "altitude drop" }
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{estimate_at, init_logger};

    const CONFIDENT: Result<Prediction, NotConfident> = Ok(Prediction {
        time_to_apogee_s: -0.1,
        predicted_altitude_agl: 1000.0,
        deceleration: 9.8,
    });
    const NO_PREDICTION: Result<Prediction, NotConfident> = Err(NotConfident::ResidualTooLarge);

    #[test]
    fn waits_for_zero_crossing_after_climb() {
        init_logger();
        let mut detector = ApogeeDetector::new(&FlightProfile::default());
        // not armed yet
        assert!(!detector.update(&estimate_at(0, 900.0, -1.0, -9.8), &CONFIDENT));

        detector.arm();
        // descending without ever climbing, e.g. armed late on a bad estimate
        assert!(!detector.update(&estimate_at(10_000, 900.0, -1.0, -9.8), &CONFIDENT));
        assert!(!detector.update(&estimate_at(20_000, 990.0, 30.0, -9.8), &CONFIDENT));
        assert!(!detector.update(&estimate_at(30_000, 1000.0, 0.5, -9.8), &CONFIDENT));
        assert!(detector.update(&estimate_at(40_000, 1000.0, -0.2, -9.8), &CONFIDENT));
        assert_eq!(detector.state(), DetectorState::Detected);
        assert_eq!(detector.apogee(), Some((40_000, 1000.0)));

        // fires once
        assert!(!detector.update(&estimate_at(50_000, 999.0, -1.0, -9.8), &CONFIDENT));
    }

    #[test]
    fn altitude_drop_fallback() {
        init_logger();
        let mut detector = ApogeeDetector::new(&FlightProfile::default());
        detector.arm();
        assert!(!detector.update(&estimate_at(0, 500.0, 20.0, -9.8), &NO_PREDICTION));
        assert!(!detector.update(&estimate_at(10_000, 510.0, 0.0, -9.8), &NO_PREDICTION));
        assert!(!detector.update(&estimate_at(20_000, 505.0, -8.0, -9.8), &NO_PREDICTION));
        assert!(detector.update(&estimate_at(30_000, 499.5, -12.0, -9.8), &NO_PREDICTION));
        assert_eq!(detector.max_altitude_agl(), Some(510.0));
    }

    #[test]
    fn distant_prediction_is_not_enough() {
        let mut detector = ApogeeDetector::new(&FlightProfile::default());
        detector.arm();
        let far = Ok(Prediction {
            time_to_apogee_s: 3.0,
            predicted_altitude_agl: 1000.0,
            deceleration: 9.8,
        });
        detector.update(&estimate_at(0, 800.0, 40.0, -9.8), &far);
        assert!(!detector.update(&estimate_at(10_000, 801.0, 0.0, -9.8), &far));
    }
}
