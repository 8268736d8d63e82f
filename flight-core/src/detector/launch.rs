use super::DetectorState;
use crate::estimator::VerticalEstimate;
use crate::profile::FlightProfile;

/// Outcome of one launch detector update, reported for telemetry.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStatus {
    NotArmed,
    AlreadyLaunched,
    Stale,
    BelowThreshold,
    /// Consecutive samples above the threshold so far.
    Accumulating(u32),
    Detected,
}

#[derive(Debug, Clone)]
pub struct LaunchDetector {
    threshold: f32,
    required_samples: u32,
    state: DetectorState,
    consecutive: u32,
    launched_at_us: Option<u64>,
}

impl LaunchDetector {
    pub fn new(profile: &FlightProfile) -> Self {
        Self {
            threshold: profile.launch_acc_threshold,
            required_samples: profile.launch_consecutive_samples.max(1),
            state: DetectorState::Idle,
            consecutive: 0,
            launched_at_us: None,
        }
    }

    pub fn arm(&mut self) {
        if self.state == DetectorState::Idle {
            log_debug!("launch detector armed");
            self.state = DetectorState::Armed;
            self.consecutive = 0;
        }
    }

    /// No effect once launch was detected.
    pub fn disarm(&mut self) {
        if self.state == DetectorState::Armed {
            self.state = DetectorState::Idle;
            self.consecutive = 0;
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Timestamp of the first sample of the run that triggered detection.
    pub fn launched_at_us(&self) -> Option<u64> {
        self.launched_at_us
    }

    pub fn update(&mut self, estimate: &VerticalEstimate) -> LaunchStatus {
        match self.state {
            DetectorState::Idle => return LaunchStatus::NotArmed,
            DetectorState::Detected => return LaunchStatus::AlreadyLaunched,
            DetectorState::Armed => {}
        }
        if estimate.stale {
            return LaunchStatus::Stale;
        }
        if estimate.acceleration <= self.threshold {
            self.consecutive = 0;
            return LaunchStatus::BelowThreshold;
        }

        self.consecutive += 1;
        if self.consecutive == 1 {
            self.launched_at_us = Some(estimate.timestamp_us);
        }
        if self.consecutive < self.required_samples {
            return LaunchStatus::Accumulating(self.consecutive);
        }

        self.state = DetectorState::Detected;
        log_info!(
            "launch detected at {}us, {}m/s²",
            estimate.timestamp_us,
            estimate.acceleration
        );
        LaunchStatus::Detected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{estimate_at, init_logger};
    use avionics_common::STANDARD_GRAVITY;

    fn boost(timestamp_us: u64) -> VerticalEstimate {
        estimate_at(timestamp_us, 0.0, 0.0, 4.0 * STANDARD_GRAVITY)
    }

    #[test]
    fn ignores_samples_until_armed() {
        init_logger();
        let mut detector = LaunchDetector::new(&FlightProfile::default());
        assert_eq!(detector.update(&boost(0)), LaunchStatus::NotArmed);
        detector.arm();
        assert_eq!(detector.update(&boost(10_000)), LaunchStatus::Accumulating(1));
        detector.disarm();
        assert_eq!(detector.update(&boost(20_000)), LaunchStatus::NotArmed);
    }

    #[test]
    fn needs_consecutive_samples() {
        init_logger();
        let mut detector = LaunchDetector::new(&FlightProfile::default());
        detector.arm();

        for i in 0..4 {
            assert_eq!(detector.update(&boost(i * 10_000)), LaunchStatus::Accumulating(i as u32 + 1));
        }
        // one quiet sample restarts the count
        assert_eq!(
            detector.update(&estimate_at(40_000, 0.0, 0.0, 0.0)),
            LaunchStatus::BelowThreshold
        );

        let mut stale = boost(50_000);
        stale.stale = true;
        for i in 0..4 {
            assert_eq!(detector.update(&boost(60_000 + i * 10_000)), LaunchStatus::Accumulating(i as u32 + 1));
            // stale estimates neither count nor reset
            assert_eq!(detector.update(&stale), LaunchStatus::Stale);
        }
        assert_eq!(detector.update(&boost(100_000)), LaunchStatus::Detected);
        assert_eq!(detector.launched_at_us(), Some(60_000));
        assert_eq!(detector.update(&boost(110_000)), LaunchStatus::AlreadyLaunched);

        detector.disarm();
        assert_eq!(detector.state(), DetectorState::Detected);
    }
}
