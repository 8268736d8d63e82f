//! Flight phase state machine.
//!
//! The transition table is a pure function of the variant, the current phase and a cue, so
//! both variants share one machine. Phases only ever move forward.

use avionics_common::{FlightPhase, PhaseTransition, SensorSample};

use crate::detector::DetectorEvent;
use crate::estimator::VerticalEstimate;
use crate::profile::{FlightProfile, SampleRatePolicy};

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MachineVariant {
    /// Watches for apogee straight from powered ascent.
    Standard,
    /// Separates motor burnout into a Coast phase and watches for apogee from there.
    Burnout,
}

impl MachineVariant {
    pub fn apogee_watch_phase(self) -> FlightPhase {
        match self {
            MachineVariant::Standard => FlightPhase::PoweredAscent,
            MachineVariant::Burnout => FlightPhase::Coast,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Arm,
    Disarm,
}

/// Anything that can move the machine to its next phase.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Arm,
    Disarm,
    Launch,
    Burnout,
    Apogee,
    /// The cycle after apogee.
    ApogeePassed,
    Landing,
}

impl From<Command> for Cue {
    fn from(command: Command) -> Self {
        match command {
            Command::Arm => Cue::Arm,
            Command::Disarm => Cue::Disarm,
        }
    }
}

impl From<DetectorEvent> for Cue {
    fn from(event: DetectorEvent) -> Self {
        match event {
            DetectorEvent::Launch => Cue::Launch,
            DetectorEvent::Apogee => Cue::Apogee,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRejected {
    pub phase: FlightPhase,
    pub cue: Cue,
}

pub fn next_phase(variant: MachineVariant, phase: FlightPhase, cue: Cue) -> Option<FlightPhase> {
    use FlightPhase::*;

    match (variant, phase, cue) {
        (_, Idle, Cue::Arm) => Some(Armed),
        (_, Armed, Cue::Launch) => Some(PoweredAscent),
        (MachineVariant::Burnout, PoweredAscent, Cue::Burnout) => Some(Coast),
        (MachineVariant::Standard, PoweredAscent, Cue::Apogee) => Some(Apogee),
        (MachineVariant::Burnout, Coast, Cue::Apogee) => Some(Apogee),
        (_, Apogee, Cue::ApogeePassed) => Some(Descent),
        (_, Descent, Cue::Landing) => Some(Landed),
        _ => None,
    }
}

pub struct FlightPhaseMachine {
    variant: MachineVariant,
    phase: FlightPhase,
    rates: SampleRatePolicy,

    burnout_acc_threshold: f32,
    burnout_required: u32,
    burnout_count: u32,

    landing_velocity: f32,
    landing_altitude_agl: f32,
    landing_hold_us: u64,
    max_descent_us: u64,
    landing_since_us: Option<u64>,
    apogee_at_us: Option<u64>,

    rejected_transitions: u32,
    last_transition: Option<PhaseTransition>,
}

impl FlightPhaseMachine {
    pub fn new(variant: MachineVariant, profile: &FlightProfile) -> Self {
        Self {
            variant,
            phase: FlightPhase::Idle,
            rates: profile.sample_rates,
            burnout_acc_threshold: profile.burnout_acc_threshold,
            burnout_required: profile.burnout_consecutive_samples.max(1),
            burnout_count: 0,
            landing_velocity: profile.landing_velocity,
            landing_altitude_agl: profile.landing_altitude_agl,
            landing_hold_us: profile.landing_hold_us,
            max_descent_us: profile.max_descent_us,
            landing_since_us: None,
            apogee_at_us: None,
            rejected_transitions: 0,
            last_transition: None,
        }
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    pub fn variant(&self) -> MachineVariant {
        self.variant
    }

    pub fn rejected_transitions(&self) -> u32 {
        self.rejected_transitions
    }

    pub fn last_transition(&self) -> Option<PhaseTransition> {
        self.last_transition
    }

    /// Storage sample rate for the current phase.
    pub fn target_rate_hz(&self) -> u16 {
        self.rates.rate_for(self.phase)
    }

    /// Advances on detector events and the phase heuristics, at most one transition per
    /// call. Events that do not fit the current phase are dropped and counted.
    pub fn on_sample(
        &mut self,
        sample: &SensorSample,
        estimate: &VerticalEstimate,
        events: &[DetectorEvent],
    ) -> Option<PhaseTransition> {
        let now_us = sample.timestamp_us;
        let mut next = None;

        for event in events {
            let cue = Cue::from(*event);
            match next_phase(self.variant, self.phase, cue) {
                Some(to) if next.is_none() => next = Some(to),
                _ => self.reject(cue),
            }
        }

        if next.is_none() {
            next = self
                .heuristic_cue(now_us, estimate)
                .and_then(|cue| next_phase(self.variant, self.phase, cue));
        }

        next.map(|to| self.transition(to, now_us))
    }

    /// Operator command. Disarm while Idle is accepted and does nothing, any other command
    /// that does not fit the current phase is rejected.
    pub fn command(
        &mut self,
        command: Command,
        timestamp_us: u64,
    ) -> Result<Option<PhaseTransition>, TransitionRejected> {
        if command == Command::Disarm && self.phase == FlightPhase::Idle {
            return Ok(None);
        }

        let cue = Cue::from(command);
        match next_phase(self.variant, self.phase, cue) {
            Some(to) => Ok(Some(self.transition(to, timestamp_us))),
            None => {
                self.reject(cue);
                Err(TransitionRejected {
                    phase: self.phase,
                    cue,
                })
            }
        }
    }

    fn heuristic_cue(&mut self, now_us: u64, estimate: &VerticalEstimate) -> Option<Cue> {
        match self.phase {
            FlightPhase::PoweredAscent if self.variant == MachineVariant::Burnout => {
                if estimate.stale {
                    return None;
                }
                if estimate.acceleration <= self.burnout_acc_threshold && estimate.velocity > 0.0 {
                    self.burnout_count += 1;
                } else {
                    self.burnout_count = 0;
                }
                (self.burnout_count >= self.burnout_required).then_some(Cue::Burnout)
            }
            FlightPhase::Apogee => Some(Cue::ApogeePassed),
            FlightPhase::Descent => {
                let since_apogee = now_us.saturating_sub(self.apogee_at_us.unwrap_or(now_us));
                if since_apogee >= self.max_descent_us {
                    log_warn!("descent timeout after {}us, assuming landed", since_apogee);
                    return Some(Cue::Landing);
                }
                if estimate.stale {
                    return None;
                }

                let still = libm::fabsf(estimate.velocity) < self.landing_velocity
                    && estimate.altitude_agl < self.landing_altitude_agl;
                if !still {
                    self.landing_since_us = None;
                    return None;
                }
                let since = *self.landing_since_us.get_or_insert(now_us);
                (now_us - since >= self.landing_hold_us).then_some(Cue::Landing)
            }
            _ => None,
        }
    }

    fn transition(&mut self, to: FlightPhase, timestamp_us: u64) -> PhaseTransition {
        let transition = PhaseTransition {
            from: self.phase,
            to,
            timestamp_us,
        };
        log_info!("phase {:?} -> {:?} at {}us", self.phase, to, timestamp_us);

        self.phase = to;
        self.burnout_count = 0;
        self.landing_since_us = None;
        if to == FlightPhase::Apogee {
            self.apogee_at_us = Some(timestamp_us);
        }
        self.last_transition = Some(transition);
        transition
    }

    fn reject(&mut self, cue: Cue) {
        self.rejected_transitions = self.rejected_transitions.saturating_add(1);
        log_debug!("{:?} rejected in {:?}", cue, self.phase);
    }
}
