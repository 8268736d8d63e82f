use serde::{Deserialize, Serialize};

/// Flight phases in the order a flight moves through them.
///
/// The derived ordering is the flight order, so `a < b` means `a` happens before `b`.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FlightPhase {
    Idle = 0,
    Armed = 1,
    PoweredAscent = 2,
    Coast = 3,
    Apogee = 4,
    Descent = 5,
    Landed = 6,
}

impl FlightPhase {
    pub const ALL: [FlightPhase; 7] = [
        FlightPhase::Idle,
        FlightPhase::Armed,
        FlightPhase::PoweredAscent,
        FlightPhase::Coast,
        FlightPhase::Apogee,
        FlightPhase::Descent,
        FlightPhase::Landed,
    ];

    pub fn is_on_pad(self) -> bool {
        matches!(self, FlightPhase::Idle | FlightPhase::Armed)
    }

    pub fn is_in_flight(self) -> bool {
        self > FlightPhase::Armed && self < FlightPhase::Landed
    }
}

impl From<FlightPhase> for u8 {
    fn from(phase: FlightPhase) -> u8 {
        phase as u8
    }
}

impl TryFrom<u8> for FlightPhase {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        FlightPhase::ALL
            .iter()
            .copied()
            .find(|phase| *phase as u8 == value)
            .ok_or(value)
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: FlightPhase,
    pub to: FlightPhase,
    pub timestamp_us: u64,
}

/// What gets persisted for every phase transition, so a flight can be reconstructed from
/// storage alone.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub transition: PhaseTransition,
    pub altitude_agl: f32,
    pub velocity: f32,
    pub ground_altitude_asl: f32,
    pub ground_pressure: f32,
    /// Vertical accelerometer offset measured on the pad, m/s².
    pub accelerometer_bias: f32,
}
