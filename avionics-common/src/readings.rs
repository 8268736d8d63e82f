use icao_isa::calculate_isa_altitude;
use icao_units::si::Pascals;
use serde::{Deserialize, Serialize};

/// m/s^2
pub const STANDARD_GRAVITY: f32 = 9.80665;

const SEA_LEVEL_PRESSURE_PA: f32 = 101_325.0;
const ISA_LAPSE_RATE_K_PER_M: f32 = 0.0065;
const ISA_SEA_LEVEL_TEMPERATURE_K: f32 = 288.15;
const ISA_PRESSURE_EXPONENT: f32 = 5.255_88;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct BaroData {
    /// C
    pub temperature: f32,
    /// Pa
    pub pressure: f32,
}

impl BaroData {
    /// ISA altitude above mean sea level in meters.
    pub fn altitude(&self) -> f32 {
        calculate_isa_altitude(Pascals(self.pressure as f64)).0 as f32
    }

    /// Inverse of [`BaroData::altitude`] inside the troposphere.
    pub fn from_altitude(altitude_asl: f32, temperature: f32) -> Self {
        let ratio = 1.0 - ISA_LAPSE_RATE_K_PER_M * altitude_asl / ISA_SEA_LEVEL_TEMPERATURE_K;
        Self {
            temperature,
            pressure: SEA_LEVEL_PRESSURE_PA * libm::powf(ratio, ISA_PRESSURE_EXPONENT),
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct IMUData {
    /// m/s^2, specific force in the sensor frame
    pub acc: [f32; 3],
    /// deg/s
    pub gyro: [f32; 3],
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct MagData {
    /// gauss
    pub mag: [f32; 3],
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct BatteryData {
    /// V
    pub voltage: f32,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleData {
    pub imu: IMUData,
    pub mag: MagData,
    pub baro: BaroData,
    pub battery: BatteryData,
}
