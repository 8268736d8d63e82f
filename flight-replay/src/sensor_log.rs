use avionics_common::storage::{PageFormat, StoredSample};
use avionics_common::{
    BaroData, BatteryData, FlightPhase, IMUData, MagData, SampleData, SensorSample,
};
use flight_core::VerticalEstimate;
use serde::{Deserialize, Serialize};

/// One row of a recorded or simulated sensor log.
///
/// Only the timestamp, the accelerometer and the pressure are required, missing channels
/// read as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorLogRow {
    pub timestamp_us: u64,
    pub acc_x: f32,
    pub acc_y: f32,
    pub acc_z: f32,
    #[serde(default)]
    pub gyro_x: Option<f32>,
    #[serde(default)]
    pub gyro_y: Option<f32>,
    #[serde(default)]
    pub gyro_z: Option<f32>,
    #[serde(default)]
    pub mag_x: Option<f32>,
    #[serde(default)]
    pub mag_y: Option<f32>,
    #[serde(default)]
    pub mag_z: Option<f32>,
    pub pressure: f32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub battery_voltage: Option<f32>,
}

impl SensorLogRow {
    pub fn to_sample(&self) -> SensorSample {
        let or_zero = |x: Option<f32>| x.unwrap_or(0.0);
        SensorSample::new(
            self.timestamp_us,
            SampleData {
                imu: IMUData {
                    acc: [self.acc_x, self.acc_y, self.acc_z],
                    gyro: [or_zero(self.gyro_x), or_zero(self.gyro_y), or_zero(self.gyro_z)],
                },
                mag: MagData {
                    mag: [or_zero(self.mag_x), or_zero(self.mag_y), or_zero(self.mag_z)],
                },
                baro: BaroData {
                    temperature: or_zero(self.temperature),
                    pressure: self.pressure,
                },
                battery: BatteryData {
                    voltage: or_zero(self.battery_voltage),
                },
            },
        )
    }
}

/// Per cycle output of a replay.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRow {
    pub timestamp_us: u64,
    pub phase: FlightPhase,
    pub altitude_agl: f32,
    pub velocity: f32,
    pub acceleration: f32,
    pub confidence: f32,
    pub stale: bool,
    pub time_to_apogee_s: Option<f32>,
}

impl TraceRow {
    pub fn new(phase: FlightPhase, estimate: &VerticalEstimate, time_to_apogee_s: Option<f32>) -> Self {
        Self {
            timestamp_us: estimate.timestamp_us,
            phase,
            altitude_agl: estimate.altitude_agl,
            velocity: estimate.velocity,
            acceleration: estimate.acceleration,
            confidence: estimate.confidence,
            stale: estimate.stale,
            time_to_apogee_s,
        }
    }
}

/// A sample read back from a storage image. Channels the page format dropped are empty.
#[derive(Debug, Clone, Serialize)]
pub struct StoredSampleRow {
    pub timestamp_us: u64,
    pub phase: FlightPhase,
    pub format: PageFormat,
    pub acc_x: f32,
    pub acc_y: f32,
    pub acc_z: f32,
    pub gyro_x: Option<f32>,
    pub gyro_y: Option<f32>,
    pub gyro_z: Option<f32>,
    pub mag_x: Option<f32>,
    pub mag_y: Option<f32>,
    pub mag_z: Option<f32>,
    pub pressure: Option<f32>,
    pub altitude_asl: f32,
    pub battery_voltage: Option<f32>,
}

impl StoredSampleRow {
    pub fn new(phase: FlightPhase, format: PageFormat, sample: &StoredSample) -> Self {
        Self {
            timestamp_us: sample.timestamp_us,
            phase,
            format,
            acc_x: sample.acc[0],
            acc_y: sample.acc[1],
            acc_z: sample.acc[2],
            gyro_x: sample.gyro.map(|g| g[0]),
            gyro_y: sample.gyro.map(|g| g[1]),
            gyro_z: sample.gyro.map(|g| g[2]),
            mag_x: sample.mag.map(|m| m[0]),
            mag_y: sample.mag.map(|m| m[1]),
            mag_z: sample.mag.map(|m| m[2]),
            pressure: sample.pressure,
            altitude_asl: sample.altitude_asl,
            battery_voltage: sample.battery_voltage,
        }
    }
}
