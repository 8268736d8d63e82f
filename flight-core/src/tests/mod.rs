#[cfg(feature = "log")]
use log::LevelFilter;

use avionics_common::{
    BaroData, BatteryData, IMUData, MagData, STANDARD_GRAVITY, SampleData, SensorSample,
};

use crate::estimator::VerticalEstimate;


pub const GROUND_ASL: f32 = 200.0;

pub fn init_logger() {
    #[cfg(feature = "log")]
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .filter(Some("flight_core"), LevelFilter::Trace)
        .filter(Some("avionics_common"), LevelFilter::Info)
        .is_test(true)
        .try_init();
}

pub fn estimate_at(
    timestamp_us: u64,
    altitude_agl: f32,
    velocity: f32,
    acceleration: f32,
) -> VerticalEstimate {
    VerticalEstimate {
        timestamp_us,
        altitude_agl,
        velocity,
        acceleration,
        confidence: 1.0,
        stale: false,
    }
}

/// Sample of a vehicle standing upright at `altitude_agl` above [`GROUND_ASL`].
pub fn sample_with(timestamp_us: u64, altitude_agl: f32, vertical_specific_force: f32) -> SensorSample {
    SensorSample::new(
        timestamp_us,
        SampleData {
            imu: IMUData {
                acc: [0.1, -0.2, vertical_specific_force],
                gyro: [0.0, 0.0, 0.0],
            },
            mag: MagData {
                mag: [0.2, 0.0, -0.45],
            },
            baro: BaroData::from_altitude(GROUND_ASL + altitude_agl, 15.0),
            battery: BatteryData { voltage: 8.1 },
        },
    )
}

/// Drag free flight: 2 s of 30 m/s² thrust from T = 10 s, ballistic coast, free fall down to
/// 10 m/s and a steady descent under canopy.
pub struct SyntheticFlight;

impl SyntheticFlight {
    pub const LAUNCH_S: f32 = 10.0;
    pub const BURN_S: f32 = 2.0;
    pub const THRUST: f32 = 30.0;
    pub const DESCENT_RATE: f32 = 10.0;

    pub fn burnout_velocity() -> f32 {
        Self::THRUST * Self::BURN_S
    }

    pub fn burnout_altitude() -> f32 {
        0.5 * Self::THRUST * Self::BURN_S * Self::BURN_S
    }

    pub fn apogee_time_s() -> f32 {
        Self::LAUNCH_S + Self::BURN_S + Self::burnout_velocity() / STANDARD_GRAVITY
    }

    pub fn apogee_altitude() -> f32 {
        let v = Self::burnout_velocity();
        Self::burnout_altitude() + v * v / (2.0 * STANDARD_GRAVITY)
    }

    /// True altitude AGL and vertical specific force at `t` seconds.
    pub fn truth(t: f32) -> (f32, f32) {
        let g = STANDARD_GRAVITY;
        if t < Self::LAUNCH_S {
            return (0.0, g);
        }

        let t_burn = t - Self::LAUNCH_S;
        if t_burn < Self::BURN_S {
            return (0.5 * Self::THRUST * t_burn * t_burn, Self::THRUST + g);
        }

        let v0 = Self::burnout_velocity();
        let h0 = Self::burnout_altitude();
        let t_coast = t_burn - Self::BURN_S;
        let t_canopy = (v0 + Self::DESCENT_RATE) / g;
        if t_coast < t_canopy {
            return (h0 + v0 * t_coast - 0.5 * g * t_coast * t_coast, 0.0);
        }

        let h_canopy = h0 + v0 * t_canopy - 0.5 * g * t_canopy * t_canopy;
        let h = h_canopy - Self::DESCENT_RATE * (t_coast - t_canopy);
        (h.max(0.0), g)
    }

    pub fn sample(timestamp_us: u64) -> SensorSample {
        let (altitude_agl, specific_force) = Self::truth(timestamp_us as f32 / 1_000_000.0);
        sample_with(timestamp_us, altitude_agl, specific_force)
    }
}
