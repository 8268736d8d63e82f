use crate::fmt::DebugFormat;
use crate::readings::{BaroData, BatteryData, IMUData, MagData, SampleData};
use crate::sensor_reading::SensorSample;

/// Capability set every sensor driver exposes to the sampling cycle.
pub trait SensorDriver {
    type Reading: Copy;
    type Error: core::fmt::Debug;

    fn is_ready(&self) -> bool;

    fn read(&mut self) -> Result<Self::Reading, Self::Error>;
}

/// Which channels could not be refreshed during the last poll.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StaleChannels {
    pub imu: bool,
    pub mag: bool,
    pub baro: bool,
    pub battery: bool,
}

impl StaleChannels {
    pub fn any(&self) -> bool {
        self.imu || self.mag || self.baro || self.battery
    }
}

/// Polls every driver once per cycle and assembles a [`SensorSample`].
///
/// The magnetometer and battery monitor are auxiliary: when they fail the previous value is
/// reused. The IMU and barometer feed the estimators, so when either has nothing new the
/// cycle gets no sample at all and the gap shows up downstream as a stale timestamp.
pub struct SensorSuite<I, M, B, P> {
    imu: I,
    mag: M,
    baro: B,
    battery: P,
    last: SampleData,
    stale: StaleChannels,
}

impl<I, M, B, P> SensorSuite<I, M, B, P>
where
    I: SensorDriver<Reading = IMUData>,
    M: SensorDriver<Reading = MagData>,
    B: SensorDriver<Reading = BaroData>,
    P: SensorDriver<Reading = BatteryData>,
{
    pub fn new(imu: I, mag: M, baro: B, battery: P) -> Self {
        Self {
            imu,
            mag,
            baro,
            battery,
            last: SampleData::default(),
            stale: StaleChannels::default(),
        }
    }

    pub fn poll(&mut self, timestamp_us: u64) -> Option<SensorSample> {
        let imu = poll_driver(&mut self.imu, &mut self.last.imu);
        let baro = poll_driver(&mut self.baro, &mut self.last.baro);
        let mag = poll_driver(&mut self.mag, &mut self.last.mag);
        let battery = poll_driver(&mut self.battery, &mut self.last.battery);

        self.stale = StaleChannels {
            imu: !imu,
            mag: !mag,
            baro: !baro,
            battery: !battery,
        };
        if self.stale.any() {
            log_trace!("stale channels at {}: {:?}", timestamp_us, self.stale);
        }

        if imu && baro {
            Some(SensorSample::new(timestamp_us, self.last))
        } else {
            None
        }
    }

    pub fn stale_channels(&self) -> StaleChannels {
        self.stale
    }
}

fn poll_driver<D: SensorDriver>(driver: &mut D, slot: &mut D::Reading) -> bool {
    if !driver.is_ready() {
        return false;
    }
    match driver.read() {
        Ok(reading) => {
            *slot = reading;
            true
        }
        Err(e) => {
            log_debug!("sensor read failed: {:?}", DebugFormat(e));
            false
        }
    }
}
