#[cfg(feature = "log")]
use log::LevelFilter;

use crate::readings::{BaroData, BatteryData, IMUData, MagData, SampleData};
use crate::sensor_reading::SensorSample;
use crate::storage::{BackendError, PageBuf, RamBackend, StorageBackend};
use crate::time::ManualClock;

pub fn init_logger() {
    #[cfg(feature = "log")]
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .filter(Some("avionics_common"), LevelFilter::Trace)
        .is_test(true)
        .try_init();
}

pub fn sample_at(timestamp_us: u64, altitude_asl: f32) -> SensorSample {
    let t = timestamp_us as f32 / 1_000_000.0;
    SensorSample::new(
        timestamp_us,
        SampleData {
            imu: IMUData {
                acc: [0.05 * t, -0.02, 9.81 + 0.5 * t],
                gyro: [0.3, -0.1 * t, 1.25],
            },
            mag: MagData {
                mag: [0.21, 0.02, -0.44],
            },
            baro: BaroData::from_altitude(altitude_asl, 21.0),
            battery: BatteryData {
                voltage: 8.2 - 0.001 * t,
            },
        },
    )
}

/// RAM backend with injectable busy periods, corrupted writes and write latency.
pub struct FlakyBackend<'a> {
    inner: RamBackend<'a>,
    clock: Option<ManualClock<'a>>,
    pub write_delay_us: u64,
    /// Next write attempts answered with `NotReady`.
    pub busy_writes: u32,
    /// Next write attempts that store a flipped byte.
    pub corrupt_writes: u32,
    pub write_attempts: u32,
}

impl<'a> FlakyBackend<'a> {
    pub fn new(pages: &'a mut [PageBuf]) -> Self {
        Self {
            inner: RamBackend::new(pages),
            clock: None,
            write_delay_us: 0,
            busy_writes: 0,
            corrupt_writes: 0,
            write_attempts: 0,
        }
    }

    pub fn with_clock(mut self, clock: ManualClock<'a>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn inner(&mut self) -> &mut RamBackend<'a> {
        &mut self.inner
    }
}

impl StorageBackend for FlakyBackend<'_> {
    fn open(&mut self) -> Result<(), BackendError> {
        self.inner.open()
    }

    fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    fn capacity_pages(&self) -> u32 {
        self.inner.capacity_pages()
    }

    fn write_page(&mut self, index: u32, page: &PageBuf) -> Result<(), BackendError> {
        self.write_attempts += 1;
        if let Some(clock) = &self.clock {
            clock.advance(self.write_delay_us);
        }
        if self.busy_writes > 0 {
            self.busy_writes -= 1;
            return Err(BackendError::NotReady);
        }
        if self.corrupt_writes > 0 {
            self.corrupt_writes -= 1;
            let mut damaged = *page;
            damaged[100] ^= 0x80;
            return self.inner.write_page(index, &damaged);
        }
        self.inner.write_page(index, page)
    }

    fn read_page(&mut self, index: u32, page: &mut PageBuf) -> Result<(), BackendError> {
        self.inner.read_page(index, page)
    }
}
