use core::cell::Cell;

use serde::{Deserialize, Serialize};

/// Monotonic time source used to bound storage retries and measure write latency.
pub trait Clock: Clone {
    fn now_us(&self) -> u64;
}

pub trait TimestampType: Clone + Copy + Sized + Serialize + Deserialize<'static> {}

/// Microseconds since the flight computer booted.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootTimestamp;

impl TimestampType for BootTimestamp {}

/// Clock driven by hand, e.g. from sample timestamps during a replay.
#[derive(Debug, Clone, Copy)]
pub struct ManualClock<'a> {
    now_us: &'a Cell<u64>,
}

impl<'a> ManualClock<'a> {
    pub fn new(now_us: &'a Cell<u64>) -> Self {
        Self { now_us }
    }

    pub fn set(&self, now_us: u64) {
        self.now_us.set(now_us);
    }

    pub fn advance(&self, delta_us: u64) {
        self.now_us.set(self.now_us.get().saturating_add(delta_us));
    }
}

impl Clock for ManualClock<'_> {
    fn now_us(&self) -> u64 {
        self.now_us.get()
    }
}

#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}
