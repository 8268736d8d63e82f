//! Flight record storage on a page addressed block device.
//!
//! Layout: page 0 holds the [`MetadataBlock`], pages 1.. hold records in append order.
//! Every record page starts with a format selector byte and carries its own CRC, so the
//! record stream can be re-derived by a linear scan without trusting the metadata.

use crc::Crc;
use serde::{Deserialize, Serialize};

use crate::flight_phase::FlightPhase;

mod backend;
mod metadata;
mod page;
mod reader;
mod recovery;
mod writer;

pub use backend::{BackendError, RamBackend, StorageBackend};
#[cfg(feature = "std")]
pub use backend::FileBackend;
pub use metadata::MetadataBlock;
pub use page::{
    DecodedPage, HEADER_SIZE, MAX_SAMPLES_PER_PAGE, PageBody, PageError, PageFormat,
    StoredSample, decode_page, encode_samples_page, encode_transition_page, erased_page,
};
pub use reader::RecordReader;
pub use recovery::{MetadataInconsistency, RecoveryOutcome, RecoveryReport, ScanResult, recover, scan_records};
pub use writer::{StorageStatus, StorageWriter, WriterState};

pub const PAGE_SIZE: usize = 256;
pub type PageBuf = [u8; PAGE_SIZE];

pub const METADATA_PAGE: u32 = 0;
pub const FIRST_RECORD_PAGE: u32 = 1;

/// Value of an erased byte on NOR flash and of a never written page.
pub const ERASED_BYTE: u8 = 0xFF;

pub(crate) const STORAGE_CRC: Crc<u16> = Crc::<u16>::new(&crc::CRC_16_IBM_3740);

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// The device stayed busy for every attempt.
    DeviceNotReady,
    /// Read back did not match what was written, for every attempt.
    WriteVerifyFailed,
    /// No free record page is left. Recording has stopped.
    CapacityExhausted,
    /// The flight record is protected after landing.
    WriteProtected,
    /// Recording stopped after persistent device failures.
    FailedClosed,
    Backend(BackendError),
    Encoding,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Attempts per page before a write is considered failed.
    pub max_write_attempts: u8,
    /// Hard deadline for all attempts of one page write.
    pub write_deadline_us: u64,
    /// Share of the time needed to fill a page that one page commit may take before the
    /// format is degraded.
    pub latency_budget_fraction: f32,
    /// Below this many free record pages the most compact format is forced.
    pub low_water_pages: u32,
    pub ground_format: PageFormat,
    pub ascent_format: PageFormat,
    pub descent_format: PageFormat,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: 3,
            write_deadline_us: 20_000,
            latency_budget_fraction: 0.5,
            low_water_pages: 64,
            ground_format: PageFormat::Full,
            ascent_format: PageFormat::NoMag,
            descent_format: PageFormat::Packed,
        }
    }
}

impl StorageConfig {
    pub fn format_for(&self, phase: FlightPhase) -> PageFormat {
        match phase {
            FlightPhase::Idle | FlightPhase::Armed => self.ground_format,
            FlightPhase::PoweredAscent | FlightPhase::Coast | FlightPhase::Apogee => {
                self.ascent_format
            }
            FlightPhase::Descent | FlightPhase::Landed => self.descent_format,
        }
    }
}

#[cfg(test)]
mod tests;
