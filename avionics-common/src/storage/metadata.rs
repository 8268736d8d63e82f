use packed_struct::prelude::*;

use super::page::PageFormat;
use super::recovery::MetadataInconsistency;
use super::{FIRST_RECORD_PAGE, PageBuf, STORAGE_CRC, StorageError, page::erased_page};

const MAGIC: u32 = 0x464C_4F47; // "FLOG"
const LAYOUT_VERSION: u8 = 1;
const PACKED_SIZE: usize = 31;
const CRC_OFFSET: usize = PACKED_SIZE - 2;

/// Fixed location summary of the record stream, kept in page 0.
///
/// Only the storage writer updates it, and only after the record page it describes has been
/// written and verified.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(PackedStruct, Clone, Copy, Debug, PartialEq, Eq)]
#[packed_struct(bit_numbering = "msb0", endian = "msb", size_bytes = "31")]
pub struct MetadataBlock {
    magic: u32,
    layout_version: u8,
    active_selector: u8,
    pub protected: bool,
    pub degraded: bool,
    pub exhausted: bool,
    #[packed_field(element_size_bits = "5")]
    reserved: u8,
    /// Write offset, the page the next record goes to.
    pub next_page: u32,
    /// Committed record pages, samples and transitions alike.
    pub record_count: u32,
    pub sample_count: u32,
    /// Bumped on every metadata commit.
    pub generation: u32,
    #[packed_field(element_size_bits = "48")]
    pub landed_timestamp_us: u64,
    crc: u16,
}

impl MetadataBlock {
    pub fn new(format: PageFormat) -> Self {
        Self {
            magic: MAGIC,
            layout_version: LAYOUT_VERSION,
            active_selector: format.selector(),
            protected: false,
            degraded: false,
            exhausted: false,
            reserved: 0,
            next_page: FIRST_RECORD_PAGE,
            record_count: 0,
            sample_count: 0,
            generation: 0,
            landed_timestamp_us: 0,
            crc: 0,
        }
    }

    pub fn active_format(&self) -> Option<PageFormat> {
        PageFormat::from_selector(self.active_selector)
    }

    pub fn set_active_format(&mut self, format: PageFormat) {
        self.active_selector = format.selector();
    }

    /// Write offset and record count agree with each other.
    pub fn is_self_consistent(&self) -> bool {
        self.next_page == FIRST_RECORD_PAGE + self.record_count
    }

    pub fn encode(&self) -> Result<PageBuf, StorageError> {
        let mut page = erased_page();
        let mut block = *self;
        block.crc = 0;
        block
            .pack_to_slice(&mut page[..PACKED_SIZE])
            .map_err(|_| StorageError::Encoding)?;
        let crc = STORAGE_CRC.checksum(&page[..CRC_OFFSET]);
        page[CRC_OFFSET..PACKED_SIZE].copy_from_slice(&crc.to_be_bytes());
        Ok(page)
    }

    pub fn decode(page: &PageBuf) -> Result<Self, MetadataInconsistency> {
        if page.iter().all(|b| *b == super::ERASED_BYTE) {
            return Err(MetadataInconsistency::Missing);
        }
        let block = Self::unpack_from_slice(&page[..PACKED_SIZE])
            .map_err(|_| MetadataInconsistency::Unreadable)?;
        if block.magic != MAGIC {
            return Err(MetadataInconsistency::Unreadable);
        }
        if block.crc != STORAGE_CRC.checksum(&page[..CRC_OFFSET]) {
            return Err(MetadataInconsistency::BadChecksum);
        }
        if block.layout_version != LAYOUT_VERSION {
            return Err(MetadataInconsistency::UnsupportedVersion(block.layout_version));
        }
        Ok(block)
    }
}
