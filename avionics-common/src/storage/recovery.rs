use super::backend::StorageBackend;
use super::metadata::MetadataBlock;
use super::page::{PageBody, PageError, PageFormat, decode_page, erased_page};
use super::{FIRST_RECORD_PAGE, METADATA_PAGE, StorageError};
use crate::flight_phase::FlightPhase;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataInconsistency {
    /// Page 0 was never written.
    Missing,
    Unreadable,
    BadChecksum,
    UnsupportedVersion(u8),
    /// The block disagrees with what the record pages say.
    Mismatch {
        claimed_records: u32,
        found_records: u32,
    },
}

/// What a linear scan of the record pages found.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    pub next_page: u32,
    pub record_count: u32,
    pub sample_count: u32,
    pub last_phase: Option<FlightPhase>,
    pub last_format: Option<PageFormat>,
    pub landed_timestamp_us: Option<u64>,
    /// First page that was neither a valid record nor erased.
    pub truncated_at: Option<u32>,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Nothing was ever recorded on this device.
    Fresh,
    Consistent,
    Repaired(MetadataInconsistency),
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub outcome: RecoveryOutcome,
    pub scan: ScanResult,
    /// Metadata describing exactly the pages the scan accepted.
    pub metadata: MetadataBlock,
}

/// Walks the record pages from page 1 until the first erased page.
///
/// A page counts only if its selector is known, its CRC matches and its sequence number is
/// its position in the stream. The stream is truncated at the first page failing that.
pub fn scan_records<B: StorageBackend>(backend: &mut B) -> Result<ScanResult, StorageError> {
    let mut result = ScanResult {
        next_page: FIRST_RECORD_PAGE,
        record_count: 0,
        sample_count: 0,
        last_phase: None,
        last_format: None,
        landed_timestamp_us: None,
        truncated_at: None,
    };
    let mut page = erased_page();

    for index in FIRST_RECORD_PAGE..backend.capacity_pages() {
        backend
            .read_page(index, &mut page)
            .map_err(StorageError::Backend)?;

        let decoded = match decode_page(&page) {
            Ok(decoded) if decoded.sequence == index - FIRST_RECORD_PAGE => decoded,
            Err(PageError::Erased) => break,
            Ok(_) | Err(_) => {
                log_warn!("record stream truncated at corrupt page {}", index);
                result.truncated_at = Some(index);
                break;
            }
        };

        result.next_page = index + 1;
        result.record_count += 1;
        result.sample_count += decoded.sample_count() as u32;
        result.last_phase = Some(decoded.phase);
        match &decoded.body {
            PageBody::Samples { format, .. } => result.last_format = Some(*format),
            PageBody::Transition(record) => {
                if record.transition.to == FlightPhase::Landed {
                    result.landed_timestamp_us = Some(record.transition.timestamp_us);
                }
            }
        }
    }

    Ok(result)
}

/// Re-derives the metadata from the record pages without writing anything.
///
/// The scan is authoritative. A stored block that disagrees with it is reported and replaced
/// by one describing only the pages the scan accepted. Protection is kept if either side
/// says the flight has landed.
pub fn recover<B: StorageBackend>(
    backend: &mut B,
    default_format: PageFormat,
) -> Result<RecoveryReport, StorageError> {
    let mut page = erased_page();
    backend
        .read_page(METADATA_PAGE, &mut page)
        .map_err(StorageError::Backend)?;
    let stored = MetadataBlock::decode(&page);
    let scan = scan_records(backend)?;

    let mut metadata = match &stored {
        Ok(block) => *block,
        Err(_) => MetadataBlock::new(scan.last_format.unwrap_or(default_format)),
    };
    if metadata.active_format().is_none() {
        metadata.set_active_format(scan.last_format.unwrap_or(default_format));
    }

    let outcome = match stored {
        Err(MetadataInconsistency::Missing) if scan.record_count == 0 => RecoveryOutcome::Fresh,
        Err(reason) => RecoveryOutcome::Repaired(reason),
        Ok(block)
            if block.is_self_consistent()
                && block.next_page == scan.next_page
                && block.sample_count == scan.sample_count
                && block.protected == scan.landed_timestamp_us.is_some() =>
        {
            RecoveryOutcome::Consistent
        }
        Ok(block) => RecoveryOutcome::Repaired(MetadataInconsistency::Mismatch {
            claimed_records: block.record_count,
            found_records: scan.record_count,
        }),
    };

    metadata.next_page = scan.next_page;
    metadata.record_count = scan.record_count;
    metadata.sample_count = scan.sample_count;
    if let Some(landed_timestamp_us) = scan.landed_timestamp_us {
        metadata.protected = true;
        metadata.landed_timestamp_us = landed_timestamp_us;
    }
    metadata.exhausted = scan.next_page >= backend.capacity_pages();

    match outcome {
        RecoveryOutcome::Repaired(reason) => {
            log_warn!(
                "metadata inconsistent ({:?}), recovered {} records / {} samples",
                reason,
                scan.record_count,
                scan.sample_count
            );
        }
        _ => {
            log_info!(
                "storage recovered: {} records, {} samples, protected={}",
                scan.record_count,
                scan.sample_count,
                metadata.protected
            );
        }
    }

    Ok(RecoveryReport {
        outcome,
        scan,
        metadata,
    })
}
