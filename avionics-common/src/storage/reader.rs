use super::backend::StorageBackend;
use super::page::{DecodedPage, decode_page, erased_page};
use super::recovery::scan_records;
use super::{FIRST_RECORD_PAGE, StorageError};

/// Iterates the committed record pages of a device, oldest first.
pub struct RecordReader<'a, B: StorageBackend> {
    backend: &'a mut B,
    next: u32,
    end: u32,
}

impl<'a, B: StorageBackend> RecordReader<'a, B> {
    /// Reads up to the end of the record stream as a linear scan finds it. Page 0 may lag
    /// behind the last committed page after a power loss, so it is never consulted.
    pub fn open(backend: &'a mut B) -> Result<Self, StorageError> {
        let end = scan_records(backend)?.next_page;
        Ok(Self::with_end(backend, end))
    }

    pub fn with_end(backend: &'a mut B, end: u32) -> Self {
        let end = end.min(backend.capacity_pages());
        Self {
            backend,
            next: FIRST_RECORD_PAGE,
            end,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.end.saturating_sub(self.next)
    }
}

impl<B: StorageBackend> Iterator for RecordReader<'_, B> {
    type Item = Result<DecodedPage, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let mut page = erased_page();
        if let Err(e) = self.backend.read_page(index, &mut page) {
            return Some(Err(StorageError::Backend(e)));
        }
        Some(decode_page(&page).map_err(|e| {
            log_warn!("page {} unreadable: {:?}", index, e);
            StorageError::Encoding
        }))
    }
}
