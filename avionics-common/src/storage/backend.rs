use super::{ERASED_BYTE, PAGE_SIZE, PageBuf};

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendError {
    NotReady,
    OutOfRange,
    Io,
}

/// Page addressed non-volatile medium.
///
/// A successful [`StorageBackend::write_page`] must be durable before it returns.
pub trait StorageBackend {
    fn open(&mut self) -> Result<(), BackendError>;

    fn is_ready(&self) -> bool;

    fn capacity_pages(&self) -> u32;

    fn write_page(&mut self, index: u32, page: &PageBuf) -> Result<(), BackendError>;

    fn read_page(&mut self, index: u32, page: &mut PageBuf) -> Result<(), BackendError>;
}

impl<B: StorageBackend + ?Sized> StorageBackend for &mut B {
    fn open(&mut self) -> Result<(), BackendError> {
        (**self).open()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn capacity_pages(&self) -> u32 {
        (**self).capacity_pages()
    }

    fn write_page(&mut self, index: u32, page: &PageBuf) -> Result<(), BackendError> {
        (**self).write_page(index, page)
    }

    fn read_page(&mut self, index: u32, page: &mut PageBuf) -> Result<(), BackendError> {
        (**self).read_page(index, page)
    }
}

/// Backend over a caller owned slice of pages, e.g. a static buffer or a test vector.
pub struct RamBackend<'a> {
    pages: &'a mut [PageBuf],
    opened: bool,
}

impl<'a> RamBackend<'a> {
    pub fn new(pages: &'a mut [PageBuf]) -> Self {
        Self {
            pages,
            opened: false,
        }
    }

    pub fn erase(&mut self) {
        for page in self.pages.iter_mut() {
            page.fill(ERASED_BYTE);
        }
    }

    pub fn pages(&self) -> &[PageBuf] {
        &*self.pages
    }

    pub fn pages_mut(&mut self) -> &mut [PageBuf] {
        &mut *self.pages
    }

    fn slot(&mut self, index: u32) -> Result<&mut PageBuf, BackendError> {
        if !self.opened {
            return Err(BackendError::NotReady);
        }
        self.pages
            .get_mut(index as usize)
            .ok_or(BackendError::OutOfRange)
    }
}

impl StorageBackend for RamBackend<'_> {
    fn open(&mut self) -> Result<(), BackendError> {
        self.opened = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.opened
    }

    fn capacity_pages(&self) -> u32 {
        self.pages.len() as u32
    }

    fn write_page(&mut self, index: u32, page: &PageBuf) -> Result<(), BackendError> {
        self.slot(index)?.copy_from_slice(page);
        Ok(())
    }

    fn read_page(&mut self, index: u32, page: &mut PageBuf) -> Result<(), BackendError> {
        page.copy_from_slice(self.slot(index)?);
        Ok(())
    }
}

/// Backend over an image file, standing in for an SD card on the host.
#[cfg(feature = "std")]
pub struct FileBackend {
    path: std::path::PathBuf,
    capacity_pages: u32,
    file: Option<std::fs::File>,
}

#[cfg(feature = "std")]
impl FileBackend {
    pub fn new(path: impl Into<std::path::PathBuf>, capacity_pages: u32) -> Self {
        Self {
            path: path.into(),
            capacity_pages,
            file: None,
        }
    }

    fn file(&mut self) -> Result<&mut std::fs::File, BackendError> {
        self.file.as_mut().ok_or(BackendError::NotReady)
    }

    fn seek_to(&mut self, index: u32) -> Result<&mut std::fs::File, BackendError> {
        use std::io::{Seek, SeekFrom};

        if index >= self.capacity_pages {
            return Err(BackendError::OutOfRange);
        }
        let file = self.file()?;
        file.seek(SeekFrom::Start(index as u64 * PAGE_SIZE as u64))
            .map_err(io_error)?;
        Ok(file)
    }
}

#[cfg(feature = "std")]
fn io_error(e: std::io::Error) -> BackendError {
    log_warn!("storage image io error: {:?}", crate::fmt::DebugFormat(e));
    BackendError::Io
}

#[cfg(feature = "std")]
impl StorageBackend for FileBackend {
    fn open(&mut self) -> Result<(), BackendError> {
        use std::io::{Seek, SeekFrom, Write};

        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(io_error)?;

        // a fresh image must read back as erased, not as zeroes
        let wanted = self.capacity_pages as u64 * PAGE_SIZE as u64;
        let current = file.metadata().map_err(io_error)?.len();
        if current < wanted {
            file.seek(SeekFrom::Start(current)).map_err(io_error)?;
            let erased = [ERASED_BYTE; PAGE_SIZE];
            let mut remaining = wanted - current;
            while remaining > 0 {
                let chunk = remaining.min(PAGE_SIZE as u64) as usize;
                file.write_all(&erased[..chunk]).map_err(io_error)?;
                remaining -= chunk as u64;
            }
            file.sync_all().map_err(io_error)?;
        }

        self.file = Some(file);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.file.is_some()
    }

    fn capacity_pages(&self) -> u32 {
        self.capacity_pages
    }

    fn write_page(&mut self, index: u32, page: &PageBuf) -> Result<(), BackendError> {
        use std::io::Write;

        let file = self.seek_to(index)?;
        file.write_all(page).map_err(io_error)?;
        file.sync_data().map_err(io_error)
    }

    fn read_page(&mut self, index: u32, page: &mut PageBuf) -> Result<(), BackendError> {
        use std::io::Read;

        let file = self.seek_to(index)?;
        file.read_exact(page).map_err(io_error)
    }
}
