use super::backend::{BackendError, StorageBackend};
use super::metadata::MetadataBlock;
use super::page::{
    PageError, PageFormat, decode_page, encode_samples_page, encode_transition_page, erased_page,
};
use super::recovery::{RecoveryOutcome, RecoveryReport, recover};
use super::{FIRST_RECORD_PAGE, METADATA_PAGE, PageBuf, StorageConfig, StorageError};
use crate::flight_phase::{FlightPhase, TransitionRecord};
use crate::ring_buffer::RingBuffer;
use crate::sensor_reading::SensorSample;
use crate::time::Clock;

/// Samples held back until a page is full. Larger than any format's page capacity so a
/// format switch never has to drop anything.
const PENDING_CAPACITY: usize = 32;
const PENDING_TRANSITIONS: usize = 8;

/// Transition waiting for its page, with the number of pending samples captured before it.
#[derive(Debug, Clone, Copy)]
struct QueuedTransition {
    record: TransitionRecord,
    samples_before: usize,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Recording,
    /// Landed has been recorded, the flight record is read only.
    Protected,
    /// Capacity ran out or the device kept failing, nothing more is recorded.
    FailedClosed,
}

/// Read only view of the writer for telemetry.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StorageStatus {
    pub state: WriterState,
    pub active_format: PageFormat,
    pub degraded: bool,
    pub record_count: u32,
    pub sample_count: u32,
    pub free_pages: u32,
    pub pending_samples: usize,
    pub target_rate_hz: u16,
    pub last_error: Option<StorageError>,
}

pub struct StorageWriter<B: StorageBackend, C: Clock> {
    backend: B,
    clock: C,
    config: StorageConfig,
    metadata: MetadataBlock,
    state: WriterState,
    phase: FlightPhase,
    target_rate_hz: u16,
    pending: RingBuffer<SensorSample, PENDING_CAPACITY>,
    /// Transitions whose page could not be committed yet, oldest first.
    pending_transitions: RingBuffer<QueuedTransition, PENDING_TRANSITIONS>,
    last_accepted_us: Option<u64>,
    degradation_floor: PageFormat,
    last_error: Option<StorageError>,
}

impl<B: StorageBackend, C: Clock> StorageWriter<B, C> {
    /// Opens the device and recovers the record stream already on it.
    pub fn open(
        mut backend: B,
        clock: C,
        config: StorageConfig,
    ) -> Result<(Self, RecoveryReport), StorageError> {
        backend.open().map_err(map_backend_error)?;
        let report = recover(&mut backend, config.ground_format)?;

        let metadata = report.metadata;
        let state = if metadata.protected {
            WriterState::Protected
        } else if metadata.exhausted {
            WriterState::FailedClosed
        } else {
            WriterState::Recording
        };
        let degradation_floor = if metadata.degraded {
            metadata.active_format().unwrap_or(config.ground_format)
        } else {
            PageFormat::Full
        };

        let mut writer = Self {
            backend,
            clock,
            config,
            metadata,
            state,
            phase: report.scan.last_phase.unwrap_or(FlightPhase::Idle),
            target_rate_hz: 0,
            pending: RingBuffer::new(),
            pending_transitions: RingBuffer::new(),
            last_accepted_us: None,
            degradation_floor,
            last_error: (state == WriterState::FailedClosed)
                .then_some(StorageError::CapacityExhausted),
        };

        if let Some(from) = report.scan.truncated_at {
            writer.erase_abandoned(from)?;
        }
        if report.outcome != RecoveryOutcome::Consistent {
            writer.commit_metadata()?;
        }
        log_info!(
            "storage open: {:?}, next page {}, state {:?}",
            report.outcome,
            writer.metadata.next_page,
            writer.state
        );
        Ok((writer, report))
    }

    /// Operator initiated erase of the whole flight record, including a protected one.
    pub fn reformat(&mut self) -> Result<(), StorageError> {
        let erased = erased_page();
        for index in FIRST_RECORD_PAGE..self.metadata.next_page.min(self.backend.capacity_pages()) {
            self.write_verified(index, &erased)?;
        }

        let generation = self.metadata.generation;
        self.metadata = MetadataBlock::new(self.config.ground_format);
        self.metadata.generation = generation;
        self.state = WriterState::Recording;
        self.phase = FlightPhase::Idle;
        self.pending.clear();
        self.pending_transitions.clear();
        self.last_accepted_us = None;
        self.degradation_floor = PageFormat::Full;
        self.last_error = None;
        self.commit_metadata()?;
        log_warn!("flight record erased");
        Ok(())
    }

    /// Sample rate directive from the state machine, 0 halts recording.
    pub fn set_target_rate(&mut self, rate_hz: u16) {
        if rate_hz != self.target_rate_hz {
            log_debug!("storage target rate {} -> {} Hz", self.target_rate_hz, rate_hz);
            self.target_rate_hz = rate_hz;
        }
    }

    /// Queues a sample for the current phase, flushing a page once one is full.
    ///
    /// Returns `Ok(false)` when the sample was decimated away by the target rate.
    pub fn push_sample(&mut self, sample: &SensorSample) -> Result<bool, StorageError> {
        self.ensure_writable()?;

        if self.target_rate_hz == 0 {
            return Ok(false);
        }
        if let Some(last) = self.last_accepted_us {
            let period_us = 1_000_000 / self.target_rate_hz as u64;
            let elapsed = sample.timestamp_us.saturating_sub(last);
            if sample.timestamp_us <= last || elapsed < period_us - period_us / 10 {
                return Ok(false);
            }
        }

        if let Some(first) = self.pending.front() {
            let span = sample.timestamp_us - first.timestamp_us;
            if span > self.active_format().max_offset_us() {
                self.flush_pages(true)?;
            }
        }

        if self.pending.push(*sample).is_some() {
            log_warn!("pending sample buffer overrun, oldest sample dropped");
            self.shift_transitions(1);
        }
        self.last_accepted_us = Some(sample.timestamp_us);

        self.flush_pages(false)?;
        Ok(true)
    }

    /// Writes every pending sample, including a partially filled last page.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.ensure_writable()?;
        self.flush_pages(true)
    }

    /// Persists a phase transition, after the samples of the phase it ends.
    ///
    /// If the device refuses the write the transition stays queued behind those samples and
    /// goes out with the next successful flush. Once a transition to Landed is committed the
    /// writer becomes read only.
    pub fn record_transition(&mut self, record: &TransitionRecord) -> Result<(), StorageError> {
        self.ensure_writable()?;
        let queued = QueuedTransition {
            record: *record,
            samples_before: self.pending.len(),
        };
        if self.pending_transitions.push(queued).is_some() {
            log_warn!("transition queue overrun, oldest transition dropped");
        }
        self.phase = record.transition.to;
        self.flush_pages(true)
    }

    /// Appends an already encoded record page. It must decode and carry the next sequence
    /// number.
    pub fn append_page(&mut self, page: &PageBuf) -> Result<u32, StorageError> {
        self.ensure_writable()?;
        let decoded = decode_page(page).map_err(|_| StorageError::Encoding)?;
        if decoded.sequence != self.next_sequence() {
            return Err(StorageError::Encoding);
        }
        self.commit_page(page, decoded.sample_count() as u32)
    }

    pub fn next_sequence(&self) -> u32 {
        self.metadata.next_page - FIRST_RECORD_PAGE
    }

    pub fn status(&self) -> StorageStatus {
        StorageStatus {
            state: self.state,
            active_format: self.active_format(),
            degraded: self.metadata.degraded,
            record_count: self.metadata.record_count,
            sample_count: self.metadata.sample_count,
            free_pages: self.free_pages(),
            pending_samples: self.pending.len(),
            target_rate_hz: self.target_rate_hz,
            last_error: self.last_error,
        }
    }

    pub fn metadata(&self) -> &MetadataBlock {
        &self.metadata
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn backend(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Most compact of what the phase wants, the degradation floor and the low-water
    /// override.
    pub fn active_format(&self) -> PageFormat {
        self.format_for(self.phase)
    }

    fn format_for(&self, phase: FlightPhase) -> PageFormat {
        let wanted = self.config.format_for(phase).max(self.degradation_floor);
        if self.free_pages() < self.config.low_water_pages {
            PageFormat::MOST_COMPACT
        } else {
            wanted
        }
    }

    fn free_pages(&self) -> u32 {
        self.backend
            .capacity_pages()
            .saturating_sub(self.metadata.next_page)
    }

    /// Erases what is left past a truncated record stream, up to the first erased page.
    fn erase_abandoned(&mut self, from: u32) -> Result<(), StorageError> {
        let erased = erased_page();
        let mut page = erased_page();
        for index in from..self.backend.capacity_pages() {
            self.backend
                .read_page(index, &mut page)
                .map_err(map_backend_error)?;
            if page == erased {
                break;
            }
            log_warn!("erasing abandoned page {}", index);
            self.write_verified(index, &erased)?;
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), StorageError> {
        match self.state {
            WriterState::Recording => Ok(()),
            WriterState::Protected => Err(StorageError::WriteProtected),
            WriterState::FailedClosed => Err(self.last_error.unwrap_or(StorageError::FailedClosed)),
        }
    }

    /// Drops `count` samples from the front of the queue, keeping the queued transitions
    /// anchored behind the samples that preceded them.
    fn consume_pending(&mut self, count: usize) {
        self.pending.discard_front(count);
        self.shift_transitions(count);
    }

    fn shift_transitions(&mut self, count: usize) {
        for queued in self.pending_transitions.iter_mut() {
            queued.samples_before = queued.samples_before.saturating_sub(count);
        }
    }

    fn commit_transition(&mut self, record: &TransitionRecord) -> Result<(), StorageError> {
        let page = encode_transition_page(record, self.next_sequence()).map_err(page_error)?;
        if let Err(e) = self.commit_page(&page, 0) {
            self.on_write_failure(e);
            return Err(e);
        }

        if record.transition.to == FlightPhase::Landed {
            // recovery re-derives protection from the landed record if this commit fails
            self.metadata.protected = true;
            self.metadata.landed_timestamp_us = record.transition.timestamp_us;
            self.state = WriterState::Protected;
            self.pending.clear();
            self.pending_transitions.clear();
            log_info!(
                "landed recorded, flight record protected ({} records)",
                self.metadata.record_count
            );
            self.commit_metadata()?;
        }
        Ok(())
    }

    /// Persistent device failures walk the format towards the most compact one, then stop
    /// recording.
    fn on_write_failure(&mut self, error: StorageError) {
        if matches!(
            error,
            StorageError::DeviceNotReady | StorageError::WriteVerifyFailed
        ) && !self.degrade()
        {
            self.fail_closed(error);
        }
    }

    /// Commits pending samples and queued transitions in capture order. Samples ahead of a
    /// queued transition are tagged with the phase that transition ends and always written,
    /// the newest ones only once a page is full unless `force` is set.
    fn flush_pages(&mut self, force: bool) -> Result<(), StorageError> {
        loop {
            let (phase, available) = match self.pending_transitions.front().copied() {
                Some(queued) if queued.samples_before == 0 => {
                    self.commit_transition(&queued.record)?;
                    self.pending_transitions.pop_front();
                    continue;
                }
                Some(queued) => (queued.record.transition.from, queued.samples_before),
                None => (self.phase, self.pending.len()),
            };
            if available == 0 {
                return Ok(());
            }

            let format = self.format_for(phase);
            let span = match (self.pending.front(), self.pending.get(available - 1)) {
                (Some(first), Some(last)) => last.timestamp_us - first.timestamp_us,
                _ => 0,
            };
            let page_full = available >= format.samples_per_page() || span > format.max_offset_us();
            if !force && !page_full && self.pending_transitions.is_empty() {
                return Ok(());
            }

            let (page, consumed) = encode_samples_page(
                format,
                phase,
                self.next_sequence(),
                self.metadata.degraded,
                self.pending.iter().take(available),
            )
            .map_err(page_error)?;

            match self.commit_page(&page, consumed as u32) {
                Ok(_) => self.consume_pending(consumed),
                Err(e) => {
                    self.on_write_failure(e);
                    return Err(e);
                }
            }
        }
    }

    /// Writes one record page, then the metadata describing it.
    fn commit_page(&mut self, page: &PageBuf, samples: u32) -> Result<u32, StorageError> {
        let index = self.metadata.next_page;
        if index >= self.backend.capacity_pages() {
            self.metadata.exhausted = true;
            // best effort, the record stream itself is already complete
            let _ = self.commit_metadata();
            self.fail_closed(StorageError::CapacityExhausted);
            return Err(StorageError::CapacityExhausted);
        }

        let started_us = self.clock.now_us();
        self.write_verified(index, page)?;
        let latency_us = self.clock.now_us().saturating_sub(started_us);

        self.metadata.next_page += 1;
        self.metadata.record_count += 1;
        self.metadata.sample_count += samples;
        if let Some(format) = PageFormat::from_selector(page[0]) {
            self.metadata.set_active_format(format);
        }
        if let Err(e) = self.commit_metadata() {
            // recovery re-derives the counts from the pages, the data itself is safe
            log_warn!("metadata commit failed after page {}: {:?}", index, e);
            self.last_error = Some(e);
        }

        self.check_latency(latency_us);
        Ok(index)
    }

    fn commit_metadata(&mut self) -> Result<(), StorageError> {
        self.metadata.generation = self.metadata.generation.wrapping_add(1);
        let page = self.metadata.encode()?;
        self.write_verified(METADATA_PAGE, &page)
    }

    /// Bounded retry of a single page write with read back verification.
    fn write_verified(&mut self, index: u32, page: &PageBuf) -> Result<(), StorageError> {
        let deadline_us = self.clock.now_us().saturating_add(self.config.write_deadline_us);
        let mut last_error = StorageError::DeviceNotReady;

        for attempt in 1..=self.config.max_write_attempts.max(1) {
            match self.try_write(index, page) {
                Ok(()) => return Ok(()),
                Err(e @ (StorageError::DeviceNotReady | StorageError::WriteVerifyFailed)) => {
                    log_warn!("page {} write attempt {} failed: {:?}", index, attempt, e);
                    last_error = e;
                }
                Err(e) => {
                    self.last_error = Some(e);
                    return Err(e);
                }
            }
            if self.clock.now_us() >= deadline_us {
                log_warn!("page {} write deadline exceeded", index);
                break;
            }
        }

        self.last_error = Some(last_error);
        Err(last_error)
    }

    fn try_write(&mut self, index: u32, page: &PageBuf) -> Result<(), StorageError> {
        if !self.backend.is_ready() {
            return Err(StorageError::DeviceNotReady);
        }
        self.backend
            .write_page(index, page)
            .map_err(map_backend_error)?;

        let mut read_back = erased_page();
        self.backend
            .read_page(index, &mut read_back)
            .map_err(map_backend_error)?;
        if read_back != *page {
            return Err(StorageError::WriteVerifyFailed);
        }
        Ok(())
    }

    fn check_latency(&mut self, latency_us: u64) {
        if self.target_rate_hz == 0 {
            return;
        }
        let format = self.active_format();
        let fill_time_us = format.samples_per_page() as u64 * 1_000_000 / self.target_rate_hz as u64;
        let budget_us = (fill_time_us as f32 * self.config.latency_budget_fraction) as u64;
        if latency_us > budget_us {
            log_warn!(
                "page commit took {}us, budget {}us at {} Hz",
                latency_us,
                budget_us,
                self.target_rate_hz
            );
            self.degrade();
        }
    }

    /// Moves the format floor one step towards the most compact format.
    fn degrade(&mut self) -> bool {
        let current = self.active_format();
        match current.more_compact() {
            Some(next) => {
                log_warn!("storage degraded: {:?} -> {:?}", current, next);
                self.degradation_floor = next;
                self.metadata.degraded = true;
                true
            }
            None => false,
        }
    }

    fn fail_closed(&mut self, error: StorageError) {
        if self.state != WriterState::FailedClosed {
            log_error!("storage failed closed: {:?}", error);
        }
        self.state = WriterState::FailedClosed;
        self.last_error = Some(error);
        self.pending.clear();
    }
}

fn map_backend_error(error: BackendError) -> StorageError {
    match error {
        BackendError::NotReady => StorageError::DeviceNotReady,
        BackendError::OutOfRange => StorageError::CapacityExhausted,
        BackendError::Io => StorageError::Backend(BackendError::Io),
    }
}

fn page_error(error: PageError) -> StorageError {
    log_error!("page encoding failed: {:?}", error);
    StorageError::Encoding
}
