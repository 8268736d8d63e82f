use heapless::Vec;
use packed_struct::prelude::*;
use serde::{Deserialize, Serialize};

use super::{ERASED_BYTE, PAGE_SIZE, PageBuf, STORAGE_CRC};
use crate::flight_phase::{FlightPhase, PhaseTransition, TransitionRecord};
use crate::sensor_reading::SensorSample;

pub const HEADER_SIZE: usize = 15;
const CRC_OFFSET: usize = 13;
const PAYLOAD_SIZE: usize = PAGE_SIZE - HEADER_SIZE;

const LAYOUT_VERSION: u8 = 1;
const TRANSITION_SELECTOR: u8 = (LAYOUT_VERSION << 4) | 0x0E;
const TRANSITION_PAYLOAD_SIZE: usize = 22;

const FLAG_DEGRADED: u8 = 0b0001;

pub const MAX_SAMPLES_PER_PAGE: usize = PageFormat::Minimal.samples_per_page();

const ACC_SCALE: f32 = 0.01;
const GYRO_SCALE: f32 = 0.1;
const ALTITUDE_SCALE: f32 = 0.01;
const PRESSURE_SCALE: f32 = 2.0;
const BATTERY_SCALE: f32 = 0.1;

/// Sample layout of a record page, ordered from most detailed to most compact.
///
/// The discriminant is the selector byte: layout version in the high nibble, kind in the
/// low nibble.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageFormat {
    /// Every channel as f32, µs offsets.
    Full = 0x11,
    /// Full without the magnetometer.
    NoMag = 0x12,
    /// Fixed point IMU, altitude, pressure and battery, 100 µs offsets.
    Packed = 0x13,
    /// Fixed point accelerometer and altitude only, ms offsets.
    Minimal = 0x14,
}

impl PageFormat {
    pub const MOST_COMPACT: PageFormat = PageFormat::Minimal;

    pub const fn selector(self) -> u8 {
        self as u8
    }

    pub fn from_selector(selector: u8) -> Option<Self> {
        match selector {
            0x11 => Some(PageFormat::Full),
            0x12 => Some(PageFormat::NoMag),
            0x13 => Some(PageFormat::Packed),
            0x14 => Some(PageFormat::Minimal),
            _ => None,
        }
    }

    pub const fn sample_size(self) -> usize {
        match self {
            PageFormat::Full => 52,
            PageFormat::NoMag => 40,
            PageFormat::Packed => 21,
            PageFormat::Minimal => 12,
        }
    }

    pub const fn samples_per_page(self) -> usize {
        PAYLOAD_SIZE / self.sample_size()
    }

    pub const fn offset_unit_us(self) -> u64 {
        match self {
            PageFormat::Full | PageFormat::NoMag => 1,
            PageFormat::Packed => 100,
            PageFormat::Minimal => 1_000,
        }
    }

    /// Largest time offset from the first sample of a page that still fits.
    pub const fn max_offset_us(self) -> u64 {
        match self {
            PageFormat::Full | PageFormat::NoMag => u32::MAX as u64,
            PageFormat::Packed | PageFormat::Minimal => u16::MAX as u64 * self.offset_unit_us(),
        }
    }

    pub fn more_compact(self) -> Option<Self> {
        match self {
            PageFormat::Full => Some(PageFormat::NoMag),
            PageFormat::NoMag => Some(PageFormat::Packed),
            PageFormat::Packed => Some(PageFormat::Minimal),
            PageFormat::Minimal => None,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageError {
    Erased,
    UnknownSelector(u8),
    ChecksumMismatch,
    Malformed,
    Empty,
    Encoding,
}

#[derive(PackedStruct, Clone, Copy, Debug, PartialEq, Eq)]
#[packed_struct(bit_numbering = "msb0", endian = "msb", size_bytes = "15")]
struct PageHeader {
    selector: u8,
    #[packed_field(element_size_bits = "4")]
    phase: u8,
    #[packed_field(element_size_bits = "4")]
    flags: u8,
    entry_count: u8,
    sequence: u32,
    #[packed_field(element_size_bits = "48")]
    base_timestamp_us: u64,
    crc: u16,
}

#[derive(PackedStruct, Clone, Debug)]
#[packed_struct(bit_numbering = "msb0", endian = "msb", size_bytes = "52")]
struct FullSampleRecord {
    offset_us: u32,
    acc: [u32; 3],
    gyro: [u32; 3],
    mag: [u32; 3],
    pressure: u32,
    altitude: u32,
    battery: u32,
}

#[derive(PackedStruct, Clone, Debug)]
#[packed_struct(bit_numbering = "msb0", endian = "msb", size_bytes = "40")]
struct NoMagSampleRecord {
    offset_us: u32,
    acc: [u32; 3],
    gyro: [u32; 3],
    pressure: u32,
    altitude: u32,
    battery: u32,
}

#[derive(PackedStruct, Clone, Debug)]
#[packed_struct(bit_numbering = "msb0", endian = "msb", size_bytes = "21")]
struct PackedSampleRecord {
    offset: u16,
    acc: [u16; 3],
    gyro: [u16; 3],
    altitude: i32,
    pressure: u16,
    battery: u8,
}

#[derive(PackedStruct, Clone, Debug)]
#[packed_struct(bit_numbering = "msb0", endian = "msb", size_bytes = "12")]
struct MinimalSampleRecord {
    offset: u16,
    acc: [u16; 3],
    altitude: i32,
}

#[derive(PackedStruct, Clone, Debug)]
#[packed_struct(bit_numbering = "msb0", endian = "msb", size_bytes = "22")]
struct TransitionPayload {
    from_phase: u8,
    to_phase: u8,
    altitude_agl: u32,
    velocity: u32,
    ground_altitude_asl: u32,
    ground_pressure: u32,
    accelerometer_bias: u32,
}

/// A sample as read back from storage. Channels the page format dropped are `None`.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoredSample {
    pub timestamp_us: u64,
    pub acc: [f32; 3],
    pub gyro: Option<[f32; 3]>,
    pub mag: Option<[f32; 3]>,
    pub pressure: Option<f32>,
    pub altitude_asl: f32,
    pub battery_voltage: Option<f32>,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq)]
pub enum PageBody {
    Samples {
        format: PageFormat,
        samples: Vec<StoredSample, MAX_SAMPLES_PER_PAGE>,
    },
    Transition(TransitionRecord),
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPage {
    pub phase: FlightPhase,
    pub sequence: u32,
    pub base_timestamp_us: u64,
    /// The writer was running degraded when it produced this page.
    pub degraded: bool,
    pub body: PageBody,
}

impl DecodedPage {
    pub fn sample_count(&self) -> usize {
        match &self.body {
            PageBody::Samples { samples, .. } => samples.len(),
            PageBody::Transition(_) => 0,
        }
    }

    pub fn transition(&self) -> Option<&TransitionRecord> {
        match &self.body {
            PageBody::Transition(record) => Some(record),
            PageBody::Samples { .. } => None,
        }
    }
}

pub fn erased_page() -> PageBuf {
    [ERASED_BYTE; PAGE_SIZE]
}

/// Packs as many leading `samples` as fit into one page of `format`.
///
/// Stops at the page capacity or at the first sample whose offset from the first one no
/// longer fits the format. Returns the page and the number of samples consumed.
pub fn encode_samples_page<'a, I>(
    format: PageFormat,
    phase: FlightPhase,
    sequence: u32,
    degraded: bool,
    samples: I,
) -> Result<(PageBuf, usize), PageError>
where
    I: IntoIterator<Item = &'a SensorSample>,
{
    let mut page = erased_page();
    let size = format.sample_size();
    let mut base_timestamp_us = None;
    let mut count = 0;

    for sample in samples {
        if count == format.samples_per_page() {
            break;
        }
        let base = *base_timestamp_us.get_or_insert(sample.timestamp_us);
        let offset_us = match sample.timestamp_us.checked_sub(base) {
            Some(offset_us) if offset_us <= format.max_offset_us() => offset_us,
            _ => break,
        };

        let start = HEADER_SIZE + count * size;
        encode_sample(format, offset_us, sample, &mut page[start..start + size])?;
        count += 1;
    }

    let base_timestamp_us = base_timestamp_us.ok_or(PageError::Empty)?;
    let header = PageHeader {
        selector: format.selector(),
        phase: phase.into(),
        flags: if degraded { FLAG_DEGRADED } else { 0 },
        entry_count: count as u8,
        sequence,
        base_timestamp_us,
        crc: 0,
    };
    seal_page(&mut page, &header)?;
    Ok((page, count))
}

pub fn encode_transition_page(record: &TransitionRecord, sequence: u32) -> Result<PageBuf, PageError> {
    let mut page = erased_page();
    let payload = TransitionPayload {
        from_phase: record.transition.from.into(),
        to_phase: record.transition.to.into(),
        altitude_agl: record.altitude_agl.to_bits(),
        velocity: record.velocity.to_bits(),
        ground_altitude_asl: record.ground_altitude_asl.to_bits(),
        ground_pressure: record.ground_pressure.to_bits(),
        accelerometer_bias: record.accelerometer_bias.to_bits(),
    };
    payload
        .pack_to_slice(&mut page[HEADER_SIZE..HEADER_SIZE + TRANSITION_PAYLOAD_SIZE])
        .map_err(|_| PageError::Encoding)?;

    let header = PageHeader {
        selector: TRANSITION_SELECTOR,
        phase: record.transition.to.into(),
        flags: 0,
        entry_count: 1,
        sequence,
        base_timestamp_us: record.transition.timestamp_us,
        crc: 0,
    };
    seal_page(&mut page, &header)?;
    Ok(page)
}

pub fn decode_page(page: &PageBuf) -> Result<DecodedPage, PageError> {
    if page[0] == ERASED_BYTE {
        return Err(PageError::Erased);
    }
    let format = match page[0] {
        TRANSITION_SELECTOR => None,
        selector => Some(PageFormat::from_selector(selector).ok_or(PageError::UnknownSelector(selector))?),
    };

    let header =
        PageHeader::unpack_from_slice(&page[..HEADER_SIZE]).map_err(|_| PageError::Malformed)?;
    if header.crc != page_crc(page) {
        return Err(PageError::ChecksumMismatch);
    }
    let phase = FlightPhase::try_from(header.phase).map_err(|_| PageError::Malformed)?;

    let body = match format {
        Some(format) => {
            let count = header.entry_count as usize;
            if count == 0 || count > format.samples_per_page() {
                return Err(PageError::Malformed);
            }
            let size = format.sample_size();
            let mut samples = Vec::new();
            for i in 0..count {
                let start = HEADER_SIZE + i * size;
                let sample =
                    decode_sample(format, header.base_timestamp_us, &page[start..start + size])?;
                samples.push(sample).map_err(|_| PageError::Malformed)?;
            }
            PageBody::Samples { format, samples }
        }
        None => {
            let payload = TransitionPayload::unpack_from_slice(
                &page[HEADER_SIZE..HEADER_SIZE + TRANSITION_PAYLOAD_SIZE],
            )
            .map_err(|_| PageError::Malformed)?;
            let from = FlightPhase::try_from(payload.from_phase).map_err(|_| PageError::Malformed)?;
            let to = FlightPhase::try_from(payload.to_phase).map_err(|_| PageError::Malformed)?;
            PageBody::Transition(TransitionRecord {
                transition: PhaseTransition {
                    from,
                    to,
                    timestamp_us: header.base_timestamp_us,
                },
                altitude_agl: f32::from_bits(payload.altitude_agl),
                velocity: f32::from_bits(payload.velocity),
                ground_altitude_asl: f32::from_bits(payload.ground_altitude_asl),
                ground_pressure: f32::from_bits(payload.ground_pressure),
                accelerometer_bias: f32::from_bits(payload.accelerometer_bias),
            })
        }
    };

    Ok(DecodedPage {
        phase,
        sequence: header.sequence,
        base_timestamp_us: header.base_timestamp_us,
        degraded: header.flags & FLAG_DEGRADED != 0,
        body,
    })
}

/// CRC over the whole page except the CRC field itself.
fn page_crc(page: &PageBuf) -> u16 {
    let mut digest = STORAGE_CRC.digest();
    digest.update(&page[..CRC_OFFSET]);
    digest.update(&page[HEADER_SIZE..]);
    digest.finalize()
}

fn seal_page(page: &mut PageBuf, header: &PageHeader) -> Result<(), PageError> {
    header
        .pack_to_slice(&mut page[..HEADER_SIZE])
        .map_err(|_| PageError::Encoding)?;
    let crc = page_crc(page);
    page[CRC_OFFSET..HEADER_SIZE].copy_from_slice(&crc.to_be_bytes());
    Ok(())
}

fn encode_sample(
    format: PageFormat,
    offset_us: u64,
    sample: &SensorSample,
    buffer: &mut [u8],
) -> Result<(), PageError> {
    let data = &sample.data;
    let altitude = data.baro.altitude();
    let offset = offset_us / format.offset_unit_us();

    let packed = match format {
        PageFormat::Full => FullSampleRecord {
            offset_us: offset as u32,
            acc: data.imu.acc.map(f32::to_bits),
            gyro: data.imu.gyro.map(f32::to_bits),
            mag: data.mag.mag.map(f32::to_bits),
            pressure: data.baro.pressure.to_bits(),
            altitude: altitude.to_bits(),
            battery: data.battery.voltage.to_bits(),
        }
        .pack_to_slice(buffer),
        PageFormat::NoMag => NoMagSampleRecord {
            offset_us: offset as u32,
            acc: data.imu.acc.map(f32::to_bits),
            gyro: data.imu.gyro.map(f32::to_bits),
            pressure: data.baro.pressure.to_bits(),
            altitude: altitude.to_bits(),
            battery: data.battery.voltage.to_bits(),
        }
        .pack_to_slice(buffer),
        PageFormat::Packed => PackedSampleRecord {
            offset: offset as u16,
            acc: data.imu.acc.map(|v| quantize_i16(v, ACC_SCALE)),
            gyro: data.imu.gyro.map(|v| quantize_i16(v, GYRO_SCALE)),
            altitude: quantize_i32(altitude, ALTITUDE_SCALE),
            pressure: quantize_unsigned(data.baro.pressure, PRESSURE_SCALE, u16::MAX as f32) as u16,
            battery: quantize_unsigned(data.battery.voltage, BATTERY_SCALE, u8::MAX as f32) as u8,
        }
        .pack_to_slice(buffer),
        PageFormat::Minimal => MinimalSampleRecord {
            offset: offset as u16,
            acc: data.imu.acc.map(|v| quantize_i16(v, ACC_SCALE)),
            altitude: quantize_i32(altitude, ALTITUDE_SCALE),
        }
        .pack_to_slice(buffer),
    };
    packed.map_err(|_| PageError::Encoding)
}

fn decode_sample(format: PageFormat, base_timestamp_us: u64, buffer: &[u8]) -> Result<StoredSample, PageError> {
    let unit = format.offset_unit_us();
    let sample = match format {
        PageFormat::Full => {
            let r = FullSampleRecord::unpack_from_slice(buffer).map_err(|_| PageError::Malformed)?;
            StoredSample {
                timestamp_us: base_timestamp_us + r.offset_us as u64,
                acc: r.acc.map(f32::from_bits),
                gyro: Some(r.gyro.map(f32::from_bits)),
                mag: Some(r.mag.map(f32::from_bits)),
                pressure: Some(f32::from_bits(r.pressure)),
                altitude_asl: f32::from_bits(r.altitude),
                battery_voltage: Some(f32::from_bits(r.battery)),
            }
        }
        PageFormat::NoMag => {
            let r = NoMagSampleRecord::unpack_from_slice(buffer).map_err(|_| PageError::Malformed)?;
            StoredSample {
                timestamp_us: base_timestamp_us + r.offset_us as u64,
                acc: r.acc.map(f32::from_bits),
                gyro: Some(r.gyro.map(f32::from_bits)),
                mag: None,
                pressure: Some(f32::from_bits(r.pressure)),
                altitude_asl: f32::from_bits(r.altitude),
                battery_voltage: Some(f32::from_bits(r.battery)),
            }
        }
        PageFormat::Packed => {
            let r = PackedSampleRecord::unpack_from_slice(buffer).map_err(|_| PageError::Malformed)?;
            StoredSample {
                timestamp_us: base_timestamp_us + r.offset as u64 * unit,
                acc: r.acc.map(|v| dequantize_i16(v, ACC_SCALE)),
                gyro: Some(r.gyro.map(|v| dequantize_i16(v, GYRO_SCALE))),
                mag: None,
                pressure: Some(r.pressure as f32 * PRESSURE_SCALE),
                altitude_asl: r.altitude as f32 * ALTITUDE_SCALE,
                battery_voltage: Some(r.battery as f32 * BATTERY_SCALE),
            }
        }
        PageFormat::Minimal => {
            let r = MinimalSampleRecord::unpack_from_slice(buffer).map_err(|_| PageError::Malformed)?;
            StoredSample {
                timestamp_us: base_timestamp_us + r.offset as u64 * unit,
                acc: r.acc.map(|v| dequantize_i16(v, ACC_SCALE)),
                gyro: None,
                mag: None,
                pressure: None,
                altitude_asl: r.altitude as f32 * ALTITUDE_SCALE,
                battery_voltage: None,
            }
        }
    };
    Ok(sample)
}

/// Two's complement i16 carried in a u16 field.
fn quantize_i16(value: f32, scale: f32) -> u16 {
    libm::roundf(value / scale).clamp(i16::MIN as f32, i16::MAX as f32) as i16 as u16
}

fn dequantize_i16(raw: u16, scale: f32) -> f32 {
    raw as i16 as f32 * scale
}

fn quantize_i32(value: f32, scale: f32) -> i32 {
    libm::roundf(value / scale).clamp(i32::MIN as f32, i32::MAX as f32) as i32
}

fn quantize_unsigned(value: f32, scale: f32, max: f32) -> u32 {
    libm::roundf(value / scale).clamp(0.0, max) as u32
}
