use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use avionics_common::TransitionRecord;
use avionics_common::storage::{
    FileBackend, PAGE_SIZE, PageBody, PageFormat, RecordReader, RecoveryReport, StorageBackend,
    StorageConfig, StorageWriter, recover,
};
use avionics_common::time::StdClock;
use log::warn;

use crate::args::{DumpCli, ReformatCli};
use crate::sensor_log::StoredSampleRow;

pub struct DumpSummary {
    pub recovery: RecoveryReport,
    pub transitions: Vec<TransitionRecord>,
    pub sample_count: u32,
    pub unreadable_pages: u32,
}

/// Opens an existing image, sized from the file.
fn existing_image(path: &Path) -> Result<FileBackend> {
    let len = fs::metadata(path)
        .with_context(|| format!("no storage image at {}", path.display()))?
        .len();
    if len % PAGE_SIZE as u64 != 0 {
        warn!("{} is not a whole number of pages, ignoring the tail", path.display());
    }
    let capacity_pages = u32::try_from(len / PAGE_SIZE as u64)?;
    Ok(FileBackend::new(path, capacity_pages))
}

pub fn dump(args: &DumpCli) -> Result<DumpSummary> {
    let mut backend = existing_image(&args.image_path)?;
    backend
        .open()
        .map_err(|e| anyhow!("failed to open {}: {:?}", args.image_path.display(), e))?;
    let recovery = recover(&mut backend, PageFormat::Full)
        .map_err(|e| anyhow!("failed to scan {}: {:?}", args.image_path.display(), e))?;

    let mut samples_out = match &args.samples {
        Some(path) => Some(csv::Writer::from_path(path)?),
        None => None,
    };
    let mut summary = DumpSummary {
        recovery,
        transitions: Vec::new(),
        sample_count: 0,
        unreadable_pages: 0,
    };

    for page in RecordReader::with_end(&mut backend, recovery.scan.next_page) {
        let page = match page {
            Ok(page) => page,
            Err(e) => {
                warn!("skipping page: {:?}", e);
                summary.unreadable_pages += 1;
                continue;
            }
        };
        match &page.body {
            PageBody::Transition(record) => summary.transitions.push(*record),
            PageBody::Samples { format, samples } => {
                summary.sample_count += samples.len() as u32;
                if let Some(out) = samples_out.as_mut() {
                    for sample in samples {
                        out.serialize(StoredSampleRow::new(page.phase, *format, sample))?;
                    }
                }
            }
        }
    }
    if let Some(out) = samples_out.as_mut() {
        out.flush()?;
    }
    Ok(summary)
}

pub fn print_dump(image_path: &Path, summary: &DumpSummary) {
    let recovery = &summary.recovery;
    let metadata = &recovery.metadata;
    println!("{}: {:?}", image_path.display(), recovery.outcome);
    println!(
        "{} records, {} samples, next page {}{}{}{}",
        metadata.record_count,
        metadata.sample_count,
        metadata.next_page,
        if metadata.protected { ", protected" } else { "" },
        if metadata.degraded { ", degraded" } else { "" },
        if metadata.exhausted { ", full" } else { "" },
    );
    if let Some(page) = recovery.scan.truncated_at {
        println!("record stream truncated at page {}", page);
    }

    for record in &summary.transitions {
        let transition = record.transition;
        println!(
            "{:>10.3}s  {:?} -> {:?}  {:.1}m AGL  {:.1}m/s  ground {:.1}m ASL {:.0}Pa bias {:.3}m/s²",
            transition.timestamp_us as f64 / 1_000_000.0,
            transition.from,
            transition.to,
            record.altitude_agl,
            record.velocity,
            record.ground_altitude_asl,
            record.ground_pressure,
            record.accelerometer_bias
        );
    }
    if summary.unreadable_pages > 0 {
        println!("{} unreadable pages", summary.unreadable_pages);
    }
}

pub fn reformat(args: &ReformatCli) -> Result<RecoveryReport> {
    let backend = existing_image(&args.image_path)?;
    let (mut writer, report) = StorageWriter::open(backend, StdClock::new(), StorageConfig::default())
        .map_err(|e| anyhow!("failed to open {}: {:?}", args.image_path.display(), e))?;
    if report.metadata.protected {
        warn!("erasing a protected flight record");
    }
    writer
        .reformat()
        .map_err(|e| anyhow!("failed to erase {}: {:?}", args.image_path.display(), e))?;
    Ok(report)
}
