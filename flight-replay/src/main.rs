mod args;
mod config;
mod image;
mod replay;
mod sensor_log;

#[cfg(test)]
mod tests;

use anyhow::Result;
use args::{Cli, ModeSelect};
use clap::Parser;
use log::LevelFilter;

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    match cli.mode {
        ModeSelect::Replay(args) => {
            let summary = replay::replay(&args)?;
            replay::print_summary(&args.log_path, &summary);
        }
        ModeSelect::Dump(args) => {
            let summary = image::dump(&args)?;
            image::print_dump(&args.image_path, &summary);
        }
        ModeSelect::Reformat(args) => {
            let report = image::reformat(&args)?;
            println!(
                "erased {} records from {}",
                report.scan.record_count,
                args.image_path.display()
            );
        }
    }
    Ok(())
}
