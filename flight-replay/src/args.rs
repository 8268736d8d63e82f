use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use flight_core::MachineVariant;

#[derive(Parser, Debug)]
#[command(name = "Flight Replay")]
#[command(bin_name = "flight-replay")]
pub struct Cli {
    #[clap(subcommand)]
    pub mode: ModeSelect,
}

#[derive(Subcommand, Debug)]
pub enum ModeSelect {
    #[command(about = "run a csv sensor log through the flight computer into a storage image")]
    Replay(ReplayCli),

    #[command(about = "decode the flight record in a storage image")]
    Dump(DumpCli),

    #[command(about = "erase the flight record in a storage image, including a protected one")]
    Reformat(ReformatCli),
}

#[derive(Parser, Debug)]
pub struct ReplayCli {
    #[arg(help = "csv sensor log")]
    pub log_path: PathBuf,
    #[arg(help = "storage image, created erased if missing")]
    pub image_path: PathBuf,
    #[arg(long, help = "toml file with [profile] and [storage] tables")]
    pub config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = VariantArg::Burnout)]
    pub variant: VariantArg,
    #[arg(long, help = "log time in seconds to send the arm command at, defaults to the first sample")]
    pub arm_at: Option<f64>,
    #[arg(long, default_value_t = 16384)]
    pub capacity_pages: u32,
    #[arg(long, help = "write the per cycle vertical estimate to this csv file")]
    pub trace: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct DumpCli {
    pub image_path: PathBuf,
    #[arg(long, help = "write every stored sample to this csv file")]
    pub samples: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct ReformatCli {
    pub image_path: PathBuf,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantArg {
    /// Idle, Armed, PoweredAscent, Apogee, Descent, Landed
    Standard,
    /// Standard with a Coast phase after motor burnout
    Burnout,
}

impl From<VariantArg> for MachineVariant {
    fn from(variant: VariantArg) -> Self {
        match variant {
            VariantArg::Standard => MachineVariant::Standard,
            VariantArg::Burnout => MachineVariant::Burnout,
        }
    }
}
