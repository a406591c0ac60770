use clap::Parser;
use std::error::Error;
use std::path::PathBuf;

use obstacle_analysis::{load_config, pack, PackConfig, ReferenceScheme};

/// Pack Open Ephys .continuous channels into one interleaved int16 .dat file.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Folder containing the .continuous files
    folder: PathBuf,
    /// YAML file with packing parameters; flags given here override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Processor id in the channel file names
    #[arg(long)]
    source: Option<String>,
    /// Channel name prefix
    #[arg(long)]
    prefix: Option<String>,
    /// Comma-separated channel numbers (default: every channel found)
    #[arg(long, value_delimiter = ',')]
    channels: Option<Vec<u32>>,
    /// Digital reference: none, ave, med, or a channel index
    #[arg(long)]
    reference: Option<ReferenceScheme>,
    /// Recording session number
    #[arg(long)]
    session: Option<String>,
    /// Expected sample rate (Hz)
    #[arg(long)]
    sample_rate: Option<f32>,
    /// Output file name inside the folder
    #[arg(long)]
    filename: Option<String>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config: PackConfig = match &args.config {
        Some(path) => load_config(path)?,
        None => PackConfig::default(),
    };
    config.folder = args.folder;
    if let Some(source) = args.source {
        config.source = source;
    }
    if let Some(prefix) = args.prefix {
        config.channel_prefix = prefix;
    }
    if args.channels.is_some() {
        config.channels = args.channels;
    }
    if let Some(reference) = args.reference {
        config.reference = reference;
    }
    if let Some(session) = args.session {
        config.session = session;
    }
    if let Some(sample_rate) = args.sample_rate {
        config.sample_rate = sample_rate;
    }
    if args.filename.is_some() {
        config.filename = args.filename;
    }

    let summary = pack(&config)?;
    println!(
        "Packed {} channels x {} samples into {}",
        summary.channels.len(),
        summary.num_samples,
        summary.output.display()
    );
    Ok(())
}
