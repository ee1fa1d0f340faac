use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use predation_trials::config::PipelineConfig;
use predation_trials::sample;

/// Write a synthetic pair of source sheets with the canonical design.
#[derive(Parser, Debug)]
#[command(name = "generate-sample", version)]
struct Args {
    /// Directory to write the two CSV files into
    #[arg(long, default_value = "sample_data")]
    out_dir: PathBuf,

    /// PRNG seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Pipeline configuration (file names, pilot week)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let data = sample::generate(args.seed, &config);
    let (crayfish, trials) = data
        .write_to_dir(&args.out_dir, &config)
        .context("writing sample sheets")?;

    println!(
        "Wrote {} crayfish rows to {} and {} trial rows to {}",
        data.crayfish.len(),
        crayfish.display(),
        data.trials.len(),
        trials.display()
    );
    Ok(())
}
