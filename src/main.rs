use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use predation_trials::export::{self, ExportFormat};
use predation_trials::summary::{self, Response};
use predation_trials::theme::ReportTheme;
use predation_trials::{Pipeline, PipelineConfig};

/// Clean and join the predation trial sheets into analysis-ready tables.
#[derive(Parser, Debug)]
#[command(name = "predation-trials", version, about)]
struct Args {
    /// Directory holding the crayfish and snail-trial CSV sheets
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Where the analysis tables are written
    #[arg(long, default_value = "output")]
    out_dir: PathBuf,

    /// TOML configuration; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output table format
    #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
    format: ExportFormat,

    /// Fail when row counts differ from the expected design
    #[arg(long)]
    strict: bool,

    /// Debug-level logging (RUST_LOG still wins)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let pipeline = Pipeline::new(config).context("invalid configuration")?;
    let output = pipeline
        .run(&args.data_dir)
        .with_context(|| format!("processing sheets in {}", args.data_dir.display()))?;
    if args.strict {
        output.require_expected_cardinality()?;
    }

    let mut groups = summary::summarize(&output.all_data, Response::Consumed);
    groups.extend(summary::summarize(&output.r2_data, Response::Unavailable));
    let theme = ReportTheme::for_table(&output.all_data, &pipeline.config().theme);

    let written = export::export_run(&output, &groups, &theme, &args.out_dir, args.format)
        .with_context(|| format!("writing tables to {}", args.out_dir.display()))?;

    let report = &output.report;
    println!("raw:      {}", report.raw_counts);
    println!(
        "excluded: {} rows ({} skipped as unparseable)",
        report.exclusions.removed,
        report.skipped_rows.len()
    );
    println!("all_data: {}", report.filtered_counts);
    println!("exp_data: {} rows", report.exp_rows);
    println!("r2_data:  {} rows", report.r2_rows);
    for mismatch in &report.cardinality {
        println!("warning:  {mismatch}");
    }
    for path in written {
        println!("wrote {}", path.display());
    }
    Ok(())
}
