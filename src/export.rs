use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, UInt32Array, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::info;
use parquet::arrow::ArrowWriter;
use serde::Serialize;

use crate::data::model::{Condition, InfectionStatus, TrialTable};
use crate::data::PipelineOutput;
use crate::error::{PipelineError, Result};
use crate::summary::{GroupSummary, Response};
use crate::theme::ReportTheme;

/// File format of the exported analysis tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Csv,
    Parquet,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Parquet => "parquet",
            ExportFormat::Json => "json",
        }
    }
}

// ---------------------------------------------------------------------------
// Flat row – what the model-fitting stage reads
// ---------------------------------------------------------------------------

/// One exported table row. `time_level` / `temp_level` are the 0-based
/// positions in the table's ordered level sets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialRow<'a> {
    pub week: &'a str,
    pub crayfish_id: &'a str,
    pub time: u32,
    pub time_level: usize,
    pub temp: f64,
    pub temp_level: usize,
    pub species: &'a str,
    pub infection_status: InfectionStatus,
    pub condition: Condition,
    pub snail_density: u32,
    pub snails_remaining: u32,
    pub dead_snails: u32,
    pub snails_out: Option<u32>,
    pub snails_under_shelter: Option<u32>,
    pub weight: Option<f64>,
    pub berried: Option<bool>,
    pub consumption_all: i64,
    pub available_snails: i64,
    pub p_consumed: Option<f64>,
    pub unavailable_snails: Option<u32>,
    pub p_unavailable: Option<f64>,
}

/// Flatten a table into export rows, in table order.
pub fn trial_rows(table: &TrialTable) -> Vec<TrialRow<'_>> {
    table
        .rows
        .iter()
        .map(|r| {
            let t = &r.trial;
            TrialRow {
                week: &t.key.week,
                crayfish_id: &t.key.crayfish_id,
                time: t.time,
                time_level: table.time_level(t.time).unwrap_or_default(),
                temp: t.temp.0,
                temp_level: table.temp_level(t.temp).unwrap_or_default(),
                species: &t.species.0,
                infection_status: t.infection_status,
                condition: t.condition,
                snail_density: t.snail_density,
                snails_remaining: t.snails_remaining,
                dead_snails: t.dead_snails,
                snails_out: t.snails_out,
                snails_under_shelter: t.snails_under_shelter,
                weight: r.weight,
                berried: r.berried,
                consumption_all: r.derived.consumption_all,
                available_snails: r.derived.available_snails,
                p_consumed: r.derived.p_consumed,
                unavailable_snails: r.derived.unavailable_snails,
                p_unavailable: r.derived.p_unavailable,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

/// Serialize `rows` as CSV with a header row. Undefined values are empty cells.
pub fn write_csv<W: Write, S: Serialize>(writer: W, rows: &[S]) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    for row in rows {
        out.serialize(row)?;
    }
    out.flush().map_err(csv::Error::from)?;
    Ok(())
}

pub fn write_json<W: Write, S: Serialize + ?Sized>(writer: W, value: &S) -> Result<()> {
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| PipelineError::io(path, e))
}

/// Write one trial table to `path` in `format`.
pub fn write_table(table: &TrialTable, path: &Path, format: ExportFormat) -> Result<()> {
    match format {
        ExportFormat::Csv => write_csv(create(path)?, &trial_rows(table)),
        ExportFormat::Json => write_json(create(path)?, &trial_rows(table)),
        ExportFormat::Parquet => write_parquet(trial_batch(table)?, path),
    }
}

/// Write the group summaries to `path` in `format`.
pub fn write_summary(summary: &[GroupSummary], path: &Path, format: ExportFormat) -> Result<()> {
    match format {
        ExportFormat::Csv => write_csv(create(path)?, summary),
        ExportFormat::Json => write_json(create(path)?, summary),
        ExportFormat::Parquet => write_parquet(summary_batch(summary)?, path),
    }
}

fn write_parquet(batch: RecordBatch, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Arrow record batches
// ---------------------------------------------------------------------------

fn trial_batch(table: &TrialTable) -> Result<RecordBatch> {
    let rows = trial_rows(table);

    let schema = Arc::new(Schema::new(vec![
        Field::new("week", DataType::Utf8, false),
        Field::new("crayfish_id", DataType::Utf8, false),
        Field::new("time", DataType::UInt32, false),
        Field::new("time_level", DataType::UInt64, false),
        Field::new("temp", DataType::Float64, false),
        Field::new("temp_level", DataType::UInt64, false),
        Field::new("species", DataType::Utf8, false),
        Field::new("infection_status", DataType::Utf8, false),
        Field::new("condition", DataType::Utf8, false),
        Field::new("snail_density", DataType::UInt32, false),
        Field::new("snails_remaining", DataType::UInt32, false),
        Field::new("dead_snails", DataType::UInt32, false),
        Field::new("snails_out", DataType::UInt32, true),
        Field::new("snails_under_shelter", DataType::UInt32, true),
        Field::new("weight", DataType::Float64, true),
        Field::new("berried", DataType::Boolean, true),
        Field::new("consumption_all", DataType::Int64, false),
        Field::new("available_snails", DataType::Int64, false),
        Field::new("p_consumed", DataType::Float64, true),
        Field::new("unavailable_snails", DataType::UInt32, true),
        Field::new("p_unavailable", DataType::Float64, true),
    ]));

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(rows.iter().map(|r| r.week).collect::<Vec<_>>())),
        Arc::new(StringArray::from(rows.iter().map(|r| r.crayfish_id).collect::<Vec<_>>())),
        Arc::new(UInt32Array::from(rows.iter().map(|r| r.time).collect::<Vec<_>>())),
        Arc::new(UInt64Array::from(rows.iter().map(|r| r.time_level as u64).collect::<Vec<_>>())),
        Arc::new(Float64Array::from(rows.iter().map(|r| r.temp).collect::<Vec<_>>())),
        Arc::new(UInt64Array::from(rows.iter().map(|r| r.temp_level as u64).collect::<Vec<_>>())),
        Arc::new(StringArray::from(rows.iter().map(|r| r.species).collect::<Vec<_>>())),
        Arc::new(StringArray::from(
            rows.iter().map(|r| r.infection_status.to_string()).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            rows.iter().map(|r| r.condition.to_string()).collect::<Vec<_>>(),
        )),
        Arc::new(UInt32Array::from(rows.iter().map(|r| r.snail_density).collect::<Vec<_>>())),
        Arc::new(UInt32Array::from(rows.iter().map(|r| r.snails_remaining).collect::<Vec<_>>())),
        Arc::new(UInt32Array::from(rows.iter().map(|r| r.dead_snails).collect::<Vec<_>>())),
        Arc::new(UInt32Array::from(rows.iter().map(|r| r.snails_out).collect::<Vec<_>>())),
        Arc::new(UInt32Array::from(
            rows.iter().map(|r| r.snails_under_shelter).collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(rows.iter().map(|r| r.weight).collect::<Vec<_>>())),
        Arc::new(BooleanArray::from(rows.iter().map(|r| r.berried).collect::<Vec<_>>())),
        Arc::new(Int64Array::from(rows.iter().map(|r| r.consumption_all).collect::<Vec<_>>())),
        Arc::new(Int64Array::from(rows.iter().map(|r| r.available_snails).collect::<Vec<_>>())),
        Arc::new(Float64Array::from(rows.iter().map(|r| r.p_consumed).collect::<Vec<_>>())),
        Arc::new(UInt32Array::from(
            rows.iter().map(|r| r.unavailable_snails).collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(rows.iter().map(|r| r.p_unavailable).collect::<Vec<_>>())),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}

fn summary_batch(summary: &[GroupSummary]) -> Result<RecordBatch> {
    let response = |s: &GroupSummary| match s.response {
        Response::Consumed => "consumed",
        Response::Unavailable => "unavailable",
    };

    let schema = Arc::new(Schema::new(vec![
        Field::new("response", DataType::Utf8, false),
        Field::new("condition", DataType::Utf8, false),
        Field::new("species", DataType::Utf8, false),
        Field::new("infection_status", DataType::Utf8, false),
        Field::new("temp", DataType::Float64, false),
        Field::new("time", DataType::UInt32, false),
        Field::new("n", DataType::UInt64, false),
        Field::new("n_defined", DataType::UInt64, false),
        Field::new("count_total", DataType::Int64, false),
        Field::new("available_total", DataType::Int64, false),
        Field::new("mean", DataType::Float64, true),
        Field::new("sd", DataType::Float64, true),
        Field::new("se", DataType::Float64, true),
    ]));

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(summary.iter().map(response).collect::<Vec<_>>())),
        Arc::new(StringArray::from(
            summary.iter().map(|s| s.condition.to_string()).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            summary.iter().map(|s| s.species.0.as_str()).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            summary.iter().map(|s| s.infection_status.to_string()).collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(summary.iter().map(|s| s.temp.0).collect::<Vec<_>>())),
        Arc::new(UInt32Array::from(summary.iter().map(|s| s.time).collect::<Vec<_>>())),
        Arc::new(UInt64Array::from(summary.iter().map(|s| s.n as u64).collect::<Vec<_>>())),
        Arc::new(UInt64Array::from(
            summary.iter().map(|s| s.n_defined as u64).collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(summary.iter().map(|s| s.count_total).collect::<Vec<_>>())),
        Arc::new(Int64Array::from(
            summary.iter().map(|s| s.available_total).collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(summary.iter().map(|s| s.mean).collect::<Vec<_>>())),
        Arc::new(Float64Array::from(summary.iter().map(|s| s.sd).collect::<Vec<_>>())),
        Arc::new(Float64Array::from(summary.iter().map(|s| s.se).collect::<Vec<_>>())),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}

// ---------------------------------------------------------------------------
// Whole run
// ---------------------------------------------------------------------------

/// Write `all_data`, `exp_data`, `r2_data`, `summary`, `run_report.json` and
/// `theme.json` into `out_dir`. Returns the paths written.
pub fn export_run(
    output: &PipelineOutput,
    summary: &[GroupSummary],
    theme: &ReportTheme,
    out_dir: &Path,
    format: ExportFormat,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir).map_err(|e| PipelineError::io(out_dir, e))?;
    let ext = format.extension();
    let mut written = Vec::new();

    for (name, table) in [
        ("all_data", &output.all_data),
        ("exp_data", &output.exp_data),
        ("r2_data", &output.r2_data),
    ] {
        let path = out_dir.join(format!("{name}.{ext}"));
        write_table(table, &path, format)?;
        info!("wrote {} rows to {}", table.len(), path.display());
        written.push(path);
    }

    let path = out_dir.join(format!("summary.{ext}"));
    write_summary(summary, &path, format)?;
    written.push(path);

    let path = out_dir.join("run_report.json");
    write_json(create(&path)?, &output.report)?;
    written.push(path);

    let path = out_dir.join("theme.json");
    write_json(create(&path)?, theme)?;
    written.push(path);

    Ok(written)
}
