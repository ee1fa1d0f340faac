use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::model::{CrayfishKey, CrayfishRecord, SnailTrialRecord};
use super::normalize::{
    normalize_condition, parse_berried, parse_flag, parse_infection_status, parse_temperature,
    SpeciesMap,
};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

pub const CRAYFISH_TABLE: &str = "crayfish";
pub const TRIALS_TABLE: &str = "snail trials";

pub const CRAYFISH_COLUMNS: &[&str] = &["week", "crayfish_id", "weight", "berried"];

pub const TRIAL_COLUMNS: &[&str] = &[
    "week",
    "crayfish_id",
    "time",
    "snail_density",
    "snails_remaining",
    "dead_snails",
    "snail_species",
    "infection_status",
    "temp",
    "condition",
    "dodgey_remove",
    "molt",
];

/// Behaviour counts, recorded in round 2 only. The columns may be absent.
pub const BEHAVIOUR_COLUMNS: &[&str] = &["snails_out", "snails_under_shelter"];

/// Which columns of a sheet reach the typed records. Every other column
/// (start_time, end_time, collector_name, notes, ...) is pruned.
struct Sheet {
    table: &'static str,
    required: &'static [&'static str],
    optional: &'static [&'static str],
}

impl Sheet {
    fn carries(&self, column: &str) -> bool {
        self.required.contains(&column) || self.optional.contains(&column)
    }
}

const CRAYFISH_SHEET: Sheet = Sheet {
    table: CRAYFISH_TABLE,
    required: CRAYFISH_COLUMNS,
    optional: &[],
};

const TRIAL_SHEET: Sheet = Sheet {
    table: TRIALS_TABLE,
    required: TRIAL_COLUMNS,
    optional: BEHAVIOUR_COLUMNS,
};

// ---------------------------------------------------------------------------
// Raw rows – one CSV line, untyped
// ---------------------------------------------------------------------------

/// A crayfish sheet line as written in the source file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCrayfishRow {
    pub week: String,
    pub crayfish_id: String,
    pub weight: Option<String>,
    pub berried: Option<String>,
}

/// A snail trial sheet line as written in the source file. The behaviour
/// columns may be missing from the header entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTrialRow {
    pub week: String,
    pub crayfish_id: String,
    pub time: Option<String>,
    pub snail_density: Option<String>,
    pub snails_remaining: Option<String>,
    pub dead_snails: Option<String>,
    #[serde(default)]
    pub snails_out: Option<String>,
    #[serde(default)]
    pub snails_under_shelter: Option<String>,
    pub snail_species: Option<String>,
    pub infection_status: Option<String>,
    pub temp: Option<String>,
    pub condition: Option<String>,
    pub dodgey_remove: Option<String>,
    pub molt: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub collector_name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Per-row problems
// ---------------------------------------------------------------------------

/// A source line that could not be turned into a typed record. The line is
/// skipped; loading carries on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowIssue {
    pub table: &'static str,
    /// Line in the source file (the header is line 1).
    pub line: usize,
    pub column: String,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for RowIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} line {}: column '{}' value '{}': {}",
            self.table, self.line, self.column, self.value, self.reason
        )
    }
}

/// Typed records plus the lines that were skipped.
#[derive(Debug, Clone)]
pub struct Loaded<T> {
    pub records: Vec<T>,
    pub issues: Vec<RowIssue>,
}

impl<T> Loaded<T> {
    pub fn skipped(&self) -> usize {
        self.issues.len()
    }
}

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load the crayfish attribute sheet. Dispatch by extension.
pub fn load_crayfish(path: &Path) -> Result<Loaded<CrayfishRecord>> {
    check_extension(path)?;
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    read_crayfish(file)
}

/// Load the snail trial sheet. Dispatch by extension.
pub fn load_trials(path: &Path, config: &PipelineConfig) -> Result<Loaded<SnailTrialRecord>> {
    check_extension(path)?;
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    read_trials(file, config)
}

fn check_extension(path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "csv" => Ok(()),
        other => Err(PipelineError::UnsupportedFormat(format!(
            "{}: expected a .csv source, got .{other}",
            path.display()
        ))),
    }
}

pub fn read_crayfish<R: Read>(source: R) -> Result<Loaded<CrayfishRecord>> {
    read_sheet(source, &CRAYFISH_SHEET, parse_crayfish)
}

pub fn read_trials<R: Read>(source: R, config: &PipelineConfig) -> Result<Loaded<SnailTrialRecord>> {
    let species = SpeciesMap::new(&config.species);
    read_sheet(source, &TRIAL_SHEET, |raw: &RawTrialRow, line| {
        parse_trial(raw, line, &species, &config.control_marker)
    })
}

/// Shared read loop. Only the header and I/O failures are fatal; a ragged
/// line or a bad cell becomes a [`RowIssue`] and reading carries on.
fn read_sheet<R, Raw, T, F>(source: R, sheet: &Sheet, mut parse: F) -> Result<Loaded<T>>
where
    R: Read,
    Raw: DeserializeOwned,
    F: FnMut(&Raw, usize) -> std::result::Result<T, RowIssue>,
{
    let mut reader = csv::Reader::from_reader(source);
    let headers = reader.headers()?.clone();
    require_columns(sheet.table, &headers, sheet.required)?;

    let pruned: Vec<&str> = headers.iter().filter(|h| !sheet.carries(h)).collect();
    if !pruned.is_empty() {
        debug!("{}: dropping columns {pruned:?}", sheet.table);
    }

    let mut records = Vec::new();
    let mut issues = Vec::new();

    for result in reader.byte_records() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                if let csv::ErrorKind::UnequalLengths {
                    pos,
                    expected_len,
                    len,
                } = e.kind()
                {
                    issues.push(RowIssue {
                        table: sheet.table,
                        line: pos.as_ref().map(|p| p.line() as usize).unwrap_or(0),
                        column: String::new(),
                        value: String::new(),
                        reason: format!("expected {expected_len} fields, found {len}"),
                    });
                    continue;
                }
                return Err(e.into());
            }
        };
        let line = record.position().map(|p| p.line() as usize).unwrap_or(0);

        let parsed = decode(sheet, &headers, &record, line)
            .and_then(|fields| {
                fields
                    .deserialize::<Raw>(Some(&headers))
                    .map_err(|e| RowIssue {
                        table: sheet.table,
                        line,
                        column: String::new(),
                        value: String::new(),
                        reason: e.to_string(),
                    })
            })
            .and_then(|raw| parse(&raw, line));
        match parsed {
            Ok(rec) => records.push(rec),
            Err(issue) => issues.push(issue),
        }
    }

    report(sheet.table, records.len(), &issues);
    Ok(Loaded { records, issues })
}

/// Carried columns must be UTF-8; pruned ones are decoded lossily and can
/// never reject a row.
fn decode(
    sheet: &Sheet,
    headers: &csv::StringRecord,
    record: &csv::ByteRecord,
    line: usize,
) -> std::result::Result<csv::StringRecord, RowIssue> {
    let mut fields = csv::StringRecord::with_capacity(record.as_slice().len(), record.len());
    for (i, bytes) in record.iter().enumerate() {
        let column = headers.get(i).unwrap_or("");
        match std::str::from_utf8(bytes) {
            Ok(text) => fields.push_field(text),
            Err(_) if sheet.carries(column) => {
                return Err(RowIssue {
                    table: sheet.table,
                    line,
                    column: column.to_string(),
                    value: String::from_utf8_lossy(bytes).into_owned(),
                    reason: "not valid UTF-8".to_string(),
                });
            }
            Err(_) => fields.push_field(&String::from_utf8_lossy(bytes)),
        }
    }
    Ok(fields)
}

fn require_columns(table: &'static str, headers: &csv::StringRecord, required: &[&str]) -> Result<()> {
    for column in required {
        if !headers.iter().any(|h| h == *column) {
            return Err(PipelineError::MissingColumn {
                table,
                column: column.to_string(),
            });
        }
    }
    Ok(())
}

fn report(table: &str, loaded: usize, issues: &[RowIssue]) {
    debug!("{table}: loaded {loaded} rows");
    for issue in issues {
        warn!("skipping {issue}");
    }
    if !issues.is_empty() {
        warn!("{table}: skipped {} malformed rows", issues.len());
    }
}

// ---------------------------------------------------------------------------
// Raw → typed
// ---------------------------------------------------------------------------

/// Builds [`RowIssue`]s for one source line.
struct RowContext {
    table: &'static str,
    line: usize,
}

impl RowContext {
    fn issue(&self, column: &str, value: Option<&str>, reason: &str) -> RowIssue {
        RowIssue {
            table: self.table,
            line: self.line,
            column: column.to_string(),
            value: value.unwrap_or("").to_string(),
            reason: reason.to_string(),
        }
    }

    fn text<'a>(&self, column: &str, value: &'a str) -> std::result::Result<&'a str, RowIssue> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(self.issue(column, Some(value), "required value is empty"));
        }
        Ok(trimmed)
    }

    fn count(&self, column: &str, value: Option<&str>) -> std::result::Result<u32, RowIssue> {
        match value.map(str::trim) {
            None | Some("") => Err(self.issue(column, value, "required count is empty")),
            Some(s) => parse_count(s).ok_or_else(|| {
                self.issue(column, value, "not a non-negative whole number")
            }),
        }
    }

    fn optional_count(
        &self,
        column: &str,
        value: Option<&str>,
    ) -> std::result::Result<Option<u32>, RowIssue> {
        match value.map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) if s.eq_ignore_ascii_case("na") => Ok(None),
            Some(s) => parse_count(s)
                .map(Some)
                .ok_or_else(|| self.issue(column, value, "not a non-negative whole number")),
        }
    }
}

/// Counts are sometimes exported as `12.0`; accept those but nothing
/// fractional or negative.
fn parse_count(s: &str) -> Option<u32> {
    if let Ok(n) = s.parse::<u32>() {
        return Some(n);
    }
    let f = s.parse::<f64>().ok()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 {
        Some(f as u32)
    } else {
        None
    }
}

fn parse_crayfish(raw: &RawCrayfishRow, line: usize) -> std::result::Result<CrayfishRecord, RowIssue> {
    let ctx = RowContext {
        table: CRAYFISH_TABLE,
        line,
    };
    let week = ctx.text("week", &raw.week)?;
    let crayfish_id = ctx.text("crayfish_id", &raw.crayfish_id)?;
    let weight_raw = raw.weight.as_deref();
    let weight = match weight_raw.map(str::trim) {
        None | Some("") => None,
        Some(s) if s.eq_ignore_ascii_case("na") => None,
        Some(s) => Some(
            s.parse::<f64>()
                .ok()
                .filter(|w| w.is_finite() && *w > 0.0)
                .ok_or_else(|| ctx.issue("weight", weight_raw, "weight must be a positive number"))?,
        ),
    };
    Ok(CrayfishRecord {
        line,
        key: CrayfishKey::new(week, crayfish_id),
        weight,
        berried: parse_berried(raw.berried.as_deref()),
    })
}

fn parse_trial(
    raw: &RawTrialRow,
    line: usize,
    species: &SpeciesMap,
    control_marker: &str,
) -> std::result::Result<SnailTrialRecord, RowIssue> {
    let ctx = RowContext {
        table: TRIALS_TABLE,
        line,
    };
    let week = ctx.text("week", &raw.week)?;
    let crayfish_id = ctx.text("crayfish_id", &raw.crayfish_id)?;

    let time = ctx.count("time", raw.time.as_deref())?;
    let snail_density = ctx.count("snail_density", raw.snail_density.as_deref())?;
    let snails_remaining = ctx.count("snails_remaining", raw.snails_remaining.as_deref())?;
    let dead_snails = ctx.count("dead_snails", raw.dead_snails.as_deref())?;
    if dead_snails > snail_density {
        return Err(ctx.issue(
            "dead_snails",
            raw.dead_snails.as_deref(),
            "more dead snails than the initial density",
        ));
    }
    let snails_out = ctx.optional_count("snails_out", raw.snails_out.as_deref())?;
    let snails_under_shelter =
        ctx.optional_count("snails_under_shelter", raw.snails_under_shelter.as_deref())?;
    if let (Some(out), Some(shelter)) = (snails_out, snails_under_shelter) {
        let alive = snails_remaining.min(snail_density - dead_snails);
        if u64::from(out) + u64::from(shelter) > u64::from(alive) {
            return Err(ctx.issue(
                "snails_out",
                raw.snails_out.as_deref(),
                "snails out plus under shelter exceed the snails left alive",
            ));
        }
    }

    let species_raw = raw.snail_species.as_deref();
    let species = species_raw
        .and_then(|s| species.normalize(s))
        .ok_or_else(|| ctx.issue("snail_species", species_raw, "unknown species code"))?;

    let infection_raw = raw.infection_status.as_deref();
    let infection_status = parse_infection_status(infection_raw.unwrap_or(""))
        .ok_or_else(|| ctx.issue("infection_status", infection_raw, "unknown infection status"))?;

    let temp_raw = raw.temp.as_deref();
    let temp = temp_raw
        .and_then(parse_temperature)
        .ok_or_else(|| ctx.issue("temp", temp_raw, "not a temperature"))?;

    let condition_raw = raw.condition.as_deref();
    let condition = ctx.text("condition", condition_raw.unwrap_or(""))?;

    Ok(SnailTrialRecord {
        line,
        key: CrayfishKey::new(week, crayfish_id),
        time,
        snail_density,
        snails_remaining,
        dead_snails,
        snails_out,
        snails_under_shelter,
        species,
        infection_status,
        temp,
        condition: normalize_condition(condition, control_marker),
        dodgey_remove: parse_flag(raw.dodgey_remove.as_deref()),
        molt: parse_flag(raw.molt.as_deref()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{Condition, InfectionStatus, Temperature};

    const TRIAL_HEADER: &str = "week,crayfish_id,time,snail_density,snails_remaining,dead_snails,snails_out,snails_under_shelter,snail_species,infection_status,temp,condition,dodgey_remove,molt,start_time,notes";

    fn trials(body: &str) -> Result<Loaded<SnailTrialRecord>> {
        let text = format!("{TRIAL_HEADER}\n{body}");
        read_trials(text.as_bytes(), &PipelineConfig::default())
    }

    #[test]
    fn crayfish_rows_parse() {
        let text = "week,crayfish_id,weight,berried,sex\n1,CF01,7.2,N,F\n1,CF02,5.0,Y,F\n";
        let loaded = read_crayfish(text.as_bytes()).unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[0].key, CrayfishKey::new("1", "CF01"));
        assert_eq!(loaded.records[0].weight, Some(7.2));
        assert_eq!(loaded.records[1].berried, Some(true));
        assert_eq!(loaded.skipped(), 0);
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let text = "week,crayfish_id,berried\n1,CF01,N\n";
        let err = read_crayfish(text.as_bytes()).unwrap_err();
        match err {
            PipelineError::MissingColumn { table, column } => {
                assert_eq!(table, CRAYFISH_TABLE);
                assert_eq!(column, "weight");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn trial_row_parses_and_normalizes() {
        let loaded = trials("2,CF03,24,12,8,1,2,1,P,infected,21C,crayfish_infected,N,N,09:00,ok\n").unwrap();
        let rec = &loaded.records[0];
        assert_eq!(rec.time, 24);
        assert_eq!(rec.snails_out, Some(2));
        assert_eq!(rec.snails_under_shelter, Some(1));
        assert_eq!(rec.species.0, "Physa acuta");
        assert_eq!(rec.infection_status, InfectionStatus::Infected);
        assert_eq!(rec.temp, Temperature(21.0));
        assert_eq!(rec.condition, Condition::Experimental);
        assert!(rec.has_behaviour());
        assert_eq!(rec.line, 2);
    }

    #[test]
    fn behaviour_columns_are_optional() {
        let text = "week,crayfish_id,time,snail_density,snails_remaining,dead_snails,snail_species,infection_status,temp,condition,dodgey_remove,molt\n\
                    1,CTL1,12,12,12,0,H,NA,15,control,N,N\n";
        let loaded = read_trials(text.as_bytes(), &PipelineConfig::default()).unwrap();
        let rec = &loaded.records[0];
        assert_eq!(rec.snails_out, None);
        assert!(!rec.has_behaviour());
        assert_eq!(rec.condition, Condition::Control);
    }

    #[test]
    fn bad_rows_are_reported_not_fatal() {
        let loaded = trials(
            "1,CF01,12,12,ten,0,,,P,NA,15,crayfish,N,N,,\n\
             1,CF01,24,12,9,0,,,P,NA,15,crayfish,N,N,,\n\
             1,CF02,12,12,9,13,,,P,NA,15,crayfish,N,N,,\n\
             1,CF03,12,12,9,0,,,Z,NA,15,crayfish,N,N,,\n",
        )
        .unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.skipped(), 3);
        assert_eq!(loaded.issues[0].column, "snails_remaining");
        assert_eq!(loaded.issues[0].value, "ten");
        assert_eq!(loaded.issues[0].line, 2);
        assert_eq!(loaded.issues[1].column, "dead_snails");
        assert_eq!(loaded.issues[2].column, "snail_species");
    }

    #[test]
    fn crayfish_without_weight_keeps_berried() {
        let text = "week,crayfish_id,weight,berried\n1,CF01,,Y\n1,CF02,NA,N\n1,CF03,-2,N\n";
        let loaded = read_crayfish(text.as_bytes()).unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[0].weight, None);
        assert_eq!(loaded.records[0].berried, Some(true));
        assert_eq!(loaded.records[1].weight, None);
        assert_eq!(loaded.skipped(), 1);
        assert_eq!(loaded.issues[0].column, "weight");
        assert_eq!(loaded.issues[0].value, "-2");
    }

    #[test]
    fn behaviour_counts_beyond_live_snails_are_rejected() {
        let loaded = trials(
            "1,c1,12,12,10,0,4294967295,1,P,infected,21,crayfish,N,N,,\n\
             1,c1,24,12,5,0,4,2,P,infected,21,crayfish,N,N,,\n\
             1,c1,36,12,5,0,3,2,P,infected,21,crayfish,N,N,,\n",
        )
        .unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].time, 36);
        assert_eq!(loaded.skipped(), 2);
        assert!(loaded.issues.iter().all(|i| i.column == "snails_out"));
        assert_eq!(loaded.issues[0].value, "4294967295");
    }

    #[test]
    fn invalid_utf8_in_a_pruned_column_is_ignored() {
        let mut text = format!("{TRIAL_HEADER}\n1,c1,12,12,10,0,,,P,NA,21,crayfish,N,N,,ok\n").into_bytes();
        text.extend_from_slice(b"1,c1,24,12,9,0,,,P,NA,21,crayfish,N,N,,water 21\xB0C\n");
        let loaded = read_trials(text.as_slice(), &PipelineConfig::default()).unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.skipped(), 0);
    }

    #[test]
    fn invalid_utf8_in_a_carried_column_is_a_row_issue() {
        let mut text = format!("{TRIAL_HEADER}\n").into_bytes();
        text.extend_from_slice(b"1,c1,12,12,10,0,,,P,NA,21,cr\xE9yfish,N,N,,\n");
        text.extend_from_slice(b"1,c1,24,12,9,0,,,P,NA,21,crayfish,N,N,,\n");
        let loaded = read_trials(text.as_slice(), &PipelineConfig::default()).unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.issues[0].column, "condition");
        assert_eq!(loaded.issues[0].line, 2);
    }

    #[test]
    fn ragged_line_is_a_row_issue() {
        let loaded = trials(
            "1,c1,12,12,10,0,,,P,NA,21,crayfish,N,N,,\n\
             1,c1,24,12,9\n\
             1,c1,36,12,9,0,,,P,NA,21,crayfish,N,N,,\n",
        )
        .unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.skipped(), 1);
        assert!(loaded.issues[0].reason.contains("fields"));
    }

    #[test]
    fn whole_number_floats_are_counts() {
        assert_eq!(parse_count("12"), Some(12));
        assert_eq!(parse_count("12.0"), Some(12));
        assert_eq!(parse_count("12.5"), None);
        assert_eq!(parse_count("-1"), None);
    }

    #[test]
    fn non_csv_extension_is_rejected() {
        let err = load_crayfish(Path::new("crayfish.xlsx")).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
    }
}
