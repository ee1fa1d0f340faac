use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// CrayfishKey – composite join key
// ---------------------------------------------------------------------------

/// Identifies one crayfish within one experimental run.
///
/// Equality and hashing are structural over both parts, so
/// `("1_2", "3")` and `("1", "2_3")` stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CrayfishKey {
    pub week: String,
    pub crayfish_id: String,
}

impl CrayfishKey {
    pub fn new(week: impl Into<String>, crayfish_id: impl Into<String>) -> Self {
        Self {
            week: week.into(),
            crayfish_id: crayfish_id.into(),
        }
    }
}

impl fmt::Display for CrayfishKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(week={}, crayfish_id={})", self.week, self.crayfish_id)
    }
}

// ---------------------------------------------------------------------------
// Categorical fields
// ---------------------------------------------------------------------------

/// Trial condition after normalization. Never anything but these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Control,
    Experimental,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Control => write!(f, "control"),
            Condition::Experimental => write!(f, "experimental"),
        }
    }
}

/// Parasite infection status of the snails. Round 1 never recorded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfectionStatus {
    Infected,
    Uninfected,
    NotApplicable,
}

impl fmt::Display for InfectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfectionStatus::Infected => write!(f, "infected"),
            InfectionStatus::Uninfected => write!(f, "uninfected"),
            InfectionStatus::NotApplicable => write!(f, "not_applicable"),
        }
    }
}

/// Canonical snail species label (already mapped from the raw code).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnailSpecies(pub String);

impl fmt::Display for SnailSpecies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trial temperature in °C, ordered numerically.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Temperature(pub f64);

// -- Manual Eq/Ord so temperatures can be factor levels in a BTreeSet --

impl Eq for Temperature {}

impl PartialOrd for Temperature {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Temperature {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::hash::Hash for Temperature {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Source records
// ---------------------------------------------------------------------------

/// One crayfish in one run, from the crayfish attribute table.
#[derive(Debug, Clone, PartialEq)]
pub struct CrayfishRecord {
    /// Line in the source file (the header is line 1).
    pub line: usize,
    pub key: CrayfishKey,
    /// Grams; `None` when the cell was empty or NA.
    pub weight: Option<f64>,
    pub berried: Option<bool>,
}

/// One observation of a snail trial at a given elapsed time.
#[derive(Debug, Clone, PartialEq)]
pub struct SnailTrialRecord {
    pub line: usize,
    pub key: CrayfishKey,
    /// Hours since the trial started.
    pub time: u32,
    pub snail_density: u32,
    pub snails_remaining: u32,
    pub dead_snails: u32,
    /// Round 2 only.
    pub snails_out: Option<u32>,
    /// Round 2 only.
    pub snails_under_shelter: Option<u32>,
    pub species: SnailSpecies,
    pub infection_status: InfectionStatus,
    pub temp: Temperature,
    pub condition: Condition,
    pub dodgey_remove: bool,
    pub molt: bool,
}

impl SnailTrialRecord {
    /// Identity of this observation: crayfish key plus elapsed time.
    pub fn row_id(&self) -> (&CrayfishKey, u32) {
        (&self.key, self.time)
    }

    /// Both behaviour counts were recorded (round 2 data).
    pub fn has_behaviour(&self) -> bool {
        self.snails_out.is_some() && self.snails_under_shelter.is_some()
    }
}

// ---------------------------------------------------------------------------
// JoinedTrial – trial row + crayfish attributes + derived metrics
// ---------------------------------------------------------------------------

/// Values computed from a trial's counts.
#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    /// Snails eaten. Negative only for bad source rows, which the
    /// exclusion filter removes.
    pub consumption_all: i64,
    /// Snails alive and available to be eaten.
    pub available_snails: i64,
    /// `None` when no snail survived to be available.
    pub p_consumed: Option<f64>,
    pub unavailable_snails: Option<u32>,
    pub p_unavailable: Option<f64>,
}

/// A trial row after the right join against the crayfish table.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedTrial {
    pub trial: SnailTrialRecord,
    /// Absent when no crayfish row matched (e.g. controls without a crayfish).
    pub weight: Option<f64>,
    pub berried: Option<bool>,
    pub derived: Derived,
}

impl JoinedTrial {
    pub fn condition(&self) -> Condition {
        self.trial.condition
    }
}

// ---------------------------------------------------------------------------
// TrialTable – an analysis-ready table with ordinal level sets
// ---------------------------------------------------------------------------

/// Rows in source order, plus the observed, numerically sorted levels of
/// the ordinal factors `temp` and `time`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialTable {
    pub rows: Vec<JoinedTrial>,
    pub temp_levels: Vec<Temperature>,
    pub time_levels: Vec<u32>,
}

impl TrialTable {
    /// Build level sets from the rows.
    pub fn from_rows(rows: Vec<JoinedTrial>) -> Self {
        let temps: BTreeSet<Temperature> = rows.iter().map(|r| r.trial.temp).collect();
        let times: BTreeSet<u32> = rows.iter().map(|r| r.trial.time).collect();
        TrialTable {
            rows,
            temp_levels: temps.into_iter().collect(),
            time_levels: times.into_iter().collect(),
        }
    }

    /// New table holding the rows that satisfy `keep`, order preserved.
    pub fn subset<F>(&self, mut keep: F) -> TrialTable
    where
        F: FnMut(&JoinedTrial) -> bool,
    {
        TrialTable::from_rows(self.rows.iter().filter(|r| keep(r)).cloned().collect())
    }

    /// Position of `temp` among the ordered temperature levels.
    pub fn temp_level(&self, temp: Temperature) -> Option<usize> {
        self.temp_levels.binary_search(&temp).ok()
    }

    /// Position of `time` among the ordered time levels.
    pub fn time_level(&self, time: u32) -> Option<usize> {
        self.time_levels.binary_search(&time).ok()
    }

    pub fn count_condition(&self, condition: Condition) -> usize {
        self.rows.iter().filter(|r| r.condition() == condition).count()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
