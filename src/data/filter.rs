use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use log::info;
use serde::Serialize;

use super::model::{Condition, CrayfishKey, JoinedTrial};
use crate::config::PipelineConfig;

// ---------------------------------------------------------------------------
// Exclusion rules
// ---------------------------------------------------------------------------

/// Why a row is left out of the analysis tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Time 0 is the set-up observation, not a trial outcome.
    BaselineTime,
    PilotWeek,
    Dodgey,
    Molt,
    NegativeConsumption,
    /// Listed in the configured override table.
    Override,
}

impl ExclusionReason {
    pub const ALL: [ExclusionReason; 6] = [
        ExclusionReason::BaselineTime,
        ExclusionReason::PilotWeek,
        ExclusionReason::Dodgey,
        ExclusionReason::Molt,
        ExclusionReason::NegativeConsumption,
        ExclusionReason::Override,
    ];
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExclusionReason::BaselineTime => "time 0",
            ExclusionReason::PilotWeek => "pilot week",
            ExclusionReason::Dodgey => "marked dodgey",
            ExclusionReason::Molt => "crayfish molted",
            ExclusionReason::NegativeConsumption => "negative consumption",
            ExclusionReason::Override => "manual override",
        };
        write!(f, "{s}")
    }
}

/// The exclusion rules. A row is kept only if it breaks none of them, so
/// the order the rules are checked in never matters.
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    pilot_week: String,
    /// Override table: crayfish key → excluded observation times.
    overrides: HashMap<CrayfishKey, BTreeSet<u32>>,
}

impl ExclusionFilter {
    pub fn new(pilot_week: impl Into<String>) -> Self {
        Self {
            pilot_week: pilot_week.into(),
            overrides: HashMap::new(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut filter = Self::new(config.pilot_week.clone());
        for o in &config.exclusions {
            filter.exclude_row(CrayfishKey::new(o.week.clone(), o.crayfish_id.clone()), o.time);
        }
        filter
    }

    /// Drop the observation of `key` at `time` regardless of its values.
    pub fn exclude_row(&mut self, key: CrayfishKey, time: u32) {
        self.overrides.entry(key).or_default().insert(time);
    }

    /// Whether `row` breaks `rule`.
    pub fn violates(&self, rule: ExclusionReason, row: &JoinedTrial) -> bool {
        let t = &row.trial;
        match rule {
            ExclusionReason::BaselineTime => t.time == 0,
            ExclusionReason::PilotWeek => t.key.week == self.pilot_week,
            ExclusionReason::Dodgey => t.dodgey_remove,
            ExclusionReason::Molt => t.molt,
            ExclusionReason::NegativeConsumption => row.derived.consumption_all < 0,
            ExclusionReason::Override => {
                let (key, time) = t.row_id();
                self.overrides
                    .get(key)
                    .is_some_and(|times| times.contains(&time))
            }
        }
    }

    /// Every rule `row` breaks; empty for a retained row.
    pub fn reasons(&self, row: &JoinedTrial) -> Vec<ExclusionReason> {
        ExclusionReason::ALL
            .into_iter()
            .filter(|rule| self.violates(*rule, row))
            .collect()
    }

    pub fn keeps(&self, row: &JoinedTrial) -> bool {
        ExclusionReason::ALL
            .iter()
            .all(|rule| !self.violates(*rule, row))
    }

    /// Split `rows` into the retained rows (order preserved) and an audit
    /// summary of what was removed.
    pub fn apply(&self, rows: Vec<JoinedTrial>) -> (Vec<JoinedTrial>, ExclusionSummary) {
        let mut summary = ExclusionSummary {
            examined: rows.len(),
            ..ExclusionSummary::default()
        };
        let mut kept = Vec::with_capacity(rows.len());

        for row in rows {
            let reasons = self.reasons(&row);
            if reasons.is_empty() {
                kept.push(row);
                continue;
            }
            for reason in reasons {
                *summary.by_reason.entry(reason).or_default() += 1;
            }
            *summary.removed_by_condition.entry(row.condition()).or_default() += 1;
            summary.removed += 1;
        }
        summary.retained = kept.len();

        info!(
            "exclusion filter kept {} of {} rows",
            summary.retained, summary.examined
        );
        for (reason, n) in &summary.by_reason {
            info!("  {n} rows excluded: {reason}");
        }
        (kept, summary)
    }
}

/// Audit counts from one [`ExclusionFilter::apply`] run. A row breaking
/// several rules counts once per rule in `by_reason` but once in `removed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExclusionSummary {
    pub examined: usize,
    pub retained: usize,
    pub removed: usize,
    pub by_reason: BTreeMap<ExclusionReason, usize>,
    pub removed_by_condition: BTreeMap<Condition, usize>,
}
