//! Consistency checks over the joined tables. Nothing here mutates data or
//! aborts on its own; callers decide what a failed check means.

use std::fmt;

use serde::Serialize;

use super::filter::ExclusionFilter;
use super::model::{Condition, TrialTable};
use crate::config::ExpectedCounts;

/// Row counts of a table split by condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConditionCounts {
    pub total: usize,
    pub experimental: usize,
    pub control: usize,
}

impl ConditionCounts {
    pub fn of(table: &TrialTable) -> Self {
        let control = table.count_condition(Condition::Control);
        Self {
            total: table.len(),
            experimental: table.len() - control,
            control,
        }
    }
}

impl fmt::Display for ConditionCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows ({} experimental + {} control)",
            self.total, self.experimental, self.control
        )
    }
}

/// One count that differs from what the canonical dataset produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardinalityMismatch {
    pub stage: &'static str,
    pub measure: &'static str,
    pub expected: usize,
    pub actual: usize,
}

impl fmt::Display for CardinalityMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: expected {}, found {}",
            self.stage, self.measure, self.expected, self.actual
        )
    }
}

/// Compare raw (joined, unfiltered) and filtered counts with `expected`.
/// Empty when everything matches.
pub fn check_cardinality(
    raw: ConditionCounts,
    filtered: ConditionCounts,
    expected: &ExpectedCounts,
) -> Vec<CardinalityMismatch> {
    let checks = [
        ("raw", "total", expected.raw_total, raw.total),
        ("raw", "experimental", expected.raw_experimental, raw.experimental),
        ("raw", "control", expected.raw_control, raw.control),
        (
            "filtered",
            "experimental",
            expected.filtered_experimental,
            filtered.experimental,
        ),
        ("filtered", "control", expected.filtered_control, filtered.control),
    ];
    checks
        .into_iter()
        .filter(|(_, _, e, a)| e != a)
        .map(|(stage, measure, expected, actual)| CardinalityMismatch {
            stage,
            measure,
            expected,
            actual,
        })
        .collect()
}

/// A retained row that breaks a row-level invariant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvariantViolation {
    pub line: usize,
    pub rule: &'static str,
}

/// Check the row invariants every filtered table must satisfy:
/// dead snails within density, consumption within the available snails,
/// consumption matching the count arithmetic, and no row the exclusion
/// filter would drop.
pub fn check_invariants(table: &TrialTable, filter: &ExclusionFilter) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    for row in &table.rows {
        let t = &row.trial;
        let d = &row.derived;
        let mut fail = |rule| {
            violations.push(InvariantViolation { line: t.line, rule });
        };
        if t.dead_snails > t.snail_density {
            fail("dead_snails exceeds snail_density");
        }
        let expected = i64::from(t.snail_density)
            - i64::from(t.snails_remaining)
            - i64::from(t.dead_snails);
        if d.consumption_all != expected {
            fail("consumption_all disagrees with the counts");
        }
        if d.consumption_all < 0 || d.consumption_all > d.available_snails {
            fail("consumption_all outside 0..=available_snails");
        }
        if !filter.keeps(row) {
            fail("row should have been excluded");
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::tests::trial;

    #[test]
    fn matching_counts_produce_no_mismatch() {
        let raw = ConditionCounts {
            total: 960,
            experimental: 600,
            control: 360,
        };
        let filtered = ConditionCounts {
            total: 890,
            experimental: 540,
            control: 350,
        };
        assert!(check_cardinality(raw, filtered, &ExpectedCounts::default()).is_empty());
    }

    #[test]
    fn mismatches_name_stage_and_measure() {
        let raw = ConditionCounts {
            total: 958,
            experimental: 598,
            control: 360,
        };
        let filtered = ConditionCounts {
            total: 890,
            experimental: 540,
            control: 350,
        };
        let mismatches = check_cardinality(raw, filtered, &ExpectedCounts::default());
        assert_eq!(mismatches.len(), 2);
        assert_eq!(mismatches[0].to_string(), "raw total: expected 960, found 958");
        assert_eq!(mismatches[1].measure, "experimental");
    }

    #[test]
    fn invariant_checks_flag_bad_rows() {
        let good = trial("1", "c1", 12, 21.0);
        let mut negative = trial("1", "c2", 12, 21.0);
        negative.trial.snails_remaining = 13;
        negative.derived.consumption_all = -1;
        let table = TrialTable::from_rows(vec![good, negative]);

        let violations = check_invariants(&table, &ExclusionFilter::new("pilot"));
        assert!(!violations.is_empty());
        assert!(violations
            .iter()
            .any(|v| v.rule == "consumption_all outside 0..=available_snails"));
    }

    #[test]
    fn counts_split_by_condition() {
        let mut control = trial("1", "CTL1", 12, 21.0);
        control.trial.condition = Condition::Control;
        let table = TrialTable::from_rows(vec![trial("1", "c1", 12, 21.0), control]);
        let counts = ConditionCounts::of(&table);
        assert_eq!((counts.total, counts.experimental, counts.control), (2, 1, 1));
    }
}
