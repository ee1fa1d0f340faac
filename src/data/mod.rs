//! Data layer: typed records, loading, joining, derivation and filtering.
//!
//! Architecture:
//! ```text
//!  crayfish.csv        snail_trials.csv
//!        │                    │
//!        ▼                    ▼
//!   ┌──────────┐        ┌──────────┐
//!   │  loader   │        │  loader   │  parse + normalize → typed records
//!   └──────────┘        └──────────┘
//!        │                    │
//!        └───────┐    ┌───────┘
//!                ▼    ▼
//!            ┌───────────┐
//!            │   join     │  right join on CrayfishKey, derive metrics
//!            └───────────┘
//!                  │
//!                  ▼
//!            ┌───────────┐
//!            │  filter    │  exclusion rules → all_data
//!            └───────────┘
//!                  │
//!          ┌───────┴────────┐
//!          ▼                ▼
//!      exp_data          r2_data
//! ```

pub mod derive;
pub mod filter;
pub mod join;
pub mod loader;
pub mod model;
pub mod normalize;
pub mod validate;

use std::io::Read;
use std::path::Path;

use log::{info, warn};
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use filter::{ExclusionFilter, ExclusionSummary};
use loader::{Loaded, RowIssue};
use model::{Condition, CrayfishRecord, SnailTrialRecord, TrialTable};
use validate::{check_cardinality, check_invariants, CardinalityMismatch, ConditionCounts, InvariantViolation};

/// The three analysis tables plus the audit trail of how they were made.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Joined and derived, before any exclusion.
    pub raw: TrialTable,
    /// Every retained row.
    pub all_data: TrialTable,
    /// Retained rows with condition = experimental.
    pub exp_data: TrialTable,
    /// Retained rows with snail behaviour counts (round 2).
    pub r2_data: TrialTable,
    pub report: RunReport,
}

/// What happened during one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub crayfish_rows: usize,
    pub trial_rows: usize,
    pub skipped_rows: Vec<RowIssue>,
    pub unmatched_control: usize,
    pub unmatched_experimental: usize,
    pub unused_crayfish: usize,
    /// Rows whose proportions are undefined because every snail died.
    pub undefined_proportions: usize,
    pub raw_counts: ConditionCounts,
    pub exclusions: ExclusionSummary,
    pub filtered_counts: ConditionCounts,
    pub exp_rows: usize,
    pub r2_rows: usize,
    pub cardinality: Vec<CardinalityMismatch>,
    /// Retained rows breaking a row invariant; expected to be empty.
    pub invariant_violations: Vec<InvariantViolation>,
}

/// Runs load → join → derive → filter → subset for one configuration.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Read both source sheets from `data_dir`.
    pub fn run(&self, data_dir: &Path) -> Result<PipelineOutput> {
        let crayfish_path = data_dir.join(&self.config.crayfish_file);
        let trials_path = data_dir.join(&self.config.trials_file);
        info!("loading {}", crayfish_path.display());
        let crayfish = loader::load_crayfish(&crayfish_path)?;
        info!("loading {}", trials_path.display());
        let trials = loader::load_trials(&trials_path, &self.config)?;
        self.process(crayfish, trials)
    }

    /// Same as [`Pipeline::run`] over in-memory sources.
    pub fn run_from_readers<C: Read, T: Read>(&self, crayfish: C, trials: T) -> Result<PipelineOutput> {
        let crayfish = loader::read_crayfish(crayfish)?;
        let trials = loader::read_trials(trials, &self.config)?;
        self.process(crayfish, trials)
    }

    fn process(
        &self,
        crayfish: Loaded<CrayfishRecord>,
        trials: Loaded<SnailTrialRecord>,
    ) -> Result<PipelineOutput> {
        let crayfish_rows = crayfish.records.len();
        let trial_rows = trials.records.len();
        let mut skipped_rows = crayfish.issues;
        skipped_rows.extend(trials.issues);

        let joined = join::right_join(trials.records, &crayfish.records)?;
        let undefined_proportions = derive::undefined_proportions(&joined.rows);
        if undefined_proportions > 0 {
            warn!("{undefined_proportions} rows have no available snails; proportions left undefined");
        }

        let raw = TrialTable::from_rows(joined.rows);
        let raw_counts = ConditionCounts::of(&raw);
        info!("raw joined table: {raw_counts}");

        let filter = ExclusionFilter::from_config(&self.config);
        let (kept, exclusions) = filter.apply(raw.rows.clone());
        let all_data = TrialTable::from_rows(kept);
        let filtered_counts = ConditionCounts::of(&all_data);
        info!("filtered table: {filtered_counts}");
        let invariant_violations = check_invariants(&all_data, &filter);
        for v in &invariant_violations {
            warn!("trial line {}: {}", v.line, v.rule);
        }

        let exp_data = all_data.subset(|r| r.condition() == Condition::Experimental);
        let r2_data = all_data.subset(|r| r.trial.has_behaviour());

        let cardinality = check_cardinality(raw_counts, filtered_counts, &self.config.expected);
        for mismatch in &cardinality {
            warn!("cardinality: {mismatch}");
        }

        let report = RunReport {
            crayfish_rows,
            trial_rows,
            skipped_rows,
            unmatched_control: joined.unmatched.0,
            unmatched_experimental: joined.unmatched.1,
            unused_crayfish: joined.unused_crayfish,
            undefined_proportions,
            raw_counts,
            exclusions,
            filtered_counts,
            exp_rows: exp_data.len(),
            r2_rows: r2_data.len(),
            cardinality,
            invariant_violations,
        };

        Ok(PipelineOutput {
            raw,
            all_data,
            exp_data,
            r2_data,
            report,
        })
    }
}

impl PipelineOutput {
    /// Turn any cardinality mismatch into an error.
    pub fn require_expected_cardinality(&self) -> Result<()> {
        if self.report.cardinality.is_empty() {
            return Ok(());
        }
        let msg = self
            .report
            .cardinality
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(PipelineError::Cardinality(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CRAYFISH: &str = "week,crayfish_id,weight,berried\nw1,c1,7.2,N\n";
    const TRIALS: &str = "\
week,crayfish_id,time,snail_density,snails_remaining,dead_snails,snails_out,snails_under_shelter,snail_species,infection_status,temp,condition,dodgey_remove,molt
w1,c1,12,12,10,0,,,P,NA,21,crayfish,N,N
w1,c1,24,12,8,1,,,P,NA,21,crayfish,N,N
w1,CTL1,12,12,12,0,1,2,H,uninfected,21,control,N,N
pilot,c1,12,12,10,0,,,P,NA,21,crayfish,N,N
w1,c1,0,12,12,0,,,P,NA,21,crayfish,N,N
";

    fn run() -> PipelineOutput {
        Pipeline::new(PipelineConfig::default())
            .unwrap()
            .run_from_readers(CRAYFISH.as_bytes(), TRIALS.as_bytes())
            .unwrap()
    }

    #[test]
    fn tables_and_subsets() {
        let out = run();
        assert_eq!(out.raw.len(), 5);
        assert_eq!(out.all_data.len(), 3);
        assert_eq!(out.exp_data.len(), 2);
        assert_eq!(out.r2_data.len(), 1);
        assert_eq!(out.r2_data.rows[0].trial.key.crayfish_id, "CTL1");
        assert_eq!(out.report.exclusions.removed, 2);
        assert_eq!(out.report.unmatched_control, 1);
    }

    #[test]
    fn small_input_fails_strict_cardinality() {
        let out = run();
        assert!(!out.report.cardinality.is_empty());
        let err = out.require_expected_cardinality().unwrap_err();
        assert!(matches!(err, PipelineError::Cardinality(_)));
    }
}
