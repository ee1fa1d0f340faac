use std::collections::{HashMap, HashSet};

use log::{debug, info};

use super::derive::derive;
use super::model::{Condition, CrayfishKey, CrayfishRecord, JoinedTrial, SnailTrialRecord};
use crate::error::{PipelineError, Result};

/// Crayfish attributes indexed by their composite key.
#[derive(Debug, Default)]
pub struct CrayfishIndex<'a> {
    by_key: HashMap<&'a CrayfishKey, &'a CrayfishRecord>,
}

impl<'a> CrayfishIndex<'a> {
    /// Fails on the first key that occurs twice.
    pub fn build(crayfish: &'a [CrayfishRecord]) -> Result<Self> {
        let mut by_key = HashMap::with_capacity(crayfish.len());
        for rec in crayfish {
            if let Some(first) = by_key.insert(&rec.key, rec) {
                return Err(PipelineError::DuplicateKey {
                    key: rec.key.clone(),
                    first_line: first.line,
                    second_line: rec.line,
                });
            }
        }
        Ok(Self { by_key })
    }

    pub fn get(&self, key: &CrayfishKey) -> Option<&'a CrayfishRecord> {
        self.by_key.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Outcome of [`right_join`].
#[derive(Debug, Clone)]
pub struct JoinOutput {
    /// One entry per trial, in trial order.
    pub rows: Vec<JoinedTrial>,
    /// Trials with no crayfish row, by condition: (control, experimental).
    pub unmatched: (usize, usize),
    /// Crayfish rows no trial referenced.
    pub unused_crayfish: usize,
}

/// Right join of the trial rows against the crayfish rows on
/// [`CrayfishKey`]. Every trial is kept, in input order, and derived
/// metrics are computed on the way through.
pub fn right_join(trials: Vec<SnailTrialRecord>, crayfish: &[CrayfishRecord]) -> Result<JoinOutput> {
    let index = CrayfishIndex::build(crayfish)?;
    let mut used: HashSet<&CrayfishKey> = HashSet::new();
    let mut unmatched = (0, 0);

    let rows: Vec<JoinedTrial> = trials
        .into_iter()
        .map(|trial| {
            let matched = index.get(&trial.key);
            match matched {
                Some(c) => {
                    used.insert(&c.key);
                }
                None => {
                    debug!("no crayfish for trial {} at {}h", trial.key, trial.time);
                    match trial.condition {
                        Condition::Control => unmatched.0 += 1,
                        Condition::Experimental => unmatched.1 += 1,
                    }
                }
            }
            let derived = derive(&trial);
            JoinedTrial {
                weight: matched.and_then(|c| c.weight),
                berried: matched.and_then(|c| c.berried),
                trial,
                derived,
            }
        })
        .collect();

    let unused_crayfish = index.len() - used.len();
    info!(
        "joined {} trial rows against {} crayfish ({} control / {} experimental unmatched, {} crayfish unused)",
        rows.len(),
        index.len(),
        unmatched.0,
        unmatched.1,
        unused_crayfish
    );

    Ok(JoinOutput {
        rows,
        unmatched,
        unused_crayfish,
    })
}
