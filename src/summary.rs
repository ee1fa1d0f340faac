//! Per-group descriptive statistics of the trial proportions, the
//! mean ± SE series the plotting stage draws over time.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::data::model::{Condition, InfectionStatus, JoinedTrial, SnailSpecies, Temperature, TrialTable};

/// Which proportion to summarise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    /// `p_consumed`
    Consumed,
    /// `p_unavailable`, only defined for the behaviour subset.
    Unavailable,
}

impl Response {
    fn numerator(self, row: &JoinedTrial) -> Option<i64> {
        match self {
            Response::Consumed => Some(row.derived.consumption_all),
            Response::Unavailable => row.derived.unavailable_snails.map(i64::from),
        }
    }

    fn proportion(self, row: &JoinedTrial) -> Option<f64> {
        match self {
            Response::Consumed => row.derived.p_consumed,
            Response::Unavailable => row.derived.p_unavailable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    condition: Condition,
    species: SnailSpecies,
    infection_status: InfectionStatus,
    temp: Temperature,
    time: u32,
}

/// Welford's online mean/variance.
#[derive(Debug, Clone, Default)]
struct Moments {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Moments {
    fn update(&mut self, sample: f64) {
        self.count += 1;
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (sample - self.mean);
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Bessel-corrected.
    fn sample_sd(&self) -> Option<f64> {
        (self.count > 1).then(|| (self.m2 / (self.count - 1) as f64).sqrt())
    }
}

#[derive(Debug, Clone, Default)]
struct Accumulator {
    rows: usize,
    count_total: i64,
    available_total: i64,
    moments: Moments,
}

/// One row of the summary table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub response: Response,
    pub condition: Condition,
    pub species: SnailSpecies,
    pub infection_status: InfectionStatus,
    pub temp: Temperature,
    pub time: u32,
    /// Rows in the group.
    pub n: usize,
    /// Rows whose proportion is defined and enters the moments.
    pub n_defined: usize,
    /// Sum of the response counts (snails eaten or unavailable).
    pub count_total: i64,
    pub available_total: i64,
    pub mean: Option<f64>,
    pub sd: Option<f64>,
    pub se: Option<f64>,
}

/// Group `table` by condition, species, infection status, temperature and
/// time, in that ordinal order. Rows without the response are skipped.
pub fn summarize(table: &TrialTable, response: Response) -> Vec<GroupSummary> {
    let mut groups: BTreeMap<GroupKey, Accumulator> = BTreeMap::new();

    for row in &table.rows {
        let Some(count) = response.numerator(row) else {
            continue;
        };
        let t = &row.trial;
        let key = GroupKey {
            condition: t.condition,
            species: t.species.clone(),
            infection_status: t.infection_status,
            temp: t.temp,
            time: t.time,
        };
        let acc = groups.entry(key).or_default();
        acc.rows += 1;
        acc.count_total += count;
        acc.available_total += row.derived.available_snails;
        if let Some(p) = response.proportion(row) {
            acc.moments.update(p);
        }
    }

    groups
        .into_iter()
        .map(|(key, acc)| {
            let sd = acc.moments.sample_sd();
            GroupSummary {
                response,
                condition: key.condition,
                species: key.species,
                infection_status: key.infection_status,
                temp: key.temp,
                time: key.time,
                n: acc.rows,
                n_defined: acc.moments.count as usize,
                count_total: acc.count_total,
                available_total: acc.available_total,
                mean: acc.moments.mean(),
                sd,
                se: sd.map(|s| s / (acc.moments.count as f64).sqrt()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::tests::trial;

    fn with_consumed(id: &str, time: u32, eaten: i64, available: i64) -> JoinedTrial {
        let mut row = trial("1", id, time, 21.0);
        row.derived.consumption_all = eaten;
        row.derived.available_snails = available;
        row.derived.p_consumed = (available > 0).then(|| eaten as f64 / available as f64);
        row
    }

    #[test]
    fn groups_by_time_with_mean_and_se() {
        let table = TrialTable::from_rows(vec![
            with_consumed("c1", 12, 3, 12),
            with_consumed("c2", 12, 6, 12),
            with_consumed("c1", 24, 4, 12),
        ]);
        let summary = summarize(&table, Response::Consumed);
        assert_eq!(summary.len(), 2);

        let first = &summary[0];
        assert_eq!(first.time, 12);
        assert_eq!(first.n, 2);
        assert_eq!(first.count_total, 9);
        assert_eq!(first.available_total, 24);
        assert!((first.mean.unwrap() - 0.375).abs() < 1e-12);
        let sd = first.sd.unwrap();
        assert!((sd - (0.125f64 * 0.125 * 2.0).sqrt()).abs() < 1e-12);
        assert!((first.se.unwrap() - sd / 2f64.sqrt()).abs() < 1e-12);

        let second = &summary[1];
        assert_eq!(second.time, 24);
        assert_eq!(second.n, 1);
        assert_eq!(second.sd, None);
    }

    #[test]
    fn undefined_proportions_count_but_do_not_enter_moments() {
        let table = TrialTable::from_rows(vec![
            with_consumed("c1", 12, 0, 0),
            with_consumed("c2", 12, 6, 12),
        ]);
        let summary = summarize(&table, Response::Consumed);
        assert_eq!(summary[0].n, 2);
        assert_eq!(summary[0].n_defined, 1);
        assert_eq!(summary[0].mean, Some(0.5));
    }

    #[test]
    fn unavailable_skips_rows_without_behaviour() {
        let mut r2 = trial("1", "c1", 12, 21.0);
        r2.derived.unavailable_snails = Some(3);
        r2.derived.p_unavailable = Some(0.25);
        let table = TrialTable::from_rows(vec![r2, trial("1", "c2", 12, 21.0)]);
        let summary = summarize(&table, Response::Unavailable);
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].count_total, 3);
        assert_eq!(summary[0].mean, Some(0.25));
    }
}
