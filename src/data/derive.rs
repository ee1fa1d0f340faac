//! Consumption and availability metrics computed from a trial's counts.

use super::model::{Derived, JoinedTrial, SnailTrialRecord};

/// `consumption_all = density - remaining - dead` in signed arithmetic, so
/// impossible source rows surface as negatives instead of wrapping.
pub fn derive(trial: &SnailTrialRecord) -> Derived {
    let density = i64::from(trial.snail_density);
    let dead = i64::from(trial.dead_snails);
    let available = density - dead;
    let consumption_all = density - i64::from(trial.snails_remaining) - dead;

    let unavailable_snails = match (trial.snails_out, trial.snails_under_shelter) {
        (Some(out), Some(shelter)) => out.checked_add(shelter),
        _ => None,
    };

    Derived {
        consumption_all,
        available_snails: available,
        p_consumed: proportion(consumption_all, available),
        unavailable_snails,
        p_unavailable: unavailable_snails.and_then(|u| proportion(i64::from(u), available)),
    }
}

/// Undefined when every snail died before it could be eaten.
fn proportion(numerator: i64, available: i64) -> Option<f64> {
    if available == 0 {
        None
    } else {
        Some(numerator as f64 / available as f64)
    }
}

/// Rows whose consumption or availability proportion could not be computed.
pub fn undefined_proportions(rows: &[JoinedTrial]) -> usize {
    rows.iter()
        .filter(|r| r.derived.available_snails == 0)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::tests::trial;

    #[test]
    fn consumption_and_proportion() {
        let mut row = trial("w1", "c1", 24, 21.0).trial;
        row.snails_remaining = 8;
        row.dead_snails = 1;
        let d = derive(&row);
        assert_eq!(d.consumption_all, 3);
        assert_eq!(d.available_snails, 11);
        assert_eq!(d.p_consumed, Some(3.0 / 11.0));
        assert_eq!(d.unavailable_snails, None);
        assert_eq!(d.p_unavailable, None);
    }

    #[test]
    fn behaviour_counts_give_unavailability() {
        let mut row = trial("w1", "c1", 24, 21.0).trial;
        row.dead_snails = 2;
        row.snails_out = Some(3);
        row.snails_under_shelter = Some(2);
        let d = derive(&row);
        assert_eq!(d.unavailable_snails, Some(5));
        assert_eq!(d.p_unavailable, Some(0.5));
    }

    #[test]
    fn one_behaviour_count_is_not_enough() {
        let mut row = trial("w1", "c1", 24, 21.0).trial;
        row.snails_out = Some(3);
        assert_eq!(derive(&row).unavailable_snails, None);
    }

    #[test]
    fn oversized_behaviour_counts_do_not_overflow() {
        let mut row = trial("w1", "c1", 24, 21.0).trial;
        row.snails_out = Some(u32::MAX);
        row.snails_under_shelter = Some(1);
        let d = derive(&row);
        assert_eq!(d.unavailable_snails, None);
        assert_eq!(d.p_unavailable, None);
    }

    #[test]
    fn all_dead_leaves_proportions_undefined() {
        let mut row = trial("w1", "c1", 24, 21.0).trial;
        row.snails_remaining = 0;
        row.dead_snails = 12;
        row.snails_out = Some(0);
        row.snails_under_shelter = Some(0);
        let d = derive(&row);
        assert_eq!(d.consumption_all, 0);
        assert_eq!(d.p_consumed, None);
        assert_eq!(d.p_unavailable, None);
    }

    #[test]
    fn more_remaining_than_possible_goes_negative() {
        let mut row = trial("w1", "c1", 24, 21.0).trial;
        row.snails_remaining = 12;
        row.dead_snails = 1;
        assert_eq!(derive(&row).consumption_all, -1);
    }
}
