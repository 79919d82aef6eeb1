//! Ratio feature derivation
//!
//! Normalized ratios over the per-user aggregates. Each transform keeps an
//! undefined ratio as `None`; the sentinel only appears when the transforms are
//! concatenated by [`RatioFeatureDeriver::derive`].

use crate::aggregate::UserAggregates;
use crate::error::ComputeError;
use crate::schema::{Action, EventAction, SubmissionStatus};
use crate::table::FeatureTable;

/// Out-of-range value written for an undefined ratio
pub const UNDEFINED_RATIO: f64 = -1.0;

/// Feature deriver for ratio features
pub struct RatioFeatureDeriver;

impl RatioFeatureDeriver {
    /// All ratio features, concatenated, undefined cells filled with [`UNDEFINED_RATIO`]
    pub fn derive(aggregates: &UserAggregates) -> Result<FeatureTable, ComputeError> {
        let mut table = progress_features(aggregates)?
            .concat(action_ratio_features(aggregates)?)?
            .concat(status_ratio_features(aggregates)?)?
            .concat(day_ratio_features(aggregates)?)?;
        table.fill_missing(UNDEFINED_RATIO);
        Ok(table)
    }
}

/// Count ratio with the denominator zero-guard.
///
/// A zero denominator is replaced by 1. Both counts zero means no signal at
/// all, which is undefined rather than a zero rate.
pub fn guarded_ratio(numerator: u32, denominator: u32) -> Option<f64> {
    match (numerator, denominator) {
        (0, 0) => None,
        (n, 0) => Some(f64::from(n)),
        (n, d) => Some(f64::from(n) / f64::from(d)),
    }
}

/// Plain rate; undefined for a zero denominator
pub fn rate(numerator: u32, denominator: u32) -> Option<f64> {
    if denominator == 0 {
        None
    } else {
        Some(f64::from(numerator) / f64::from(denominator))
    }
}

/// `correct_rat_attempts` = correct / (correct + wrong)
pub fn progress_features(aggregates: &UserAggregates) -> Result<FeatureTable, ComputeError> {
    let mut table = FeatureTable::new(aggregates.users());
    table.push_column_with("correct_rat_attempts", |u| {
        aggregates.get(u).and_then(|a| {
            let correct = a.count(SubmissionStatus::Correct);
            rate(correct, correct + a.count(SubmissionStatus::Wrong))
        })
    })?;
    Ok(table)
}

/// `<action>_rat_discovered` for every action except `discovered`
pub fn action_ratio_features(aggregates: &UserAggregates) -> Result<FeatureTable, ComputeError> {
    let mut table = FeatureTable::new(aggregates.users());
    for action in EventAction::ALL
        .into_iter()
        .filter(|a| *a != EventAction::Discovered)
    {
        table.push_column_with(format!("{}_rat_discovered", action.as_str()), |u| {
            aggregates
                .get(u)
                .and_then(|a| guarded_ratio(a.count(action), a.count(EventAction::Discovered)))
        })?;
    }
    Ok(table)
}

/// `<status>_rat_<action>` for every (submission status, action) pair
pub fn status_ratio_features(aggregates: &UserAggregates) -> Result<FeatureTable, ComputeError> {
    let mut table = FeatureTable::new(aggregates.users());
    for status in SubmissionStatus::ALL {
        for action in EventAction::ALL {
            table.push_column_with(
                format!("{}_rat_{}", status.as_str(), action.as_str()),
                |u| {
                    aggregates
                        .get(u)
                        .and_then(|a| guarded_ratio(a.count(status), a.count(action)))
                },
            )?;
        }
    }
    Ok(table)
}

/// `<category>_rat_day`: every action and status count per active day
pub fn day_ratio_features(aggregates: &UserAggregates) -> Result<FeatureTable, ComputeError> {
    let mut table = FeatureTable::new(aggregates.users());
    let categories = EventAction::ALL
        .into_iter()
        .map(Action::from)
        .chain(SubmissionStatus::ALL.into_iter().map(Action::from));
    for category in categories {
        table.push_column_with(format!("{}_rat_day", category.as_str()), |u| {
            aggregates
                .get(u)
                .and_then(|a| rate(a.count(category), a.days))
        })?;
    }
    Ok(table)
}
