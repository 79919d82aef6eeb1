//! Per-user aggregate counts
//!
//! One row per user over the union of both streams: counts of every action and
//! submission status, distinct active days, and the last event timestamp.
//! Absence of an action is zero occurrences, not missing data.

use crate::error::ComputeError;
use crate::schema::{
    Action, EventAction, EventRecord, SubmissionRecord, SubmissionStatus, UserActivity, UserId,
};
use crate::table::FeatureTable;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Column name of the distinct active-day count
pub const DAY_COLUMN: &str = "day";

/// Column name of the last event timestamp
pub const LAST_TIMESTAMP_COLUMN: &str = "last_timestamp";

/// Aggregate row of one user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserAggregate {
    pub user_id: UserId,
    /// Latest step-interaction timestamp; `None` for submission-only users
    pub last_timestamp: Option<i64>,
    counts: BTreeMap<Action, u32>,
    /// Distinct UTC days with at least one step interaction
    pub days: u32,
}

impl UserAggregate {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    /// Occurrences of an action or submission status
    pub fn count(&self, action: impl Into<Action>) -> u32 {
        self.counts.get(&action.into()).copied().unwrap_or(0)
    }

    fn bump(&mut self, action: Action) {
        *self.counts.entry(action).or_insert(0) += 1;
    }
}

/// Aggregate rows keyed by user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserAggregates {
    rows: BTreeMap<UserId, UserAggregate>,
}

impl UserAggregates {
    /// Build aggregates from (already truncated) events and submissions
    pub fn build(events: &[EventRecord], submissions: &[SubmissionRecord]) -> Self {
        let mut rows: BTreeMap<UserId, UserAggregate> = BTreeMap::new();
        let mut days: BTreeMap<UserId, BTreeSet<NaiveDate>> = BTreeMap::new();

        for e in events {
            let row = rows
                .entry(e.user_id)
                .or_insert_with(|| UserAggregate::new(e.user_id));
            row.bump(e.action.into());
            row.last_timestamp = Some(row.last_timestamp.map_or(e.timestamp, |t| t.max(e.timestamp)));
            if let Some(day) = e.day() {
                days.entry(e.user_id).or_default().insert(day);
            }
        }

        for s in submissions {
            rows.entry(s.user_id)
                .or_insert_with(|| UserAggregate::new(s.user_id))
                .bump(s.submission_status.into());
        }

        for (user, user_days) in days {
            if let Some(row) = rows.get_mut(&user) {
                row.days = user_days.len() as u32;
            }
        }

        Self { rows }
    }

    pub fn get(&self, user: UserId) -> Option<&UserAggregate> {
        self.rows.get(&user)
    }

    pub fn users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.rows.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserAggregate> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Tabular form: `[last_timestamp,] wrong, correct, discovered, viewed,
    /// started_attempt, passed, day`. A missing last timestamp becomes 0.
    pub fn to_table(&self, include_last_timestamp: bool) -> Result<FeatureTable, ComputeError> {
        let mut table = FeatureTable::new(self.users());
        let rows = &self.rows;
        let row = move |u: UserId| rows.get(&u);

        if include_last_timestamp {
            table.push_column_with(LAST_TIMESTAMP_COLUMN, |u| {
                row(u).map(|r| r.last_timestamp.unwrap_or(0) as f64)
            })?;
        }
        for status in SubmissionStatus::ALL {
            table.push_column_with(status.as_str(), |u| row(u).map(|r| f64::from(r.count(status))))?;
        }
        for action in EventAction::ALL {
            table.push_column_with(action.as_str(), |u| row(u).map(|r| f64::from(r.count(action))))?;
        }
        table.push_column_with(DAY_COLUMN, |u| row(u).map(|r| f64::from(r.days)))?;
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const T0: i64 = 1_434_340_000;

    fn event(user: UserId, ts: i64, action: EventAction) -> EventRecord {
        EventRecord {
            user_id: user,
            step_id: 1,
            timestamp: ts,
            action,
        }
    }

    fn submission(user: UserId, ts: i64, status: SubmissionStatus) -> SubmissionRecord {
        SubmissionRecord {
            user_id: user,
            step_id: 1,
            timestamp: ts,
            submission_status: status,
        }
    }

    #[test]
    fn test_single_user_counts() {
        let events = vec![
            event(1, T0, EventAction::Discovered),
            event(1, T0 + 10, EventAction::Viewed),
            event(1, T0 + 20, EventAction::StartedAttempt),
        ];
        let submissions = vec![
            submission(1, T0 + 30, SubmissionStatus::Wrong),
            submission(1, T0 + 3600, SubmissionStatus::Correct),
        ];

        let aggs = UserAggregates::build(&events, &submissions);
        let u1 = aggs.get(1).unwrap();
        assert_eq!(u1.count(EventAction::Discovered), 1);
        assert_eq!(u1.count(EventAction::Viewed), 1);
        assert_eq!(u1.count(EventAction::StartedAttempt), 1);
        assert_eq!(u1.count(EventAction::Passed), 0);
        assert_eq!(u1.count(SubmissionStatus::Wrong), 1);
        assert_eq!(u1.count(SubmissionStatus::Correct), 1);
        assert_eq!(u1.last_timestamp, Some(T0 + 20));
        assert_eq!(u1.days, 1);
    }

    #[test]
    fn test_outer_join_of_users() {
        let events = vec![event(1, T0, EventAction::Viewed)];
        let submissions = vec![submission(2, T0, SubmissionStatus::Wrong)];

        let aggs = UserAggregates::build(&events, &submissions);
        assert_eq!(aggs.users().collect::<Vec<_>>(), vec![1, 2]);

        let table = aggs.to_table(true).unwrap();
        assert_eq!(table.get(1, "wrong"), Some(0.0));
        assert_eq!(table.get(2, "viewed"), Some(0.0));
        assert_eq!(table.get(2, "day"), Some(0.0));
        assert_eq!(table.get(2, LAST_TIMESTAMP_COLUMN), Some(0.0));
    }

    #[test]
    fn test_distinct_days() {
        let events = vec![
            event(1, T0, EventAction::Viewed),
            event(1, T0 + 60, EventAction::Viewed),
            event(1, T0 + 86_400, EventAction::Viewed),
        ];
        let aggs = UserAggregates::build(&events, &[]);
        assert_eq!(aggs.get(1).unwrap().days, 2);
    }

    #[test]
    fn test_table_layout() {
        let aggs = UserAggregates::build(&[event(1, T0, EventAction::Passed)], &[]);
        let without = aggs.to_table(false).unwrap();
        assert_eq!(
            without.column_names().collect::<Vec<_>>(),
            vec!["wrong", "correct", "discovered", "viewed", "started_attempt", "passed", "day"]
        );
        let with = aggs.to_table(true).unwrap();
        assert_eq!(with.column_names().next(), Some(LAST_TIMESTAMP_COLUMN));
    }
}
