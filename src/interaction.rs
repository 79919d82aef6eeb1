//! Interaction merging and temporal truncation
//!
//! The merged interaction log is the canonical input of every feature generator.
//! Truncation is the leakage boundary: feature computation only ever sees the
//! first `days` of each user's history.

use crate::error::ComputeError;
use crate::schema::{EventRecord, Interaction, SubmissionRecord, UserActivity, UserId, SECONDS_PER_DAY};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Merge both raw streams into one log ordered by (user_id, timestamp, action rank)
pub fn merge_interactions(
    events: &[EventRecord],
    submissions: &[SubmissionRecord],
) -> Vec<Interaction> {
    let mut interactions: Vec<Interaction> = events
        .iter()
        .map(Interaction::from)
        .chain(submissions.iter().map(Interaction::from))
        .collect();
    interactions.sort_by_key(|i| (i.user_id, i.timestamp, i.action));
    debug!(
        events = events.len(),
        submissions = submissions.len(),
        "merged interaction log"
    );
    interactions
}

/// Distinct users of a log
pub fn distinct_users<T: UserActivity>(records: &[T]) -> BTreeSet<UserId> {
    records.iter().map(UserActivity::user_id).collect()
}

/// First timestamp of every user
pub fn first_timestamps<T: UserActivity>(records: &[T]) -> HashMap<UserId, i64> {
    let mut first: HashMap<UserId, i64> = HashMap::new();
    for r in records {
        first
            .entry(r.user_id())
            .and_modify(|t| *t = (*t).min(r.timestamp()))
            .or_insert(r.timestamp());
    }
    first
}

/// Keep each user's records with `timestamp <= first_timestamp + days * 86400`.
///
/// Relative order of the kept records is preserved. The user's earliest record
/// always satisfies the bound, so no user can be dropped; that is still checked.
pub fn truncate_by_days<T: UserActivity + Clone>(
    records: &[T],
    days: u32,
) -> Result<Vec<T>, ComputeError> {
    let window = i64::from(days) * SECONDS_PER_DAY;
    let first = first_timestamps(records);

    let truncated: Vec<T> = records
        .iter()
        .filter(|r| r.timestamp() <= first[&r.user_id()] + window)
        .cloned()
        .collect();

    let before = first.len();
    let after = distinct_users(&truncated).len();
    if before != after {
        return Err(ComputeError::UsersDropped {
            stage: "truncation",
            expected: before,
            actual: after,
        });
    }

    debug!(
        days,
        kept = truncated.len(),
        total = records.len(),
        users = after,
        "truncated log"
    );
    Ok(truncated)
}
