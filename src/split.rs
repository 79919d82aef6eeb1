//! User-disjoint train/test split of the raw logs

use crate::error::ComputeError;
use crate::interaction::distinct_users;
use crate::schema::{EventRecord, SubmissionRecord, UserId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeSet;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train_events: Vec<EventRecord>,
    pub test_events: Vec<EventRecord>,
    pub train_submissions: Vec<SubmissionRecord>,
    pub test_submissions: Vec<SubmissionRecord>,
    pub train_users: BTreeSet<UserId>,
    pub test_users: BTreeSet<UserId>,
}

/// Shuffle the union of users with a seeded RNG and hold out
/// `floor(n * test_size)` of them.
///
/// Every record of a user lands on the same side. The same inputs and seed
/// always give the same split.
///
/// # Arguments
///
/// * `events` - Raw event log
/// * `submissions` - Raw submission log
/// * `test_size` - Fraction of users held out, within `[0, 1]`
/// * `seed` - RNG seed
pub fn split_by_users(
    events: &[EventRecord],
    submissions: &[SubmissionRecord],
    test_size: f64,
    seed: u64,
) -> Result<Split, ComputeError> {
    if !(0.0..=1.0).contains(&test_size) {
        return Err(ComputeError::ConfigError(format!(
            "test_size must be within [0, 1], got {}",
            test_size
        )));
    }

    let mut users: Vec<UserId> = distinct_users(events)
        .union(&distinct_users(submissions))
        .copied()
        .collect();
    let mut rng = StdRng::seed_from_u64(seed);
    users.shuffle(&mut rng);

    let n_test = (users.len() as f64 * test_size).floor() as usize;
    let test_users: BTreeSet<UserId> = users[..n_test].iter().copied().collect();
    let train_users: BTreeSet<UserId> = users[n_test..].iter().copied().collect();

    let (test_events, train_events): (Vec<_>, Vec<_>) = events
        .iter()
        .cloned()
        .partition(|e| test_users.contains(&e.user_id));
    let (test_submissions, train_submissions): (Vec<_>, Vec<_>) = submissions
        .iter()
        .cloned()
        .partition(|s| test_users.contains(&s.user_id));

    info!(
        train_users = train_users.len(),
        test_users = test_users.len(),
        seed,
        "split users"
    );

    Ok(Split {
        train_events,
        test_events,
        train_submissions,
        test_submissions,
        train_users,
        test_users,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EventAction, SubmissionStatus};

    fn logs() -> (Vec<EventRecord>, Vec<SubmissionRecord>) {
        let events = (1..=10)
            .flat_map(|user| {
                [EventAction::Discovered, EventAction::Viewed].map(|action| EventRecord {
                    user_id: user,
                    step_id: 1,
                    timestamp: 100,
                    action,
                })
            })
            .collect();
        // user 11 only ever submitted
        let submissions = [3, 7, 11]
            .into_iter()
            .map(|user| SubmissionRecord {
                user_id: user,
                step_id: 1,
                timestamp: 200,
                submission_status: SubmissionStatus::Correct,
            })
            .collect();
        (events, submissions)
    }

    #[test]
    fn test_users_are_disjoint_and_complete() {
        let (events, subs) = logs();
        let split = split_by_users(&events, &subs, 0.3, 42).unwrap();

        assert_eq!(split.test_users.len(), 3);
        assert_eq!(split.train_users.len(), 8);
        assert!(split.train_users.is_disjoint(&split.test_users));
        assert_eq!(split.train_events.len() + split.test_events.len(), events.len());
        assert_eq!(split.train_submissions.len() + split.test_submissions.len(), subs.len());
        assert!(split.test_events.iter().all(|e| split.test_users.contains(&e.user_id)));
        assert!(split
            .train_submissions
            .iter()
            .all(|s| split.train_users.contains(&s.user_id)));
    }

    #[test]
    fn test_split_is_deterministic() {
        let (events, subs) = logs();
        let a = split_by_users(&events, &subs, 0.5, 7).unwrap();
        let b = split_by_users(&events, &subs, 0.5, 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_edge_sizes() {
        let (events, subs) = logs();
        let none = split_by_users(&events, &subs, 0.0, 1).unwrap();
        assert!(none.test_users.is_empty());
        assert_eq!(none.train_events.len(), events.len());

        let all = split_by_users(&events, &subs, 1.0, 1).unwrap();
        assert!(all.train_users.is_empty());

        assert!(matches!(
            split_by_users(&events, &subs, 1.5, 1),
            Err(ComputeError::ConfigError(_))
        ));
    }
}
