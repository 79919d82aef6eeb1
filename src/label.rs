//! Completion label
//!
//! A user has "gone" through the course when they reached the target action
//! on more than `threshold` distinct steps. Labels always look at the full
//! history; features only ever see the truncated window.

use crate::error::ComputeError;
use crate::interaction::distinct_users;
use crate::schema::{Action, Interaction, StepId, UserId};
use crate::table::INDEX_COLUMN;
use csv::Writer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use tracing::info;

/// Label column name
pub const LABEL_COLUMN: &str = "is_gone";

/// Default number of distinct steps above which the course counts as completed
pub const DEFAULT_COURSE_THRESHOLD: u32 = 40;

/// Default action whose distinct steps are counted
pub const DEFAULT_TARGET_ACTION: Action = Action::Passed;

/// Binary label per user, ordered by user_id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Labels {
    labels: BTreeMap<UserId, bool>,
}

impl Labels {
    pub fn get(&self, user: UserId) -> Option<bool> {
        self.labels.get(&user).copied()
    }

    pub fn users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.labels.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (UserId, bool)> + '_ {
        self.labels.iter().map(|(u, l)| (*u, *l))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of positive labels
    pub fn positives(&self) -> usize {
        self.labels.values().filter(|l| **l).count()
    }

    /// Labels for exactly the given users
    pub fn select_users(&self, users: impl IntoIterator<Item = UserId>) -> Result<Self, ComputeError> {
        let labels = users
            .into_iter()
            .map(|u| {
                self.get(u).map(|l| (u, l)).ok_or_else(|| {
                    ComputeError::IndexMismatch(format!("user {} has no label", u))
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { labels })
    }

    /// `user_id,is_gone` with `True`/`False` cells
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), ComputeError> {
        let mut wtr = Writer::from_writer(writer);
        wtr.write_record([INDEX_COLUMN, LABEL_COLUMN])?;
        for (user, label) in &self.labels {
            wtr.write_record([user.to_string(), if *label { "True" } else { "False" }.to_string()])?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Build labels from the full, untruncated interaction log
pub fn build_labels(
    interactions: &[Interaction],
    threshold: u32,
    target: Action,
) -> Result<Labels, ComputeError> {
    if !interactions.iter().any(|i| i.action == target) {
        return Err(ComputeError::TargetActionAbsent(target.to_string()));
    }

    let mut target_steps: BTreeMap<UserId, BTreeSet<StepId>> = BTreeMap::new();
    for i in interactions.iter().filter(|i| i.action == target) {
        target_steps.entry(i.user_id).or_default().insert(i.step_id);
    }

    let users = distinct_users(interactions);
    let labels: BTreeMap<UserId, bool> = users
        .iter()
        .map(|u| {
            let reached = target_steps.get(u).map_or(0, BTreeSet::len);
            (*u, reached > threshold as usize)
        })
        .collect();

    if labels.len() != users.len() {
        return Err(ComputeError::UsersDropped {
            stage: "labeling",
            expected: users.len(),
            actual: labels.len(),
        });
    }

    let labels = Labels { labels };
    info!(
        users = labels.len(),
        positives = labels.positives(),
        threshold,
        target = %target,
        "built labels"
    );
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_434_340_000;

    fn passes(user: UserId, steps: impl IntoIterator<Item = StepId>) -> Vec<Interaction> {
        steps
            .into_iter()
            .map(|step| Interaction {
                user_id: user,
                step_id: step,
                timestamp: T0 + step as i64,
                action: Action::Passed,
            })
            .collect()
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut log = passes(1, 0..41);
        log.extend(passes(2, 0..40));
        let labels = build_labels(&log, 40, Action::Passed).unwrap();
        assert_eq!(labels.get(1), Some(true));
        assert_eq!(labels.get(2), Some(false));
    }

    #[test]
    fn test_distinct_steps_counted() {
        // user 1 passes 3 distinct steps, user 2 passes one step three times
        let mut log = passes(1, [1, 2, 3]);
        log.extend(passes(2, [5, 5, 5]));
        log.push(Interaction {
            user_id: 3,
            step_id: 1,
            timestamp: T0,
            action: Action::Viewed,
        });

        let labels = build_labels(&log, 2, Action::Passed).unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get(1), Some(true));
        assert_eq!(labels.get(2), Some(false));
        assert_eq!(labels.get(3), Some(false));
    }

    #[test]
    fn test_absent_target_is_fatal() {
        let log = passes(1, [1]);
        assert!(matches!(
            build_labels(&log, 0, Action::Correct),
            Err(ComputeError::TargetActionAbsent(a)) if a == "correct"
        ));
    }

    #[test]
    fn test_write_csv() {
        let mut log = passes(2, [1]);
        log.extend(passes(1, [1, 2]));
        let labels = build_labels(&log, 1, Action::Passed).unwrap();
        let mut buf = Vec::new();
        labels.write_csv(&mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "user_id,is_gone\n1,True\n2,False\n"
        );
    }
}
