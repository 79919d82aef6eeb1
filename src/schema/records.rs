//! Raw course log records
//!
//! Typed rows of the two platform event streams (step interactions and practice
//! submissions) and of the merged interaction log built from them.

use crate::error::ComputeError;
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// User identifier as exported by the platform
pub type UserId = u64;

/// Step identifier as exported by the platform
pub type StepId = u64;

/// Seconds in one day
pub const SECONDS_PER_DAY: i64 = 60 * 60 * 24;

/// Unified interaction category.
///
/// Variant order is the tie-break rank used when several actions of one user
/// share a timestamp: discovered < viewed < started_attempt < wrong < passed < correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Discovered,
    Viewed,
    StartedAttempt,
    Wrong,
    Passed,
    Correct,
}

impl Action {
    /// All categories in rank order
    pub const ALL: [Action; 6] = [
        Action::Discovered,
        Action::Viewed,
        Action::StartedAttempt,
        Action::Wrong,
        Action::Passed,
        Action::Correct,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Discovered => "discovered",
            Action::Viewed => "viewed",
            Action::StartedAttempt => "started_attempt",
            Action::Wrong => "wrong",
            Action::Passed => "passed",
            Action::Correct => "correct",
        }
    }

    /// Position in the ordered category set (0-based)
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Whether this category comes from the submissions stream
    pub fn is_submission(self) -> bool {
        matches!(self, Action::Wrong | Action::Correct)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ComputeError::UnknownAction(s.to_string()))
    }
}

/// Action categories of the step-interaction stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Discovered,
    Viewed,
    StartedAttempt,
    Passed,
}

impl EventAction {
    /// Fixed vocabulary of the events stream
    pub const ALL: [EventAction; 4] = [
        EventAction::Discovered,
        EventAction::Viewed,
        EventAction::StartedAttempt,
        EventAction::Passed,
    ];

    pub fn as_str(&self) -> &'static str {
        Action::from(*self).as_str()
    }
}

impl FromStr for EventAction {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventAction::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ComputeError::UnknownAction(s.to_string()))
    }
}

/// Outcomes of a practice submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Wrong,
    Correct,
}

impl SubmissionStatus {
    /// Fixed vocabulary of the submissions stream
    pub const ALL: [SubmissionStatus; 2] = [SubmissionStatus::Wrong, SubmissionStatus::Correct];

    pub fn as_str(&self) -> &'static str {
        Action::from(*self).as_str()
    }
}

impl FromStr for SubmissionStatus {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubmissionStatus::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ComputeError::UnknownAction(s.to_string()))
    }
}

impl From<EventAction> for Action {
    fn from(a: EventAction) -> Self {
        match a {
            EventAction::Discovered => Action::Discovered,
            EventAction::Viewed => Action::Viewed,
            EventAction::StartedAttempt => Action::StartedAttempt,
            EventAction::Passed => Action::Passed,
        }
    }
}

impl From<SubmissionStatus> for Action {
    fn from(s: SubmissionStatus) -> Self {
        match s {
            SubmissionStatus::Wrong => Action::Wrong,
            SubmissionStatus::Correct => Action::Correct,
        }
    }
}

/// A step interaction (discovered, viewed, started_attempt, passed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub user_id: UserId,
    pub step_id: StepId,
    /// Unix seconds
    pub timestamp: i64,
    pub action: EventAction,
}

/// A practice submission (wrong, correct)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub user_id: UserId,
    pub step_id: StepId,
    /// Unix seconds
    pub timestamp: i64,
    pub submission_status: SubmissionStatus,
}

/// One row of the merged interaction log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: UserId,
    pub step_id: StepId,
    /// Unix seconds
    pub timestamp: i64,
    pub action: Action,
}

impl From<&EventRecord> for Interaction {
    fn from(e: &EventRecord) -> Self {
        Interaction {
            user_id: e.user_id,
            step_id: e.step_id,
            timestamp: e.timestamp,
            action: e.action.into(),
        }
    }
}

impl From<&SubmissionRecord> for Interaction {
    fn from(s: &SubmissionRecord) -> Self {
        Interaction {
            user_id: s.user_id,
            step_id: s.step_id,
            timestamp: s.timestamp,
            action: s.submission_status.into(),
        }
    }
}

/// Anything attributable to one user at one instant
pub trait UserActivity {
    fn user_id(&self) -> UserId;
    fn timestamp(&self) -> i64;

    /// UTC calendar day of the timestamp
    fn day(&self) -> Option<NaiveDate> {
        day_of(self.timestamp())
    }
}

impl UserActivity for EventRecord {
    fn user_id(&self) -> UserId {
        self.user_id
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl UserActivity for SubmissionRecord {
    fn user_id(&self) -> UserId {
        self.user_id
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl UserActivity for Interaction {
    fn user_id(&self) -> UserId {
        self.user_id
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// UTC calendar day for a unix timestamp
pub fn day_of(timestamp: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(timestamp, 0).map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_rank_order() {
        let mut shuffled = vec![
            Action::Correct,
            Action::Wrong,
            Action::Discovered,
            Action::Passed,
            Action::StartedAttempt,
            Action::Viewed,
        ];
        shuffled.sort();
        assert_eq!(shuffled, Action::ALL.to_vec());
        assert_eq!(Action::Discovered.rank(), 0);
        assert_eq!(Action::Correct.rank(), 5);
    }

    #[test]
    fn test_action_parse() {
        assert_eq!("started_attempt".parse::<Action>().unwrap(), Action::StartedAttempt);
        assert!(matches!(
            "skipped".parse::<Action>(),
            Err(ComputeError::UnknownAction(_))
        ));
        // submission statuses are not step actions
        assert!("wrong".parse::<EventAction>().is_err());
        assert_eq!("wrong".parse::<SubmissionStatus>().unwrap(), SubmissionStatus::Wrong);
    }

    #[test]
    fn test_action_serialization() {
        let json = serde_json::to_string(&Action::StartedAttempt).unwrap();
        assert_eq!(json, "\"started_attempt\"");
    }

    #[test]
    fn test_day_of() {
        // 2018-05-17 23:59:59 UTC and the next second
        assert_eq!(day_of(1_526_601_599), NaiveDate::from_ymd_opt(2018, 5, 17));
        assert_eq!(day_of(1_526_601_600), NaiveDate::from_ymd_opt(2018, 5, 18));
    }
}
