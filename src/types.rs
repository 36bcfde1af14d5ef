use crate::error::DashboardError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PRState {
    Open,
    Closed,
    Merged,
}

/// A pull request reduced to the fields the metrics need.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedPullRequest {
    pub author: String,
    /// Distinct logins that left a review, never including `author`.
    pub reviewers: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub state: PRState,
    pub merged: bool,
    pub commit_count: u64,
    pub additions: u64,
    pub deletions: u64,
    pub changed_files: u64,
}

/// Reporting window selectable from the dashboard.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TimeFilter {
    OneDay,
    #[default]
    SevenDays,
    ThirtyDays,
}

impl TimeFilter {
    pub fn days(self) -> i64 {
        match self {
            TimeFilter::OneDay => 1,
            TimeFilter::SevenDays => 7,
            TimeFilter::ThirtyDays => 30,
        }
    }

    /// Earliest creation time included in the window ending at `now`.
    pub fn cutoff(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.days())
    }

    /// Parses an optional query value, defaulting to seven days when absent.
    pub fn from_query(value: Option<&str>) -> Result<Self, DashboardError> {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => v.parse(),
            None => Ok(Self::default()),
        }
    }
}

impl FromStr for TimeFilter {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1d" => Ok(TimeFilter::OneDay),
            "7d" => Ok(TimeFilter::SevenDays),
            "30d" => Ok(TimeFilter::ThirtyDays),
            other => Err(DashboardError::InvalidTimeFilter(other.to_string())),
        }
    }
}

impl fmt::Display for TimeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d", self.days())
    }
}
