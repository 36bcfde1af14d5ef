use crate::types::{NormalizedPullRequest, PRState};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Open pull requests older than this count as aging.
pub const AGED_PR_THRESHOLD_DAYS: i64 = 5;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Per-user activity derived from a set of pull requests.
///
/// Field names on the wire follow the dashboard's front-end contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMetrics {
    #[serde(rename = "mergedPRs")]
    pub merged_prs: u64,
    /// Mean hours from creation to merge over merged PRs.
    #[serde(rename = "avgCycleTime")]
    pub avg_cycle_time_hours: f64,
    #[serde(rename = "reviewedPRs")]
    pub reviewed_prs: u64,
    /// Open PRs older than the aging threshold.
    #[serde(rename = "openPRs")]
    pub open_prs_aged: u64,
    pub commits: u64,
    #[serde(rename = "totalAdditions")]
    pub total_additions: u64,
    #[serde(rename = "totalDeletions")]
    pub total_deletions: u64,
    #[serde(rename = "totalChangedFiles")]
    pub total_changed_files: u64,
    #[serde(rename = "avgAdditionsPerPR")]
    pub avg_additions_per_pr: f64,
    #[serde(rename = "avgDeletionsPerPR")]
    pub avg_deletions_per_pr: f64,
    #[serde(rename = "avgFilesChangedPerPR")]
    pub avg_files_changed_per_pr: f64,
}

/// `numerator / count`, or 0 when there is nothing to average over.
pub(crate) fn mean(numerator: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        numerator / count as f64
    }
}

pub fn compute_user_metrics(
    username: &str,
    prs: &[NormalizedPullRequest],
    now: DateTime<Utc>,
) -> UserMetrics {
    compute_user_metrics_with_threshold(
        username,
        prs,
        now,
        Duration::days(AGED_PR_THRESHOLD_DAYS),
    )
}

/// Computes a user's metrics over `prs`.
///
/// Only merged PRs authored by the user feed cycle time, commit and change-size
/// figures. Reviews of the user's own PRs are not counted.
pub fn compute_user_metrics_with_threshold(
    username: &str,
    prs: &[NormalizedPullRequest],
    now: DateTime<Utc>,
    aged_threshold: Duration,
) -> UserMetrics {
    let authored: Vec<&NormalizedPullRequest> = prs
        .iter()
        .filter(|pr| pr.author == username && pr.merged)
        .collect();
    let merged_prs = authored.len() as u64;

    let total_cycle_seconds: i64 = authored
        .iter()
        .filter_map(|pr| pr.merged_at.map(|merged_at| (merged_at - pr.created_at).num_seconds()))
        .sum();

    let reviewed_prs = prs
        .iter()
        .filter(|pr| pr.author != username && pr.reviewers.contains(username))
        .count() as u64;

    let open_prs_aged = prs
        .iter()
        .filter(|pr| {
            pr.author == username
                && pr.state == PRState::Open
                && now - pr.created_at > aged_threshold
        })
        .count() as u64;

    let commits: u64 = authored.iter().map(|pr| pr.commit_count).sum();
    let total_additions: u64 = authored.iter().map(|pr| pr.additions).sum();
    let total_deletions: u64 = authored.iter().map(|pr| pr.deletions).sum();
    let total_changed_files: u64 = authored.iter().map(|pr| pr.changed_files).sum();

    UserMetrics {
        merged_prs,
        avg_cycle_time_hours: mean(total_cycle_seconds as f64 / SECONDS_PER_HOUR, merged_prs),
        reviewed_prs,
        open_prs_aged,
        commits,
        total_additions,
        total_deletions,
        total_changed_files,
        avg_additions_per_pr: mean(total_additions as f64, merged_prs),
        avg_deletions_per_pr: mean(total_deletions as f64, merged_prs),
        avg_files_changed_per_pr: mean(total_changed_files as f64, merged_prs),
    }
}

/// Metrics for everyone who authored or reviewed any of `prs`.
pub fn compute_all_metrics(
    prs: &[NormalizedPullRequest],
    now: DateTime<Utc>,
    aged_threshold: Duration,
) -> BTreeMap<String, UserMetrics> {
    let usernames: BTreeSet<&str> = prs
        .iter()
        .flat_map(|pr| {
            std::iter::once(pr.author.as_str()).chain(pr.reviewers.iter().map(String::as_str))
        })
        .collect();

    usernames
        .into_iter()
        .map(|username| {
            (
                username.to_string(),
                compute_user_metrics_with_threshold(username, prs, now, aged_threshold),
            )
        })
        .collect()
}
