//! Service layer that answers dashboard queries.
//!
//! `MetricsQuerier` is the main entry point for metrics requests. It:
//! 1. Turns a time filter into a cutoff date.
//! 2. Reads pull requests through the cached fetcher.
//! 3. Computes per-user metrics and, when asked, per-team rollups.

use crate::config::AppConfig;
use crate::error::Result;
use crate::fetcher::PullRequestFetcher;
use crate::graphql::GraphQLClient;
use crate::metrics::{self, UserMetrics};
use crate::repos::{self, CommitTotals, RepoSummary};
use crate::team::{self, TeamMember, TeamMetrics};
use crate::types::TimeFilter;
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMetricsResponse {
    pub team_metrics: Vec<TeamMetrics>,
    pub user_metrics: BTreeMap<String, UserMetrics>,
}

#[derive(Clone)]
pub struct MetricsQuerier {
    client: Arc<GraphQLClient>,
    fetcher: PullRequestFetcher,
    team_mapping_path: PathBuf,
}

/// Start of the UTC day containing `instant`, so a whole day's requests share
/// one fetch.
fn fetch_cutoff(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .duration_trunc(Duration::days(1))
        .unwrap_or(instant)
}

impl MetricsQuerier {
    pub fn new(client: Arc<GraphQLClient>, config: &AppConfig) -> Self {
        Self {
            fetcher: PullRequestFetcher::new(client.clone(), config),
            client,
            team_mapping_path: config.team_mapping_path.clone(),
        }
    }

    pub async fn user_metrics(
        &self,
        filter: TimeFilter,
        aged_threshold: Duration,
    ) -> Result<BTreeMap<String, UserMetrics>> {
        self.user_metrics_at(filter, aged_threshold, Utc::now()).await
    }

    pub async fn user_metrics_at(
        &self,
        filter: TimeFilter,
        aged_threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, UserMetrics>> {
        let cutoff = filter.cutoff(now);
        let prs = self.fetcher.fetch_pull_requests(fetch_cutoff(cutoff)).await?;

        let in_window: Vec<_> = prs
            .iter()
            .filter(|pr| pr.created_at >= cutoff)
            .cloned()
            .collect();
        tracing::debug!(
            filter = %filter,
            fetched = prs.len(),
            in_window = in_window.len(),
            "Computing user metrics"
        );

        Ok(metrics::compute_all_metrics(&in_window, now, aged_threshold))
    }

    /// Per-user metrics plus the team rollup built from the mapping file.
    pub async fn team_metrics(
        &self,
        filter: TimeFilter,
        aged_threshold: Duration,
    ) -> Result<TeamMetricsResponse> {
        let members = self.team_members().await?;
        let user_metrics = self.user_metrics(filter, aged_threshold).await?;
        let team_metrics = team::group_metrics_by_team(&user_metrics, &members);

        Ok(TeamMetricsResponse {
            team_metrics,
            user_metrics,
        })
    }

    pub async fn team_members(&self) -> Result<Vec<TeamMember>> {
        team::load_team_mappings(&self.team_mapping_path).await
    }

    pub async fn org_repositories(&self) -> Result<Vec<RepoSummary>> {
        let org = self.fetcher.org()?;
        repos::list_org_repositories(&self.client, org).await
    }

    pub async fn commit_totals(&self, filter: TimeFilter) -> Result<CommitTotals> {
        let org = self.fetcher.org()?;
        let cutoff = filter.cutoff(Utc::now());
        repos::fetch_total_commits_for_org(&self.client, org, cutoff).await
    }
}
