//! Organization repositories and commit tallies.

use crate::error::{DashboardError, Result};
use crate::graphql::{GraphQLClient, PageInfo};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::json;
use std::collections::HashMap;

const REPO_PAGE_SIZE: u32 = 100;
const COMMIT_REPO_PAGE_SIZE: u32 = 20;
const COMMIT_PAGE_SIZE: u32 = 100;

const ORG_REPOS_QUERY: &str = r#"
query($org: String!, $first: Int!, $cursor: String) {
  organization(login: $org) {
    repositories(first: $first, after: $cursor) {
      nodes {
        name
        url
        description
        isPrivate
        createdAt
        updatedAt
      }
      pageInfo {
        endCursor
        hasNextPage
      }
    }
  }
}
"#;

const OWNED_REPOS_QUERY: &str = r#"
query($org: String!, $first: Int!, $cursor: String) {
  organization(login: $org) {
    repositories(first: $first, after: $cursor, isFork: false, ownerAffiliations: [OWNER]) {
      nodes {
        name
      }
      pageInfo {
        endCursor
        hasNextPage
      }
    }
  }
}
"#;

const COMMIT_HISTORY_QUERY: &str = r#"
query($owner: String!, $name: String!, $since: GitTimestamp!, $first: Int!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    defaultBranchRef {
      target {
        ... on Commit {
          history(first: $first, since: $since, after: $cursor) {
            edges {
              node {
                author {
                  user { login }
                }
              }
            }
            pageInfo {
              endCursor
              hasNextPage
            }
          }
        }
      }
    }
  }
}
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSummary {
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct OrgData<N> {
    organization: Option<Organization<N>>,
}

#[derive(Debug, Deserialize)]
struct Organization<N> {
    repositories: Connection<N>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection<N> {
    nodes: Vec<N>,
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct RepoName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryData {
    repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Repository {
    default_branch_ref: Option<BranchRef>,
}

#[derive(Debug, Deserialize)]
struct BranchRef {
    target: Option<CommitTarget>,
}

#[derive(Debug, Deserialize)]
struct CommitTarget {
    history: Option<History>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct History {
    edges: Vec<CommitEdge>,
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct CommitEdge {
    node: CommitNode,
}

#[derive(Debug, Deserialize)]
struct CommitNode {
    author: Option<GitActor>,
}

#[derive(Debug, Deserialize)]
struct GitActor {
    user: Option<Login>,
}

#[derive(Debug, Deserialize)]
struct Login {
    login: String,
}

/// Counts keyed by name, ordered by descending count (ties by name).
///
/// Serializes as a JSON object whose keys keep that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankedCounts(Vec<(String, u64)>);

impl RankedCounts {
    pub fn from_counts(counts: HashMap<String, u64>) -> Self {
        let mut entries: Vec<(String, u64)> = counts.into_iter().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Self(entries)
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, c)| *c)
    }

    pub fn entries(&self) -> &[(String, u64)] {
        &self.0
    }
}

impl Serialize for RankedCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(name, count)| (name, count)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitTotals {
    /// Commits per platform user; commits without a linked account are absent.
    pub commits: RankedCounts,
    /// Commits per repository, including unattributed ones.
    pub repos: RankedCounts,
}

fn organization_not_found(org: &str) -> DashboardError {
    DashboardError::GraphQLRequest(format!(
        "organization '{org}' not found or not visible to the installation"
    ))
}

/// Lists every repository of `org`.
pub async fn list_org_repositories(client: &GraphQLClient, org: &str) -> Result<Vec<RepoSummary>> {
    let mut repos = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let data: OrgData<RepoSummary> = client
            .execute(
                ORG_REPOS_QUERY,
                json!({ "org": org, "first": REPO_PAGE_SIZE, "cursor": cursor }),
            )
            .await?;
        let organization = data.organization.ok_or_else(|| organization_not_found(org))?;
        let connection = organization.repositories;
        repos.extend(connection.nodes);

        match connection.page_info.next_cursor("repositories")? {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(repos)
}

/// Tallies default-branch commits since `cutoff` across the organization's own,
/// non-fork repositories.
pub async fn fetch_total_commits_for_org(
    client: &GraphQLClient,
    org: &str,
    cutoff: DateTime<Utc>,
) -> Result<CommitTotals> {
    let since = cutoff.to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut commits: HashMap<String, u64> = HashMap::new();
    let mut repos: HashMap<String, u64> = HashMap::new();
    let mut repo_cursor: Option<String> = None;

    loop {
        let data: OrgData<RepoName> = client
            .execute(
                OWNED_REPOS_QUERY,
                json!({ "org": org, "first": COMMIT_REPO_PAGE_SIZE, "cursor": repo_cursor }),
            )
            .await?;
        let organization = data.organization.ok_or_else(|| organization_not_found(org))?;
        let connection = organization.repositories;

        for repo in connection.nodes {
            tally_repository(client, org, &repo.name, &since, &mut commits, &mut repos).await?;
        }

        match connection.page_info.next_cursor("repositories")? {
            Some(next) => repo_cursor = Some(next),
            None => break,
        }
    }

    tracing::info!(
        %org,
        repos = repos.len(),
        users = commits.len(),
        "Tallied organization commits"
    );
    Ok(CommitTotals {
        commits: RankedCounts::from_counts(commits),
        repos: RankedCounts::from_counts(repos),
    })
}

async fn tally_repository(
    client: &GraphQLClient,
    org: &str,
    repo: &str,
    since: &str,
    commits: &mut HashMap<String, u64>,
    repos: &mut HashMap<String, u64>,
) -> Result<()> {
    let mut cursor: Option<String> = None;

    loop {
        let data: RepositoryData = client
            .execute(
                COMMIT_HISTORY_QUERY,
                json!({
                    "owner": org,
                    "name": repo,
                    "since": since,
                    "first": COMMIT_PAGE_SIZE,
                    "cursor": cursor,
                }),
            )
            .await?;

        let Some(history) = data
            .repository
            .and_then(|r| r.default_branch_ref)
            .and_then(|b| b.target)
            .and_then(|t| t.history)
        else {
            tracing::debug!(%repo, "Repository has no default branch history");
            return Ok(());
        };

        *repos.entry(repo.to_string()).or_insert(0) += history.edges.len() as u64;
        for edge in history.edges {
            if let Some(login) = edge.node.author.and_then(|a| a.user).map(|u| u.login) {
                *commits.entry(login).or_insert(0) += 1;
            }
        }

        match history.page_info.next_cursor("history")? {
            Some(next) => cursor = Some(next),
            None => return Ok(()),
        }
    }
}
