//! Pull-request retrieval through the GitHub search API.
//!
//! Results are cached per cutoff timestamp so that dashboards refreshing the
//! same window within the TTL do not re-paginate the whole organization.

use crate::config::AppConfig;
use crate::error::{DashboardError, Result};
use crate::graphql::{GraphQLClient, PageInfo};
use crate::types::{NormalizedPullRequest, PRState};
use chrono::{DateTime, SecondsFormat, Utc};
use moka::future::Cache;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

const SEARCH_PAGE_SIZE: u32 = 100;

/// Login GitHub shows for content whose author account was deleted.
const GHOST_LOGIN: &str = "ghost";

const SEARCH_QUERY: &str = r#"
query($search: String!, $first: Int!, $cursor: String) {
  search(query: $search, type: ISSUE, first: $first, after: $cursor) {
    nodes {
      ... on PullRequest {
        author { login }
        reviews(first: 100) {
          nodes { author { login } }
        }
        createdAt
        mergedAt
        closedAt
        state
        merged
        commits { totalCount }
        additions
        deletions
        changedFiles
      }
    }
    pageInfo {
      hasNextPage
      endCursor
    }
  }
}
"#;

#[derive(Debug, Deserialize)]
struct SearchData {
    search: SearchConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchConnection {
    nodes: Vec<PullRequestNode>,
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct Actor {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ReviewNode {
    author: Option<Actor>,
}

#[derive(Debug, Deserialize)]
struct ReviewConnection {
    #[serde(default)]
    nodes: Vec<ReviewNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TotalCount {
    total_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestNode {
    author: Option<Actor>,
    reviews: Option<ReviewConnection>,
    created_at: DateTime<Utc>,
    merged_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    state: PRState,
    merged: bool,
    commits: TotalCount,
    additions: u64,
    deletions: u64,
    changed_files: u64,
}

impl From<PullRequestNode> for NormalizedPullRequest {
    fn from(node: PullRequestNode) -> Self {
        let author = node
            .author
            .map(|a| a.login)
            .unwrap_or_else(|| GHOST_LOGIN.to_string());

        let reviewers: BTreeSet<String> = node
            .reviews
            .map(|r| r.nodes)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|review| review.author.map(|a| a.login))
            .filter(|login| *login != author)
            .collect();

        NormalizedPullRequest {
            author,
            reviewers,
            created_at: node.created_at,
            merged_at: node.merged_at,
            closed_at: node.closed_at,
            state: node.state,
            merged: node.merged,
            commit_count: node.commits.total_count,
            additions: node.additions,
            deletions: node.deletions,
            changed_files: node.changed_files,
        }
    }
}

/// Cache key for a cutoff: its ISO-8601 form with millisecond precision.
pub fn cache_key(cutoff: DateTime<Utc>) -> String {
    cutoff.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Clone)]
pub struct PullRequestFetcher {
    client: Arc<GraphQLClient>,
    cache: Cache<String, Arc<Vec<NormalizedPullRequest>>>,
    org: Option<String>,
}

impl PullRequestFetcher {
    pub fn new(client: Arc<GraphQLClient>, config: &AppConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.pr_cache_max_capacity)
            .time_to_live(config.pr_cache_ttl())
            .build();

        Self {
            client,
            cache,
            org: config.github_org.clone(),
        }
    }

    pub fn org(&self) -> Result<&str> {
        self.org
            .as_deref()
            .filter(|org| !org.trim().is_empty())
            .ok_or_else(|| DashboardError::Configuration("GITHUB_ORG not set".to_string()))
    }

    /// Returns every pull request in the organization created after `cutoff`
    /// (read-through).
    pub async fn fetch_pull_requests(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Arc<Vec<NormalizedPullRequest>>> {
        let key = cache_key(cutoff);
        if let Some(prs) = self.cache.get(&key).await {
            tracing::debug!(cutoff = %key, count = prs.len(), "Serving pull requests from cache");
            return Ok(prs);
        }

        let prs = Arc::new(self.search_pull_requests(cutoff).await?);
        self.cache.insert(key, prs.clone()).await;

        Ok(prs)
    }

    async fn search_pull_requests(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<NormalizedPullRequest>> {
        let search = format!(
            "org:{} is:pr created:>{}",
            self.org()?,
            cutoff.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let mut prs = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let data: SearchData = self
                .client
                .execute(
                    SEARCH_QUERY,
                    json!({ "search": search, "first": SEARCH_PAGE_SIZE, "cursor": cursor }),
                )
                .await?;
            pages += 1;

            prs.extend(
                data.search
                    .nodes
                    .into_iter()
                    .map(NormalizedPullRequest::from),
            );

            match data.search.page_info.next_cursor("search")? {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::info!(%search, pages, count = prs.len(), "Fetched pull requests");
        Ok(prs)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::{AppCredentials, TokenIssuer};
    use crate::transport::testing::{ok, ScriptedTransport};
    use chrono::TimeZone;
    use jsonwebtoken::{Algorithm, EncodingKey};
    use serde_json::Value;

    pub(crate) fn pr_node(author: &str, reviewers: &[&str], merged: bool) -> Value {
        json!({
            "author": { "login": author },
            "reviews": {
                "nodes": reviewers
                    .iter()
                    .map(|r| json!({ "author": { "login": r } }))
                    .collect::<Vec<_>>()
            },
            "createdAt": "2024-01-02T10:00:00Z",
            "mergedAt": if merged { json!("2024-01-03T10:00:00Z") } else { Value::Null },
            "closedAt": if merged { json!("2024-01-03T10:00:00Z") } else { Value::Null },
            "state": if merged { "MERGED" } else { "OPEN" },
            "merged": merged,
            "commits": { "totalCount": 3 },
            "additions": 10,
            "deletions": 4,
            "changedFiles": 2
        })
    }

    pub(crate) fn search_page(nodes: Vec<Value>, next: Option<&str>) -> String {
        json!({
            "data": {
                "search": {
                    "nodes": nodes,
                    "pageInfo": { "hasNextPage": next.is_some(), "endCursor": next }
                }
            }
        })
        .to_string()
    }

    fn fetcher_with(transport: &Arc<ScriptedTransport>, config: AppConfig) -> PullRequestFetcher {
        let credentials =
            AppCredentials::new("1", "2", EncodingKey::from_secret(b"s"), Algorithm::HS256);
        let issuer = Arc::new(TokenIssuer::new(credentials, transport.clone()));
        let client = Arc::new(GraphQLClient::new(issuer, transport.clone()));
        PullRequestFetcher::new(client, &config)
    }

    fn fetcher(transport: &Arc<ScriptedTransport>) -> PullRequestFetcher {
        fetcher_with(
            transport,
            AppConfig {
                github_org: Some("acme".to_string()),
                ..AppConfig::default()
            },
        )
    }

    #[test]
    fn test_normalization_dedupes_reviewers_and_drops_self_review() {
        let node: PullRequestNode =
            serde_json::from_value(pr_node("alice", &["bob", "alice", "bob", "carol"], true))
                .unwrap();
        let pr = NormalizedPullRequest::from(node);

        assert_eq!(pr.author, "alice");
        assert_eq!(
            pr.reviewers.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["bob", "carol"]
        );
        assert_eq!(pr.state, PRState::Merged);
        assert_eq!(pr.commit_count, 3);
        assert_eq!(pr.changed_files, 2);
    }

    #[test]
    fn test_normalization_handles_deleted_accounts() {
        let mut value = pr_node("alice", &["bob"], false);
        value["author"] = Value::Null;
        value["reviews"]["nodes"][0]["author"] = Value::Null;
        let node: PullRequestNode = serde_json::from_value(value).unwrap();
        let pr = NormalizedPullRequest::from(node);

        assert_eq!(pr.author, GHOST_LOGIN);
        assert!(pr.reviewers.is_empty());
        assert_eq!(pr.merged_at, None);
    }

    #[tokio::test]
    async fn test_fetch_paginates_until_last_page() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_graphql(ok(search_page(
                vec![pr_node("alice", &["bob"], true), pr_node("bob", &[], false)],
                Some("CURSOR1"),
            )))
            .push_graphql(ok(search_page(vec![pr_node("carol", &["alice"], true)], None)));
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let prs = fetcher(&transport).fetch_pull_requests(cutoff).await.unwrap();

        assert_eq!(prs.len(), 3);
        assert_eq!(transport.graphql_calls(), 2);
        let bodies = transport.graphql_bodies();
        assert_eq!(
            bodies[0]["variables"]["search"],
            "org:acme is:pr created:>2024-01-01T00:00:00Z"
        );
        assert_eq!(bodies[0]["variables"]["first"], 100);
        assert_eq!(bodies[0]["variables"]["cursor"], Value::Null);
        assert_eq!(bodies[1]["variables"]["cursor"], "CURSOR1");
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_graphql(ok(search_page(vec![pr_node("alice", &[], true)], None)));
        let fetcher = fetcher(&transport);
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let first = fetcher.fetch_pull_requests(cutoff).await.unwrap();
        let second = fetcher.fetch_pull_requests(cutoff).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.graphql_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_page_aborts_fetch_and_caches_nothing() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_graphql(ok(search_page(vec![pr_node("alice", &[], true)], Some("C1"))));
        // Second page is unscripted and fails with a 500.
        let fetcher = fetcher(&transport);
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert!(fetcher.fetch_pull_requests(cutoff).await.is_err());

        transport.push_graphql(ok(search_page(vec![], None)));
        let prs = fetcher.fetch_pull_requests(cutoff).await.unwrap();
        assert!(prs.is_empty());
        assert_eq!(transport.graphql_calls(), 3);
    }

    #[tokio::test]
    async fn test_next_page_without_cursor_aborts_and_caches_nothing() {
        let transport = Arc::new(ScriptedTransport::new());
        let truncated = json!({
            "data": { "search": {
                "nodes": [pr_node("alice", &[], true)],
                "pageInfo": { "hasNextPage": true, "endCursor": null }
            }}
        })
        .to_string();
        transport.push_graphql(ok(truncated));
        let fetcher = fetcher(&transport);
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let err = fetcher.fetch_pull_requests(cutoff).await.unwrap_err();
        assert!(matches!(err, DashboardError::GraphQLRequest(_)));
        assert!(err.to_string().contains("search reported hasNextPage without endCursor"));

        transport.push_graphql(ok(search_page(vec![pr_node("bob", &[], true)], None)));
        let prs = fetcher.fetch_pull_requests(cutoff).await.unwrap();
        assert_eq!(prs.len(), 1);
        assert_eq!(prs[0].author, "bob");
        assert_eq!(transport.graphql_calls(), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched_and_replaced() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_graphql(ok(search_page(vec![pr_node("alice", &[], true)], None)))
            .push_graphql(ok(search_page(vec![pr_node("bob", &[], true)], None)));
        let fetcher = fetcher_with(
            &transport,
            AppConfig {
                github_org: Some("acme".to_string()),
                pr_cache_ttl_seconds: 1,
                ..AppConfig::default()
            },
        );
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let first = fetcher.fetch_pull_requests(cutoff).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        let second = fetcher.fetch_pull_requests(cutoff).await.unwrap();
        let third = fetcher.fetch_pull_requests(cutoff).await.unwrap();

        assert_eq!(first[0].author, "alice");
        assert_eq!(second[0].author, "bob");
        assert_eq!(third, second);
        assert_eq!(transport.graphql_calls(), 2);
    }

    #[test]
    fn test_cache_key_matches_iso_format() {
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(cache_key(cutoff), "2024-01-01T00:00:00.000Z");
    }
}
