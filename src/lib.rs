pub mod auth;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod graphql;
pub mod metrics;
pub mod querier;
pub mod repos;
pub mod team;
pub mod transport;
pub mod types;

use auth::TokenIssuer;
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use config::AppConfig;
use error::Result;
use graphql::GraphQLClient;
use querier::{MetricsQuerier, TeamMetricsResponse};
use repos::{CommitTotals, RepoSummary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use transport::{GitHubTransport, ReqwestTransport};
use types::TimeFilter;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct ReposResponse {
    pub repos: Vec<RepoSummary>,
}

#[derive(Serialize)]
pub struct TotalCommitsResponse {
    pub commits: CommitTotals,
}

/// Shared application state accessible to all request handlers.
pub struct AppState {
    /// Issues and caches installation tokens.
    pub issuer: Arc<TokenIssuer>,
    /// Service for querying pull-request, team and commit metrics.
    pub querier: MetricsQuerier,
    /// Application configuration loaded from environment variables.
    pub config: AppConfig,
}

impl AppState {
    /// Initializes the application state against the real GitHub API.
    pub fn new(config: AppConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config.github_api_url)?);
        Ok(Self::with_transport(config, transport))
    }

    pub fn with_transport(config: AppConfig, transport: Arc<dyn GitHubTransport>) -> Self {
        let issuer = Arc::new(TokenIssuer::from_config(&config, transport.clone()));
        let client = Arc::new(GraphQLClient::new(issuer.clone(), transport));
        let querier = MetricsQuerier::new(client, &config);
        Self {
            issuer,
            querier,
            config,
        }
    }
}

pub fn create_app(state: Arc<AppState>) -> Router {
    let index = state.config.static_dir.join("index.html");
    let serve_dir =
        ServeDir::new(&state.config.static_dir).not_found_service(ServeFile::new(index));

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/github-token", get(get_github_token))
        .route("/api/github-repos", get(get_github_repos))
        .route("/api/metrics", get(get_metrics))
        .route("/api/team-mapping", get(get_team_mapping))
        .route("/api/team-metrics", get(get_team_metrics))
        .route("/api/total-commits", get(get_total_commits))
        .fallback_service(serve_dir)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Query string accepted by the metrics endpoints.
///
/// Values are kept as strings so a bad value yields a JSON error body rather
/// than the extractor's plain-text rejection.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsParams {
    pub time_filter: Option<String>,
    pub pr_open_days_threshold: Option<String>,
}

impl MetricsParams {
    fn time_filter(&self) -> Result<TimeFilter> {
        TimeFilter::from_query(self.time_filter.as_deref())
    }

    /// Aging threshold override; absent or unusable values fall back to the default.
    fn aged_threshold(&self) -> Duration {
        let days = self
            .pr_open_days_threshold
            .as_deref()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|days| *days > 0)
            .unwrap_or(metrics::AGED_PR_THRESHOLD_DAYS);
        Duration::days(days)
    }
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "devpulse-backend",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn get_github_token(State(state): State<Arc<AppState>>) -> Result<Json<TokenResponse>> {
    let token = state.issuer.token(false).await?;
    Ok(Json(TokenResponse {
        token: token.value,
        expires_at: token.expires_at,
    }))
}

pub async fn get_github_repos(State(state): State<Arc<AppState>>) -> Result<Json<ReposResponse>> {
    let repos = state.querier.org_repositories().await?;
    tracing::debug!(count = repos.len(), "Returning organization repositories");
    Ok(Json(ReposResponse { repos }))
}

pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MetricsParams>,
) -> Result<Json<BTreeMap<String, metrics::UserMetrics>>> {
    let filter = params.time_filter()?;
    let metrics = state
        .querier
        .user_metrics(filter, params.aged_threshold())
        .await?;
    tracing::debug!(%filter, users = metrics.len(), "Returning user metrics");
    Ok(Json(metrics))
}

pub async fn get_team_mapping(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<team::TeamMember>>> {
    let members = state
        .querier
        .team_members()
        .await?
        .into_iter()
        .filter(|m| !m.github_username.is_empty())
        .collect();
    Ok(Json(members))
}

pub async fn get_team_metrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MetricsParams>,
) -> Result<Json<TeamMetricsResponse>> {
    let filter = params.time_filter()?;
    let response = state
        .querier
        .team_metrics(filter, params.aged_threshold())
        .await?;
    tracing::debug!(%filter, teams = response.team_metrics.len(), "Returning team metrics");
    Ok(Json(response))
}

pub async fn get_total_commits(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MetricsParams>,
) -> Result<Json<TotalCommitsResponse>> {
    let filter = params.time_filter()?;
    let commits = state.querier.commit_totals(filter).await?;
    Ok(Json(TotalCommitsResponse { commits }))
}
