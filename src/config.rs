//! Application configuration and environment variable parsing.
//!
//! This module handles loading configuration settings from the environment (e.g., .env file).
//! GitHub App secrets are optional at boot so the server can start and report a
//! descriptive configuration error per request instead of refusing to run.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

/// Application configuration loaded from environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Numeric identifier of the GitHub App, used as the assertion issuer.
    pub github_app_id: Option<String>,

    /// Installation the App acts as when exchanging for access tokens.
    pub github_installation_id: Option<String>,

    /// PEM-encoded RSA private key of the App. Literal `\n` sequences are accepted.
    pub github_private_key: Option<String>,

    /// Organization whose pull requests, commits and repositories are reported.
    pub github_org: Option<String>,

    /// Base URL of the GitHub API. Overridable for GitHub Enterprise.
    #[serde(default = "default_api_url")]
    pub github_api_url: String,

    /// CSV file mapping GitHub usernames to team names.
    #[serde(default = "default_team_mapping_path")]
    pub team_mapping_path: PathBuf,

    /// How long a fetched pull-request set stays fresh, in seconds.
    #[serde(default = "default_pr_cache_ttl_seconds")]
    pub pr_cache_ttl_seconds: u64,

    /// Maximum number of distinct cutoff dates held in the pull-request cache.
    #[serde(default = "default_pr_cache_max_capacity")]
    pub pr_cache_max_capacity: u64,

    /// Directory holding the built front-end bundle.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_team_mapping_path() -> PathBuf {
    PathBuf::from("public/data/team-mapping.csv")
}

fn default_pr_cache_ttl_seconds() -> u64 {
    300
}

fn default_pr_cache_max_capacity() -> u64 {
    16
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_port() -> u16 {
    3000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn pr_cache_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.pr_cache_ttl_seconds)
    }

    /// The private key with escaped newlines restored, as stored by most secret managers.
    pub fn private_key_pem(&self) -> Option<String> {
        self.github_private_key
            .as_ref()
            .map(|key| key.replace("\\n", "\n"))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            github_app_id: None,
            github_installation_id: None,
            github_private_key: None,
            github_org: None,
            github_api_url: default_api_url(),
            team_mapping_path: default_team_mapping_path(),
            pr_cache_ttl_seconds: default_pr_cache_ttl_seconds(),
            pr_cache_max_capacity: default_pr_cache_max_capacity(),
            static_dir: default_static_dir(),
            port: default_port(),
        }
    }
}
