//! Outbound HTTP to GitHub.
//!
//! The credential issuer and GraphQL client only see [`GitHubTransport`], which
//! hands back the raw status and body so callers can apply their own status
//! policy (refresh-on-4xx, error bodies on failed exchanges).

use crate::error::Result;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;

const USER_AGENT: &str = concat!("devpulse/", env!("CARGO_PKG_VERSION"));

/// Status and body of a completed HTTP exchange.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }
}

#[async_trait]
pub trait GitHubTransport: Send + Sync {
    /// POSTs the signed app assertion to the installation access-token endpoint.
    async fn create_installation_token(
        &self,
        installation_id: &str,
        assertion: &str,
    ) -> Result<HttpResponse>;

    /// POSTs a GraphQL request body using an installation token as bearer.
    async fn post_graphql(&self, token: &str, body: &Value) -> Result<HttpResponse>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    api_url: String,
}

impl ReqwestTransport {
    pub fn new(api_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl GitHubTransport for ReqwestTransport {
    async fn create_installation_token(
        &self,
        installation_id: &str,
        assertion: &str,
    ) -> Result<HttpResponse> {
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url,
            installation_id.trim()
        );
        tracing::debug!(%url, "Requesting installation access token");

        let response = self
            .client
            .post(&url)
            .bearer_auth(assertion)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }

    async fn post_graphql(&self, token: &str, body: &Value) -> Result<HttpResponse> {
        let response = self
            .client
            .post(format!("{}/graphql", self.api_url))
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}
