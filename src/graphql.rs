//! GraphQL calls made as the App installation.

use crate::auth::TokenIssuer;
use crate::error::{DashboardError, Result};
use crate::transport::{GitHubTransport, HttpResponse};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Cursor state of a GraphQL connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

impl PageInfo {
    /// Cursor for the next page, or `None` on the last page.
    ///
    /// Errors when the connection claims another page but sends no cursor.
    pub fn next_cursor(self, connection: &str) -> Result<Option<String>> {
        match (self.has_next_page, self.end_cursor) {
            (false, _) => Ok(None),
            (true, Some(cursor)) => Ok(Some(cursor)),
            (true, None) => Err(DashboardError::GraphQLRequest(format!(
                "{connection} reported hasNextPage without endCursor"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphQLEnvelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Option<Vec<Value>>,
}

enum Attempt {
    Done(HttpResponse),
    /// The credential was rejected; the token should be refreshed before retrying.
    NeedsRefresh(HttpResponse),
}

pub struct GraphQLClient {
    issuer: Arc<TokenIssuer>,
    transport: Arc<dyn GitHubTransport>,
}

impl GraphQLClient {
    pub fn new(issuer: Arc<TokenIssuer>, transport: Arc<dyn GitHubTransport>) -> Self {
        Self { issuer, transport }
    }

    /// Runs `query` and deserializes its `data` into `T`.
    ///
    /// A 4xx response forces one token refresh and one retry. Anything still
    /// failing after that, a 5xx, or a non-empty `errors` array is returned as
    /// [`DashboardError::GraphQLRequest`].
    pub async fn execute<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let body = json!({ "query": query, "variables": variables });

        let token = self.issuer.token(false).await?;
        let response = match self.attempt(&token.value, &body).await? {
            Attempt::Done(response) => response,
            Attempt::NeedsRefresh(response) => {
                tracing::warn!(
                    status = response.status,
                    "GraphQL request rejected, refreshing installation token and retrying once"
                );
                let token = self.issuer.token(true).await?;
                match self.attempt(&token.value, &body).await? {
                    Attempt::Done(response) => response,
                    Attempt::NeedsRefresh(response) => {
                        return Err(DashboardError::GraphQLRequest(format!(
                            "status {} after token refresh: {}",
                            response.status, response.body
                        )))
                    }
                }
            }
        };

        if !response.is_success() {
            return Err(DashboardError::GraphQLRequest(format!(
                "status {}: {}",
                response.status, response.body
            )));
        }

        parse_envelope(&response.body)
    }

    async fn attempt(&self, token: &str, body: &Value) -> Result<Attempt> {
        let response = self
            .transport
            .post_graphql(token, body)
            .await
            .map_err(|e| match e {
                DashboardError::Http(e) => DashboardError::GraphQLRequest(e.to_string()),
                other => other,
            })?;
        if response.is_client_error() {
            Ok(Attempt::NeedsRefresh(response))
        } else {
            Ok(Attempt::Done(response))
        }
    }
}

fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<T> {
    let envelope: GraphQLEnvelope<T> = serde_json::from_str(body)
        .map_err(|e| DashboardError::GraphQLRequest(format!("unexpected response shape: {e}")))?;

    if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
        return Err(DashboardError::GraphQLRequest(
            Value::Array(errors).to_string(),
        ));
    }

    envelope
        .data
        .ok_or_else(|| DashboardError::GraphQLRequest("response contained no data".to_string()))
}
