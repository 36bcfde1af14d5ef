//! Error taxonomy shared by every layer of the service.
//!
//! Handlers never let an error escape unhandled: each variant converts into a
//! `{ "error": message }` JSON body via [`IntoResponse`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashboardError {
    /// A required secret or identifier is missing or unusable.
    #[error("{0}")]
    Configuration(String),

    /// GitHub refused to exchange the app assertion for an installation token.
    #[error("installation token exchange failed with status {status}: {body}")]
    CredentialExchange { status: u16, body: String },

    #[error("failed to sign app assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    /// GitHub issued a token that was already expired on arrival.
    #[error("installation token expired on issuance (expires_at {0})")]
    ExpiredToken(DateTime<Utc>),

    /// Transport failure or an in-band GraphQL error payload.
    #[error("GitHub GraphQL request failed: {0}")]
    GraphQLRequest(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to load team mapping: {0}")]
    MappingLoad(String),

    #[error("invalid timeFilter '{0}', expected one of 1d, 7d, 30d")]
    InvalidTimeFilter(String),
}

impl DashboardError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DashboardError::InvalidTimeFilter(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Rejected request");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type Result<T, E = DashboardError> = std::result::Result<T, E>;
