//! Error kinds shared by the store, the collaborators and the HTTP shell.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub type OracleResult<T> = std::result::Result<T, OracleError>;

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// External price fetch failed (after retries when wrapped in `Retrying`).
    #[error("price provider error: {0}")]
    Provider(String),

    /// Latest block height could not be obtained.
    #[error("chain error: {0}")]
    Chain(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// No sample satisfies the query. Expected outcome, not a fault.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl OracleError {
    /// Upstream failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Provider(_) | Self::Chain(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Provider(_) | Self::Chain(_) | Self::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<reqwest::Error> for OracleError {
    fn from(e: reqwest::Error) -> Self {
        Self::Provider(e.to_string())
    }
}

impl IntoResponse for OracleError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        let body = json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
