use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures talking to an upstream site.
///
/// These are absorbed by the extractor chain and the cash resolver; only the
/// image proxy turns one into an HTTP status.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("malformed upstream data: {0}")]
    Malformed(String),
    #[error("browser error: {0}")]
    Browser(String),
}

/// Errors surfaced to HTTP callers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing {0}")]
    MissingParameter(&'static str),
    #[error("Bad URL")]
    InvalidProxyTarget(String),
    #[error("Fetch Failed")]
    ProxyFetchFailed(String),
    #[error("Not found")]
    NotFound,
    #[error("Internal error")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingParameter(_) | AppError::InvalidProxyTarget(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::ProxyFetchFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<&str> {
        match self {
            AppError::InvalidProxyTarget(d)
            | AppError::ProxyFetchFailed(d)
            | AppError::Internal(d) => Some(d.as_str()),
            AppError::MissingParameter(_) | AppError::NotFound => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        } else {
            tracing::debug!(error = ?self, "request rejected");
        }

        let body = match self.details() {
            Some(details) => json!({ "error": self.to_string(), "details": details }),
            None => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
