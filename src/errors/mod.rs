/// Unified error handling module
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::domain::normalize::NormalizationError;

/// Unified error response format
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed input: {0}")]
    Malformed(#[from] NormalizationError),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("engine is not running")]
    EngineUnavailable,
}

impl ConsoleError {
    pub fn code(&self) -> &'static str {
        match self {
            ConsoleError::Transport(e) => match e.status().map(|s| s.as_u16()) {
                Some(404) => "UPSTREAM_404",
                Some(429) => "UPSTREAM_429",
                Some(500..=599) => "UPSTREAM_5XX",
                _ => "UPSTREAM_ERROR",
            },
            ConsoleError::Decode(_) => "DECODE_ERROR",
            ConsoleError::Io(_) => "IO_ERROR",
            ConsoleError::Malformed(_) => "MALFORMED_INPUT",
            ConsoleError::Upstream(_) => "UPSTREAM_ERROR",
            ConsoleError::InvalidInput(_) => "INVALID_INPUT",
            ConsoleError::EngineUnavailable => "ENGINE_UNAVAILABLE",
        }
    }
}

impl IntoResponse for ConsoleError {
    fn into_response(self) -> Response {
        let status = match &self {
            ConsoleError::InvalidInput(_) | ConsoleError::Malformed(_) => StatusCode::BAD_REQUEST,
            // Upstream trouble is reported in-band with ok=false
            _ => StatusCode::OK,
        };

        let error_response = ErrorResponse {
            ok: false,
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// Type alias for console results
pub type ConsoleResult<T> = Result<T, ConsoleError>;
