use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::merge::MergeError;

#[derive(Debug, Error)]
pub enum SplicerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SplicerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SplicerError::Validation(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        SplicerError::Evaluation(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SplicerError::Validation(_) | SplicerError::Serialization(_) => StatusCode::BAD_REQUEST,
            SplicerError::Routing(_) | SplicerError::Transport(_) => StatusCode::BAD_GATEWAY,
            SplicerError::Merge(_) | SplicerError::Evaluation(_) | SplicerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<serde_json::Error> for SplicerError {
    fn from(err: serde_json::Error) -> Self {
        SplicerError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for SplicerError {
    fn from(err: reqwest::Error) -> Self {
        SplicerError::Transport(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SplicerError {
    fn from(err: tokio::task::JoinError) -> Self {
        SplicerError::Internal(format!("Slice task failed: {}", err))
    }
}

impl IntoResponse for SplicerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, SplicerError>;
