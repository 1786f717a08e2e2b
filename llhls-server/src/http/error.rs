use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use llhls_muxer::MuxerError;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::container::ContainerError;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GONE, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

impl From<MuxerError> for AppError {
    fn from(err: MuxerError) -> Self {
        match err {
            MuxerError::SourceNotFound(_)
            | MuxerError::SegmentNotFound(_)
            | MuxerError::FragmentNotFound { .. } => Self::not_found(err.to_string()),
            MuxerError::IndexTimeout(_) | MuxerError::FragmentTimeout(_) => {
                Self::service_unavailable(err.to_string())
            }
            MuxerError::SourceClosed(_) => Self::gone(err.to_string()),
            MuxerError::NoVideo(_)
            | MuxerError::IngestClosed(_)
            | MuxerError::InvalidConfig(_) => {
                tracing::error!("Muxer error: {}", err);
                Self::internal("Internal server error")
            }
        }
    }
}

impl From<ContainerError> for AppError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::MissingParameterSets => Self::service_unavailable(err.to_string()),
            ContainerError::EmptySegment(_) => Self::not_found(err.to_string()),
        }
    }
}
