use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;

use crate::error::RegistryError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{agent} is outside its schedule window")]
    OutsideSchedule {
        agent: String,
        next_window_start: Option<DateTime<Local>>,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_window_start: Option<DateTime<Local>>,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) | ApiError::OutsideSchedule { .. } => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::OutsideSchedule { .. } => "outside_schedule",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyRunning(_) => ApiError::Conflict(err.to_string()),
            RegistryError::UnknownAgent(_) => ApiError::NotFound(err.to_string()),
            RegistryError::Build(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(e) = &self {
            log::error!("api request failed: {:#}", e);
        }
        let status = self.status();
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code(),
            next_window_start: match &self {
                ApiError::OutsideSchedule {
                    next_window_start, ..
                } => *next_window_start,
                _ => None,
            },
        };
        (status, Json(body)).into_response()
    }
}
