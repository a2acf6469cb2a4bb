// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Operation errors and their HTTP mapping.

use crate::config::ConfigError;
use crate::logs::LogError;
use crate::plugins::PluginError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use livelist::LiveError;
use serde::Serialize;
use thiserror::Error;

/// Outcome of a failed administrative operation.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Access gate denied the request. Carries no detail on purpose.
    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Too many live streams open.
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }
}

/// API error response body
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if matches!(self, ApiError::Unauthorized) {
            return status.into_response();
        }
        let body = ErrorBody {
            error: self.to_string(),
            code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid(msg) => ApiError::BadRequest(msg),
            ConfigError::Json(e) => {
                ApiError::BadRequest(format!("invalid configuration value: {}", e))
            }
            ConfigError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<LogError> for ApiError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::NotFound(name) => ApiError::NotFound(format!("no log named '{}'", name)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<PluginError> for ApiError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::NotInstalled(id) => {
                ApiError::NotFound(format!("plugin '{}' is not installed", id))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<LiveError> for ApiError {
    fn from(err: LiveError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}
