use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration or one-time initialization failure of the storage client.
    #[error(transparent)]
    Database(#[from] DbError),
    #[error("{message}")]
    BadRequest { message: String, details: Vec<String> },
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Operational(#[from] anyhow::Error),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into(), details: Vec::new() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn is_caller_fixable(&self) -> bool {
        matches!(self, AppError::BadRequest { .. } | AppError::NotFound(_))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(_) | AppError::Operational(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if !self.is_caller_fixable() {
            match &self {
                AppError::Database(err) if err.is_configuration() => {
                    tracing::error!(error = %err, "storage is not configured")
                }
                err => tracing::error!(error = format!("{err:#}"), "request failed"),
            }
        }

        let (detail, details) = match self {
            AppError::BadRequest { message, details } => (message, details),
            AppError::NotFound(message) => (message, Vec::new()),
            AppError::Database(_) | AppError::Operational(_) => {
                ("internal server error".to_string(), Vec::new())
            }
        };

        let mut body = json!({
            "title": status.canonical_reason().unwrap_or("Error"),
            "status": status.as_u16(),
            "detail": detail,
        });
        if !details.is_empty() {
            body["errors"] =
                details.into_iter().map(|message| json!({ "message": message })).collect();
        }

        (status, [(header::CONTENT_TYPE, "application/problem+json")], Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
