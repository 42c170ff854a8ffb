use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::UnknownVariant;

/// Failures of the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("corrupt row: {0}")]
    Corrupt(#[from] UnknownVariant),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors crossing the engine boundary.
#[derive(Debug, Error)]
pub enum BookingError {
    /// Seats were taken by someone else, or kept changing under us until the
    /// retry budget ran out. The caller can refresh those seats and retry.
    #[error("seats unavailable: {seat_ids:?}")]
    Conflict { seat_ids: Vec<i64> },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("not permitted for this user")]
    NotOwner,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type BookingResult<T> = Result<T, BookingError>;

impl BookingError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        BookingError::InvalidState(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        BookingError::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        BookingError::Validation(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::Conflict { .. } => StatusCode::CONFLICT,
            BookingError::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
            BookingError::NotOwner => StatusCode::FORBIDDEN,
            BookingError::Validation(_) => StatusCode::BAD_REQUEST,
            BookingError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<validator::ValidationErrors> for BookingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        BookingError::Validation(errors.to_string())
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            BookingError::Conflict { seat_ids } => json!({
                "success": false,
                "message": "Some seats are no longer available",
                "conflicting_seat_ids": seat_ids,
            }),
            BookingError::Store(e) => {
                tracing::error!("store failure: {:?}", e);
                json!({ "success": false, "message": "Internal storage error" })
            }
            other => json!({ "success": false, "message": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
