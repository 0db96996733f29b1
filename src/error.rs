use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;
use uuid::Uuid;

use crate::store::models::ContentKind;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,
}

/// Machine-readable failure class of a data store call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorCode {
    NotFound,
    Conflict,
    Unavailable,
    General,
}

/// Failure of a single data store call
#[derive(Error, Debug, Clone)]
#[error("{code:?}: {message}")]
pub struct StoreError {
    pub code: StoreErrorCode,
    pub message: String,
}

impl StoreError {
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::NotFound, message)
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self::new(StoreErrorCode::General, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == StoreErrorCode::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.code == StoreErrorCode::Conflict
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        let code = match &error {
            sqlx::Error::RowNotFound => StoreErrorCode::NotFound,
            // 23505 = unique_violation
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                StoreErrorCode::Conflict
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreErrorCode::Unavailable
            }
            _ => StoreErrorCode::General,
        };
        StoreError::new(code, error.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Group synchronization errors
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Group not found: {0}")]
    GroupNotFound(Uuid),

    #[error("Membership not found for student {student_id} in group {group_id}")]
    MembershipNotFound { group_id: Uuid, student_id: Uuid },

    #[error("Group assignment not found: {0}")]
    AssignmentNotFound(Uuid),

    #[error("Group-level {kind} assignment could not be written: {message}")]
    GroupWrite { kind: ContentKind, message: String },

    #[error("Routine {routine_id} maps unknown weekday '{day}'")]
    UnknownWeekday { routine_id: Uuid, day: String },

    #[error("Routine {0} has no sessions mapped to any weekday")]
    EmptyRoutine(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Sync(SyncError::Validation(reason)) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
                reason,
                None,
            ),
            AppError::Sync(SyncError::GroupNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "GROUP_NOT_FOUND",
                format!("Group not found: {}", id),
                None,
            ),
            AppError::Sync(SyncError::MembershipNotFound { group_id, student_id }) => (
                StatusCode::NOT_FOUND,
                "MEMBERSHIP_NOT_FOUND",
                format!("Student {} is not an active member of group {}", student_id, group_id),
                Some(serde_json::json!({
                    "group_id": group_id,
                    "student_id": student_id,
                })),
            ),
            AppError::Sync(SyncError::AssignmentNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "ASSIGNMENT_NOT_FOUND",
                format!("Group assignment not found: {}", id),
                None,
            ),
            // The only failure whose backend message reaches the caller
            AppError::Sync(SyncError::GroupWrite { kind, message }) => (
                StatusCode::BAD_GATEWAY,
                "GROUP_ASSIGNMENT_FAILED",
                format!("Could not create the group {} assignment: {}", kind, message),
                Some(serde_json::json!({"kind": kind})),
            ),
            AppError::Store(ref e) | AppError::Sync(SyncError::Store(ref e)) if e.is_not_found() => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "Resource not found".to_string(),
                None,
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Missing or invalid x-user-id header".to_string(),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_bad_request() {
        let response =
            AppError::from(SyncError::Validation("no content selected".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_group_write_is_surfaced_as_bad_gateway() {
        let response = AppError::from(SyncError::GroupWrite {
            kind: ContentKind::Course,
            message: "connection reset".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_store_not_found_maps_to_404() {
        let response = AppError::from(StoreError::not_found("grupo")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError::from(SyncError::Store(StoreError::general("boom"))).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_row_not_found_becomes_not_found_code() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
    }
}
