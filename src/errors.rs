//! Error types for the catalog core and its transport surface.
//!
//! `CatalogError` is what every service returns. `ErrorKind` groups its
//! variants into the stable kinds a caller renders (CLI exit message, HTTP
//! status). `AppError` is the axum-facing wrapper.

use crate::models::{access::AccessType, grant::GranteeType};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("object `{name}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, name: String },
    #[error("revision {commit_time} of `{bucket}/{name}` not found")]
    RevisionNotFound {
        bucket: String,
        name: String,
        commit_time: i64,
    },
    #[error("no {grantee_type} grant for `{grantee}` on {target}")]
    GrantNotFound {
        target: String,
        grantee_type: GranteeType,
        grantee: String,
    },
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("object `{name}` already exists in bucket `{bucket}`")]
    ObjectAlreadyExists { bucket: String, name: String },
    #[error("a {grantee_type} grant for `{grantee}` already exists on {target}")]
    GrantAlreadyExists {
        target: String,
        grantee_type: GranteeType,
        grantee: String,
    },
    #[error("bucket name `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object name `{0}` invalid: must be non-empty without leading or trailing whitespace")]
    InvalidObjectName(String),
    #[error("{field} `{value}` contains disallowed characters or malformed segments")]
    InvalidKindOrContentType { field: &'static str, value: String },
    #[error("tags `{0}` invalid: each tag must start with a letter, tags are comma separated")]
    InvalidTags(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("bucket `{name}` still holds {objects} object(s)")]
    BucketNotEmpty { name: String, objects: i64 },
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),
    #[error("`{user}` has {actual} access on {target}, {required} is required")]
    AccessDenied {
        user: String,
        target: String,
        actual: AccessType,
        required: AccessType,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Stable classification of every `CatalogError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    AlreadyExists,
    Conflict,
    NotAuthenticated,
    AccessDenied,
    Internal,
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BucketNotFound(_)
            | Self::ObjectNotFound { .. }
            | Self::RevisionNotFound { .. }
            | Self::GrantNotFound { .. } => ErrorKind::NotFound,
            Self::BucketAlreadyExists(_)
            | Self::ObjectAlreadyExists { .. }
            | Self::GrantAlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::InvalidBucketName { .. }
            | Self::InvalidObjectName(_)
            | Self::InvalidKindOrContentType { .. }
            | Self::InvalidTags(_)
            | Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::BucketNotEmpty { .. } => ErrorKind::Conflict,
            Self::NotAuthenticated(_) => ErrorKind::NotAuthenticated,
            Self::AccessDenied { .. } => ErrorKind::AccessDenied,
            Self::Sqlx(_) | Self::Migrate(_) => ErrorKind::Internal,
        }
    }
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidArgument => StatusCode::BAD_REQUEST,
            Self::AlreadyExists | Self::Conflict => StatusCode::CONFLICT,
            Self::NotAuthenticated => StatusCode::UNAUTHORIZED,
            Self::AccessDenied => StatusCode::FORBIDDEN,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A lightweight wrapper for errors crossing the HTTP boundary.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            status: kind.status(),
            kind,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    /// 503, for probes whose dependency is not ready yet.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            ..Self::internal(msg)
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "kind": self.kind,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        AppError::new(err.kind(), err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_validation_failure_is_an_invalid_argument() {
        let errors = [
            CatalogError::InvalidBucketName {
                name: "A".into(),
                reason: "uppercase".into(),
            },
            CatalogError::InvalidObjectName(" x".into()),
            CatalogError::InvalidKindOrContentType {
                field: "kind",
                value: "a/ b".into(),
            },
            CatalogError::InvalidTags("1x".into()),
        ];
        for err in errors {
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
            assert_eq!(err.kind().status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn non_empty_bucket_is_a_conflict() {
        let err = CatalogError::BucketNotEmpty {
            name: "b".into(),
            objects: 2,
        };
        let app: AppError = err.into();
        assert_eq!(app.kind, ErrorKind::Conflict);
        assert_eq!(app.status, StatusCode::CONFLICT);
        assert_eq!(app.message, "bucket `b` still holds 2 object(s)");
    }
}
