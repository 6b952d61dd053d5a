//! Error types for Studbook
//!
//! Transfer-domain kinds (`NotFound`, `PreconditionFailed`, `Unauthorized`,
//! `InvalidState`, `Conflict`) sit next to the infrastructure kinds so that
//! every layer shares one error type and one HTTP mapping.

use hyper::StatusCode;

/// Main error type for Studbook operations
#[derive(Debug, thiserror::Error)]
pub enum StudbookError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// The caller is authenticated but is not the party allowed to act
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// No account identity was resolved for the request
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StudbookError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PreconditionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::InvalidState(_) => StatusCode::CONFLICT,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for API clients
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::PreconditionFailed(_) => "PRECONDITION_FAILED",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Conflict(_) => "CONFLICT",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::Database(_) => "DB_ERROR",
            Self::Internal(_) => "INTERNAL",
            Self::Config(_) => "CONFIG",
        }
    }
}

impl From<std::io::Error> for StudbookError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for StudbookError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for StudbookError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for StudbookError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for StudbookError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Internal(format!("BSON encoding failed: {}", err))
    }
}

/// Result type alias for Studbook operations
pub type Result<T> = std::result::Result<T, StudbookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_kinds_map_to_distinct_statuses() {
        assert_eq!(
            StudbookError::NotFound("t".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            StudbookError::PreconditionFailed("p".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            StudbookError::Unauthorized("u".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            StudbookError::Unauthenticated("u".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            StudbookError::InvalidState("s".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_display_and_code() {
        let err = StudbookError::InvalidState("transfer t1 is accepted".into());
        assert_eq!(err.to_string(), "Invalid state: transfer t1 is accepted");
        assert_eq!(err.code(), "INVALID_STATE");
        assert_eq!(StudbookError::Config("x".into()).code(), "CONFIG");
    }
}
