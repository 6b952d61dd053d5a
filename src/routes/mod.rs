//! HTTP routes for Studbook
//!
//! Handlers take already-extracted request parts (caller identity, path
//! segments, query string, body bytes) and return `Result`; the server maps
//! errors to `{"error": ..., "code": ...}` responses.

pub mod accounts;
pub mod admin;
pub mod animals;
pub mod health;
pub mod transfers;

pub use health::{health_check, readiness_check, version_info};

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::{Result, StudbookError};

pub type FullBody = Full<Bytes>;

#[derive(Debug, Serialize)]
struct ErrorResponse<'a> {
    error: String,
    code: &'a str,
}

/// JSON response with the given status
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
    let json = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

/// Error response carrying the error's status and machine code
pub fn error_response(err: &StudbookError) -> Response<FullBody> {
    json_response(
        err.status_code(),
        &ErrorResponse {
            error: err.to_string(),
            code: err.code(),
        },
    )
}

/// Identity resolved by the upstream auth layer, or 401
pub fn require_account(account: Option<&str>) -> Result<&str> {
    match account {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(StudbookError::Unauthenticated(
            "No account identity on request".into(),
        )),
    }
}

/// Parse a JSON request body
pub fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    if body.is_empty() {
        return Err(StudbookError::BadRequest("Request body is required".into()));
    }
    Ok(serde_json::from_slice(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_error_response_shape() {
        let err = StudbookError::InvalidState("Transfer t1 is already accepted".into());
        let response = error_response(&err);
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["code"], "INVALID_STATE");
        assert!(json["error"].as_str().unwrap().contains("already accepted"));
    }

    #[test]
    fn test_require_account() {
        assert_eq!(require_account(Some("u1")).unwrap(), "u1");
        assert!(matches!(
            require_account(Some("  ")),
            Err(StudbookError::Unauthenticated(_))
        ));
        assert!(matches!(
            require_account(None),
            Err(StudbookError::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_parse_body_errors_are_bad_request() {
        let err = parse_body::<serde_json::Value>(&Bytes::new()).unwrap_err();
        assert!(matches!(err, StudbookError::BadRequest(_)));
        let err = parse_body::<serde_json::Value>(&Bytes::from_static(b"{nope")).unwrap_err();
        assert!(matches!(err, StudbookError::BadRequest(_)));
    }
}
