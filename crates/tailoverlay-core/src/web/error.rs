//! HTTP error handling for the web API.
//!
//! This module provides conversion from core library errors to HTTP
//! responses with JSON error bodies. Every rejection reason keeps its own
//! error code so clients can branch on it.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::Error;

/// API error response body.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    /// HTTP status of the response
    #[serde(skip)]
    pub status: StatusCode,
    /// Error code (e.g., "E003" for a non-member)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable error message
    pub message: String,
    /// Additional details about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    /// Create a new API error with a status and message.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with code and message.
    ///
    /// The status is derived from the code.
    #[must_use]
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            status: status_for_code(&code),
            code: Some(code),
            message: message.into(),
            details: None,
        }
    }

    /// Add details to the error.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Create a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Create an internal server error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

/// HTTP status for a core error code.
#[must_use]
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "E002" => StatusCode::UNAUTHORIZED,
        "E001" | "E003" | "E005" | "E006" => StatusCode::FORBIDDEN,
        "E004" | "E008" => StatusCode::NOT_FOUND,
        "E007" => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        let details = err.suggestion().map(String::from);
        let api = match err.code() {
            Some(code) => Self::with_code(code, message),
            None => match err {
                Error::InvalidMessage(_) | Error::InvalidCodeFormat(_) => {
                    Self::bad_request(message)
                }
                other => {
                    tracing::error!("Request failed: {}", other);
                    Self::internal(message)
                }
            },
        };
        match details {
            Some(details) => api.with_details(details),
            None => api,
        }
    }
}

/// Result type for web handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_map_to_distinct_codes() {
        let cases = [
            (Error::InvalidCode, "E001", StatusCode::FORBIDDEN),
            (Error::IdentityUnavailable, "E002", StatusCode::UNAUTHORIZED),
            (Error::NotAMember, "E003", StatusCode::FORBIDDEN),
            (Error::RequestNotFound, "E004", StatusCode::NOT_FOUND),
            (
                Error::RequestNotAuthorizedForCaller,
                "E005",
                StatusCode::FORBIDDEN,
            ),
            (Error::Forbidden, "E006", StatusCode::FORBIDDEN),
            (Error::NoContent, "E007", StatusCode::BAD_REQUEST),
            (
                Error::ContentNotFound("x".into()),
                "E008",
                StatusCode::NOT_FOUND,
            ),
        ];

        for (err, code, status) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.code.as_deref(), Some(code));
            assert_eq!(api.status, status, "{code}");
        }
    }

    #[test]
    fn test_uncoded_errors() {
        let api: ApiError = Error::InvalidMessage("empty".into()).into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert!(api.code.is_none());

        let api: ApiError = Error::Io(std::io::Error::other("disk full")).into();
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_suggestion_becomes_details() {
        let api: ApiError = Error::NotAMember.into();
        assert!(api.details.is_some());
    }

    #[test]
    fn test_serialization() {
        let err = ApiError::with_code("E004", "Join request not found");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"code\":\"E004\""));
        assert!(json.contains("\"message\":\"Join request not found\""));
        assert!(!json.contains("details"));
        assert!(!json.contains("status"));
    }

    #[test]
    fn test_serialization_with_details() {
        let err = ApiError::bad_request("Error").with_details("Extra info");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"details\":\"Extra info\""));
    }
}
