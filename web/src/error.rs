//! HTTP error responses.
//!
//! [`AppError`] carries a status, a machine-readable code and a message
//! that is safe to show the caller. Domain failures convert through
//! `From<BoxOfficeError>`; server-side detail stays in the source chain and
//! only reaches the logs.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use boxoffice_core::BoxOfficeError;
use serde::Serialize;
use std::fmt;

/// Error returned by every handler.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<Receipt>, AppError> {
///     let receipt = state.checkout.create_session(request).await?;
///     Ok(Json(receipt))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: &'static str,
    retryable: bool,
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create an error with an explicit status and code.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            retryable: false,
            source: None,
        }
    }

    /// Attach an internal cause, logged but never returned to the caller.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// 409 Conflict.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// 422 Unprocessable Entity.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", message)
    }

    /// 502 Bad Gateway; an upstream refused the request.
    #[must_use]
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "BAD_GATEWAY", message)
    }

    /// 503 Service Unavailable; the caller may retry.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        let mut err = Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message);
        err.retryable = true;
        err
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
    retryable: bool,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            let cause = self.source.as_ref().map(|e| format!("{e:#}"));
            tracing::error!(
                status = %self.status,
                code = self.code,
                message = %self.message,
                cause = cause.as_deref(),
                "Request failed"
            );
        } else {
            tracing::debug!(
                status = %self.status,
                code = self.code,
                message = %self.message,
                "Request rejected"
            );
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
            retryable: self.retryable,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<BoxOfficeError> for AppError {
    fn from(err: BoxOfficeError) -> Self {
        match err {
            BoxOfficeError::Validation(msg) => Self::validation(msg),
            err @ BoxOfficeError::CapacityExceeded { .. } => Self::conflict(err.to_string()),
            err @ BoxOfficeError::TransientStore(_) => {
                Self::unavailable("Temporarily unable to complete the request")
                    .with_source(err.into())
            }
            err @ BoxOfficeError::GatewayUnavailable(_) => {
                Self::unavailable("Payment provider unavailable").with_source(err.into())
            }
            err @ BoxOfficeError::GatewayRejected(_) => {
                Self::bad_gateway("Payment provider refused the checkout").with_source(err.into())
            }
            err @ BoxOfficeError::Store(_) => {
                Self::internal("An internal error occurred").with_source(err.into())
            }
        }
    }
}

/// Body rejections keep axum's status (400 syntax, 415 content type,
/// 422 shape) but answer with the JSON error body.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), "INVALID_BODY", rejection.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::ShowingId;

    #[test]
    fn display_includes_code() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn domain_errors_map_to_statuses() {
        let cases = [
            (
                BoxOfficeError::Validation("cart is empty".to_string()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                BoxOfficeError::CapacityExceeded {
                    showing_id: ShowingId::new(7),
                    requested: 3,
                },
                StatusCode::CONFLICT,
            ),
            (
                BoxOfficeError::TransientStore("serialization failure".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                BoxOfficeError::GatewayUnavailable("timeout".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                BoxOfficeError::GatewayRejected("invalid currency".to_string()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                BoxOfficeError::Store("relation missing".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn validation_message_is_passed_through() {
        let err = AppError::from(BoxOfficeError::Validation("cart is empty".to_string()));
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(err.to_string(), "[VALIDATION_ERROR] cart is empty");
    }

    #[test]
    fn store_detail_stays_in_the_source() {
        let err =
            AppError::from(BoxOfficeError::Store("password authentication failed".to_string()));
        assert!(!err.to_string().contains("password"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(AppError::unavailable("busy").retryable);
        assert!(!AppError::conflict("sold out").retryable);
        assert!(!AppError::from(BoxOfficeError::GatewayRejected("400".to_string())).retryable);
    }
}
