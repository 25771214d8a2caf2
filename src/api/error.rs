use axum::extract::multipart::MultipartError;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::backend::BackendError;
use crate::error::{ErrorKind, FormError, GENERIC_ERROR_MESSAGE};
use crate::notifications::NotifyError;
use crate::pipeline::AnalysisError;
use crate::retry::Retryable;
use crate::store::StoreError;
use crate::vaccine::VaccineError;
use crate::validation::ValidationResult;

/// Where the SPA sends a user whose session is missing or rejected.
pub const LOGIN_PATH: &str = "/api/login";

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_url: Option<&'static str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed")]
    Invalid(ValidationResult),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<FormError> for ApiError {
    fn from(err: FormError) -> Self {
        match err {
            FormError::Invalid(result) => ApiError::Invalid(result),
            FormError::Backend(e) => ApiError::Backend(e),
        }
    }
}

impl From<VaccineError> for ApiError {
    fn from(err: VaccineError) -> Self {
        match err {
            VaccineError::Invalid(result) => ApiError::Invalid(result),
            VaccineError::InvalidDate(raw) => ApiError::BadRequest(format!("invalid date '{raw}'")),
            VaccineError::Backend(e) => ApiError::Backend(e),
        }
    }
}

impl From<NotifyError> for ApiError {
    fn from(err: NotifyError) -> Self {
        match err {
            NotifyError::Backend(e) => ApiError::Backend(e),
            NotifyError::Render(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(err.body_text())
    }
}

fn detail(code: &'static str, message: impl Into<String>) -> ErrorDetail {
    ErrorDetail {
        code,
        message: message.into(),
        details: None,
        login_url: None,
        retryable: false,
    }
}

fn auth_required(message: impl Into<String>) -> (StatusCode, ErrorDetail) {
    let mut body = detail(ErrorKind::Auth.code(), message);
    body.login_url = Some(LOGIN_PATH);
    (StatusCode::UNAUTHORIZED, body)
}

fn unexpected(technical: String) -> (StatusCode, ErrorDetail) {
    tracing::error!(error = %technical, "API internal error");
    let mut body = detail(ErrorKind::Unexpected.code(), GENERIC_ERROR_MESSAGE);
    body.details = Some(Value::String(technical));
    body.retryable = true;
    (StatusCode::INTERNAL_SERVER_ERROR, body)
}

fn backend_error(err: &BackendError) -> (StatusCode, ErrorDetail) {
    if err.is_auth() {
        return auth_required("Your session has expired. Please sign in again.");
    }
    if err.is_not_found() {
        return (StatusCode::NOT_FOUND, detail("NOT_FOUND", "Not found"));
    }
    if err.is_retryable() {
        let mut body = detail(
            ErrorKind::Transient.code(),
            "The service is temporarily unavailable. Please try again.",
        );
        body.retryable = true;
        return (StatusCode::BAD_GATEWAY, body);
    }
    match err.status() {
        Some(status @ (400 | 422)) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
            (status, detail("BAD_REQUEST", err.to_string()))
        }
        _ => unexpected(err.to_string()),
    }
}

fn analysis_error(err: &AnalysisError) -> (StatusCode, ErrorDetail) {
    let message = err.user_message();
    match err {
        AnalysisError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, detail("RATE_LIMITED", message)),
        AnalysisError::GuestLimitReached => {
            let mut body = detail("GUEST_LIMIT", message);
            body.login_url = Some(LOGIN_PATH);
            (StatusCode::FORBIDDEN, body)
        }
        AnalysisError::PendingNotFound => (StatusCode::NOT_FOUND, detail("NOT_FOUND", message)),
        AnalysisError::Backend(e) => backend_error(e),
        other => match other.kind() {
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, detail(ErrorKind::Validation.code(), message)),
            ErrorKind::Auth => auth_required(message),
            ErrorKind::Transient => {
                let mut body = detail(ErrorKind::Transient.code(), message);
                body.retryable = true;
                (StatusCode::SERVICE_UNAVAILABLE, body)
            }
            _ => unexpected(other.to_string()),
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Invalid(result) => {
                let mut body = detail(ErrorKind::Validation.code(), "Please correct the highlighted fields");
                body.details = serde_json::to_value(&result.errors).ok();
                (StatusCode::BAD_REQUEST, body)
            }
            ApiError::Analysis(e) => analysis_error(e),
            ApiError::Backend(e) => backend_error(e),
            ApiError::Store(e) => {
                tracing::error!(error = %e, "client state unavailable");
                let mut body = detail(ErrorKind::Transient.code(), "Please try again in a moment.");
                body.retryable = true;
                (StatusCode::SERVICE_UNAVAILABLE, body)
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, detail("BAD_REQUEST", message.clone())),
            ApiError::Unauthorized => auth_required("Please sign in to continue."),
            ApiError::Internal(technical) => unexpected(technical.clone()),
        };

        tracing::Span::current().record("error", tracing::field::display(body.code));

        let mut response = (status, Json(ErrorBody { error: body })).into_response();
        if let ApiError::Analysis(AnalysisError::RateLimited { retry_after_seconds }) = &self {
            if let Ok(val) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, val);
            }
        }
        response
    }
}
