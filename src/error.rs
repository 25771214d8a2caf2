use serde::Serialize;

use crate::backend::BackendError;
use crate::validation::ValidationResult;

/// How a failure is surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Field-level, shown next to the offending input.
    Validation,
    /// Network or server trouble that survived retries.
    Transient,
    /// Session missing or rejected; the client should go to login.
    Auth,
    /// An expected outcome that needs a user decision.
    Domain,
    /// Anything else. Rendered as a generic message with details.
    Unexpected,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Transient => "UNAVAILABLE",
            ErrorKind::Auth => "AUTH_REQUIRED",
            ErrorKind::Domain => "ACTION_REQUIRED",
            ErrorKind::Unexpected => "INTERNAL",
        }
    }
}

pub const GENERIC_ERROR_MESSAGE: &str =
    "Something went wrong. Please try again, and contact support if the problem persists.";

/// Outcome of saving a user-edited record.
#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("Please correct the highlighted fields")]
    Invalid(ValidationResult),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl FormError {
    pub fn check(result: ValidationResult) -> Result<(), FormError> {
        if result.is_valid {
            Ok(())
        } else {
            Err(FormError::Invalid(result))
        }
    }
}
