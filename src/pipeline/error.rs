use thiserror::Error;

use crate::backend::BackendError;
use crate::error::{ErrorKind, GENERIC_ERROR_MESSAGE};
use crate::media::MediaError;
use crate::retry::Retryable;
use crate::store::StoreError;

use super::guest::GUEST_LIMIT_MESSAGE;
use super::rate_limit::rate_limit_message;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("rate limited for {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("guest analysis already used")]
    GuestLimitReached,

    #[error("no pending analysis with that id")]
    PendingNotFound,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::Media(e) if e.is_selection_error() => ErrorKind::Validation,
            AnalysisError::Media(_) => ErrorKind::Unexpected,
            AnalysisError::RateLimited { .. } => ErrorKind::Domain,
            AnalysisError::GuestLimitReached => ErrorKind::Auth,
            AnalysisError::PendingNotFound => ErrorKind::Validation,
            AnalysisError::Backend(e) if e.is_auth() => ErrorKind::Auth,
            AnalysisError::Backend(e) if e.is_retryable() => ErrorKind::Transient,
            AnalysisError::Backend(_) => ErrorKind::Unexpected,
            AnalysisError::Store(_) => ErrorKind::Transient,
        }
    }

    /// The one place analysis failures become words for the owner.
    pub fn user_message(&self) -> String {
        match self {
            AnalysisError::Media(e) if e.is_selection_error() => e.to_string(),
            AnalysisError::RateLimited { retry_after_seconds } => rate_limit_message(*retry_after_seconds),
            AnalysisError::GuestLimitReached => GUEST_LIMIT_MESSAGE.to_string(),
            AnalysisError::PendingNotFound => {
                "This analysis is no longer waiting for confirmation. Please upload again.".to_string()
            }
            other => match other.kind() {
                ErrorKind::Auth => "Your session has expired. Please sign in again.".to_string(),
                ErrorKind::Transient => {
                    "We couldn't reach the analysis service. Please check your connection and try again.".to_string()
                }
                _ => GENERIC_ERROR_MESSAGE.to_string(),
            },
        }
    }

    /// Metric label for the failed attempt.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            AnalysisError::RateLimited { .. } => "rate_limited",
            AnalysisError::GuestLimitReached => "guest_blocked",
            AnalysisError::Media(e) if e.is_selection_error() => "rejected",
            _ => "failed",
        }
    }
}
