//! The hosted backend that owns persistence, auth, file storage and model
//! inference. Everything here is a remote call; nothing is stored locally.

pub mod client;
pub mod entities;
pub mod records;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::error::Elapsed;

use crate::media::MediaFile;
use crate::retry::{is_non_retryable, Retryable};

pub use client::{Base44Client, Base44Provider};
pub use entities::{ActivityLog, Analysis, Pet, Species, User, VaccinationRecord};
pub use records::{Record, Records};

const TIMEOUT_PATTERNS: [&str; 4] = ["timeout", "timed out", "deadline exceeded", "gateway time"];
const AUTH_PATTERNS: [&str; 5] = [
    "unauthorized",
    "forbidden",
    "not authenticated",
    "authentication required",
    "token expired",
];

#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Upstream took too long. Always worth another attempt, whatever status
    /// it arrived with.
    #[error("Backend timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Builds an error from a non-2xx response, pulling a message out of the
    /// usual JSON error shapes.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|json| {
                ["message", "error", "detail"]
                    .iter()
                    .find_map(|key| json[*key].as_str().map(str::to_string))
            })
            .unwrap_or_else(|| {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    format!("request failed with status {status}")
                } else {
                    trimmed.chars().take(300).collect()
                }
            });

        if status == 408 || status == 504 || looks_like_timeout(&message) {
            BackendError::Timeout(message)
        } else {
            BackendError::Http { status, message }
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        match self {
            BackendError::Http { status, message } => {
                *status == 401 || *status == 403 || matches_any(message, &AUTH_PATTERNS)
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

fn matches_any(message: &str, patterns: &[&str]) -> bool {
    let message = message.to_lowercase();
    patterns.iter().any(|p| message.contains(p))
}

fn looks_like_timeout(message: &str) -> bool {
    matches_any(message, &TIMEOUT_PATTERNS)
}

impl Retryable for BackendError {
    fn is_retryable(&self) -> bool {
        match self {
            BackendError::Timeout(_) | BackendError::Network(_) => true,
            BackendError::Http { status, message } => !is_non_retryable(Some(*status), message),
            BackendError::Decode(_) => false,
        }
    }
}

impl From<Elapsed> for BackendError {
    fn from(_: Elapsed) -> Self {
        BackendError::Timeout("request exceeded the time limit".into())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout(e.to_string())
        } else if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            BackendError::from_status(status.as_u16(), &e.to_string())
        } else {
            BackendError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Pet,
    Analysis,
    VaccinationRecord,
    ActivityLog,
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Pet => "Pet",
            EntityKind::Analysis => "Analysis",
            EntityKind::VaccinationRecord => "VaccinationRecord",
            EntityKind::ActivityLog => "ActivityLog",
        }
    }
}

/// Structured model call: the prompt, the images it may look at, and the JSON
/// schema the answer must follow.
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub file_urls: Vec<String>,
    pub response_json_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub from_name: String,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn list(&self, entity: EntityKind, sort: Option<&str>, limit: Option<u32>) -> Result<Vec<Value>, BackendError>;
    async fn filter(&self, entity: EntityKind, query: Value, sort: Option<&str>) -> Result<Vec<Value>, BackendError>;
    async fn get(&self, entity: EntityKind, id: &str) -> Result<Value, BackendError>;
    async fn create(&self, entity: EntityKind, data: Value) -> Result<Value, BackendError>;
    async fn update(&self, entity: EntityKind, id: &str, data: Value) -> Result<Value, BackendError>;
    async fn delete(&self, entity: EntityKind, id: &str) -> Result<(), BackendError>;

    async fn me(&self) -> Result<User, BackendError>;
    async fn update_me(&self, data: Value) -> Result<User, BackendError>;

    /// Stores the file and returns its public URL.
    async fn upload_file(&self, file: &MediaFile) -> Result<String, BackendError>;
    async fn invoke_llm(&self, request: &LlmRequest) -> Result<Value, BackendError>;
    async fn send_email(&self, email: &EmailMessage) -> Result<(), BackendError>;
}

/// Hands out a backend bound to one caller's session.
pub trait BackendProvider: Send + Sync {
    fn session(&self, token: Option<&str>) -> Arc<dyn Backend>;
    fn login_url(&self, return_to: &str) -> String;
    fn logout_url(&self, return_to: &str) -> String;
}
