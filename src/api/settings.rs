use axum::{
    extract::{Extension, Json},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;

use super::{ApiError, AppState, Session};
use crate::settings::{self, AccessibilitySettings, CookiePreferences};

pub async fn get_consent(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, ApiError> {
    let consent = settings::load_consent(&state.client_state(&session)).await?;
    Ok((StatusCode::OK, Json(consent)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ConsentRequest {
    pub accepted: bool,
}

pub async fn put_consent(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
    Json(payload): Json<ConsentRequest>,
) -> Result<Response, ApiError> {
    let consent = settings::save_consent(&state.client_state(&session), payload.accepted, Utc::now()).await?;
    tracing::Span::current().record("action", "save_consent");
    Ok((StatusCode::OK, Json(consent)).into_response())
}

pub async fn get_cookies(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, ApiError> {
    let prefs = settings::load_cookie_preferences(&state.client_state(&session)).await?;
    Ok((StatusCode::OK, Json(prefs)).into_response())
}

pub async fn put_cookies(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
    Json(prefs): Json<CookiePreferences>,
) -> Result<Response, ApiError> {
    let prefs = settings::save_cookie_preferences(&state.client_state(&session), prefs).await?;
    Ok((StatusCode::OK, Json(prefs)).into_response())
}

pub async fn get_accessibility(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, ApiError> {
    let prefs = settings::load_accessibility(&state.client_state(&session)).await?;
    Ok((StatusCode::OK, Json(prefs)).into_response())
}

pub async fn put_accessibility(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
    Json(prefs): Json<AccessibilitySettings>,
) -> Result<Response, ApiError> {
    let prefs = settings::save_accessibility(&state.client_state(&session), prefs).await?;
    Ok((StatusCode::OK, Json(prefs)).into_response())
}
