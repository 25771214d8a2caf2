use axum::{
    extract::{Extension, Json, Query},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tower_cookies::{Cookie, Cookies};

use super::middleware::{token_cookie, TOKEN_COOKIE};
use super::{ApiError, AppState, Session};
use crate::validation::{is_valid_email, ContactForm};

pub async fn get_me(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, ApiError> {
    let backend = state.backend(&session);
    let user = state.require_user(&session, backend.as_ref()).await?;
    Ok((StatusCode::OK, Json(user)).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateMeRequest {
    pub full_name: Option<String>,
    pub email_notifications: Option<bool>,
}

pub async fn update_me(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
    Json(payload): Json<UpdateMeRequest>,
) -> Result<Response, ApiError> {
    let mut patch = Map::new();
    if let Some(name) = payload.full_name {
        let name = name.trim().to_string();
        if name.chars().count() > 100 {
            return Err(ApiError::BadRequest("Name must be 100 characters or less".into()));
        }
        patch.insert("full_name".into(), json!(name));
    }
    if let Some(enabled) = payload.email_notifications {
        patch.insert("email_notifications".into(), json!(enabled));
    }

    let backend = state.backend(&session);
    let user = backend.update_me(Value::Object(patch)).await?;

    tracing::Span::current()
        .record("action", "update_profile")
        .record("user_id", user.id.as_str());
    Ok((StatusCode::OK, Json(user)).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginParams {
    /// Set by the platform when it sends the user back after signing in.
    pub token: Option<String>,
    pub return_to: Option<String>,
}

/// Stand-in origin for resolving return paths the way a browser would.
const PATH_BASE: &str = "https://app.invalid/";

/// Only same-site paths are accepted as return targets.
fn safe_return_path(raw: Option<&str>) -> &str {
    match raw {
        Some(path) if is_same_site_path(path) => path,
        _ => "/",
    }
}

/// Browsers read `\` as `/`, so backslashes are refused outright, encoded
/// or not, along with control characters.
fn is_same_site_path(path: &str) -> bool {
    if !path.starts_with('/') || path.contains('\\') || path.chars().any(char::is_control) {
        return false;
    }
    let lowered = path.to_ascii_lowercase();
    if lowered.contains("%5c") || ["%0", "%1", "%7f"].iter().any(|c| lowered.contains(c)) {
        return false;
    }
    let Ok(base) = Url::parse(PATH_BASE) else {
        return false;
    };
    base.join(path).is_ok_and(|url| url.origin() == base.origin())
}

/// Without a token: redirect to the platform's login page. With one: check it
/// against the platform, store it and go back to the app.
pub async fn login(
    Extension(state): Extension<AppState>,
    cookies: Cookies,
    Query(params): Query<LoginParams>,
) -> Result<Response, ApiError> {
    let return_to = safe_return_path(params.return_to.as_deref());
    let Some(token) = params.token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) else {
        return Ok(Redirect::to(&state.provider.login_url(return_to)).into_response());
    };

    let user = state.provider.session(Some(&token)).me().await.map_err(|e| {
        tracing::warn!(error = %e, "Sign-in token rejected");
        ApiError::from(e)
    })?;
    cookies.add(token_cookie(token));
    tracing::Span::current()
        .record("user_id", user.id.as_str())
        .record("business_event", "User signed in");
    Ok(Redirect::to(return_to).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutParams {
    pub return_to: Option<String>,
}

pub async fn logout(
    Extension(state): Extension<AppState>,
    cookies: Cookies,
    Query(params): Query<LogoutParams>,
) -> Response {
    let mut cookie = Cookie::from(TOKEN_COOKIE);
    cookie.set_path("/");
    cookies.remove(cookie);

    let redirect = state
        .provider
        .logout_url(safe_return_path(params.return_to.as_deref()));
    tracing::Span::current().record("business_event", "User signed out");
    (StatusCode::OK, Json(json!({ "redirect": redirect }))).into_response()
}

/// Validates the message and sends the acknowledgement. Signed-in users may
/// leave the email blank; their account address is used.
pub async fn contact(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
    Json(mut form): Json<ContactForm>,
) -> Result<Response, ApiError> {
    let backend = state.backend(&session);
    if form.email.trim().is_empty() {
        if let Some(user) = state.current_user(&session, backend.as_ref()).await? {
            if is_valid_email(&user.email) {
                form.email = user.email;
            }
        }
    }
    state.notifier.acknowledge_contact(backend.as_ref(), &form).await?;

    tracing::Span::current()
        .record("action", "contact")
        .record("business_event", "Contact form received");
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "received" }))).into_response())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::safe_return_path;
    use crate::testing::REJECTED_TOKEN;
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use serde_json::json;

    #[test]
    fn return_paths_stay_on_site() {
        assert_eq!(safe_return_path(Some("/history")), "/history");
        assert_eq!(safe_return_path(Some("/pets/p1?tab=shots")), "/pets/p1?tab=shots");
        assert_eq!(safe_return_path(Some("//evil.test")), "/");
        assert_eq!(safe_return_path(Some("https://evil.test")), "/");
        assert_eq!(safe_return_path(None), "/");
    }

    #[test]
    fn backslash_and_control_tricks_are_refused() {
        assert_eq!(safe_return_path(Some("/\\evil.com")), "/");
        assert_eq!(safe_return_path(Some("/%5Cevil.com")), "/");
        assert_eq!(safe_return_path(Some("/%5cevil.com")), "/");
        assert_eq!(safe_return_path(Some("/\t/evil.com")), "/");
        assert_eq!(safe_return_path(Some("/%09/evil.com")), "/");
    }

    #[tokio::test]
    async fn decoded_backslash_redirects_home() {
        let app = TestApp::new();
        let response = app
            .send(
                guest("GET", "/api/login?token=abc&return_to=%2F%5Cevil.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.headers()[header::LOCATION], "/");
    }

    #[tokio::test]
    async fn rejected_tokens_are_not_stored() {
        let app = TestApp::new();
        let response = app
            .send(
                guest("GET", &format!("/api/login?token={REJECTED_TOKEN}&return_to=/pets"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let cookies: Vec<_> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert!(!cookies.iter().any(|c| c.starts_with("petdecoder_token=")));
    }

    #[tokio::test]
    async fn login_redirects_then_stores_the_token() {
        let app = TestApp::new();
        let response = app
            .send(guest("GET", "/api/login?return_to=/history").body(Body::empty()).unwrap())
            .await;
        assert!(response.status().is_redirection());
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://login.test/?from_url=/history"
        );

        let response = app
            .send(guest("GET", "/api/login?token=abc&return_to=/pets").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.headers()[header::LOCATION], "/pets");
        let cookies: Vec<_> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert!(cookies.iter().any(|c| c.starts_with("petdecoder_token=abc")));
    }

    #[tokio::test]
    async fn first_visit_gets_a_device_cookie() {
        let app = TestApp::new();
        let response = app
            .send(
                axum::http::Request::builder()
                    .uri("/api/settings/consent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.starts_with("petdecoder_device="));
    }

    #[tokio::test]
    async fn profile_updates_go_to_the_platform() {
        let app = TestApp::new();
        let response = app
            .send(
                owner("PATCH", "/api/me")
                    .header("content-type", "application/json")
                    .body(json_body(json!({"full_name": " Sam Q. Owner ", "email_notifications": false})))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let user = read_json(response).await;
        assert_eq!(user["full_name"], "Sam Q. Owner");
        assert_eq!(user["email_notifications"], false);
    }

    #[tokio::test]
    async fn contact_uses_the_account_email_when_blank() {
        let app = TestApp::new();
        let response = app
            .send(
                owner("POST", "/api/contact")
                    .header("content-type", "application/json")
                    .body(json_body(json!({
                        "name": "Sam",
                        "subject": "Upload problem",
                        "message": "Videos longer than a minute never finish."
                    })))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let emails = app.provider.signed_in.emails();
        assert_eq!(emails[0].to, "owner@example.com");
    }
}
