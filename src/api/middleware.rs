use axum::{
    extract::Request,
    http::header,
    middleware::Next,
    response::Response,
};
use tower_cookies::{Cookie, Cookies};
use uuid::Uuid;

pub const TOKEN_COOKIE: &str = "petdecoder_token";
pub const DEVICE_COOKIE: &str = "petdecoder_device";

/// Who is calling: the platform token, if any, and the browser's device id.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: Option<String>,
    pub device_id: String,
}

impl Session {
    pub fn is_signed_in(&self) -> bool {
        self.token.is_some()
    }
}

fn bearer(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

pub fn device_cookie(device_id: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(DEVICE_COOKIE, device_id);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.make_permanent();
    cookie
}

pub fn token_cookie(token: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(TOKEN_COOKIE, token);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie
}

/// Anonymous callers pass through; a device id cookie is issued on first
/// contact so per-browser state survives between requests.
pub async fn session_middleware(cookies: Cookies, mut request: Request, next: Next) -> Response {
    let token = cookies
        .get(TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| bearer(&request));

    let device_id = match cookies.get(DEVICE_COOKIE) {
        Some(cookie) if !cookie.value().is_empty() => cookie.value().to_string(),
        _ => {
            let id = Uuid::new_v4().to_string();
            cookies.add(device_cookie(id.clone()));
            id
        }
    };

    tracing::Span::current().record("device_id", device_id.as_str());
    request.extensions_mut().insert(Session { token, device_id });
    next.run(request).await
}
