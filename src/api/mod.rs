//! JSON API consumed by the single-page app.

pub mod account;
pub mod analyses;
pub mod error;
pub mod export;
pub mod middleware;
pub mod pets;
pub mod settings;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Router,
};

use crate::backend::{Backend, BackendProvider, User};
use crate::media::video::VideoProbe;
use crate::media::MAX_FILE_SIZE_MB;
use crate::notifications::EmailNotifier;
use crate::pipeline::RateLimiter;
use crate::store::{ClientState, KeyValueStore};

pub use error::ApiError;
pub use middleware::Session;

/// Multipart framing on top of the largest accepted file.
const BODY_LIMIT_BYTES: usize = (MAX_FILE_SIZE_MB as usize + 1) * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn BackendProvider>,
    pub store: Arc<dyn KeyValueStore>,
    pub probe: Arc<dyn VideoProbe>,
    pub notifier: Arc<EmailNotifier>,
    pub limiter: RateLimiter,
    pub reminder_window_days: i64,
}

impl AppState {
    pub fn backend(&self, session: &Session) -> Arc<dyn Backend> {
        self.provider.session(session.token.as_deref())
    }

    pub fn client_state(&self, session: &Session) -> ClientState {
        ClientState::new(self.store.clone(), session.device_id.clone())
    }

    /// The signed-in user, or `None` for guests. A token the platform rejects
    /// is an auth error, not a silent downgrade to guest.
    pub async fn current_user(&self, session: &Session, backend: &dyn Backend) -> Result<Option<User>, ApiError> {
        if !session.is_signed_in() {
            return Ok(None);
        }
        let user = backend.me().await?;
        tracing::Span::current().record("user_id", user.id.as_str());
        Ok(Some(user))
    }

    pub async fn require_user(&self, session: &Session, backend: &dyn Backend) -> Result<User, ApiError> {
        self.current_user(session, backend).await?.ok_or(ApiError::Unauthorized)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/analyses",
            get(analyses::list_analyses).post(analyses::analyze),
        )
        .route("/api/analyses/confirm", post(analyses::confirm))
        .route("/api/rate-limit", get(analyses::rate_limit_status))
        .route("/api/pets", get(pets::list_pets).post(pets::create_pet))
        .route(
            "/api/pets/:id",
            get(pets::get_pet)
                .patch(pets::update_pet)
                .delete(pets::delete_pet),
        )
        .route(
            "/api/pets/:id/vaccinations",
            get(pets::list_vaccinations).post(pets::record_vaccination),
        )
        .route("/api/pets/:id/schedule", get(pets::schedule))
        .route(
            "/api/pets/:id/activities",
            get(pets::list_activities).post(pets::log_activity),
        )
        .route("/api/vaccinations/reminders", post(pets::send_reminders))
        .route("/api/me", get(account::get_me).patch(account::update_me))
        .route("/api/login", get(account::login))
        .route("/api/logout", post(account::logout))
        .route("/api/contact", post(account::contact))
        .route(
            "/api/settings/consent",
            get(settings::get_consent).put(settings::put_consent),
        )
        .route(
            "/api/settings/cookies",
            get(settings::get_cookies).put(settings::put_cookies),
        )
        .route(
            "/api/settings/accessibility",
            get(settings::get_accessibility).put(settings::put_accessibility),
        )
        .route("/api/export/json", get(export::export_json))
        .route("/api/export/analyses.csv", get(export::export_csv))
        .route_layer(axum::middleware::from_fn(middleware::session_middleware))
        .layer(tower_cookies::CookieManagerLayer::new())
        .layer(Extension(state))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
}
