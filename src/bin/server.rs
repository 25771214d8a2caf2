use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use petdecoder::api::{self, AppState};
use petdecoder::backend::Base44Provider;
use petdecoder::config::AppConfig;
use petdecoder::media::video::FfmpegProbe;
use petdecoder::notifications::EmailNotifier;
use petdecoder::pipeline::RateLimiter;
use petdecoder::store::RedisStore;
use tower_http::services::{ServeDir, ServeFile};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (dotenvy)
    dotenvy::dotenv().ok();

    petdecoder::telemetry::init_telemetry("petdecoder-server");

    let config = AppConfig::from_env()?;
    let (prometheus_layer, metric_handle) = axum_prometheus::PrometheusMetricLayer::pair();

    // Redis holds per-device client state
    let redis_client = redis::Client::open(config.redis_url.as_str()).context("Invalid Redis URL")?;

    let store = RedisStore::connect(redis_client)
        .await
        .context("Failed to connect to Redis")?;

    let state = AppState {
        provider: Arc::new(Base44Provider::new(&config.backend)?),
        store: Arc::new(store),
        probe: Arc::new(FfmpegProbe::new(&config.ffmpeg_path, &config.ffprobe_path)),
        notifier: Arc::new(EmailNotifier::new(config.email_from_name.clone())?),
        limiter: RateLimiter::default(),
        reminder_window_days: config.reminder_window_days,
    };

    let app = app(&config, state, prometheus_layer, metric_handle)?;

    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_addr()))?;
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

fn app(
    config: &AppConfig,
    state: AppState,
    prometheus_layer: axum_prometheus::PrometheusMetricLayer<'static>,
    metric_handle: metrics_exporter_prometheus::PrometheusHandle,
) -> anyhow::Result<Router> {
    // Unknown paths fall through to the SPA so client-side routes resolve.
    let index = format!("{}/index.html", config.static_dir.trim_end_matches('/'));
    let spa = ServeDir::new(&config.static_dir).not_found_service(ServeFile::new(index));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .merge(api::router(state))
        .fallback_service(spa)
        .layer(prometheus_layer)
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<axum::body::Body>| {
                    let matched_path = request
                        .extensions()
                        .get::<axum::extract::MatchedPath>()
                        .map(|matched| matched.as_str());

                    // "METHOD /path", e.g. "POST /api/analyses"
                    let span_name = if let Some(path) = matched_path {
                        format!("{} {}", request.method(), path)
                    } else {
                        format!("{} {}", request.method(), request.uri().path())
                    };

                    let user_ip = request
                        .headers()
                        .get("x-forwarded-for")
                        .and_then(|v| v.to_str().ok())
                        .or_else(|| {
                            request
                                .headers()
                                .get("x-real-ip")
                                .and_then(|v| v.to_str().ok())
                        })
                        .unwrap_or("unknown");

                    // Handlers fill in the empty fields
                    tracing::info_span!(
                        "request",
                        "otel.name" = span_name,
                        user_ip = user_ip,
                        method = ?request.method(),
                        uri = ?request.uri(),
                        action = tracing::field::Empty,
                        user_id = tracing::field::Empty,
                        device_id = tracing::field::Empty,
                        pet_id = tracing::field::Empty,
                        business_event = tracing::field::Empty,
                        error = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency = tracing::field::Empty,
                    )
                })
                .on_request(|_request: &axum::http::Request<axum::body::Body>, _span: &tracing::Span| {})
                .on_response(|response: &axum::http::Response<_>, latency: std::time::Duration, span: &tracing::Span| {
                    span.record("status", tracing::field::display(response.status()));
                    span.record("latency", tracing::field::debug(latency));
                    tracing::info!("request completed");
                }),
        );

    if let Some(origin) = &config.cors_origin {
        let origin = origin
            .parse::<axum::http::HeaderValue>()
            .with_context(|| format!("invalid CORS_ORIGIN {origin}"))?;
        app = app.layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::PATCH,
                    axum::http::Method::DELETE,
                ])
                .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::AUTHORIZATION])
                .allow_credentials(true),
        );
    }

    Ok(app.route("/metrics", get(|| async move { metric_handle.render() })))
}
