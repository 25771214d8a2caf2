use std::sync::Arc;

use axum::{
    extract::{Extension, Multipart, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ApiError, AppState, Session};
use crate::backend::records::SORT_NEWEST;
use crate::backend::{Analysis, Backend, Records};
use crate::history::{paginate, HistoryFilter};
use crate::media::MediaFile;
use crate::notifications::EmailNotifier;
use crate::pets;
use crate::pipeline::{AnalysisOutcome, AnalysisPipeline, AnalysisRequest, Progress};

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub outcome: AnalysisOutcome,
    pub progress: Progress,
}

fn pipeline(state: &AppState, session: &Session, backend: Arc<dyn Backend>) -> AnalysisPipeline {
    AnalysisPipeline::new(backend, state.probe.clone(), state.client_state(session), session.is_signed_in())
        .with_rate_limiter(state.limiter)
}

fn respond(outcome: AnalysisOutcome, progress: Progress) -> Response {
    let status = match outcome {
        AnalysisOutcome::Completed { .. } => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    tracing::Span::current()
        .record("action", "analyze")
        .record("business_event", outcome.label());
    (status, Json(AnalyzeResponse { outcome, progress })).into_response()
}

/// Emails the result in the background; a mail failure never touches the
/// analysis response. The account is looked up here, after the work is done.
fn notify_completed(notifier: Arc<EmailNotifier>, backend: Arc<dyn Backend>, session: &Session, outcome: &AnalysisOutcome) {
    let (true, AnalysisOutcome::Completed { analysis }) = (session.is_signed_in(), outcome) else {
        return;
    };
    let analysis = analysis.clone();
    tokio::spawn(async move {
        let user = match backend.me().await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(error = %e, "analysis summary email skipped, account lookup failed");
                return;
            }
        };
        let pet_name = match analysis.pet_id.as_deref() {
            Some(id) => pets::get_pet(backend.as_ref(), id).await.map(|p| p.name).ok(),
            None => None,
        };
        let pet_name = pet_name.unwrap_or_else(|| "Your pet".to_string());
        if let Err(e) = notifier
            .send_analysis_summary(backend.as_ref(), &user, &pet_name, &analysis)
            .await
        {
            tracing::warn!(error = %e, "analysis summary email not sent");
        }
    });
}

/// `multipart/form-data` with a `file` part and an optional `pet_id`.
pub async fn analyze(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut file: Option<MediaFile> = None;
    let mut pet_id: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let data: Bytes = field.bytes().await?;
                file = Some(MediaFile::new(file_name, content_type, data));
            }
            Some("pet_id") => {
                let value = field.text().await?;
                pet_id = Some(value.trim().to_string()).filter(|v| !v.is_empty());
            }
            _ => {}
        }
    }
    let file = file.ok_or_else(|| ApiError::BadRequest("missing 'file' part".into()))?;
    if let Some(id) = &pet_id {
        tracing::Span::current().record("pet_id", id.as_str());
    }

    let backend = state.backend(&session);
    let pipeline = pipeline(&state, &session, backend.clone());

    let outcome = pipeline.analyze(AnalysisRequest { file, pet_id }, Utc::now()).await?;
    notify_completed(state.notifier.clone(), backend, &session, &outcome);
    Ok(respond(outcome, pipeline.progress().current()))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub attempt_id: Uuid,
    pub proceed: bool,
}

pub async fn confirm(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
    Json(payload): Json<ConfirmRequest>,
) -> Result<Response, ApiError> {
    let backend = state.backend(&session);
    let pipeline = pipeline(&state, &session, backend.clone());

    let outcome = pipeline
        .confirm(payload.attempt_id, payload.proceed, Utc::now())
        .await?;
    notify_completed(state.notifier.clone(), backend, &session, &outcome);
    Ok(respond(outcome, pipeline.progress().current()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    pub pet_id: Option<String>,
    pub emotion: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub search: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

pub async fn list_analyses(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
    Query(params): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let backend = state.backend(&session);
    let analyses = Records::<Analysis>::new(backend.as_ref())
        .list(Some(SORT_NEWEST), None)
        .await?;

    let filter = HistoryFilter {
        pet_id: params.pet_id,
        emotion: params.emotion,
        from: params.from,
        to: params.to,
        search: params.search,
    };
    let page = paginate(filter.apply(analyses), params.page, params.per_page);
    Ok((StatusCode::OK, Json(page)).into_response())
}

pub async fn rate_limit_status(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, ApiError> {
    let status = state
        .limiter
        .status(&state.client_state(&session), Utc::now())
        .await?;
    Ok((StatusCode::OK, Json(status)).into_response())
}
