use axum::{
    extract::Extension,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;

use super::{ApiError, AppState, Session};
use crate::backend::records::SORT_NEWEST;
use crate::backend::{Analysis, Records};
use crate::export::{analyses_to_csv, ExportBundle};

fn attachment(content_type: &'static str, file_name: String, body: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
        ],
        body,
    )
        .into_response()
}

pub async fn export_json(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, ApiError> {
    let backend = state.backend(&session);
    let now = Utc::now();
    let bundle = ExportBundle::collect(backend.as_ref(), now).await?;
    let body = bundle.to_json().map_err(|e| ApiError::Internal(e.to_string()))?;

    tracing::Span::current()
        .record("action", "export_json")
        .record("business_event", "Account data exported");
    Ok(attachment(
        "application/json",
        format!("pet-decoder-export-{}.json", now.format("%Y-%m-%d")),
        body,
    ))
}

pub async fn export_csv(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, ApiError> {
    let backend = state.backend(&session);
    state.require_user(&session, backend.as_ref()).await?;
    let analyses = Records::<Analysis>::new(backend.as_ref())
        .list(Some(SORT_NEWEST), None)
        .await?;

    tracing::Span::current().record("action", "export_csv");
    Ok(attachment(
        "text/csv; charset=utf-8",
        format!("pet-analyses-{}.csv", Utc::now().format("%Y-%m-%d")),
        analyses_to_csv(&analyses),
    ))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::backend::EntityKind;
    use crate::export::parse_csv_line;
    use axum::body::Body;
    use axum::http::{header, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn csv_download_quotes_awkward_values() {
        let app = TestApp::new();
        app.provider.signed_in.seed(
            EntityKind::Analysis,
            json!({
                "pet_id": "p1",
                "emotion_detected": "Alert",
                "confidence_level": 75,
                "behavior_summary": "Ears up, watching the \"mail\" slot",
                "recommendations": ["Stay calm"]
            }),
        );

        let response = app
            .send(owner("GET", "/api/export/analyses.csv").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/csv"));
        assert!(response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("attachment"));

        let body = read_text(response).await;
        let row = body.split("\r\n").nth(1).unwrap();
        assert_eq!(parse_csv_line(row)[4], "Ears up, watching the \"mail\" slot");
    }

    #[tokio::test]
    async fn json_export_requires_a_session() {
        let app = TestApp::new();
        let response = app
            .send(guest("GET", "/api/export/json").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .send(owner("GET", "/api/export/json").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let bundle = read_json(response).await;
        assert_eq!(bundle["user"]["email"], "owner@example.com");
    }
}
