use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use super::{ApiError, AppState, Session};
use crate::validation::{ActivityLogForm, PetProfileForm, VaccineRecordForm};
use crate::{activity, pets, vaccine};

fn record_action(action: &'static str, pet_id: Option<&str>) {
    let span = tracing::Span::current();
    span.record("action", action);
    if let Some(id) = pet_id {
        span.record("pet_id", id);
    }
}

pub async fn list_pets(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, ApiError> {
    let backend = state.backend(&session);
    let pets = pets::list_pets(backend.as_ref()).await?;
    Ok((StatusCode::OK, Json(pets)).into_response())
}

pub async fn create_pet(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
    Json(form): Json<PetProfileForm>,
) -> Result<Response, ApiError> {
    let backend = state.backend(&session);
    let pet = pets::create_pet(backend.as_ref(), &form, Utc::now().date_naive()).await?;

    record_action("create_pet", Some(&pet.id));
    tracing::Span::current().record("business_event", "Pet created");
    Ok((StatusCode::CREATED, Json(pet)).into_response())
}

pub async fn get_pet(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
    Path(pet_id): Path<String>,
) -> Result<Response, ApiError> {
    let backend = state.backend(&session);
    let pet = pets::get_pet(backend.as_ref(), &pet_id).await?;
    Ok((StatusCode::OK, Json(pet)).into_response())
}

pub async fn update_pet(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
    Path(pet_id): Path<String>,
    Json(form): Json<PetProfileForm>,
) -> Result<Response, ApiError> {
    let backend = state.backend(&session);
    let pet = pets::update_pet(backend.as_ref(), &pet_id, &form, Utc::now().date_naive()).await?;

    record_action("update_pet", Some(&pet_id));
    Ok((StatusCode::OK, Json(pet)).into_response())
}

pub async fn delete_pet(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
    Path(pet_id): Path<String>,
) -> Result<Response, ApiError> {
    let backend = state.backend(&session);
    let deleted = pets::delete_pet(backend.as_ref(), &pet_id).await?;

    record_action("delete_pet", Some(&pet_id));
    tracing::Span::current().record("business_event", "Pet deleted with related records");
    Ok((StatusCode::OK, Json(deleted)).into_response())
}

pub async fn list_vaccinations(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
    Path(pet_id): Path<String>,
) -> Result<Response, ApiError> {
    let backend = state.backend(&session);
    let records = vaccine::schedule::list_records(backend.as_ref(), &pet_id).await?;
    Ok((StatusCode::OK, Json(records)).into_response())
}

pub async fn record_vaccination(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
    Path(pet_id): Path<String>,
    Json(form): Json<VaccineRecordForm>,
) -> Result<Response, ApiError> {
    let backend = state.backend(&session);
    let pet = pets::get_pet(backend.as_ref(), &pet_id).await?;
    let record = vaccine::schedule::record_dose(backend.as_ref(), &pet, &form, Utc::now().date_naive()).await?;

    record_action("record_vaccination", Some(&pet_id));
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

pub async fn schedule(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
    Path(pet_id): Path<String>,
) -> Result<Response, ApiError> {
    let backend = state.backend(&session);
    let pet = pets::get_pet(backend.as_ref(), &pet_id).await?;
    let records = vaccine::schedule::list_records(backend.as_ref(), &pet_id).await?;
    let schedule = vaccine::schedule::build_schedule(&pet, &records, Utc::now().date_naive());
    Ok((StatusCode::OK, Json(schedule)).into_response())
}

pub async fn list_activities(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
    Path(pet_id): Path<String>,
) -> Result<Response, ApiError> {
    let backend = state.backend(&session);
    let logs = activity::list_activities(backend.as_ref(), &pet_id).await?;
    Ok((StatusCode::OK, Json(logs)).into_response())
}

pub async fn log_activity(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
    Path(pet_id): Path<String>,
    Json(mut form): Json<ActivityLogForm>,
) -> Result<Response, ApiError> {
    form.pet_id = pet_id;
    let backend = state.backend(&session);
    let log = activity::log_activity(backend.as_ref(), &form, Utc::now().date_naive()).await?;

    record_action("log_activity", Some(&log.pet_id));
    Ok((StatusCode::CREATED, Json(log)).into_response())
}

/// Runs the reminder sweep for the signed-in user.
pub async fn send_reminders(
    Extension(state): Extension<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, ApiError> {
    let backend = state.backend(&session);
    let user = state.require_user(&session, backend.as_ref()).await?;
    let report = state
        .notifier
        .send_vaccine_reminders(
            backend.as_ref(),
            &user,
            Utc::now().date_naive(),
            state.reminder_window_days,
        )
        .await?;

    record_action("send_vaccine_reminders", None);
    Ok((StatusCode::OK, Json(report)).into_response())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::backend::EntityKind;
    use axum::body::Body;
    use axum::http::StatusCode;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn post_json(builder: axum::http::request::Builder, value: serde_json::Value) -> axum::http::Request<Body> {
        builder
            .header("content-type", "application/json")
            .body(json_body(value))
            .unwrap()
    }

    #[tokio::test]
    async fn anonymous_callers_are_sent_to_login() {
        let app = TestApp::new();
        let response = app.send(guest("GET", "/api/pets").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = read_json(response).await;
        assert_eq!(json["error"]["code"], "AUTH_REQUIRED");
        assert_eq!(json["error"]["login_url"], "/api/login");
    }

    #[tokio::test]
    async fn pet_crud_with_field_errors() {
        let app = TestApp::new();

        let response = app
            .send(post_json(owner("POST", "/api/pets"), json!({"name": "", "species": "dragon"})))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = read_json(response).await;
        assert!(json["error"]["details"]["name"].is_string());
        assert!(json["error"]["details"]["species"].is_string());

        let response = app
            .send(post_json(
                owner("POST", "/api/pets"),
                json!({"name": "Biscuit", "species": "dog", "breed": "Beagle"}),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let pet = read_json(response).await;
        let id = pet["id"].as_str().unwrap().to_string();

        let response = app
            .send(owner("DELETE", &format!("/api/pets/{id}")).body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .send(owner("GET", &format!("/api/pets/{id}")).body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn doses_feed_the_schedule_and_reminders() {
        let app = TestApp::new();
        let backend = &app.provider.signed_in;
        let pet_id = backend.seed(EntityKind::Pet, json!({"name": "Biscuit", "species": "dog"}));

        let given = (Utc::now() - Duration::days(30)).date_naive();
        let due = (Utc::now() + Duration::days(3)).date_naive();
        let response = app
            .send(post_json(
                owner("POST", &format!("/api/pets/{pet_id}/vaccinations")),
                json!({
                    "vaccine_name": "Rabies",
                    "date_administered": given.to_string(),
                    "next_due_date": due.to_string(),
                }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let schedule = read_json(
            app.send(
                owner("GET", &format!("/api/pets/{pet_id}/schedule"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await,
        )
        .await;
        let rabies = schedule
            .as_array()
            .unwrap()
            .iter()
            .find(|e| e["vaccine_name"] == "Rabies")
            .unwrap();
        assert_eq!(rabies["status"], "due_soon");
        assert_eq!(rabies["doses_given"], 1);

        let report = read_json(
            app.send(owner("POST", "/api/vaccinations/reminders").body(Body::empty()).unwrap())
                .await,
        )
        .await;
        assert_eq!(report["sent"], 1);
        assert_eq!(backend.emails().len(), 1);
    }

    #[tokio::test]
    async fn activities_take_the_pet_from_the_path() {
        let app = TestApp::new();
        let today = Utc::now().date_naive();
        let response = app
            .send(post_json(
                owner("POST", "/api/pets/p9/activities"),
                json!({"pet_id": "ignored", "activity_type": "walk", "date": today.to_string(), "duration_minutes": 25}),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let logs = read_json(
            app.send(owner("GET", "/api/pets/p9/activities").body(Body::empty()).unwrap())
                .await,
        )
        .await;
        assert_eq!(logs.as_array().unwrap().len(), 1);
        assert_eq!(logs[0]["duration_minutes"], 25);
    }
}
