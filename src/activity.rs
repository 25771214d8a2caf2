use chrono::NaiveDate;
use serde_json::json;

use crate::backend::{ActivityLog, Backend, BackendError, Records};
use crate::error::FormError;
use crate::validation::{parse_date, validate_activity_log, ActivityLogForm};

pub async fn log_activity(backend: &dyn Backend, form: &ActivityLogForm, today: NaiveDate) -> Result<ActivityLog, FormError> {
    FormError::check(validate_activity_log(form, today))?;

    // Validation guarantees the date parses.
    let date = parse_date(&form.date).unwrap_or(today);
    let log = ActivityLog {
        id: String::new(),
        pet_id: form.pet_id.trim().to_string(),
        activity_type: form.activity_type.trim().to_lowercase(),
        date,
        duration_minutes: form.duration_minutes,
        notes: Some(form.notes.trim().to_string()).filter(|n| !n.is_empty()),
        created_date: None,
    };
    let created = Records::<ActivityLog>::new(backend).create(&log).await?;
    tracing::info!(pet_id = %created.pet_id, activity = %created.activity_type, "activity logged");
    Ok(created)
}

/// Most recent activity first.
pub async fn list_activities(backend: &dyn Backend, pet_id: &str) -> Result<Vec<ActivityLog>, BackendError> {
    let mut logs = Records::<ActivityLog>::new(backend)
        .filter(json!({ "pet_id": pet_id }), None)
        .await?;
    logs.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.created_date.cmp(&a.created_date)));
    Ok(logs)
}
