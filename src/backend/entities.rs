//! Record shapes as the backend stores them.
//!
//! Deserialization is lenient: the platform returns empty strings for unset
//! dates and omits fields freely, so everything optional defaults quietly.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::records::Record;
use super::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Species {
    Dog,
    Cat,
    #[default]
    Other,
}

impl Species {
    pub fn as_str(&self) -> &'static str {
        match self {
            Species::Dog => "dog",
            Species::Cat => "cat",
            Species::Other => "other",
        }
    }
}

impl From<String> for Species {
    fn from(raw: String) -> Self {
        Species::parse(&raw)
    }
}

impl Species {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "dog" => Species::Dog,
            "cat" => Species::Cat,
            _ => Species::Other,
        }
    }
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        let s = s.trim();
        // Full timestamps are accepted; only the date part matters.
        NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d").ok()
    }))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parses the platform's `created_date`, which may or may not carry an offset.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Pet {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub species: Species,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, deserialize_with = "lenient_date", skip_serializing_if = "Option::is_none")]
    pub birthday: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub created_date: Option<String>,
}

impl Pet {
    /// "a 3 year old male Beagle dog", for prompts and emails.
    pub fn describe(&self, today: NaiveDate) -> String {
        let mut parts = Vec::new();
        if let Some(age) = self.birthday.and_then(|b| age_label(b, today)) {
            parts.push(age);
        }
        if let Some(gender) = self.gender.as_deref().filter(|g| !g.is_empty() && *g != "unknown") {
            parts.push(gender.to_string());
        }
        if let Some(breed) = self.breed.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            parts.push(breed.to_string());
        }
        parts.push(self.species.as_str().to_string());
        format!("a {}", parts.join(" "))
    }
}

fn age_label(birthday: NaiveDate, today: NaiveDate) -> Option<String> {
    let months = (today.signed_duration_since(birthday).num_days() as f64 / 30.44).floor() as i64;
    match months {
        m if m < 0 => None,
        m if m < 12 => Some(format!("{m} month old")),
        m => Some(format!("{} year old", m / 12)),
    }
}

impl Record for Pet {
    const KIND: EntityKind = EntityKind::Pet;
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Analysis {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub pet_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub emotion_detected: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub confidence_level: u8,
    #[serde(default, deserialize_with = "null_as_default")]
    pub behavior_summary: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub detailed_analysis: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub possible_reasons: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub audio_analyzed: bool,
    #[serde(default, skip_serializing)]
    pub created_date: Option<String>,
}

impl Analysis {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_date.as_deref().and_then(parse_timestamp)
    }
}

impl Record for Analysis {
    const KIND: EntityKind = EntityKind::Analysis;
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaccinationRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub pet_id: String,
    pub vaccine_name: String,
    pub date_administered: NaiveDate,
    #[serde(default, deserialize_with = "lenient_date")]
    pub next_due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub veterinarian: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinic_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reminder_sent: bool,
    #[serde(default, skip_serializing)]
    pub created_date: Option<String>,
}

impl Record for VaccinationRecord {
    const KIND: EntityKind = EntityKind::VaccinationRecord;
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLog {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub pet_id: String,
    pub activity_type: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing)]
    pub created_date: Option<String>,
}

impl Record for ActivityLog {
    const KIND: EntityKind = EntityKind::ActivityLog;
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// Unset means opted in.
    #[serde(default)]
    pub email_notifications: Option<bool>,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("there")
    }

    pub fn wants_email(&self) -> bool {
        self.email_notifications.unwrap_or(true) && !self.email.is_empty()
    }
}
