//! Pure checks for uploaded files and form input.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::media::video::VideoProbe;
use crate::media::{MediaError, MediaFile};

pub const DEFAULT_ALLOWED_PREFIXES: [&str; 2] = ["image/", "video/"];

const BYTES_PER_MB: u64 = 1024 * 1024;

pub fn is_valid_file_type(content_type: &str, allowed_prefixes: &[&str]) -> bool {
    let content_type = content_type.trim().to_ascii_lowercase();
    allowed_prefixes
        .iter()
        .any(|prefix| content_type.starts_with(&prefix.to_ascii_lowercase()))
}

/// Inclusive: a file of exactly `max_mb` megabytes passes.
pub fn is_valid_file_size(size_bytes: u64, max_mb: u64) -> bool {
    size_bytes <= max_mb.saturating_mul(BYTES_PER_MB)
}

/// Duration in seconds, as reported by the probe.
pub async fn get_video_duration(probe: &dyn VideoProbe, file: &MediaFile) -> Result<f64, MediaError> {
    probe.duration_seconds(file).await
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: BTreeMap<String, String>,
}

impl ValidationResult {
    fn from_errors(errors: BTreeMap<String, String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PetProfileForm {
    pub name: String,
    pub species: String,
    pub breed: String,
    pub gender: String,
    pub birthday: String,
    pub photo_url: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ActivityLogForm {
    pub pet_id: String,
    pub activity_type: String,
    pub date: String,
    pub duration_minutes: Option<i64>,
    pub notes: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct VaccineRecordForm {
    pub vaccine_name: String,
    pub date_administered: String,
    pub next_due_date: String,
    pub veterinarian: String,
    pub clinic_name: String,
    pub notes: String,
}

pub const SPECIES: [&str; 3] = ["dog", "cat", "other"];
pub const GENDERS: [&str; 3] = ["male", "female", "unknown"];
pub const ACTIVITY_TYPES: [&str; 8] = [
    "walk",
    "play",
    "feeding",
    "grooming",
    "training",
    "vet_visit",
    "medication",
    "other",
];

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref URL_RE: Regex = Regex::new(r"^https?://\S+$").unwrap();
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email.trim())
}

fn earliest_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN)
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

struct Rules {
    errors: BTreeMap<String, String>,
}

impl Rules {
    fn new() -> Self {
        Self {
            errors: BTreeMap::new(),
        }
    }

    fn fail(&mut self, field: &str, message: impl Into<String>) {
        self.errors.entry(field.to_string()).or_insert_with(|| message.into());
    }

    fn required(&mut self, field: &str, label: &str, value: &str) -> bool {
        if value.trim().is_empty() {
            self.fail(field, format!("{label} is required"));
            false
        } else {
            true
        }
    }

    fn max_len(&mut self, field: &str, label: &str, value: &str, max: usize) {
        if value.trim().chars().count() > max {
            self.fail(field, format!("{label} must be {max} characters or less"));
        }
    }

    fn one_of(&mut self, field: &str, label: &str, value: &str, allowed: &[&str]) {
        let value = value.trim().to_lowercase();
        if !allowed.contains(&value.as_str()) {
            self.fail(field, format!("{label} must be one of: {}", allowed.join(", ")));
        }
    }

    /// Parses a past-or-today date no earlier than 1900-01-01.
    fn past_date(&mut self, field: &str, label: &str, value: &str, today: NaiveDate) -> Option<NaiveDate> {
        let Some(date) = parse_date(value) else {
            self.fail(field, format!("{label} must be a valid date (YYYY-MM-DD)"));
            return None;
        };
        if date > today {
            self.fail(field, format!("{label} cannot be in the future"));
            return None;
        }
        if date < earliest_date() {
            self.fail(field, format!("{label} cannot be before 1900-01-01"));
            return None;
        }
        Some(date)
    }

    fn finish(self) -> ValidationResult {
        ValidationResult::from_errors(self.errors)
    }
}

pub fn validate_pet_profile(form: &PetProfileForm, today: NaiveDate) -> ValidationResult {
    let mut rules = Rules::new();

    if rules.required("name", "Pet name", &form.name) {
        rules.max_len("name", "Pet name", &form.name, 50);
    }
    if rules.required("species", "Species", &form.species) {
        rules.one_of("species", "Species", &form.species, &SPECIES);
    }
    rules.max_len("breed", "Breed", &form.breed, 50);
    if !form.gender.trim().is_empty() {
        rules.one_of("gender", "Gender", &form.gender, &GENDERS);
    }
    if !form.birthday.trim().is_empty() {
        rules.past_date("birthday", "Birthday", &form.birthday, today);
    }
    if !form.photo_url.trim().is_empty() && !URL_RE.is_match(form.photo_url.trim()) {
        rules.fail("photo_url", "Photo URL must be a valid http(s) URL");
    }

    rules.finish()
}

pub fn validate_activity_log(form: &ActivityLogForm, today: NaiveDate) -> ValidationResult {
    let mut rules = Rules::new();

    if form.pet_id.trim().is_empty() {
        rules.fail("pet_id", "Please select a pet");
    }
    if rules.required("activity_type", "Activity type", &form.activity_type) {
        rules.one_of("activity_type", "Activity type", &form.activity_type, &ACTIVITY_TYPES);
    }
    if rules.required("date", "Date", &form.date) {
        rules.past_date("date", "Date", &form.date, today);
    }
    if let Some(minutes) = form.duration_minutes {
        if !(0..=1440).contains(&minutes) {
            rules.fail("duration_minutes", "Duration must be between 0 and 1440 minutes");
        }
    }
    rules.max_len("notes", "Notes", &form.notes, 1000);

    rules.finish()
}

pub fn validate_contact_form(form: &ContactForm) -> ValidationResult {
    let mut rules = Rules::new();

    if rules.required("name", "Name", &form.name) {
        rules.max_len("name", "Name", &form.name, 100);
    }
    if rules.required("email", "Email", &form.email) && !is_valid_email(&form.email) {
        rules.fail("email", "Please enter a valid email address");
    }
    if rules.required("subject", "Subject", &form.subject) {
        rules.max_len("subject", "Subject", &form.subject, 200);
    }
    if rules.required("message", "Message", &form.message) {
        let len = form.message.trim().chars().count();
        if len < 10 {
            rules.fail("message", "Message must be at least 10 characters");
        } else if len > 5000 {
            rules.fail("message", "Message must be 5000 characters or less");
        }
    }

    rules.finish()
}

pub fn validate_vaccine_record(form: &VaccineRecordForm, today: NaiveDate) -> ValidationResult {
    let mut rules = Rules::new();

    if rules.required("vaccine_name", "Vaccine name", &form.vaccine_name) {
        rules.max_len("vaccine_name", "Vaccine name", &form.vaccine_name, 100);
    }
    let administered = if rules.required("date_administered", "Date administered", &form.date_administered) {
        rules.past_date("date_administered", "Date administered", &form.date_administered, today)
    } else {
        None
    };
    if !form.next_due_date.trim().is_empty() {
        match (parse_date(&form.next_due_date), administered) {
            (None, _) => rules.fail("next_due_date", "Next due date must be a valid date (YYYY-MM-DD)"),
            (Some(due), Some(given)) if due <= given => {
                rules.fail("next_due_date", "Next due date must be after the date administered")
            }
            _ => {}
        }
    }
    rules.max_len("veterinarian", "Veterinarian", &form.veterinarian, 100);
    rules.max_len("clinic_name", "Clinic name", &form.clinic_name, 100);
    rules.max_len("notes", "Notes", &form.notes, 1000);

    rules.finish()
}
