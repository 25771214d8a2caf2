//! Account data export: a JSON bundle of everything the user owns and a CSV
//! of their analyses.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::records::SORT_NEWEST;
use crate::backend::{ActivityLog, Analysis, Backend, BackendError, Pet, Records, User, VaccinationRecord};

pub const CSV_HEADER: [&str; 6] = ["Date", "Pet ID", "Emotion", "Confidence", "Summary", "Recommendations"];

#[derive(Debug, Clone, Serialize)]
pub struct ExportBundle {
    pub exported_at: DateTime<Utc>,
    pub user: User,
    pub pets: Vec<Pet>,
    pub analyses: Vec<Analysis>,
    pub vaccination_records: Vec<VaccinationRecord>,
    pub activity_logs: Vec<ActivityLog>,
}

impl ExportBundle {
    pub async fn collect(backend: &dyn Backend, now: DateTime<Utc>) -> Result<Self, BackendError> {
        let bundle = Self {
            exported_at: now,
            user: backend.me().await?,
            pets: Records::<Pet>::new(backend).list(Some(SORT_NEWEST), None).await?,
            analyses: Records::<Analysis>::new(backend).list(Some(SORT_NEWEST), None).await?,
            vaccination_records: Records::<VaccinationRecord>::new(backend).list(Some(SORT_NEWEST), None).await?,
            activity_logs: Records::<ActivityLog>::new(backend).list(Some(SORT_NEWEST), None).await?,
        };
        tracing::info!(
            pets = bundle.pets.len(),
            analyses = bundle.analyses.len(),
            "export collected"
        );
        Ok(bundle)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Quotes a field when it contains a comma, quote or line break. Embedded
/// quotes are doubled.
pub fn escape_csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn unescape_csv_field(field: &str) -> String {
    match field.strip_prefix('"').and_then(|f| f.strip_suffix('"')) {
        Some(inner) => inner.replace("\"\"", "\""),
        None => field.to_string(),
    }
}

/// Splits one CSV record into unescaped fields. Quoted fields may contain
/// commas, doubled quotes and line breaks.
pub fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) if current.is_empty() => in_quotes = true,
            (',', false) => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn csv_row(analysis: &Analysis) -> String {
    let date = analysis
        .created_at()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    [
        date,
        analysis.pet_id.clone().unwrap_or_default(),
        analysis.emotion_detected.clone(),
        analysis.confidence_level.to_string(),
        analysis.behavior_summary.clone(),
        analysis.recommendations.join("; "),
    ]
    .iter()
    .map(|f| escape_csv_field(f))
    .collect::<Vec<_>>()
    .join(",")
}

pub fn analyses_to_csv(analyses: &[Analysis]) -> String {
    let mut out = CSV_HEADER.join(",");
    out.push_str("\r\n");
    for analysis in analyses {
        out.push_str(&csv_row(analysis));
        out.push_str("\r\n");
    }
    out
}
