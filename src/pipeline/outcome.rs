//! Model answers: the schemas we ask for and the coercion applied to what
//! actually comes back.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::backend::Analysis;

pub const DEFAULT_EMOTION: &str = "Unknown";
pub const DEFAULT_SUMMARY: &str = "Analysis completed.";
pub const DEFAULT_DETAILS: &str = "No detailed analysis available.";
pub const DEFAULT_REASON: &str = "Unable to determine specific reasons";
pub const DEFAULT_RECOMMENDATION: &str = "Continue monitoring your pet's behavior";
pub const NO_PET_MESSAGE: &str =
    "We couldn't find a pet in this upload. Please try a clearer photo or video with your pet in view.";

pub fn detection_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "pet_detected": { "type": "boolean" },
            "species": { "type": "string" },
            "message": { "type": "string" }
        },
        "required": ["pet_detected"]
    })
}

pub fn identity_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "matches": { "type": "boolean" },
            "detected_description": { "type": "string" },
            "reason": { "type": "string" }
        },
        "required": ["matches"]
    })
}

pub fn analysis_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "emotion_detected": { "type": "string" },
            "confidence_level": { "type": "number" },
            "behavior_summary": { "type": "string" },
            "detailed_analysis": { "type": "string" },
            "possible_reasons": { "type": "array", "items": { "type": "string" } },
            "recommendations": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["emotion_detected", "confidence_level", "behavior_summary"]
    })
}

/// The model sometimes answers with a JSON string, fenced in markdown.
pub fn parse_model_json(raw: Value) -> Option<Value> {
    match raw {
        Value::Object(_) => Some(raw),
        Value::String(text) => {
            let clean = text
                .trim()
                .trim_start_matches("```json")
                .trim_start_matches("```")
                .trim_end_matches("```")
                .trim();
            match serde_json::from_str::<Value>(clean) {
                Ok(v @ Value::Object(_)) => Some(v),
                _ => None,
            }
        }
        _ => None,
    }
}

fn text(value: &Value, key: &str) -> Option<String> {
    value[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn flag(value: &Value, key: &str) -> Option<bool> {
    match &value[key] {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub pet_detected: bool,
    pub species: Option<String>,
    pub message: String,
}

/// Anything short of an explicit `pet_detected: true` counts as no pet.
pub fn interpret_detection(raw: Value) -> Detection {
    let Some(value) = parse_model_json(raw) else {
        tracing::warn!("unreadable detection response, treating as no pet");
        return Detection {
            pet_detected: false,
            species: None,
            message: NO_PET_MESSAGE.to_string(),
        };
    };
    Detection {
        pet_detected: flag(&value, "pet_detected").unwrap_or(false),
        species: text(&value, "species"),
        message: text(&value, "message").unwrap_or_else(|| NO_PET_MESSAGE.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityCheck {
    pub matches: bool,
    pub detected_description: String,
    pub reason: String,
}

/// A missing verdict is not a mismatch: the owner picked the pet, and the
/// confirmation step is only for clear disagreements.
pub fn interpret_identity(raw: Value) -> IdentityCheck {
    let value = parse_model_json(raw).unwrap_or(Value::Null);
    let matches = flag(&value, "matches").unwrap_or_else(|| {
        tracing::warn!("identity response without a verdict, assuming match");
        true
    });
    IdentityCheck {
        matches,
        detected_description: text(&value, "detected_description").unwrap_or_else(|| "an unidentified animal".into()),
        reason: text(&value, "reason").unwrap_or_else(|| "The animal does not appear to match this pet's profile.".into()),
    }
}

/// Accepts 0–1 fractions or 0–100 percentages, numbers or numeric strings.
pub fn normalize_confidence(value: &Value) -> u8 {
    let raw = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    let Some(mut c) = raw.filter(|c| c.is_finite()) else {
        return 0;
    };
    if c > 0.0 && c < 1.0 {
        c *= 100.0;
    }
    c.clamp(0.0, 100.0).round() as u8
}

fn string_list(value: &Value, key: &str, fallback: &str) -> Vec<String> {
    let items: Vec<String> = match &value[key] {
        Value::Array(items) => items
            .iter()
            .filter_map(|i| i.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    };
    if items.is_empty() {
        vec![fallback.to_string()]
    } else {
        items
    }
}

/// The analysis fields with every gap filled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedAnalysis {
    pub emotion_detected: String,
    pub confidence_level: u8,
    pub behavior_summary: String,
    pub detailed_analysis: String,
    pub possible_reasons: Vec<String>,
    pub recommendations: Vec<String>,
}

pub fn normalize_analysis(raw: Value) -> NormalizedAnalysis {
    let value = parse_model_json(raw).unwrap_or_else(|| {
        tracing::warn!("unreadable analysis response, using defaults");
        Value::Null
    });
    NormalizedAnalysis {
        emotion_detected: text(&value, "emotion_detected").unwrap_or_else(|| DEFAULT_EMOTION.into()),
        confidence_level: normalize_confidence(&value["confidence_level"]),
        behavior_summary: text(&value, "behavior_summary").unwrap_or_else(|| DEFAULT_SUMMARY.into()),
        detailed_analysis: text(&value, "detailed_analysis").unwrap_or_else(|| DEFAULT_DETAILS.into()),
        possible_reasons: string_list(&value, "possible_reasons", DEFAULT_REASON),
        recommendations: string_list(&value, "recommendations", DEFAULT_RECOMMENDATION),
    }
}

impl NormalizedAnalysis {
    pub fn into_record(self, pet_id: Option<String>, image_url: Option<String>, video_url: Option<String>) -> Analysis {
        Analysis {
            id: String::new(),
            pet_id,
            emotion_detected: self.emotion_detected,
            confidence_level: self.confidence_level,
            behavior_summary: self.behavior_summary,
            detailed_analysis: self.detailed_analysis,
            possible_reasons: self.possible_reasons,
            recommendations: self.recommendations,
            video_url,
            image_url,
            audio_analyzed: false,
            created_date: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedPet {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    PetNotDetected {
        message: String,
    },
    WrongPetDetected {
        attempt_id: Uuid,
        expected: ExpectedPet,
        detected: String,
        reason: String,
    },
    Completed {
        analysis: Analysis,
    },
    /// The owner declined to continue after a mismatch.
    Cancelled,
}

impl AnalysisOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AnalysisOutcome::PetNotDetected { .. } => "pet_not_detected",
            AnalysisOutcome::WrongPetDetected { .. } => "wrong_pet",
            AnalysisOutcome::Completed { .. } => "completed",
            AnalysisOutcome::Cancelled => "cancelled",
        }
    }
}
