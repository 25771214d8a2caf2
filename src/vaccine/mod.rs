//! Vaccination scheduling: next-due-date rules, the per-species catalog, and
//! the schedule view built from a pet's records.

pub mod catalog;
pub mod schedule;

use chrono::{Duration, Months, NaiveDate};
use thiserror::Error;

use crate::backend::{BackendError, VaccinationRecord};
use crate::validation::{parse_date, ValidationResult};

/// Puppies and kittens younger than this are still in their primary series.
pub const JUVENILE_AGE_WEEKS: i64 = 20;
/// Primary series doses are this far apart.
pub const JUVENILE_INTERVAL_WEEKS: i64 = 3;
/// Highest zero-based dose index still spaced as a primary series dose.
pub const JUVENILE_MAX_DOSE_INDEX: usize = 2;

#[derive(Error, Debug)]
pub enum VaccineError {
    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Please correct the highlighted fields")]
    Invalid(ValidationResult),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaccineClass {
    /// Multi-dose combination viral vaccines (DHPP, FVRCP and friends).
    CoreCombination,
    Rabies,
    KennelCough,
    /// Yearly boosters for vector-borne, respiratory and leukemia vaccines.
    AnnualBooster,
    Unknown,
}

const CORE_COMBINATION: [&str; 7] = ["dhpp", "dapp", "da2pp", "dhlpp", "fvrcp", "distemper", "parvo"];
const KENNEL_COUGH: [&str; 2] = ["bordetella", "kennel cough"];
const ANNUAL_BOOSTERS: [&str; 6] = ["leptospirosis", "lyme", "canine influenza", "felv", "leukemia", "fiv"];

pub fn classify(vaccine_name: &str) -> VaccineClass {
    let name = vaccine_name.trim().to_lowercase();
    let has_any = |words: &[&str]| words.iter().any(|w| name.contains(w));

    if name.contains("rabies") {
        VaccineClass::Rabies
    } else if has_any(&KENNEL_COUGH) {
        VaccineClass::KennelCough
    } else if has_any(&CORE_COMBINATION) {
        VaccineClass::CoreCombination
    } else if has_any(&ANNUAL_BOOSTERS) {
        VaccineClass::AnnualBooster
    } else {
        VaccineClass::Unknown
    }
}

/// Whole weeks between birth and the administration date. A birthday after the
/// administration date is treated as unknown.
fn age_in_weeks(birthday: Option<NaiveDate>, administered: NaiveDate) -> Option<i64> {
    let birthday = birthday?;
    let days = administered.signed_duration_since(birthday).num_days();
    (days >= 0).then_some(days / 7)
}

fn plus_months(date: NaiveDate, months: u32) -> NaiveDate {
    // Clamps to the end of shorter months; only fails near the end of time.
    date.checked_add_months(Months::new(months)).unwrap_or(NaiveDate::MAX)
}

/// Next due date for a dose given on `administered`.
///
/// `dose_index` is the zero-based count of earlier doses of the same vaccine
/// for the same pet. Young animals early in their series come back in three
/// weeks; everything else follows the vaccine's booster interval.
pub fn calculate_next_due_date(
    vaccine_name: &str,
    administered: NaiveDate,
    birthday: Option<NaiveDate>,
    dose_index: usize,
) -> NaiveDate {
    if let Some(weeks) = age_in_weeks(birthday, administered) {
        if weeks < JUVENILE_AGE_WEEKS && dose_index <= JUVENILE_MAX_DOSE_INDEX {
            return administered + Duration::weeks(JUVENILE_INTERVAL_WEEKS);
        }
    }

    match classify(vaccine_name) {
        VaccineClass::KennelCough => plus_months(administered, 6),
        // The third core dose is the first adult booster; it and all later
        // ones are yearly, same as the remaining classes.
        VaccineClass::CoreCombination
        | VaccineClass::Rabies
        | VaccineClass::AnnualBooster
        | VaccineClass::Unknown => plus_months(administered, 12),
    }
}

/// String form used by forms and the API: `YYYY-MM-DD` in, `YYYY-MM-DD` out.
pub fn next_due_date_str(
    vaccine_name: &str,
    administered: &str,
    birthday: Option<&str>,
    dose_index: usize,
) -> Result<String, VaccineError> {
    let administered = parse_date(administered).ok_or_else(|| VaccineError::InvalidDate(administered.to_string()))?;
    let birthday = match birthday.map(str::trim).filter(|b| !b.is_empty()) {
        Some(raw) => Some(parse_date(raw).ok_or_else(|| VaccineError::InvalidDate(raw.to_string()))?),
        None => None,
    };
    Ok(calculate_next_due_date(vaccine_name, administered, birthday, dose_index)
        .format("%Y-%m-%d")
        .to_string())
}

pub fn same_vaccine(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Doses already on file for this pet and vaccine. Derived, never stored.
pub fn dose_index(records: &[VaccinationRecord], pet_id: &str, vaccine_name: &str) -> usize {
    records
        .iter()
        .filter(|r| r.pet_id == pet_id && same_vaccine(&r.vaccine_name, vaccine_name))
        .count()
}
