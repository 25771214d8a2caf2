use chrono::{Duration, NaiveDate};
use serde::Serialize;
use serde_json::json;

use crate::backend::records::SORT_NEWEST;
use crate::backend::{Backend, Pet, Records, VaccinationRecord};
use crate::metrics;
use crate::validation::{parse_date, validate_vaccine_record, VaccineRecordForm};

use super::catalog::{catalog_for, category_of, VaccineCategory};
use super::{calculate_next_due_date, dose_index, same_vaccine, VaccineError};

pub const DUE_SOON_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseStatus {
    NotStarted,
    UpToDate,
    DueSoon,
    Overdue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleEntry {
    pub vaccine_name: String,
    pub category: VaccineCategory,
    pub doses_given: usize,
    pub last_administered: Option<NaiveDate>,
    pub next_due_date: Option<NaiveDate>,
    pub status: DoseStatus,
}

pub fn status_for(doses_given: usize, next_due: Option<NaiveDate>, today: NaiveDate) -> DoseStatus {
    match (doses_given, next_due) {
        (0, _) => DoseStatus::NotStarted,
        (_, None) => DoseStatus::UpToDate,
        (_, Some(due)) if due < today => DoseStatus::Overdue,
        (_, Some(due)) if due <= today + Duration::days(DUE_SOON_DAYS) => DoseStatus::DueSoon,
        _ => DoseStatus::UpToDate,
    }
}

fn entry_for(
    vaccine_name: &str,
    category: VaccineCategory,
    records: &[&VaccinationRecord],
    today: NaiveDate,
) -> ScheduleEntry {
    // Latest administration wins; equal dates fall back to record order.
    let latest = records
        .iter()
        .enumerate()
        .max_by_key(|(i, r)| (r.date_administered, *i))
        .map(|(_, r)| *r);
    let next_due_date = latest.and_then(|r| r.next_due_date);

    ScheduleEntry {
        vaccine_name: vaccine_name.to_string(),
        category,
        doses_given: records.len(),
        last_administered: latest.map(|r| r.date_administered),
        next_due_date,
        status: status_for(records.len(), next_due_date, today),
    }
}

/// Catalog vaccines for the pet's species, followed by anything else on file.
pub fn build_schedule(pet: &Pet, records: &[VaccinationRecord], today: NaiveDate) -> Vec<ScheduleEntry> {
    let mine: Vec<&VaccinationRecord> = records.iter().filter(|r| r.pet_id == pet.id).collect();
    let doses_of = |name: &str| -> Vec<&VaccinationRecord> {
        mine.iter()
            .copied()
            .filter(|r| same_vaccine(&r.vaccine_name, name))
            .collect()
    };

    let catalog = catalog_for(pet.species);
    let mut schedule: Vec<ScheduleEntry> = catalog
        .iter()
        .map(|e| entry_for(e.name, e.category, &doses_of(e.name), today))
        .collect();

    let mut extra: Vec<&str> = Vec::new();
    for r in &mine {
        let known = catalog.iter().any(|e| same_vaccine(e.name, &r.vaccine_name))
            || extra.iter().any(|n| same_vaccine(n, &r.vaccine_name));
        if !known {
            extra.push(r.vaccine_name.trim());
        }
    }
    schedule.extend(
        extra
            .into_iter()
            .map(|name| entry_for(name, VaccineCategory::Other, &doses_of(name), today)),
    );
    schedule
}

pub async fn list_records(backend: &dyn Backend, pet_id: &str) -> Result<Vec<VaccinationRecord>, VaccineError> {
    Ok(Records::<VaccinationRecord>::new(backend)
        .filter(json!({ "pet_id": pet_id }), Some(SORT_NEWEST))
        .await?)
}

fn optional(value: &str) -> Option<String> {
    Some(value.trim().to_string()).filter(|v| !v.is_empty())
}

/// Validates and stores one dose. Unless the user gave a next due date, it is
/// computed from the doses already on file; vaccines outside the catalog get
/// none.
pub async fn record_dose(
    backend: &dyn Backend,
    pet: &Pet,
    form: &VaccineRecordForm,
    today: NaiveDate,
) -> Result<VaccinationRecord, VaccineError> {
    let validation = validate_vaccine_record(form, today);
    if !validation.is_valid {
        return Err(VaccineError::Invalid(validation));
    }
    let administered = parse_date(&form.date_administered)
        .ok_or_else(|| VaccineError::InvalidDate(form.date_administered.clone()))?;

    let existing = list_records(backend, &pet.id).await?;
    let dose = dose_index(&existing, &pet.id, &form.vaccine_name);

    let next_due_date = match parse_date(&form.next_due_date) {
        Some(given) => Some(given),
        None if category_of(pet.species, &form.vaccine_name) == VaccineCategory::Other => None,
        None => Some(calculate_next_due_date(&form.vaccine_name, administered, pet.birthday, dose)),
    };

    let record = VaccinationRecord {
        id: String::new(),
        pet_id: pet.id.clone(),
        vaccine_name: form.vaccine_name.trim().to_string(),
        date_administered: administered,
        next_due_date,
        veterinarian: optional(&form.veterinarian),
        clinic_name: optional(&form.clinic_name),
        notes: optional(&form.notes),
        reminder_sent: false,
        created_date: None,
    };
    let created = Records::<VaccinationRecord>::new(backend).create(&record).await?;

    metrics::increment_vaccinations_recorded();
    tracing::info!(
        pet_id = %pet.id,
        vaccine = %created.vaccine_name,
        dose_index = dose,
        next_due = ?created.next_due_date,
        "vaccination recorded"
    );
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{EntityKind, Species};
    use crate::testing::{day, MockBackend};

    fn puppy() -> Pet {
        Pet {
            id: "p1".into(),
            name: "Biscuit".into(),
            species: Species::Dog,
            birthday: Some(day(2024, 1, 1)),
            ..Default::default()
        }
    }

    fn form(name: &str, given: &str) -> VaccineRecordForm {
        VaccineRecordForm {
            vaccine_name: name.into(),
            date_administered: given.into(),
            ..Default::default()
        }
    }

    #[test]
    fn status_thresholds() {
        let today = day(2024, 6, 1);
        assert_eq!(status_for(0, None, today), DoseStatus::NotStarted);
        assert_eq!(status_for(1, None, today), DoseStatus::UpToDate);
        assert_eq!(status_for(1, Some(day(2024, 5, 31)), today), DoseStatus::Overdue);
        assert_eq!(status_for(1, Some(today), today), DoseStatus::DueSoon);
        assert_eq!(status_for(1, Some(day(2024, 7, 1)), today), DoseStatus::DueSoon);
        assert_eq!(status_for(1, Some(day(2024, 7, 2)), today), DoseStatus::UpToDate);
    }

    #[tokio::test]
    async fn puppy_series_then_booster() {
        let backend = MockBackend::new();
        let pet = puppy();
        let today = day(2024, 6, 1);

        let first = record_dose(&backend, &pet, &form("DHPP", "2024-02-01"), today).await.unwrap();
        assert_eq!(first.next_due_date, Some(day(2024, 2, 22)));

        let second = record_dose(&backend, &pet, &form("dhpp", "2024-02-22"), today).await.unwrap();
        assert_eq!(second.next_due_date, Some(day(2024, 3, 14)));

        let third = record_dose(&backend, &pet, &form("DHPP", "2024-03-14"), today).await.unwrap();
        assert_eq!(third.next_due_date, Some(day(2024, 4, 4)));

        // Fourth dose: series complete, yearly from here.
        let fourth = record_dose(&backend, &pet, &form("DHPP", "2024-04-04"), today).await.unwrap();
        assert_eq!(fourth.next_due_date, Some(day(2025, 4, 4)));

        let records = list_records(&backend, "p1").await.unwrap();
        let schedule = build_schedule(&pet, &records, today);
        let dhpp = &schedule[0];
        assert_eq!(dhpp.vaccine_name, "DHPP");
        assert_eq!(dhpp.doses_given, 4);
        assert_eq!(dhpp.last_administered, Some(day(2024, 4, 4)));
        assert_eq!(dhpp.status, DoseStatus::UpToDate);
        assert_eq!(schedule[1].status, DoseStatus::NotStarted);
    }

    #[tokio::test]
    async fn uncatalogued_vaccines_get_no_due_date_unless_given() {
        let backend = MockBackend::new();
        let pet = puppy();
        let today = day(2024, 6, 1);

        let custom = record_dose(&backend, &pet, &form("Heartworm", "2024-05-01"), today).await.unwrap();
        assert_eq!(custom.next_due_date, None);

        let mut with_due = form("Heartworm", "2024-05-15");
        with_due.next_due_date = "2024-06-15".into();
        let custom = record_dose(&backend, &pet, &with_due, today).await.unwrap();
        assert_eq!(custom.next_due_date, Some(day(2024, 6, 15)));

        let records = list_records(&backend, "p1").await.unwrap();
        let schedule = build_schedule(&pet, &records, today);
        let heartworm = schedule.last().unwrap();
        assert_eq!(heartworm.category, VaccineCategory::Other);
        assert_eq!(heartworm.doses_given, 2);
        assert_eq!(heartworm.status, DoseStatus::DueSoon);
    }

    #[tokio::test]
    async fn invalid_form_is_not_stored() {
        let backend = MockBackend::new();
        let err = record_dose(&backend, &puppy(), &form("", "2030-01-01"), day(2024, 6, 1))
            .await
            .unwrap_err();
        match err {
            VaccineError::Invalid(result) => {
                assert!(result.errors.contains_key("vaccine_name"));
                assert!(result.errors.contains_key("date_administered"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(backend.rows(EntityKind::VaccinationRecord).is_empty());
    }

    #[test]
    fn overdue_when_latest_due_date_has_passed() {
        let pet = Pet {
            id: "c1".into(),
            species: Species::Cat,
            ..Default::default()
        };
        let records = vec![VaccinationRecord {
            id: "r1".into(),
            pet_id: "c1".into(),
            vaccine_name: "Rabies".into(),
            date_administered: day(2023, 1, 1),
            next_due_date: Some(day(2024, 1, 1)),
            veterinarian: None,
            clinic_name: None,
            notes: None,
            reminder_sent: false,
            created_date: None,
        }];
        let schedule = build_schedule(&pet, &records, day(2024, 6, 1));
        assert_eq!(schedule.len(), 3);
        assert_eq!(schedule[1].vaccine_name, "Rabies");
        assert_eq!(schedule[1].status, DoseStatus::Overdue);
    }
}
