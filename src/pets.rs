use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};

use crate::backend::records::SORT_NEWEST;
use crate::backend::{ActivityLog, Analysis, Backend, BackendError, Pet, Record, Records, Species, VaccinationRecord};
use crate::error::FormError;
use crate::validation::{parse_date, validate_pet_profile, PetProfileForm};

fn optional(value: &str) -> Option<String> {
    Some(value.trim().to_string()).filter(|v| !v.is_empty())
}

fn nullable(value: &str) -> Value {
    optional(value).map_or(Value::Null, Value::String)
}

pub async fn list_pets(backend: &dyn Backend) -> Result<Vec<Pet>, BackendError> {
    Records::<Pet>::new(backend).list(Some(SORT_NEWEST), None).await
}

pub async fn get_pet(backend: &dyn Backend, id: &str) -> Result<Pet, BackendError> {
    Records::<Pet>::new(backend).get(id).await
}

pub async fn create_pet(backend: &dyn Backend, form: &PetProfileForm, today: NaiveDate) -> Result<Pet, FormError> {
    FormError::check(validate_pet_profile(form, today))?;

    let pet = Pet {
        id: String::new(),
        name: form.name.trim().to_string(),
        species: Species::parse(&form.species),
        breed: optional(&form.breed),
        gender: optional(&form.gender).map(|g| g.to_lowercase()),
        birthday: parse_date(&form.birthday),
        photo_url: optional(&form.photo_url),
        created_date: None,
    };
    let created = Records::<Pet>::new(backend).create(&pet).await?;
    tracing::info!(pet_id = %created.id, species = created.species.as_str(), "pet created");
    Ok(created)
}

/// Full replacement: blank optional fields are cleared.
pub async fn update_pet(backend: &dyn Backend, id: &str, form: &PetProfileForm, today: NaiveDate) -> Result<Pet, FormError> {
    FormError::check(validate_pet_profile(form, today))?;

    let patch = json!({
        "name": form.name.trim(),
        "species": Species::parse(&form.species).as_str(),
        "breed": nullable(&form.breed),
        "gender": optional(&form.gender).map(|g| g.to_lowercase()),
        "birthday": nullable(&form.birthday),
        "photo_url": nullable(&form.photo_url),
    });
    let updated = Records::<Pet>::new(backend).update(id, patch).await?;
    tracing::info!(pet_id = %id, "pet updated");
    Ok(updated)
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DeletedPet {
    pub analyses: usize,
    pub vaccination_records: usize,
    pub activity_logs: usize,
}

async fn delete_children<T: Record>(backend: &dyn Backend, pet_id: &str) -> Result<usize, BackendError> {
    let records = Records::<T>::new(backend);
    let children = records.filter(json!({ "pet_id": pet_id }), None).await?;
    for child in &children {
        records.delete(child.id()).await?;
    }
    Ok(children.len())
}

/// Removes everything that points at the pet, then the pet itself. A failure
/// part way leaves the pet in place so the delete can be retried.
pub async fn delete_pet(backend: &dyn Backend, id: &str) -> Result<DeletedPet, BackendError> {
    // Fail fast on an unknown id before touching anything.
    get_pet(backend, id).await?;

    let deleted = DeletedPet {
        analyses: delete_children::<Analysis>(backend, id).await?,
        vaccination_records: delete_children::<VaccinationRecord>(backend, id).await?,
        activity_logs: delete_children::<ActivityLog>(backend, id).await?,
    };
    Records::<Pet>::new(backend).delete(id).await?;

    tracing::info!(
        pet_id = %id,
        analyses = deleted.analyses,
        vaccination_records = deleted.vaccination_records,
        activity_logs = deleted.activity_logs,
        "pet deleted"
    );
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EntityKind;
    use crate::testing::{day, MockBackend};

    fn form(name: &str, species: &str) -> PetProfileForm {
        PetProfileForm {
            name: name.into(),
            species: species.into(),
            breed: "Beagle".into(),
            birthday: "2021-05-01".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_validates_first() {
        let backend = MockBackend::new();
        let err = create_pet(&backend, &form("", "lizard"), day(2024, 6, 1))
            .await
            .unwrap_err();
        let FormError::Invalid(result) = err else {
            panic!("expected validation failure");
        };
        assert!(result.errors.contains_key("name"));
        assert!(result.errors.contains_key("species"));
        assert_eq!(backend.create_count(), 0);

        let pet = create_pet(&backend, &form("Biscuit", "Dog"), day(2024, 6, 1)).await.unwrap();
        assert_eq!(pet.species, Species::Dog);
        assert_eq!(pet.birthday, Some(day(2021, 5, 1)));
    }

    #[tokio::test]
    async fn update_clears_blank_fields() {
        let backend = MockBackend::new();
        let pet = create_pet(&backend, &form("Biscuit", "dog"), day(2024, 6, 1)).await.unwrap();

        let mut edit = form("Biscuit Jr", "dog");
        edit.breed.clear();
        let updated = update_pet(&backend, &pet.id, &edit, day(2024, 6, 1)).await.unwrap();
        assert_eq!(updated.name, "Biscuit Jr");
        assert_eq!(updated.breed, None);
    }

    #[tokio::test]
    async fn delete_cascades_to_everything_referencing_the_pet() {
        let backend = MockBackend::new();
        let pet = create_pet(&backend, &form("Biscuit", "dog"), day(2024, 6, 1)).await.unwrap();
        let other = create_pet(&backend, &form("Miso", "cat"), day(2024, 6, 1)).await.unwrap();

        backend.seed(EntityKind::Analysis, json!({"pet_id": pet.id, "emotion_detected": "Happy"}));
        backend.seed(EntityKind::Analysis, json!({"pet_id": other.id, "emotion_detected": "Calm"}));
        backend.seed(
            EntityKind::VaccinationRecord,
            json!({"pet_id": pet.id, "vaccine_name": "Rabies", "date_administered": "2024-01-01"}),
        );
        backend.seed(
            EntityKind::ActivityLog,
            json!({"pet_id": pet.id, "activity_type": "walk", "date": "2024-05-01"}),
        );

        let deleted = delete_pet(&backend, &pet.id).await.unwrap();
        assert_eq!(
            deleted,
            DeletedPet {
                analyses: 1,
                vaccination_records: 1,
                activity_logs: 1
            }
        );
        assert_eq!(backend.rows(EntityKind::Analysis).len(), 1);
        assert!(backend.rows(EntityKind::VaccinationRecord).is_empty());
        assert_eq!(list_pets(&backend).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleting_an_unknown_pet_touches_nothing() {
        let backend = MockBackend::new();
        backend.seed(EntityKind::Analysis, json!({"pet_id": "ghost"}));
        assert!(delete_pet(&backend, "ghost").await.unwrap_err().is_not_found());
        assert_eq!(backend.rows(EntityKind::Analysis).len(), 1);
    }
}
