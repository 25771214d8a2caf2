use serde::Serialize;

use crate::backend::Species;

use super::same_vaccine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VaccineCategory {
    Core,
    NonCore,
    /// Anything not in the catalog. No due date is generated for these.
    Other,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CatalogEntry {
    pub name: &'static str,
    pub category: VaccineCategory,
    pub description: &'static str,
}

const fn entry(name: &'static str, category: VaccineCategory, description: &'static str) -> CatalogEntry {
    CatalogEntry {
        name,
        category,
        description,
    }
}

static DOG: [CatalogEntry; 6] = [
    entry("DHPP", VaccineCategory::Core, "Distemper, hepatitis, parainfluenza and parvovirus"),
    entry("Rabies", VaccineCategory::Core, "Required by law in most areas"),
    entry("Bordetella", VaccineCategory::NonCore, "Kennel cough, for dogs that board or visit daycare"),
    entry("Leptospirosis", VaccineCategory::NonCore, "Bacterial infection spread through water and wildlife"),
    entry("Lyme Disease", VaccineCategory::NonCore, "Tick-borne, for dogs in endemic areas"),
    entry("Canine Influenza", VaccineCategory::NonCore, "Dog flu, for social dogs"),
];

static CAT: [CatalogEntry; 3] = [
    entry("FVRCP", VaccineCategory::Core, "Feline viral rhinotracheitis, calicivirus and panleukopenia"),
    entry("Rabies", VaccineCategory::Core, "Required by law in most areas"),
    entry("FeLV", VaccineCategory::NonCore, "Feline leukemia, for cats that go outdoors"),
];

pub fn catalog_for(species: Species) -> &'static [CatalogEntry] {
    match species {
        Species::Dog => &DOG,
        Species::Cat => &CAT,
        Species::Other => &[],
    }
}

pub fn find(species: Species, vaccine_name: &str) -> Option<&'static CatalogEntry> {
    catalog_for(species)
        .iter()
        .find(|e| same_vaccine(e.name, vaccine_name))
}

pub fn category_of(species: Species, vaccine_name: &str) -> VaccineCategory {
    find(species, vaccine_name).map_or(VaccineCategory::Other, |e| e.category)
}
