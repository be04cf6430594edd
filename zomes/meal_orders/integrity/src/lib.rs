//! Meal Orders Integrity Zome
//!
//! Entry types and validation for patients, the recipe catalog, meal requests
//! with their items, and kitchen trays.
//!
//! Patients and trays are the only mutable entries. Trays may only move one
//! lifecycle step per update and never lose or rewrite a status timestamp.

use std::collections::BTreeSet;

use hdi::prelude::*;
use mealflow_core::model::{normalize_name, normalize_room_number};
use mealflow_core::{Allergen, ClinicalState, DietOrder, MealRequestStatus, TrayStatus};

// ============================================================================
// Catalog Types
// ============================================================================

/// An admitted patient with dietary profile
#[hdk_entry_helper]
#[derive(Clone, PartialEq)]
pub struct PatientEntry {
    pub patient_id: String,
    pub name: String,
    pub room_number: Option<String>,
    pub diet_order: DietOrder,
    pub allergies: BTreeSet<Allergen>,
    pub clinical_state: ClinicalState,
    pub admitted_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A dish in the recipe catalog
#[hdk_entry_helper]
#[derive(Clone, PartialEq)]
pub struct RecipeEntry {
    pub recipe_id: String,
    pub name: String,
    pub description: Option<String>,
    pub allergens: BTreeSet<Allergen>,
    /// Diets the dish suits; empty means every diet
    pub diet_tags: BTreeSet<DietOrder>,
    pub created_at: Timestamp,
}

// ============================================================================
// Ordering Types
// ============================================================================

#[hdk_entry_helper]
#[derive(Clone, PartialEq)]
pub struct MealRequestEntry {
    pub request_id: String,
    pub patient_id: String,
    pub status: MealRequestStatus,
    pub rejection_reason: Option<String>,
    pub finalized_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

#[hdk_entry_helper]
#[derive(Clone, PartialEq)]
pub struct RequestItemEntry {
    pub item_id: String,
    pub request_id: String,
    pub recipe_id: String,
    pub quantity: u32,
}

/// The kitchen tray carrying a finalized request
#[hdk_entry_helper]
#[derive(Clone, PartialEq)]
pub struct TrayEntry {
    pub tray_id: String,
    pub request_id: String,
    pub status: TrayStatus,
    pub accuracy_validated_at: Option<Timestamp>,
    pub en_route_at: Option<Timestamp>,
    pub delivered_at: Option<Timestamp>,
    pub retrieved_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl TrayEntry {
    /// Timestamp slot of every status that has one, in lifecycle order
    pub fn stamps(&self) -> [(TrayStatus, Option<Timestamp>); 4] {
        [
            (TrayStatus::AccuracyValidated, self.accuracy_validated_at),
            (TrayStatus::EnRoute, self.en_route_at),
            (TrayStatus::Delivered, self.delivered_at),
            (TrayStatus::Retrieved, self.retrieved_at),
        ]
    }
}

// ============================================================================
// Entry Types and Link Types
// ============================================================================

#[hdk_entry_types]
#[unit_enum(UnitEntryTypes)]
pub enum EntryTypes {
    Patient(PatientEntry),
    Recipe(RecipeEntry),
    MealRequest(MealRequestEntry),
    RequestItem(RequestItemEntry),
    Tray(TrayEntry),
}

#[hdk_link_types]
pub enum LinkTypes {
    /// All patients index
    AllPatients,
    /// Patient id anchor to the original patient entry
    PatientIdLookup,
    /// Original patient entry to each of its updates
    PatientUpdates,
    /// All recipes index
    AllRecipes,
    /// Recipe id anchor to the recipe entry
    RecipeIdLookup,
    /// All meal requests index
    AllMealRequests,
    /// Request id anchor to the meal request entry
    MealRequestIdLookup,
    /// Request id anchor to its items
    RequestToItems,
    /// Request id anchor to its tray
    RequestToTray,
    /// All trays index
    AllTrays,
    /// Tray id anchor to the original tray entry
    TrayIdLookup,
    /// Original tray entry to each of its updates
    TrayUpdates,
}

// ============================================================================
// Validation
// ============================================================================

#[hdk_extern]
pub fn validate(op: Op) -> ExternResult<ValidateCallbackResult> {
    match op.flattened::<EntryTypes, LinkTypes>()? {
        FlatOp::StoreEntry(store_entry) => match store_entry {
            OpEntry::CreateEntry { app_entry, .. } => Ok(validate_create_entry(&app_entry)),
            OpEntry::UpdateEntry {
                app_entry, action, ..
            } => validate_update_entry(&app_entry, &action.original_action_address),
            _ => Ok(ValidateCallbackResult::Valid),
        },
        _ => Ok(ValidateCallbackResult::Valid),
    }
}

fn validate_create_entry(entry: &EntryTypes) -> ValidateCallbackResult {
    match entry {
        EntryTypes::Patient(p) => validate_patient(p),
        EntryTypes::Recipe(r) => validate_recipe(r),
        EntryTypes::MealRequest(m) => validate_meal_request(m),
        EntryTypes::RequestItem(i) => validate_request_item(i),
        EntryTypes::Tray(t) => validate_new_tray(t),
    }
}

fn validate_update_entry(
    entry: &EntryTypes,
    previous_hash: &ActionHash,
) -> ExternResult<ValidateCallbackResult> {
    match entry {
        EntryTypes::Patient(updated) => {
            let checked = validate_patient(updated);
            if checked != ValidateCallbackResult::Valid {
                return Ok(checked);
            }
            let previous: PatientEntry = previous_entry(previous_hash)?;
            Ok(validate_patient_update(&previous, updated))
        }
        EntryTypes::Tray(updated) => {
            let previous: TrayEntry = previous_entry(previous_hash)?;
            Ok(validate_tray_step(&previous, updated))
        }
        EntryTypes::Recipe(_) => Ok(invalid("Recipes cannot be updated")),
        EntryTypes::MealRequest(_) => Ok(invalid("Meal requests cannot be updated")),
        EntryTypes::RequestItem(_) => Ok(invalid("Request items cannot be updated")),
    }
}

fn previous_entry<T>(hash: &ActionHash) -> ExternResult<T>
where
    T: TryFrom<SerializedBytes, Error = SerializedBytesError>,
{
    let record = must_get_valid_record(hash.clone())?;
    record
        .entry()
        .to_app_option::<T>()
        .map_err(|e| wasm_error!(WasmErrorInner::Guest(e.to_string())))?
        .ok_or(wasm_error!(WasmErrorInner::Guest(
            "Updated entry has no app entry".into()
        )))
}

fn invalid(reason: &str) -> ValidateCallbackResult {
    ValidateCallbackResult::Invalid(reason.to_string())
}

fn name_is_normalized(name: &str) -> bool {
    normalize_name(name).is_ok_and(|normalized| normalized == name)
}

fn validate_patient(p: &PatientEntry) -> ValidateCallbackResult {
    if p.patient_id.is_empty() {
        return invalid("Patient ID is required");
    }
    if !name_is_normalized(&p.name) {
        return invalid("Patient name must be trimmed and 1-200 characters");
    }
    if let Some(room) = &p.room_number {
        let normalized = normalize_room_number(Some(room.as_str()));
        if !normalized.is_ok_and(|normalized| normalized.as_ref() == Some(room)) {
            return invalid("Room number must be trimmed, non-blank and at most 50 characters");
        }
    }
    if p.updated_at < p.admitted_at {
        return invalid("Patient cannot be updated before admission");
    }
    ValidateCallbackResult::Valid
}

fn validate_patient_update(previous: &PatientEntry, updated: &PatientEntry) -> ValidateCallbackResult {
    if updated.patient_id != previous.patient_id {
        return invalid("Patient ID cannot change");
    }
    if updated.admitted_at != previous.admitted_at {
        return invalid("Admission time cannot change");
    }
    ValidateCallbackResult::Valid
}

fn validate_recipe(r: &RecipeEntry) -> ValidateCallbackResult {
    if r.recipe_id.is_empty() {
        return invalid("Recipe ID is required");
    }
    if !name_is_normalized(&r.name) {
        return invalid("Recipe name must be trimmed and 1-200 characters");
    }
    ValidateCallbackResult::Valid
}

fn validate_meal_request(m: &MealRequestEntry) -> ValidateCallbackResult {
    if m.request_id.is_empty() || m.patient_id.is_empty() {
        return invalid("Meal request and patient IDs are required");
    }
    let finalized = m.status == MealRequestStatus::Finalized;
    if finalized != m.finalized_at.is_some() {
        return invalid("Finalization time is set exactly when a request is finalized");
    }
    let rejected = m.status == MealRequestStatus::Rejected;
    if rejected != m.rejection_reason.is_some() {
        return invalid("Rejection reason is set exactly when a request is rejected");
    }
    ValidateCallbackResult::Valid
}

fn validate_request_item(i: &RequestItemEntry) -> ValidateCallbackResult {
    if i.item_id.is_empty() || i.request_id.is_empty() || i.recipe_id.is_empty() {
        return invalid("Item, request and recipe IDs are required");
    }
    if i.quantity == 0 {
        return invalid("Quantity must be positive");
    }
    ValidateCallbackResult::Valid
}

/// A status' stamp is set exactly when the tray has reached that status
fn validate_tray_stamps(t: &TrayEntry) -> ValidateCallbackResult {
    let reached = t.status.position();
    for (status, stamp) in t.stamps() {
        if stamp.is_some() != (status.position() <= reached) {
            return ValidateCallbackResult::Invalid(format!(
                "Tray at {} has an inconsistent {} timestamp",
                t.status, status
            ));
        }
    }
    ValidateCallbackResult::Valid
}

fn validate_new_tray(t: &TrayEntry) -> ValidateCallbackResult {
    if t.tray_id.is_empty() || t.request_id.is_empty() {
        return invalid("Tray and request IDs are required");
    }
    if t.status != TrayStatus::PreparationStarted {
        return invalid("Trays start at Preparation Started");
    }
    validate_tray_stamps(t)
}

fn validate_tray_step(previous: &TrayEntry, updated: &TrayEntry) -> ValidateCallbackResult {
    if updated.tray_id != previous.tray_id
        || updated.request_id != previous.request_id
        || updated.created_at != previous.created_at
    {
        return invalid("Tray identity cannot change");
    }
    if previous.status.next() != Some(updated.status) {
        return ValidateCallbackResult::Invalid(format!(
            "Tray can only move one step from {}",
            previous.status
        ));
    }
    let kept = previous
        .stamps()
        .into_iter()
        .zip(updated.stamps())
        .all(|((_, before), (_, after))| before.is_none() || before == after);
    if !kept {
        return invalid("Tray timestamps are written once");
    }
    validate_tray_stamps(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(minutes: i64) -> Timestamp {
        Timestamp::from_micros(1_700_000_000_000_000 + minutes * 60_000_000)
    }

    fn tray() -> TrayEntry {
        TrayEntry {
            tray_id: "tray-1".into(),
            request_id: "req-1".into(),
            status: TrayStatus::PreparationStarted,
            accuracy_validated_at: None,
            en_route_at: None,
            delivered_at: None,
            retrieved_at: None,
            created_at: ts(0),
        }
    }

    fn patient() -> PatientEntry {
        PatientEntry {
            patient_id: "pat-1".into(),
            name: "Alice Johnson".into(),
            room_number: Some("12A".into()),
            diet_order: DietOrder::Regular,
            allergies: BTreeSet::new(),
            clinical_state: ClinicalState::Stable,
            admitted_at: ts(0),
            updated_at: ts(0),
        }
    }

    #[test]
    fn test_new_tray_must_start_clean() {
        assert_eq!(validate_new_tray(&tray()), ValidateCallbackResult::Valid);

        let mut stamped = tray();
        stamped.en_route_at = Some(ts(1));
        assert!(matches!(validate_new_tray(&stamped), ValidateCallbackResult::Invalid(_)));

        let mut skipped = tray();
        skipped.status = TrayStatus::Delivered;
        assert!(matches!(validate_new_tray(&skipped), ValidateCallbackResult::Invalid(_)));
    }

    #[test]
    fn test_tray_moves_exactly_one_step() {
        let before = tray();
        let mut after = before.clone();
        after.status = TrayStatus::AccuracyValidated;
        after.accuracy_validated_at = Some(ts(1));
        assert_eq!(validate_tray_step(&before, &after), ValidateCallbackResult::Valid);

        let mut jump = after.clone();
        jump.status = TrayStatus::EnRoute;
        jump.en_route_at = Some(ts(2));
        assert!(matches!(validate_tray_step(&before, &jump), ValidateCallbackResult::Invalid(_)));
    }

    #[test]
    fn test_tray_stamp_cannot_be_rewritten() {
        let mut before = tray();
        before.status = TrayStatus::AccuracyValidated;
        before.accuracy_validated_at = Some(ts(1));

        let mut after = before.clone();
        after.status = TrayStatus::EnRoute;
        after.en_route_at = Some(ts(2));
        after.accuracy_validated_at = Some(ts(5));
        assert!(matches!(validate_tray_step(&before, &after), ValidateCallbackResult::Invalid(_)));
    }

    #[test]
    fn test_retrieved_tray_is_final() {
        let mut done = tray();
        done.status = TrayStatus::Retrieved;
        done.accuracy_validated_at = Some(ts(1));
        done.en_route_at = Some(ts(2));
        done.delivered_at = Some(ts(3));
        done.retrieved_at = Some(ts(4));
        assert_eq!(validate_tray_stamps(&done), ValidateCallbackResult::Valid);
        assert!(matches!(
            validate_tray_step(&done, &done.clone()),
            ValidateCallbackResult::Invalid(_)
        ));
    }

    #[test]
    fn test_patient_field_rules() {
        assert_eq!(validate_patient(&patient()), ValidateCallbackResult::Valid);

        let mut padded = patient();
        padded.name = " Alice ".into();
        assert!(matches!(validate_patient(&padded), ValidateCallbackResult::Invalid(_)));

        let mut blank_room = patient();
        blank_room.room_number = Some("  ".into());
        assert!(matches!(validate_patient(&blank_room), ValidateCallbackResult::Invalid(_)));
    }

    #[test]
    fn test_patient_identity_is_fixed() {
        let previous = patient();
        let mut updated = previous.clone();
        updated.diet_order = DietOrder::Renal;
        updated.updated_at = ts(10);
        assert_eq!(validate_patient_update(&previous, &updated), ValidateCallbackResult::Valid);

        updated.patient_id = "pat-2".into();
        assert!(matches!(
            validate_patient_update(&previous, &updated),
            ValidateCallbackResult::Invalid(_)
        ));
    }

    #[test]
    fn test_request_status_fields_agree() {
        let finalized = MealRequestEntry {
            request_id: "req-1".into(),
            patient_id: "pat-1".into(),
            status: MealRequestStatus::Finalized,
            rejection_reason: None,
            finalized_at: Some(ts(1)),
            created_at: ts(1),
        };
        assert_eq!(validate_meal_request(&finalized), ValidateCallbackResult::Valid);

        let mut half_rejected = finalized.clone();
        half_rejected.status = MealRequestStatus::Rejected;
        assert!(matches!(
            validate_meal_request(&half_rejected),
            ValidateCallbackResult::Invalid(_)
        ));
    }
}
