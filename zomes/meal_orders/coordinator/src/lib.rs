//! Meal Orders Coordinator Zome
//!
//! Zome functions for patient admission, the recipe catalog, safety-checked
//! meal requests and kitchen tray tracking. Each call runs the shared
//! meal-ordering service over the source chain; a failed call commits
//! nothing.

use hdk::prelude::*;
use mealflow_core::{
    FixedClock, MealRequest, MealRequestId, MealRequestView, Mealflow, MealflowError, NewPatient,
    NewRecipe, Patient, PatientId, PatientPatch, Recipe, RecipeId, RequestItemView, TrayId,
    TrayView,
};
use mealflow_shared::call_time;

mod chain;

pub use chain::ChainStore;

/// Input for updating a patient
#[derive(Serialize, Deserialize, Debug)]
pub struct UpdatePatientInput {
    pub patient_id: PatientId,
    pub patch: PatientPatch,
}

/// Input for placing a meal request
#[derive(Serialize, Deserialize, Debug)]
pub struct CreateMealRequestInput {
    pub patient_id: PatientId,
    pub recipe_ids: Vec<RecipeId>,
}

fn service() -> ExternResult<Mealflow<ChainStore, FixedClock>> {
    Ok(Mealflow::new(ChainStore, FixedClock(call_time()?)))
}

/// Callers see the error kind and its public message, never storage detail
fn guest_error(err: MealflowError) -> WasmError {
    wasm_error!(WasmErrorInner::Guest(format!(
        "{}: {}",
        err.kind(),
        err.public_message()
    )))
}

// ============================================================================
// Patients
// ============================================================================

#[hdk_extern]
pub fn create_patient(input: NewPatient) -> ExternResult<Patient> {
    service()?.create_patient(input).map_err(guest_error)
}

#[hdk_extern]
pub fn update_patient(input: UpdatePatientInput) -> ExternResult<Patient> {
    service()?
        .update_patient(&input.patient_id, input.patch)
        .map_err(guest_error)
}

#[hdk_extern]
pub fn list_patients(_: ()) -> ExternResult<Vec<Patient>> {
    service()?.list_patients().map_err(guest_error)
}

// ============================================================================
// Recipes
// ============================================================================

#[hdk_extern]
pub fn create_recipe(input: NewRecipe) -> ExternResult<Recipe> {
    service()?.create_recipe(input).map_err(guest_error)
}

#[hdk_extern]
pub fn list_recipes(_: ()) -> ExternResult<Vec<Recipe>> {
    service()?.list_recipes().map_err(guest_error)
}

// ============================================================================
// Meal requests
// ============================================================================

/// Validate the selection against the patient and, when safe, place the
/// request together with its items and tray
#[hdk_extern]
pub fn create_meal_request(input: CreateMealRequestInput) -> ExternResult<MealRequest> {
    service()?
        .create_meal_request(&input.patient_id, &input.recipe_ids)
        .map_err(guest_error)
}

#[hdk_extern]
pub fn list_meal_requests(_: ()) -> ExternResult<Vec<MealRequestView>> {
    service()?.list_meal_requests().map_err(guest_error)
}

#[hdk_extern]
pub fn list_request_items(request_id: MealRequestId) -> ExternResult<Vec<RequestItemView>> {
    service()?
        .list_request_items(&request_id)
        .map_err(guest_error)
}

// ============================================================================
// Trays
// ============================================================================

#[hdk_extern]
pub fn list_trays(_: ()) -> ExternResult<Vec<TrayView>> {
    service()?.list_trays().map_err(guest_error)
}

#[hdk_extern]
pub fn advance_tray(tray_id: TrayId) -> ExternResult<TrayView> {
    service()?.advance_tray(&tray_id).map_err(guest_error)
}
