//! Meal requests: the safety-checked create transaction and its read side.

use std::collections::{HashMap, HashSet};

use crate::config::RejectionPolicy;
use crate::error::MealflowError;
use crate::model::{
    MealRequest, MealRequestDraft, MealRequestId, MealRequestView, PatientId, Recipe, RecipeId,
    RequestItemDraft, RequestItemView, TrayDraft,
};
use crate::safety;
use crate::service::Mealflow;
use crate::store::{Clock, Repositories, Store};

enum Outcome {
    Finalized(MealRequest),
    Recorded(Vec<String>),
}

impl<S: Store, C: Clock> Mealflow<S, C> {
    /// Every meal request with its patient, newest first
    pub fn list_meal_requests(&self) -> Result<Vec<MealRequestView>, MealflowError> {
        self.read_unit("list_meal_requests", |repos| Ok(repos.list_meal_requests()?))
    }

    /// The items of one request with their recipes
    pub fn list_request_items(
        &self,
        request_id: &MealRequestId,
    ) -> Result<Vec<RequestItemView>, MealflowError> {
        self.read_unit("list_request_items", |repos| {
            repos
                .find_meal_request(request_id)?
                .ok_or_else(|| MealflowError::not_found("Meal request"))?;
            Ok(repos.list_request_items(request_id)?)
        })
    }

    /// Check the selected recipes against the patient and, when they are safe,
    /// write the finalized request, one item per submitted recipe id and the
    /// kitchen tray as a single unit.
    ///
    /// Unsafe selections fail with `Validation`. Under
    /// [`RejectionPolicy::Record`] the rejected request and its items are kept
    /// before the error is returned; no tray is created for them either way.
    pub fn create_meal_request(
        &self,
        patient_id: &PatientId,
        recipe_ids: &[RecipeId],
    ) -> Result<MealRequest, MealflowError> {
        if recipe_ids.is_empty() {
            return Err(MealflowError::input("At least one recipe must be selected")
                .logged("create_meal_request"));
        }
        let now = self.clock.now();
        let policy = self.config.rejection_policy;

        let outcome = self.unit("create_meal_request", |repos| {
            let patient = repos
                .find_patient(patient_id)?
                .ok_or_else(|| MealflowError::not_found("Patient"))?;
            let recipes = resolve_recipes(repos, recipe_ids)?;

            let violations = safety::validate(&patient, &recipes);
            if !violations.is_empty() {
                tracing::warn!(
                    patient_id = %patient.id,
                    violations = violations.len(),
                    ?policy,
                    "meal request failed safety validation"
                );
                return match policy {
                    RejectionPolicy::Discard => Err(MealflowError::Validation { violations }),
                    RejectionPolicy::Record => {
                        let draft = MealRequestDraft::rejected(
                            patient.id.clone(),
                            violations.join("; "),
                            now,
                        );
                        let request = repos.insert_meal_request(draft)?;
                        insert_items(repos, &request.id, recipe_ids)?;
                        Ok(Outcome::Recorded(violations))
                    }
                };
            }

            let request =
                repos.insert_meal_request(MealRequestDraft::finalized(patient.id.clone(), now))?;
            insert_items(repos, &request.id, recipe_ids)?;
            let tray = repos.insert_tray(TrayDraft {
                request_id: request.id.clone(),
                created_at: now,
            })?;
            tracing::info!(
                request_id = %request.id,
                tray_id = %tray.id,
                items = recipe_ids.len(),
                "meal request finalized"
            );
            Ok(Outcome::Finalized(request))
        })?;

        match outcome {
            Outcome::Finalized(request) => Ok(request),
            Outcome::Recorded(violations) => Err(MealflowError::Validation { violations }),
        }
    }
}

/// Load the recipes behind `ids`, distinct and in first-occurrence order.
///
/// Any id without a recipe fails the whole request.
fn resolve_recipes(
    repos: &dyn Repositories,
    ids: &[RecipeId],
) -> Result<Vec<Recipe>, MealflowError> {
    let mut seen = HashSet::new();
    let distinct: Vec<RecipeId> = ids.iter().filter(|id| seen.insert(*id)).cloned().collect();

    let mut found: HashMap<RecipeId, Recipe> = repos
        .find_recipes(&distinct)?
        .into_iter()
        .map(|recipe| (recipe.id.clone(), recipe))
        .collect();

    let missing: Vec<&str> = distinct
        .iter()
        .filter(|id| !found.contains_key(*id))
        .map(RecipeId::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(MealflowError::input(format!(
            "Unknown recipe id(s): {}",
            missing.join(", ")
        )));
    }

    Ok(distinct
        .iter()
        .filter_map(|id| found.remove(id))
        .collect())
}

fn insert_items(
    repos: &dyn Repositories,
    request_id: &MealRequestId,
    recipe_ids: &[RecipeId],
) -> Result<(), MealflowError> {
    for recipe_id in recipe_ids {
        repos.insert_request_item(RequestItemDraft::single(request_id.clone(), recipe_id.clone()))?;
    }
    Ok(())
}
