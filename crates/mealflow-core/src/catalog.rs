//! Patients and recipes: the reference data meal requests are checked against.

use crate::error::MealflowError;
use crate::model::{NewPatient, NewRecipe, Patient, PatientId, PatientPatch, Recipe};
use crate::service::Mealflow;
use crate::store::{Clock, Store};

impl<S: Store, C: Clock> Mealflow<S, C> {
    /// All patients, most recently updated first
    pub fn list_patients(&self) -> Result<Vec<Patient>, MealflowError> {
        self.read_unit("list_patients", |repos| Ok(repos.list_patients()?))
    }

    /// Admit a patient
    pub fn create_patient(&self, input: NewPatient) -> Result<Patient, MealflowError> {
        let draft = input
            .into_draft(self.clock.now())
            .map_err(|e| e.logged("create_patient"))?;
        let patient = self.unit("create_patient", |repos| Ok(repos.insert_patient(draft)?))?;
        tracing::info!(patient_id = %patient.id, diet_order = %patient.diet_order, "patient admitted");
        Ok(patient)
    }

    /// Apply a partial update restricted to the mutable patient fields.
    ///
    /// The patched record goes through the admission field rules again and
    /// `updated_at` moves to now.
    pub fn update_patient(
        &self,
        id: &PatientId,
        patch: PatientPatch,
    ) -> Result<Patient, MealflowError> {
        if patch.is_empty() {
            return Err(MealflowError::input("No valid fields to update").logged("update_patient"));
        }
        let now = self.clock.now();
        self.unit("update_patient", |repos| {
            let mut patient = repos
                .find_patient(id)?
                .ok_or_else(|| MealflowError::not_found("Patient"))?;
            patch.apply(&mut patient, now)?;
            repos.save_patient(&patient)?;
            Ok(patient)
        })
    }

    pub fn list_recipes(&self) -> Result<Vec<Recipe>, MealflowError> {
        self.read_unit("list_recipes", |repos| Ok(repos.list_recipes()?))
    }

    /// Add a recipe to the catalog
    pub fn create_recipe(&self, input: NewRecipe) -> Result<Recipe, MealflowError> {
        let draft = input
            .into_draft(self.clock.now())
            .map_err(|e| e.logged("create_recipe"))?;
        let recipe = self.unit("create_recipe", |repos| Ok(repos.insert_recipe(draft)?))?;
        tracing::info!(recipe_id = %recipe.id, name = %recipe.name, "recipe added");
        Ok(recipe)
    }
}
