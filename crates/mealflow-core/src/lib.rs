//! Mealflow Core - Clinical Meal Ordering
//!
//! Patients with diet orders and allergies, a recipe catalog, safety-checked
//! meal requests and the kitchen trays that carry them to the bedside.
//!
//! # Features
//!
//! - Allergen and diet-tag validation that reports every violation at once
//! - Atomic creation of a finalized request, its items and its tray
//! - A one-way tray lifecycle where each status is stamped exactly once
//! - Storage behind repository traits, with a bundled SQLite backend
//!
//! # Example
//!
//! ```rust
//! use mealflow_core::{Allergen, Mealflow, NewPatient, NewRecipe, SqliteStore, SystemClock};
//!
//! let store = SqliteStore::open_in_memory().unwrap();
//! let service = Mealflow::new(store, SystemClock);
//!
//! let mut admission = NewPatient::named("Alice Johnson");
//! admission.allergies.insert(Allergen::Peanuts);
//! let patient = service.create_patient(admission).unwrap();
//!
//! let mut satay = NewRecipe { name: "Chicken Satay".into(), ..Default::default() };
//! satay.allergens.insert(Allergen::Peanuts);
//! let satay = service.create_recipe(satay).unwrap();
//!
//! let err = service.create_meal_request(&patient.id, &[satay.id]).unwrap_err();
//! assert_eq!(err.to_string(), "\"Chicken Satay\" contains Peanuts (patient allergy)");
//! ```

pub mod config;
pub mod error;
pub mod model;
pub mod safety;
pub mod service;
pub mod store;

mod catalog;
mod requests;
mod trays;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use config::{RejectionPolicy, ServiceConfig};
pub use error::{MealflowError, StoreError, INTERNAL_ERROR_MESSAGE};
pub use model::{
    Allergen, ClinicalState, DietOrder, MealRequest, MealRequestId, MealRequestStatus,
    MealRequestView, NewPatient, NewRecipe, Patient, PatientId, PatientPatch, Recipe, RecipeId,
    RequestItem, RequestItemId, RequestItemView, Tray, TrayId, TrayStatus, TrayView,
};
pub use service::Mealflow;
pub use store::{Clock, FixedClock, Repositories, Store};

#[cfg(feature = "native")]
pub use store::SystemClock;

#[cfg(feature = "sqlite")]
pub use config::SqliteConfig;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
