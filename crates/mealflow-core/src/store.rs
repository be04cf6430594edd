//! Storage abstractions
//!
//! The domain services only ever see these traits:
//! - Repositories: row-level reads and writes per table
//! - Store: runs a closure as one unit of work that commits entirely or not at all,
//!   or as a read-only unit
//! - Clock: where "now" comes from
//!
//! Implementations live in the `sqlite` module and in the meal_orders zome.

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{
    MealRequest, MealRequestDraft, MealRequestId, MealRequestView, Patient, PatientDraft,
    PatientId, Recipe, RecipeDraft, RecipeId, RequestItem, RequestItemDraft, RequestItemView,
    Tray, TrayDraft, TrayId, TrayView,
};

pub trait PatientRepository {
    /// All patients, most recently updated first
    fn list_patients(&self) -> Result<Vec<Patient>, StoreError>;

    fn find_patient(&self, id: &PatientId) -> Result<Option<Patient>, StoreError>;

    fn insert_patient(&self, draft: PatientDraft) -> Result<Patient, StoreError>;

    /// Overwrite the mutable fields of an existing patient
    fn save_patient(&self, patient: &Patient) -> Result<(), StoreError>;
}

pub trait RecipeRepository {
    /// All recipes ordered by name
    fn list_recipes(&self) -> Result<Vec<Recipe>, StoreError>;

    /// The recipes that exist among `ids`, each at most once, in no particular order
    fn find_recipes(&self, ids: &[RecipeId]) -> Result<Vec<Recipe>, StoreError>;

    fn insert_recipe(&self, draft: RecipeDraft) -> Result<Recipe, StoreError>;
}

pub trait MealRequestRepository {
    /// All requests with their patients, newest first
    fn list_meal_requests(&self) -> Result<Vec<MealRequestView>, StoreError>;

    fn find_meal_request(&self, id: &MealRequestId) -> Result<Option<MealRequest>, StoreError>;

    fn insert_meal_request(&self, draft: MealRequestDraft) -> Result<MealRequest, StoreError>;

    /// Items of one request with their recipes, in insertion order
    fn list_request_items(&self, request_id: &MealRequestId)
        -> Result<Vec<RequestItemView>, StoreError>;

    fn insert_request_item(&self, draft: RequestItemDraft) -> Result<RequestItem, StoreError>;
}

pub trait TrayRepository {
    /// All trays with request and patient, newest first
    fn list_trays(&self) -> Result<Vec<TrayView>, StoreError>;

    fn find_tray(&self, id: &TrayId) -> Result<Option<Tray>, StoreError>;

    fn find_tray_view(&self, id: &TrayId) -> Result<Option<TrayView>, StoreError>;

    /// Create the single tray of a request
    fn insert_tray(&self, draft: TrayDraft) -> Result<Tray, StoreError>;

    /// Persist status and stamps of an existing tray
    fn save_tray(&self, tray: &Tray) -> Result<(), StoreError>;
}

/// Everything a unit of work can touch
pub trait Repositories:
    PatientRepository + RecipeRepository + MealRequestRepository + TrayRepository
{
}

impl<T> Repositories for T where
    T: PatientRepository + RecipeRepository + MealRequestRepository + TrayRepository
{
}

/// A persistence backend with an atomic-commit primitive
pub trait Store {
    /// Run `work` as one unit.
    ///
    /// When `work` returns `Ok` everything it wrote is committed. When it
    /// returns `Err`, or the commit itself fails, nothing it wrote survives.
    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn Repositories) -> Result<T, E>,
        E: From<StoreError>;

    /// Run `work` as a read-only unit.
    ///
    /// Backends that can serve readers side by side override this so that
    /// readers never wait on one another. Writes attempted here may fail.
    fn read<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn Repositories) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.atomically(work)
    }
}

impl<S: Store + ?Sized> Store for &S {
    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn Repositories) -> Result<T, E>,
        E: From<StoreError>,
    {
        (**self).atomically(work)
    }

    fn read<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn Repositories) -> Result<T, E>,
        E: From<StoreError>,
    {
        (**self).read(work)
    }
}

/// Source of the current time
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[cfg(feature = "native")]
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

#[cfg(feature = "native")]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
///
/// Holochain zome calls read the host time once and use it for the whole call.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}
