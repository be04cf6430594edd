//! SQLite backend.
//!
//! One writer connection behind a mutex; every unit of work is a rusqlite
//! `Transaction`, which rolls back when dropped without a commit. Fixed
//! vocabularies are stored as their display text, sets as JSON arrays and
//! timestamps as RFC 3339 text.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::config::SqliteConfig;
use crate::error::StoreError;
use crate::model::{
    MealRequest, MealRequestDraft, MealRequestId, MealRequestView, Patient, PatientDraft,
    PatientId, Recipe, RecipeDraft, RecipeId, RequestItem, RequestItemDraft, RequestItemId,
    RequestItemView, Tray, TrayDraft, TrayId, TrayView,
};
use crate::store::{
    MealRequestRepository, PatientRepository, RecipeRepository, Repositories, Store,
    TrayRepository,
};

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS patients (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL CHECK (length(name) BETWEEN 1 AND 200),
  room_number TEXT CHECK (room_number IS NULL OR length(room_number) <= 50),
  diet_order TEXT NOT NULL,
  allergies TEXT NOT NULL DEFAULT '[]',
  clinical_state TEXT NOT NULL,
  admitted_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS recipes (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL CHECK (length(name) BETWEEN 1 AND 200),
  description TEXT,
  allergens TEXT NOT NULL DEFAULT '[]',
  diet_tags TEXT NOT NULL DEFAULT '[]',
  created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS meal_requests (
  id TEXT PRIMARY KEY,
  patient_id TEXT NOT NULL REFERENCES patients(id),
  status TEXT NOT NULL CHECK (status IN ('Draft', 'Validated', 'Rejected', 'Finalized')),
  rejection_reason TEXT,
  finalized_at TEXT,
  created_at TEXT NOT NULL,
  CHECK ((status = 'Finalized') = (finalized_at IS NOT NULL))
);
CREATE TABLE IF NOT EXISTS request_items (
  id TEXT PRIMARY KEY,
  request_id TEXT NOT NULL REFERENCES meal_requests(id),
  recipe_id TEXT NOT NULL REFERENCES recipes(id),
  quantity INTEGER NOT NULL CHECK (quantity > 0)
);
CREATE INDEX IF NOT EXISTS request_items_request_idx ON request_items(request_id);
CREATE TABLE IF NOT EXISTS trays (
  id TEXT PRIMARY KEY,
  request_id TEXT NOT NULL UNIQUE REFERENCES meal_requests(id),
  status TEXT NOT NULL CHECK (status IN (
    'Preparation Started', 'Accuracy Validated', 'En Route', 'Delivered', 'Retrieved'
  )),
  accuracy_validated_at TEXT,
  en_route_at TEXT,
  delivered_at TEXT,
  retrieved_at TEXT,
  created_at TEXT NOT NULL
);
";

const PATIENT_COLUMNS: &str = "p.id, p.name, p.room_number, p.diet_order, p.allergies, \
     p.clinical_state, p.admitted_at, p.updated_at";

const RECIPE_COLUMNS: &str =
    "r.id, r.name, r.description, r.allergens, r.diet_tags, r.created_at";

const REQUEST_COLUMNS: &str =
    "m.id, m.patient_id, m.status, m.rejection_reason, m.finalized_at, m.created_at";
const REQUEST_WIDTH: usize = 6;

const TRAY_COLUMNS: &str = "t.id, t.request_id, t.status, t.accuracy_validated_at, \
     t.en_route_at, t.delivered_at, t.retrieved_at, t.created_at";
const TRAY_WIDTH: usize = 8;

const ITEM_COLUMNS: &str = "i.id, i.request_id, i.recipe_id, i.quantity";
const ITEM_WIDTH: usize = 4;

/// Idle read-only connections kept for reuse
const MAX_IDLE_READERS: usize = 4;

/// Meal-ordering data in a single SQLite database.
///
/// Writes go through one connection. A file database also serves read-only
/// units from a small pool of separate connections; in WAL mode those
/// readers see the last commit and never wait on each other or on the
/// writer. A private in-memory database has no second connection to offer,
/// so its reads share the writer.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    readers: Option<ReaderPool>,
}

struct ReaderPool {
    path: PathBuf,
    busy_timeout: Duration,
    idle: Mutex<Vec<Connection>>,
}

impl ReaderPool {
    fn checkout(&self) -> Result<Connection, StoreError> {
        if let Some(conn) = lock(&self.idle).pop() {
            return Ok(conn);
        }
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = lock(&self.idle);
        if idle.len() < MAX_IDLE_READERS {
            idle.push(conn);
        }
    }
}

/// A unit that panicked has already rolled back when its guard is dropped,
/// so a poisoned lock still guards a consistent connection.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SqliteStore {
    pub fn open(config: &SqliteConfig) -> Result<Self, StoreError> {
        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(config.busy_timeout)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::debug!(
            path = %config.path.display(),
            journal_mode = %mode,
            "opened sqlite database"
        );
        let readers = ReaderPool {
            path: config.path.clone(),
            busy_timeout: config.busy_timeout,
            idle: Mutex::new(Vec::new()),
        };
        Self::with_connection(conn, Some(readers))
    }

    /// A private database that disappears with the store
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, readers: Option<ReaderPool>) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
            readers,
        })
    }
}

impl Store for SqliteStore {
    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn Repositories) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = lock(&self.conn);
        let tx = conn.transaction().map_err(StoreError::from)?;
        let value = work(&SqliteScope { conn: &tx })?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    fn read<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn Repositories) -> Result<T, E>,
        E: From<StoreError>,
    {
        let Some(readers) = &self.readers else {
            return self.atomically(work);
        };
        let mut conn = readers.checkout()?;
        let value = {
            let tx = conn.transaction().map_err(StoreError::from)?;
            work(&SqliteScope { conn: &tx })?
        };
        readers.checkin(conn);
        Ok(value)
    }
}

/// Repositories bound to the connection of one open transaction
struct SqliteScope<'c> {
    conn: &'c Connection,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(entity: &'static str, text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|e| StoreError::corrupt(entity, e.to_string()))
}

fn parse<T>(entity: &'static str, text: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    text.parse()
        .map_err(|e: T::Err| StoreError::corrupt(entity, e.to_string()))
}

// ============================================================================
// Raw rows
// ============================================================================
//
// rusqlite row closures can only fail with rusqlite errors, so rows are read
// as plain columns first and parsed into the model afterwards.

struct PatientRow {
    id: String,
    name: String,
    room_number: Option<String>,
    diet_order: String,
    allergies: String,
    clinical_state: String,
    admitted_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PatientRow {
    fn read(row: &Row<'_>, at: usize) -> rusqlite::Result<Self> {
        Ok(PatientRow {
            id: row.get(at)?,
            name: row.get(at + 1)?,
            room_number: row.get(at + 2)?,
            diet_order: row.get(at + 3)?,
            allergies: row.get(at + 4)?,
            clinical_state: row.get(at + 5)?,
            admitted_at: row.get(at + 6)?,
            updated_at: row.get(at + 7)?,
        })
    }

    fn into_model(self) -> Result<Patient, StoreError> {
        Ok(Patient {
            id: PatientId::new(self.id),
            name: self.name,
            room_number: self.room_number,
            diet_order: parse("patient", &self.diet_order)?,
            allergies: from_json("patient", &self.allergies)?,
            clinical_state: parse("patient", &self.clinical_state)?,
            admitted_at: self.admitted_at,
            updated_at: self.updated_at,
        })
    }
}

struct RecipeRow {
    id: String,
    name: String,
    description: Option<String>,
    allergens: String,
    diet_tags: String,
    created_at: DateTime<Utc>,
}

impl RecipeRow {
    fn read(row: &Row<'_>, at: usize) -> rusqlite::Result<Self> {
        Ok(RecipeRow {
            id: row.get(at)?,
            name: row.get(at + 1)?,
            description: row.get(at + 2)?,
            allergens: row.get(at + 3)?,
            diet_tags: row.get(at + 4)?,
            created_at: row.get(at + 5)?,
        })
    }

    fn into_model(self) -> Result<Recipe, StoreError> {
        Ok(Recipe {
            id: RecipeId::new(self.id),
            name: self.name,
            description: self.description,
            allergens: from_json("recipe", &self.allergens)?,
            diet_tags: from_json("recipe", &self.diet_tags)?,
            created_at: self.created_at,
        })
    }
}

struct RequestRow {
    id: String,
    patient_id: String,
    status: String,
    rejection_reason: Option<String>,
    finalized_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl RequestRow {
    fn read(row: &Row<'_>, at: usize) -> rusqlite::Result<Self> {
        Ok(RequestRow {
            id: row.get(at)?,
            patient_id: row.get(at + 1)?,
            status: row.get(at + 2)?,
            rejection_reason: row.get(at + 3)?,
            finalized_at: row.get(at + 4)?,
            created_at: row.get(at + 5)?,
        })
    }

    fn into_model(self) -> Result<MealRequest, StoreError> {
        Ok(MealRequest {
            id: MealRequestId::new(self.id),
            patient_id: PatientId::new(self.patient_id),
            status: parse("meal request", &self.status)?,
            rejection_reason: self.rejection_reason,
            finalized_at: self.finalized_at,
            created_at: self.created_at,
        })
    }
}

struct ItemRow {
    id: String,
    request_id: String,
    recipe_id: String,
    quantity: i64,
}

impl ItemRow {
    fn read(row: &Row<'_>, at: usize) -> rusqlite::Result<Self> {
        Ok(ItemRow {
            id: row.get(at)?,
            request_id: row.get(at + 1)?,
            recipe_id: row.get(at + 2)?,
            quantity: row.get(at + 3)?,
        })
    }

    fn into_model(self) -> Result<RequestItem, StoreError> {
        let quantity = u32::try_from(self.quantity)
            .ok()
            .filter(|quantity| *quantity > 0)
            .ok_or_else(|| {
                StoreError::corrupt("request item", format!("quantity {}", self.quantity))
            })?;
        Ok(RequestItem {
            id: RequestItemId::new(self.id),
            request_id: MealRequestId::new(self.request_id),
            recipe_id: RecipeId::new(self.recipe_id),
            quantity,
        })
    }
}

struct TrayRow {
    id: String,
    request_id: String,
    status: String,
    accuracy_validated_at: Option<DateTime<Utc>>,
    en_route_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    retrieved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TrayRow {
    fn read(row: &Row<'_>, at: usize) -> rusqlite::Result<Self> {
        Ok(TrayRow {
            id: row.get(at)?,
            request_id: row.get(at + 1)?,
            status: row.get(at + 2)?,
            accuracy_validated_at: row.get(at + 3)?,
            en_route_at: row.get(at + 4)?,
            delivered_at: row.get(at + 5)?,
            retrieved_at: row.get(at + 6)?,
            created_at: row.get(at + 7)?,
        })
    }

    fn into_model(self) -> Result<Tray, StoreError> {
        Ok(Tray {
            id: TrayId::new(self.id),
            request_id: MealRequestId::new(self.request_id),
            status: parse("tray", &self.status)?,
            accuracy_validated_at: self.accuracy_validated_at,
            en_route_at: self.en_route_at,
            delivered_at: self.delivered_at,
            retrieved_at: self.retrieved_at,
            created_at: self.created_at,
        })
    }
}

type TrayViewRow = (TrayRow, RequestRow, PatientRow);

fn read_tray_view(row: &Row<'_>) -> rusqlite::Result<TrayViewRow> {
    Ok((
        TrayRow::read(row, 0)?,
        RequestRow::read(row, TRAY_WIDTH)?,
        PatientRow::read(row, TRAY_WIDTH + REQUEST_WIDTH)?,
    ))
}

fn tray_view((tray, request, patient): TrayViewRow) -> Result<TrayView, StoreError> {
    Ok(TrayView {
        tray: tray.into_model()?,
        request: request.into_model()?,
        patient: patient.into_model()?,
    })
}

fn tray_view_query(filter: &str) -> String {
    format!(
        "SELECT {TRAY_COLUMNS}, {REQUEST_COLUMNS}, {PATIENT_COLUMNS}
         FROM trays t
         JOIN meal_requests m ON m.id = t.request_id
         JOIN patients p ON p.id = m.patient_id
         {filter}"
    )
}

// ============================================================================
// Repositories
// ============================================================================

impl PatientRepository for SqliteScope<'_> {
    fn list_patients(&self) -> Result<Vec<Patient>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PATIENT_COLUMNS} FROM patients p ORDER BY p.updated_at DESC, p.rowid DESC"
        ))?;
        let rows = stmt
            .query_map([], |row| PatientRow::read(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(PatientRow::into_model).collect()
    }

    fn find_patient(&self, id: &PatientId) -> Result<Option<Patient>, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT {PATIENT_COLUMNS} FROM patients p WHERE p.id = ?1"),
                params![id.as_str()],
                |row| PatientRow::read(row, 0),
            )
            .optional()?
            .map(PatientRow::into_model)
            .transpose()
    }

    fn insert_patient(&self, draft: PatientDraft) -> Result<Patient, StoreError> {
        let patient = draft.into_record(PatientId::new(new_id()));
        self.conn.execute(
            "INSERT INTO patients (
               id, name, room_number, diet_order, allergies, clinical_state, admitted_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                patient.id.as_str(),
                patient.name,
                patient.room_number,
                patient.diet_order.as_str(),
                to_json(&patient.allergies)?,
                patient.clinical_state.as_str(),
                patient.admitted_at,
                patient.updated_at,
            ],
        )?;
        Ok(patient)
    }

    fn save_patient(&self, patient: &Patient) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE patients
             SET name = ?2, room_number = ?3, diet_order = ?4, allergies = ?5,
                 clinical_state = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                patient.id.as_str(),
                patient.name,
                patient.room_number,
                patient.diet_order.as_str(),
                to_json(&patient.allergies)?,
                patient.clinical_state.as_str(),
                patient.updated_at,
            ],
        )?;
        if changed != 1 {
            return Err(StoreError::corrupt(
                "patient",
                format!("update of {} touched {changed} rows", patient.id),
            ));
        }
        Ok(())
    }
}

impl RecipeRepository for SqliteScope<'_> {
    fn list_recipes(&self) -> Result<Vec<Recipe>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes r ORDER BY r.name, r.rowid"
        ))?;
        let rows = stmt
            .query_map([], |row| RecipeRow::read(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RecipeRow::into_model).collect()
    }

    fn find_recipes(&self, ids: &[RecipeId]) -> Result<Vec<Recipe>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes r WHERE r.id IN ({placeholders})"
        ))?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter().map(RecipeId::as_str)), |row| {
                RecipeRow::read(row, 0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RecipeRow::into_model).collect()
    }

    fn insert_recipe(&self, draft: RecipeDraft) -> Result<Recipe, StoreError> {
        let recipe = draft.into_record(RecipeId::new(new_id()));
        self.conn.execute(
            "INSERT INTO recipes (id, name, description, allergens, diet_tags, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                recipe.id.as_str(),
                recipe.name,
                recipe.description,
                to_json(&recipe.allergens)?,
                to_json(&recipe.diet_tags)?,
                recipe.created_at,
            ],
        )?;
        Ok(recipe)
    }
}

impl MealRequestRepository for SqliteScope<'_> {
    fn list_meal_requests(&self) -> Result<Vec<MealRequestView>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REQUEST_COLUMNS}, {PATIENT_COLUMNS}
             FROM meal_requests m
             JOIN patients p ON p.id = m.patient_id
             ORDER BY m.created_at DESC, m.rowid DESC"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((RequestRow::read(row, 0)?, PatientRow::read(row, REQUEST_WIDTH)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(request, patient)| {
                Ok(MealRequestView {
                    request: request.into_model()?,
                    patient: patient.into_model()?,
                })
            })
            .collect()
    }

    fn find_meal_request(&self, id: &MealRequestId) -> Result<Option<MealRequest>, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM meal_requests m WHERE m.id = ?1"),
                params![id.as_str()],
                |row| RequestRow::read(row, 0),
            )
            .optional()?
            .map(RequestRow::into_model)
            .transpose()
    }

    fn insert_meal_request(&self, draft: MealRequestDraft) -> Result<MealRequest, StoreError> {
        let request = draft.into_record(MealRequestId::new(new_id()));
        self.conn.execute(
            "INSERT INTO meal_requests (
               id, patient_id, status, rejection_reason, finalized_at, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                request.id.as_str(),
                request.patient_id.as_str(),
                request.status.as_str(),
                request.rejection_reason,
                request.finalized_at,
                request.created_at,
            ],
        )?;
        Ok(request)
    }

    fn list_request_items(
        &self,
        request_id: &MealRequestId,
    ) -> Result<Vec<RequestItemView>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS}, {RECIPE_COLUMNS}
             FROM request_items i
             JOIN recipes r ON r.id = i.recipe_id
             WHERE i.request_id = ?1
             ORDER BY i.rowid"
        ))?;
        let rows = stmt
            .query_map(params![request_id.as_str()], |row| {
                Ok((ItemRow::read(row, 0)?, RecipeRow::read(row, ITEM_WIDTH)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(item, recipe)| {
                Ok(RequestItemView {
                    item: item.into_model()?,
                    recipe: recipe.into_model()?,
                })
            })
            .collect()
    }

    fn insert_request_item(&self, draft: RequestItemDraft) -> Result<RequestItem, StoreError> {
        let item = draft.into_record(RequestItemId::new(new_id()));
        self.conn.execute(
            "INSERT INTO request_items (id, request_id, recipe_id, quantity)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                item.id.as_str(),
                item.request_id.as_str(),
                item.recipe_id.as_str(),
                i64::from(item.quantity),
            ],
        )?;
        Ok(item)
    }
}

impl TrayRepository for SqliteScope<'_> {
    fn list_trays(&self) -> Result<Vec<TrayView>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&tray_view_query("ORDER BY t.created_at DESC, t.rowid DESC"))?;
        let rows = stmt
            .query_map([], read_tray_view)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(tray_view).collect()
    }

    fn find_tray(&self, id: &TrayId) -> Result<Option<Tray>, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT {TRAY_COLUMNS} FROM trays t WHERE t.id = ?1"),
                params![id.as_str()],
                |row| TrayRow::read(row, 0),
            )
            .optional()?
            .map(TrayRow::into_model)
            .transpose()
    }

    fn find_tray_view(&self, id: &TrayId) -> Result<Option<TrayView>, StoreError> {
        self.conn
            .query_row(
                &tray_view_query("WHERE t.id = ?1"),
                params![id.as_str()],
                read_tray_view,
            )
            .optional()?
            .map(tray_view)
            .transpose()
    }

    fn insert_tray(&self, draft: TrayDraft) -> Result<Tray, StoreError> {
        let tray = draft.into_record(TrayId::new(new_id()));
        self.conn.execute(
            "INSERT INTO trays (
               id, request_id, status, accuracy_validated_at, en_route_at,
               delivered_at, retrieved_at, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                tray.id.as_str(),
                tray.request_id.as_str(),
                tray.status.as_str(),
                tray.accuracy_validated_at,
                tray.en_route_at,
                tray.delivered_at,
                tray.retrieved_at,
                tray.created_at,
            ],
        )?;
        Ok(tray)
    }

    fn save_tray(&self, tray: &Tray) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE trays
             SET status = ?2, accuracy_validated_at = ?3, en_route_at = ?4,
                 delivered_at = ?5, retrieved_at = ?6
             WHERE id = ?1",
            params![
                tray.id.as_str(),
                tray.status.as_str(),
                tray.accuracy_validated_at,
                tray.en_route_at,
                tray.delivered_at,
                tray.retrieved_at,
            ],
        )?;
        if changed != 1 {
            return Err(StoreError::corrupt(
                "tray",
                format!("update of {} touched {changed} rows", tray.id),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Allergen, DietOrder, NewPatient, NewRecipe, TrayStatus};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
    }

    fn temp_config(label: &str) -> SqliteConfig {
        SqliteConfig {
            path: std::env::temp_dir().join(format!(
                "mealflow-{label}-{}-{}.db",
                std::process::id(),
                Utc::now().timestamp_nanos_opt().unwrap_or_default()
            )),
            ..Default::default()
        }
    }

    fn remove_database(config: &SqliteConfig) {
        for suffix in ["", "-wal", "-shm"] {
            let mut path = config.path.clone().into_os_string();
            path.push(suffix);
            let _ = std::fs::remove_file(path);
        }
    }

    fn seed(store: &SqliteStore) -> (Patient, Recipe, MealRequest) {
        store
            .atomically(|repos| {
                let mut admission = NewPatient::named("Ada Lovelace");
                admission.allergies.insert(Allergen::Eggs);
                let patient = repos.insert_patient(admission.into_draft(now()).unwrap())?;
                let mut soup = NewRecipe {
                    name: "Tomato Soup".into(),
                    ..Default::default()
                };
                soup.diet_tags.insert(DietOrder::Regular);
                let recipe = repos.insert_recipe(soup.into_draft(now()).unwrap())?;
                let request = repos
                    .insert_meal_request(MealRequestDraft::finalized(patient.id.clone(), now()))?;
                Ok::<_, StoreError>((patient, recipe, request))
            })
            .unwrap()
    }

    #[test]
    fn test_records_round_trip_through_columns() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (patient, recipe, request) = seed(&store);
        store
            .atomically(|repos| {
                assert_eq!(repos.find_patient(&patient.id)?, Some(patient.clone()));
                assert_eq!(repos.find_recipes(&[recipe.id.clone()])?, vec![recipe.clone()]);
                assert_eq!(repos.find_meal_request(&request.id)?, Some(request.clone()));
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn test_one_tray_per_request() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (_, _, request) = seed(&store);
        let draft = TrayDraft {
            request_id: request.id.clone(),
            created_at: now(),
        };
        store
            .atomically(|repos| repos.insert_tray(draft.clone()).map(|_| ()))
            .unwrap();
        let second = store.atomically(|repos| repos.insert_tray(draft.clone()).map(|_| ()));
        assert!(matches!(second, Err(StoreError::Sqlite(_))));
    }

    #[test]
    fn test_foreign_keys_are_enforced() {
        let store = SqliteStore::open_in_memory().unwrap();
        let orphan = store.atomically(|repos| {
            repos.insert_request_item(RequestItemDraft::single(
                MealRequestId::from("missing"),
                RecipeId::from("missing"),
            ))
        });
        assert!(matches!(orphan, Err(StoreError::Sqlite(_))));
    }

    #[test]
    fn test_failed_unit_rolls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result: Result<(), StoreError> = store.atomically(|repos| {
            repos.insert_recipe(
                NewRecipe {
                    name: "Porridge".into(),
                    ..Default::default()
                }
                .into_draft(now())
                .unwrap(),
            )?;
            Err(StoreError::Backend("abort".into()))
        });
        assert!(result.is_err());
        let recipes = store.atomically(|repos| repos.list_recipes()).unwrap();
        assert!(recipes.is_empty());
    }

    #[test]
    fn test_tray_stamps_persist() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (patient, _, request) = seed(&store);
        let view = store
            .atomically(|repos| {
                let mut tray = repos.insert_tray(TrayDraft {
                    request_id: request.id.clone(),
                    created_at: now(),
                })?;
                tray.advance(now() + chrono::Duration::minutes(5)).unwrap();
                repos.save_tray(&tray)?;
                repos.find_tray_view(&tray.id)
            })
            .unwrap()
            .unwrap();
        assert_eq!(view.tray.status, TrayStatus::AccuracyValidated);
        assert_eq!(
            view.tray.accuracy_validated_at,
            Some(now() + chrono::Duration::minutes(5))
        );
        assert_eq!(view.patient.id, patient.id);
        assert_eq!(view.request.id, request.id);
    }

    #[test]
    fn test_unknown_vocabulary_in_row_is_corrupt() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (patient, _, _) = seed(&store);
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "UPDATE patients SET diet_order = 'Keto' WHERE id = ?1",
                params![patient.id.as_str()],
            )
            .unwrap();
        }
        let err = store
            .atomically(|repos| repos.find_patient(&patient.id))
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { entity: "patient", .. }));
    }

    #[test]
    fn test_unopenable_path_is_a_sqlite_error() {
        let config = SqliteConfig {
            path: std::env::temp_dir()
                .join("mealflow-no-such-dir")
                .join("nested")
                .join("meals.db"),
            ..Default::default()
        };
        assert!(matches!(SqliteStore::open(&config), Err(StoreError::Sqlite(_))));
    }

    #[test]
    fn test_store_recovers_after_a_panicking_unit() {
        let store = SqliteStore::open_in_memory().unwrap();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<(), StoreError> = store.atomically(|repos| {
                repos.insert_recipe(
                    NewRecipe {
                        name: "Half-made Stew".into(),
                        ..Default::default()
                    }
                    .into_draft(now())
                    .unwrap(),
                )?;
                panic!("unit failed midway");
            });
        }));
        assert!(outcome.is_err());
        assert!(store.conn.is_poisoned());

        let recipes = store.atomically(|repos| repos.list_recipes()).unwrap();
        assert!(recipes.is_empty());
        seed(&store);
        assert_eq!(store.read(|repos| repos.list_recipes()).unwrap().len(), 1);
    }

    #[test]
    fn test_readers_do_not_wait_on_an_open_write() {
        let config = temp_config("readers");
        let store = SqliteStore::open(&config).unwrap();
        let (_, recipe, _) = seed(&store);

        {
            // Writer lock held with an uncommitted delete for the whole block
            let writer = lock(&store.conn);
            writer
                .execute_batch("BEGIN IMMEDIATE; DELETE FROM recipes;")
                .unwrap();

            let seen = store
                .read(|outer| {
                    let inner = store.read(|repos| repos.list_recipes())?;
                    assert_eq!(inner, outer.list_recipes()?);
                    Ok::<_, StoreError>(inner)
                })
                .unwrap();
            assert_eq!(seen, vec![recipe.clone()]);

            writer.execute_batch("ROLLBACK;").unwrap();
        }

        let write = store.read(|repos| {
            repos.insert_recipe(
                NewRecipe {
                    name: "Porridge".into(),
                    ..Default::default()
                }
                .into_draft(now())
                .unwrap(),
            )
        });
        assert!(matches!(write, Err(StoreError::Sqlite(_))));

        drop(store);
        remove_database(&config);
    }

    #[test]
    fn test_in_memory_reads_share_the_writer() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (_, recipe, _) = seed(&store);
        assert!(store.readers.is_none());
        assert_eq!(store.read(|repos| repos.list_recipes()).unwrap(), vec![recipe]);
    }
}
