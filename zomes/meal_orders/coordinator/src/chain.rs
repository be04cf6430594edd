//! Source chain storage for the meal-ordering service.
//!
//! Every record is an entry found through an id anchor
//! (`patient:<id>`, `recipe:<id>`, `request:<id>`, `tray:<id>`) and listed
//! through an "all" anchor. Patients and trays are updated in place: each
//! update revises the newest version and is linked from the original create
//! action, so the newest update link names the current version.
//!
//! A zome call commits its writes only when it returns `Ok`, which makes the
//! whole call one unit of work.

use chrono::{DateTime, Utc};
use hdk::prelude::*;
use meal_orders_integrity::*;
use mealflow_core::model::{
    MealRequestDraft, PatientDraft, RecipeDraft, RequestItemDraft, TrayDraft,
};
use mealflow_core::store::{
    MealRequestRepository, PatientRepository, RecipeRepository, Repositories, Store,
    TrayRepository,
};
use mealflow_core::{
    MealRequest, MealRequestId, MealRequestView, Patient, PatientId, Recipe, RecipeId,
    RequestItem, RequestItemId, RequestItemView, StoreError, Tray, TrayId, TrayView,
};
use mealflow_shared::*;

const ALL_PATIENTS: &str = "all_patients";
const ALL_RECIPES: &str = "all_recipes";
const ALL_MEAL_REQUESTS: &str = "all_meal_requests";
const ALL_TRAYS: &str = "all_trays";

/// Repositories over this agent's source chain and the DHT
pub struct ChainStore;

impl Store for ChainStore {
    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn Repositories) -> Result<T, E>,
        E: From<StoreError>,
    {
        work(&ChainScope)
    }
}

struct ChainScope;

// ============================================================================
// Host call plumbing
// ============================================================================

trait HostResult<T> {
    fn host(self) -> Result<T, StoreError>;
}

impl<T> HostResult<T> for ExternResult<T> {
    fn host(self) -> Result<T, StoreError> {
        self.map_err(|e| StoreError::Backend(format!("{e:?}")))
    }
}

fn decode<T>(entity: &'static str, record: &Record) -> Result<T, StoreError>
where
    T: TryFrom<SerializedBytes, Error = SerializedBytesError>,
{
    record
        .entry()
        .to_app_option::<T>()
        .map_err(|e| StoreError::corrupt(entity, e.to_string()))?
        .ok_or_else(|| StoreError::corrupt(entity, "record carries no app entry"))
}

fn datetime(at: Timestamp) -> Result<DateTime<Utc>, StoreError> {
    to_datetime(at).host()
}

fn optional_datetime(at: Option<Timestamp>) -> Result<Option<DateTime<Utc>>, StoreError> {
    at.map(datetime).transpose()
}

fn lookup(kind: &str, id: &str, link_type: LinkTypes) -> Result<Option<ActionHash>, StoreError> {
    first_target(id_anchor(kind, id).host()?, link_type).host()
}

fn index_targets(anchor: &str, link_type: LinkTypes) -> Result<Vec<ActionHash>, StoreError> {
    let links = get_links(
        LinkQuery::try_new(anchor_hash(anchor).host()?, link_type).host()?,
        GetStrategy::default(),
    )
    .host()?;
    Ok(link_targets(links))
}

fn fetch(hash: ActionHash) -> Result<Option<Record>, StoreError> {
    get(hash, GetOptions::default()).host()
}

/// Create an entry, list it under `all_anchor` and make it findable by id
fn create_indexed(
    entry: EntryTypes,
    all_anchor: &str,
    all_link: LinkTypes,
    kind: &str,
    id: &str,
    id_link: LinkTypes,
) -> Result<ActionHash, StoreError> {
    let hash = create_entry(&entry).host()?;
    create_link(anchor_hash(all_anchor).host()?, hash.clone(), all_link, ()).host()?;
    create_link(id_anchor(kind, id).host()?, hash.clone(), id_link, ()).host()?;
    Ok(hash)
}

// ============================================================================
// Entry conversions
// ============================================================================

fn patient_entry(p: &Patient) -> PatientEntry {
    PatientEntry {
        patient_id: p.id.to_string(),
        name: p.name.clone(),
        room_number: p.room_number.clone(),
        diet_order: p.diet_order,
        allergies: p.allergies.clone(),
        clinical_state: p.clinical_state,
        admitted_at: to_timestamp(p.admitted_at),
        updated_at: to_timestamp(p.updated_at),
    }
}

fn patient_model(e: PatientEntry) -> Result<Patient, StoreError> {
    Ok(Patient {
        id: PatientId::new(e.patient_id),
        name: e.name,
        room_number: e.room_number,
        diet_order: e.diet_order,
        allergies: e.allergies,
        clinical_state: e.clinical_state,
        admitted_at: datetime(e.admitted_at)?,
        updated_at: datetime(e.updated_at)?,
    })
}

fn recipe_model(e: RecipeEntry) -> Result<Recipe, StoreError> {
    Ok(Recipe {
        id: RecipeId::new(e.recipe_id),
        name: e.name,
        description: e.description,
        allergens: e.allergens,
        diet_tags: e.diet_tags,
        created_at: datetime(e.created_at)?,
    })
}

fn request_model(e: MealRequestEntry) -> Result<MealRequest, StoreError> {
    Ok(MealRequest {
        id: MealRequestId::new(e.request_id),
        patient_id: PatientId::new(e.patient_id),
        status: e.status,
        rejection_reason: e.rejection_reason,
        finalized_at: optional_datetime(e.finalized_at)?,
        created_at: datetime(e.created_at)?,
    })
}

fn item_model(e: RequestItemEntry) -> RequestItem {
    RequestItem {
        id: RequestItemId::new(e.item_id),
        request_id: MealRequestId::new(e.request_id),
        recipe_id: RecipeId::new(e.recipe_id),
        quantity: e.quantity,
    }
}

fn tray_entry(t: &Tray) -> TrayEntry {
    TrayEntry {
        tray_id: t.id.to_string(),
        request_id: t.request_id.to_string(),
        status: t.status,
        accuracy_validated_at: t.accuracy_validated_at.map(to_timestamp),
        en_route_at: t.en_route_at.map(to_timestamp),
        delivered_at: t.delivered_at.map(to_timestamp),
        retrieved_at: t.retrieved_at.map(to_timestamp),
        created_at: to_timestamp(t.created_at),
    }
}

fn tray_model(e: TrayEntry) -> Result<Tray, StoreError> {
    Ok(Tray {
        id: TrayId::new(e.tray_id),
        request_id: MealRequestId::new(e.request_id),
        status: e.status,
        accuracy_validated_at: optional_datetime(e.accuracy_validated_at)?,
        en_route_at: optional_datetime(e.en_route_at)?,
        delivered_at: optional_datetime(e.delivered_at)?,
        retrieved_at: optional_datetime(e.retrieved_at)?,
        created_at: datetime(e.created_at)?,
    })
}

/// Newest first; a tie goes to the later chain position
fn newest_first<T>(mut rows: Vec<(DateTime<Utc>, u32, T)>) -> Vec<T> {
    rows.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
    rows.into_iter().map(|(_, _, row)| row).collect()
}

// ============================================================================
// Repositories
// ============================================================================

impl ChainScope {
    fn patient_at(&self, original: ActionHash) -> Result<Option<(u32, Patient)>, StoreError> {
        let Some(record) = latest_record(original, LinkTypes::PatientUpdates).host()? else {
            return Ok(None);
        };
        let patient = patient_model(decode("patient", &record)?)?;
        Ok(Some((record.action().action_seq(), patient)))
    }

    fn tray_at(&self, original: ActionHash) -> Result<Option<(u32, Tray)>, StoreError> {
        let Some(record) = latest_record(original, LinkTypes::TrayUpdates).host()? else {
            return Ok(None);
        };
        let tray = tray_model(decode("tray", &record)?)?;
        Ok(Some((record.action().action_seq(), tray)))
    }

    fn request_at(&self, hash: ActionHash) -> Result<Option<(u32, MealRequest)>, StoreError> {
        let Some(record) = fetch(hash)? else {
            return Ok(None);
        };
        let request = request_model(decode("meal request", &record)?)?;
        Ok(Some((record.action().action_seq(), request)))
    }

    fn require_patient(&self, id: &PatientId) -> Result<Patient, StoreError> {
        self.find_patient(id)?
            .ok_or_else(|| StoreError::corrupt("patient", format!("{id} is referenced but missing")))
    }

    fn require_meal_request(&self, id: &MealRequestId) -> Result<MealRequest, StoreError> {
        self.find_meal_request(id)?.ok_or_else(|| {
            StoreError::corrupt("meal request", format!("{id} is referenced but missing"))
        })
    }

    fn tray_view(&self, tray: Tray) -> Result<TrayView, StoreError> {
        let request = self.require_meal_request(&tray.request_id)?;
        let patient = self.require_patient(&request.patient_id)?;
        Ok(TrayView {
            tray,
            request,
            patient,
        })
    }

    /// Revise the newest version of a mutable entry and link the revision from the original
    fn revise<I, E>(
        &self,
        original: ActionHash,
        updates: LinkTypes,
        entry: I,
    ) -> Result<(), StoreError>
    where
        Entry: TryFrom<I, Error = E>,
        WasmError: From<E>,
    {
        let latest = latest_version(original.clone(), updates).host()?;
        let revised = update_entry(latest, entry).host()?;
        create_link::<LinkTypes, WasmError>(original, revised, updates, ()).host()?;
        Ok(())
    }
}

impl PatientRepository for ChainScope {
    fn list_patients(&self) -> Result<Vec<Patient>, StoreError> {
        let mut rows = Vec::new();
        for original in index_targets(ALL_PATIENTS, LinkTypes::AllPatients)? {
            if let Some((seq, patient)) = self.patient_at(original)? {
                rows.push((patient.updated_at, seq, patient));
            }
        }
        Ok(newest_first(rows))
    }

    fn find_patient(&self, id: &PatientId) -> Result<Option<Patient>, StoreError> {
        let Some(original) = lookup("patient", id.as_str(), LinkTypes::PatientIdLookup)? else {
            return Ok(None);
        };
        Ok(self.patient_at(original)?.map(|(_, patient)| patient))
    }

    fn insert_patient(&self, draft: PatientDraft) -> Result<Patient, StoreError> {
        let patient = draft.into_record(PatientId::new(mint_id().host()?));
        create_indexed(
            EntryTypes::Patient(patient_entry(&patient)),
            ALL_PATIENTS,
            LinkTypes::AllPatients,
            "patient",
            patient.id.as_str(),
            LinkTypes::PatientIdLookup,
        )?;
        Ok(patient)
    }

    fn save_patient(&self, patient: &Patient) -> Result<(), StoreError> {
        let original = lookup("patient", patient.id.as_str(), LinkTypes::PatientIdLookup)?
            .ok_or_else(|| StoreError::corrupt("patient", format!("{} has no entry", patient.id)))?;
        self.revise(original, LinkTypes::PatientUpdates, &patient_entry(patient))
    }
}

impl RecipeRepository for ChainScope {
    fn list_recipes(&self) -> Result<Vec<Recipe>, StoreError> {
        let mut recipes = Vec::new();
        for hash in index_targets(ALL_RECIPES, LinkTypes::AllRecipes)? {
            if let Some(record) = fetch(hash)? {
                recipes.push(recipe_model(decode("recipe", &record)?)?);
            }
        }
        recipes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(recipes)
    }

    fn find_recipes(&self, ids: &[RecipeId]) -> Result<Vec<Recipe>, StoreError> {
        let mut recipes = Vec::new();
        for id in ids {
            let Some(hash) = lookup("recipe", id.as_str(), LinkTypes::RecipeIdLookup)? else {
                continue;
            };
            if let Some(record) = fetch(hash)? {
                recipes.push(recipe_model(decode("recipe", &record)?)?);
            }
        }
        Ok(recipes)
    }

    fn insert_recipe(&self, draft: RecipeDraft) -> Result<Recipe, StoreError> {
        let recipe = draft.into_record(RecipeId::new(mint_id().host()?));
        let entry = RecipeEntry {
            recipe_id: recipe.id.to_string(),
            name: recipe.name.clone(),
            description: recipe.description.clone(),
            allergens: recipe.allergens.clone(),
            diet_tags: recipe.diet_tags.clone(),
            created_at: to_timestamp(recipe.created_at),
        };
        create_indexed(
            EntryTypes::Recipe(entry),
            ALL_RECIPES,
            LinkTypes::AllRecipes,
            "recipe",
            recipe.id.as_str(),
            LinkTypes::RecipeIdLookup,
        )?;
        Ok(recipe)
    }
}

impl MealRequestRepository for ChainScope {
    fn list_meal_requests(&self) -> Result<Vec<MealRequestView>, StoreError> {
        let mut rows = Vec::new();
        for hash in index_targets(ALL_MEAL_REQUESTS, LinkTypes::AllMealRequests)? {
            if let Some((seq, request)) = self.request_at(hash)? {
                let patient = self.require_patient(&request.patient_id)?;
                rows.push((request.created_at, seq, MealRequestView { request, patient }));
            }
        }
        Ok(newest_first(rows))
    }

    fn find_meal_request(&self, id: &MealRequestId) -> Result<Option<MealRequest>, StoreError> {
        let Some(hash) = lookup("request", id.as_str(), LinkTypes::MealRequestIdLookup)? else {
            return Ok(None);
        };
        Ok(self.request_at(hash)?.map(|(_, request)| request))
    }

    fn insert_meal_request(&self, draft: MealRequestDraft) -> Result<MealRequest, StoreError> {
        let request = draft.into_record(MealRequestId::new(mint_id().host()?));
        let entry = MealRequestEntry {
            request_id: request.id.to_string(),
            patient_id: request.patient_id.to_string(),
            status: request.status,
            rejection_reason: request.rejection_reason.clone(),
            finalized_at: request.finalized_at.map(to_timestamp),
            created_at: to_timestamp(request.created_at),
        };
        create_indexed(
            EntryTypes::MealRequest(entry),
            ALL_MEAL_REQUESTS,
            LinkTypes::AllMealRequests,
            "request",
            request.id.as_str(),
            LinkTypes::MealRequestIdLookup,
        )?;
        Ok(request)
    }

    fn list_request_items(
        &self,
        request_id: &MealRequestId,
    ) -> Result<Vec<RequestItemView>, StoreError> {
        let links = get_links(
            LinkQuery::try_new(
                id_anchor("request", request_id.as_str()).host()?,
                LinkTypes::RequestToItems,
            )
            .host()?,
            GetStrategy::default(),
        )
        .host()?;
        let mut records = links_to_records(links).host()?;
        records.sort_by_key(|record| record.action().action_seq());

        let mut views = Vec::with_capacity(records.len());
        for record in &records {
            let item = item_model(decode("request item", record)?);
            let recipe = self
                .find_recipes(std::slice::from_ref(&item.recipe_id))?
                .pop()
                .ok_or_else(|| {
                    StoreError::corrupt("request item", format!("recipe {} missing", item.recipe_id))
                })?;
            views.push(RequestItemView { item, recipe });
        }
        Ok(views)
    }

    fn insert_request_item(&self, draft: RequestItemDraft) -> Result<RequestItem, StoreError> {
        let item = draft.into_record(RequestItemId::new(mint_id().host()?));
        let entry = RequestItemEntry {
            item_id: item.id.to_string(),
            request_id: item.request_id.to_string(),
            recipe_id: item.recipe_id.to_string(),
            quantity: item.quantity,
        };
        let hash = create_entry(&EntryTypes::RequestItem(entry)).host()?;
        create_link(
            id_anchor("request", item.request_id.as_str()).host()?,
            hash,
            LinkTypes::RequestToItems,
            (),
        )
        .host()?;
        Ok(item)
    }
}

impl TrayRepository for ChainScope {
    fn list_trays(&self) -> Result<Vec<TrayView>, StoreError> {
        let mut rows = Vec::new();
        for original in index_targets(ALL_TRAYS, LinkTypes::AllTrays)? {
            if let Some((seq, tray)) = self.tray_at(original)? {
                rows.push((tray.created_at, seq, self.tray_view(tray)?));
            }
        }
        Ok(newest_first(rows))
    }

    fn find_tray(&self, id: &TrayId) -> Result<Option<Tray>, StoreError> {
        let Some(original) = lookup("tray", id.as_str(), LinkTypes::TrayIdLookup)? else {
            return Ok(None);
        };
        Ok(self.tray_at(original)?.map(|(_, tray)| tray))
    }

    fn find_tray_view(&self, id: &TrayId) -> Result<Option<TrayView>, StoreError> {
        self.find_tray(id)?.map(|tray| self.tray_view(tray)).transpose()
    }

    fn insert_tray(&self, draft: TrayDraft) -> Result<Tray, StoreError> {
        let request_anchor = id_anchor("request", draft.request_id.as_str()).host()?;
        if first_target(request_anchor.clone(), LinkTypes::RequestToTray)
            .host()?
            .is_some()
        {
            return Err(StoreError::Backend(format!(
                "meal request {} already has a tray",
                draft.request_id
            )));
        }

        let tray = draft.into_record(TrayId::new(mint_id().host()?));
        let hash = create_indexed(
            EntryTypes::Tray(tray_entry(&tray)),
            ALL_TRAYS,
            LinkTypes::AllTrays,
            "tray",
            tray.id.as_str(),
            LinkTypes::TrayIdLookup,
        )?;
        create_link(request_anchor, hash, LinkTypes::RequestToTray, ()).host()?;
        Ok(tray)
    }

    fn save_tray(&self, tray: &Tray) -> Result<(), StoreError> {
        let original = lookup("tray", tray.id.as_str(), LinkTypes::TrayIdLookup)?
            .ok_or_else(|| StoreError::corrupt("tray", format!("{} has no entry", tray.id)))?;
        self.revise(original, LinkTypes::TrayUpdates, &tray_entry(tray))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use mealflow_core::{Allergen, ClinicalState, DietOrder, MealRequestStatus, TrayStatus};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 8, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn patient() -> Patient {
        Patient {
            id: PatientId::from("p-1"),
            name: "Grace Hopper".to_string(),
            room_number: Some("4B".to_string()),
            diet_order: DietOrder::LowSodium,
            allergies: [Allergen::Shellfish, Allergen::TreeNuts].into_iter().collect(),
            clinical_state: ClinicalState::PostOp,
            admitted_at: at(0),
            updated_at: at(45),
        }
    }

    fn tray() -> Tray {
        Tray {
            id: TrayId::from("t-1"),
            request_id: MealRequestId::from("m-1"),
            status: TrayStatus::PreparationStarted,
            accuracy_validated_at: None,
            en_route_at: None,
            delivered_at: None,
            retrieved_at: None,
            created_at: at(5),
        }
    }

    #[test]
    fn test_patient_survives_entry_conversion() {
        let patient = patient();
        let entry = patient_entry(&patient);
        assert_eq!(entry.patient_id, "p-1");
        assert_eq!(entry.updated_at, to_timestamp(at(45)));
        assert_eq!(patient_model(entry).unwrap(), patient);
    }

    #[test]
    fn test_new_tray_entry_has_no_stamps() {
        let tray = tray();
        let entry = tray_entry(&tray);
        assert_eq!(entry.accuracy_validated_at, None);
        assert_eq!(entry.retrieved_at, None);
        assert_eq!(tray_model(entry).unwrap(), tray);
    }

    #[test]
    fn test_advanced_tray_keeps_its_stamps() {
        let mut tray = tray();
        tray.advance(at(10)).unwrap();
        tray.advance(at(20)).unwrap();

        let entry = tray_entry(&tray);
        assert_eq!(entry.status, TrayStatus::EnRoute);
        assert_eq!(entry.accuracy_validated_at, Some(to_timestamp(at(10))));
        assert_eq!(entry.en_route_at, Some(to_timestamp(at(20))));
        assert_eq!(entry.delivered_at, None);
        assert_eq!(tray_model(entry).unwrap(), tray);
    }

    #[test]
    fn test_rejected_request_entry() {
        let entry = MealRequestEntry {
            request_id: "m-2".to_string(),
            patient_id: "p-1".to_string(),
            status: MealRequestStatus::Rejected,
            rejection_reason: Some("\"Pad Thai\" contains Peanuts (patient allergy)".into()),
            finalized_at: None,
            created_at: to_timestamp(at(3)),
        };
        let request = request_model(entry).unwrap();
        assert_eq!(request.id, MealRequestId::from("m-2"));
        assert_eq!(request.finalized_at, None);
        assert_eq!(request.created_at, at(3));
    }

    #[test]
    fn test_newest_first_orders_by_time_then_chain_position() {
        let rows = vec![
            (at(1), 4, "older"),
            (at(2), 7, "same call, first"),
            (at(2), 9, "same call, second"),
            (at(0), 12, "oldest"),
        ];
        assert_eq!(
            newest_first(rows),
            vec!["same call, second", "same call, first", "older", "oldest"]
        );
    }
}
