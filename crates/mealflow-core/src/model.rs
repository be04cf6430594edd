//! Domain records for patients, recipes, meal requests and kitchen trays.
//!
//! Records carry backend-allocated string ids. Anything that is written goes
//! through a `*Draft` first; the backend turns a draft into a record by
//! assigning the id.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::error::MealflowError;

/// Longest accepted patient or recipe name, in characters
pub const NAME_MAX_CHARS: usize = 200;

/// Longest accepted room number, in characters
pub const ROOM_NUMBER_MAX_CHARS: usize = 50;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

id_type!(
    /// Patient identifier
    PatientId
);
id_type!(
    /// Recipe identifier
    RecipeId
);
id_type!(
    /// Meal request identifier
    MealRequestId
);
id_type!(
    /// Request item identifier
    RequestItemId
);
id_type!(
    /// Kitchen tray identifier
    TrayId
);

// ============================================================================
// Fixed vocabularies
// ============================================================================

/// A stored or submitted value outside a fixed vocabulary
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! vocabulary {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant,)+
        }

        impl $name {
            /// Every value, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|value| value.as_str() == s)
                    .ok_or_else(|| UnknownValue {
                        kind: stringify!($name),
                        value: s.to_string(),
                    })
            }
        }
    };
}

vocabulary!(
    /// The single dietary category assigned to a patient
    DietOrder {
        Regular => "Regular",
        LowSodium => "Low Sodium",
        Diabetic => "Diabetic",
        Vegetarian => "Vegetarian",
        Renal => "Renal",
        Pureed => "Pureed",
        Liquid => "Liquid",
    }
);

vocabulary!(
    /// Bedside clinical state
    ClinicalState {
        Stable => "Stable",
        Critical => "Critical",
        Observation => "Observation",
        PostOp => "Post-Op",
        DischargePending => "Discharge Pending",
        /// Nothing by mouth
        Npo => "NPO",
    }
);

vocabulary!(
    /// Allergens tracked on patients and recipes.
    ///
    /// Declaration order is the natural order of an allergen set.
    Allergen {
        Shellfish => "Shellfish",
        Gluten => "Gluten",
        Dairy => "Dairy",
        Peanuts => "Peanuts",
        TreeNuts => "Tree Nuts",
        Soy => "Soy",
        Eggs => "Eggs",
        Fish => "Fish",
    }
);

vocabulary!(
    /// Meal request status
    MealRequestStatus {
        Draft => "Draft",
        Validated => "Validated",
        Rejected => "Rejected",
        Finalized => "Finalized",
    }
);

vocabulary!(
    /// Tray lifecycle status, declared in lifecycle order
    TrayStatus {
        PreparationStarted => "Preparation Started",
        AccuracyValidated => "Accuracy Validated",
        EnRoute => "En Route",
        Delivered => "Delivered",
        Retrieved => "Retrieved",
    }
);

impl Default for DietOrder {
    fn default() -> Self {
        DietOrder::Regular
    }
}

impl Default for ClinicalState {
    fn default() -> Self {
        ClinicalState::Stable
    }
}

impl TrayStatus {
    /// Index of this status in the lifecycle
    pub fn position(&self) -> usize {
        TrayStatus::ALL
            .iter()
            .position(|status| status == self)
            .unwrap_or(0)
    }

    /// The status one step further along, `None` once retrieved
    pub fn next(&self) -> Option<TrayStatus> {
        TrayStatus::ALL.get(self.position() + 1).copied()
    }

    pub fn is_final(&self) -> bool {
        self.next().is_none()
    }
}

// ============================================================================
// Field rules
// ============================================================================

/// Trim a patient or recipe name and enforce 1..=200 characters
pub fn normalize_name(raw: &str) -> Result<String, MealflowError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(MealflowError::input("Name is required"));
    }
    if name.chars().count() > NAME_MAX_CHARS {
        return Err(MealflowError::input(format!(
            "Name must be at most {NAME_MAX_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}

/// Trim a room number; blank means no room, longer than 50 characters is refused
pub fn normalize_room_number(raw: Option<&str>) -> Result<Option<String>, MealflowError> {
    let Some(room) = raw.map(str::trim).filter(|room| !room.is_empty()) else {
        return Ok(None);
    };
    if room.chars().count() > ROOM_NUMBER_MAX_CHARS {
        return Err(MealflowError::input(format!(
            "Room number must be at most {ROOM_NUMBER_MAX_CHARS} characters"
        )));
    }
    Ok(Some(room.to_string()))
}

// ============================================================================
// Patients
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub name: String,
    pub room_number: Option<String>,
    pub diet_order: DietOrder,
    pub allergies: BTreeSet<Allergen>,
    pub clinical_state: ClinicalState,
    pub admitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Admission form
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPatient {
    pub name: String,
    #[serde(default)]
    pub room_number: Option<String>,
    #[serde(default)]
    pub diet_order: DietOrder,
    #[serde(default)]
    pub allergies: BTreeSet<Allergen>,
    #[serde(default)]
    pub clinical_state: ClinicalState,
}

impl NewPatient {
    pub fn named(name: impl Into<String>) -> Self {
        NewPatient {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Apply the field rules and stamp the admission time
    pub fn into_draft(self, admitted_at: DateTime<Utc>) -> Result<PatientDraft, MealflowError> {
        Ok(PatientDraft {
            name: normalize_name(&self.name)?,
            room_number: normalize_room_number(self.room_number.as_deref())?,
            diet_order: self.diet_order,
            allergies: self.allergies,
            clinical_state: self.clinical_state,
            admitted_at,
        })
    }
}

/// A validated patient awaiting an id
#[derive(Clone, Debug, PartialEq)]
pub struct PatientDraft {
    pub name: String,
    pub room_number: Option<String>,
    pub diet_order: DietOrder,
    pub allergies: BTreeSet<Allergen>,
    pub clinical_state: ClinicalState,
    pub admitted_at: DateTime<Utc>,
}

impl PatientDraft {
    pub fn into_record(self, id: PatientId) -> Patient {
        Patient {
            id,
            name: self.name,
            room_number: self.room_number,
            diet_order: self.diet_order,
            allergies: self.allergies,
            clinical_state: self.clinical_state,
            admitted_at: self.admitted_at,
            updated_at: self.admitted_at,
        }
    }
}

/// Partial update restricted to the mutable patient fields.
///
/// `room_number` distinguishes "leave alone" (absent) from "clear" (`null`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub room_number: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diet_order: Option<DietOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allergies: Option<BTreeSet<Allergen>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_state: Option<ClinicalState>,
}

fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl PatientPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.room_number.is_none()
            && self.diet_order.is_none()
            && self.allergies.is_none()
            && self.clinical_state.is_none()
    }

    /// Apply the patch under the same field rules as admission.
    ///
    /// Nothing is written to `patient` unless every field passes.
    pub fn apply(&self, patient: &mut Patient, at: DateTime<Utc>) -> Result<(), MealflowError> {
        if self.is_empty() {
            return Err(MealflowError::input("No valid fields to update"));
        }
        let name = self.name.as_deref().map(normalize_name).transpose()?;
        let room_number = self
            .room_number
            .as_ref()
            .map(|room| normalize_room_number(room.as_deref()))
            .transpose()?;

        if let Some(name) = name {
            patient.name = name;
        }
        if let Some(room_number) = room_number {
            patient.room_number = room_number;
        }
        if let Some(diet_order) = self.diet_order {
            patient.diet_order = diet_order;
        }
        if let Some(allergies) = &self.allergies {
            patient.allergies = allergies.clone();
        }
        if let Some(clinical_state) = self.clinical_state {
            patient.clinical_state = clinical_state;
        }
        patient.updated_at = at;
        Ok(())
    }
}

// ============================================================================
// Recipes
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: RecipeId,
    pub name: String,
    pub description: Option<String>,
    pub allergens: BTreeSet<Allergen>,
    /// Diets this recipe suits; empty means every diet
    pub diet_tags: BTreeSet<DietOrder>,
    pub created_at: DateTime<Utc>,
}

/// Catalog entry form
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRecipe {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub allergens: BTreeSet<Allergen>,
    #[serde(default)]
    pub diet_tags: BTreeSet<DietOrder>,
}

impl NewRecipe {
    pub fn into_draft(self, created_at: DateTime<Utc>) -> Result<RecipeDraft, MealflowError> {
        let description = self
            .description
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        Ok(RecipeDraft {
            name: normalize_name(&self.name)?,
            description,
            allergens: self.allergens,
            diet_tags: self.diet_tags,
            created_at,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecipeDraft {
    pub name: String,
    pub description: Option<String>,
    pub allergens: BTreeSet<Allergen>,
    pub diet_tags: BTreeSet<DietOrder>,
    pub created_at: DateTime<Utc>,
}

impl RecipeDraft {
    pub fn into_record(self, id: RecipeId) -> Recipe {
        Recipe {
            id,
            name: self.name,
            description: self.description,
            allergens: self.allergens,
            diet_tags: self.diet_tags,
            created_at: self.created_at,
        }
    }
}

// ============================================================================
// Meal requests and items
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MealRequest {
    pub id: MealRequestId,
    pub patient_id: PatientId,
    pub status: MealRequestStatus,
    pub rejection_reason: Option<String>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MealRequestDraft {
    pub patient_id: PatientId,
    pub status: MealRequestStatus,
    pub rejection_reason: Option<String>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MealRequestDraft {
    /// A request that passed validation and goes straight to the kitchen
    pub fn finalized(patient_id: PatientId, at: DateTime<Utc>) -> Self {
        MealRequestDraft {
            patient_id,
            status: MealRequestStatus::Finalized,
            rejection_reason: None,
            finalized_at: Some(at),
            created_at: at,
        }
    }

    /// A request kept for the audit trail after failing validation
    pub fn rejected(patient_id: PatientId, reason: String, at: DateTime<Utc>) -> Self {
        MealRequestDraft {
            patient_id,
            status: MealRequestStatus::Rejected,
            rejection_reason: Some(reason),
            finalized_at: None,
            created_at: at,
        }
    }

    pub fn into_record(self, id: MealRequestId) -> MealRequest {
        MealRequest {
            id,
            patient_id: self.patient_id,
            status: self.status,
            rejection_reason: self.rejection_reason,
            finalized_at: self.finalized_at,
            created_at: self.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestItem {
    pub id: RequestItemId,
    pub request_id: MealRequestId,
    pub recipe_id: RecipeId,
    pub quantity: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RequestItemDraft {
    pub request_id: MealRequestId,
    pub recipe_id: RecipeId,
    pub quantity: u32,
}

impl RequestItemDraft {
    pub fn single(request_id: MealRequestId, recipe_id: RecipeId) -> Self {
        RequestItemDraft {
            request_id,
            recipe_id,
            quantity: 1,
        }
    }

    pub fn into_record(self, id: RequestItemId) -> RequestItem {
        RequestItem {
            id,
            request_id: self.request_id,
            recipe_id: self.recipe_id,
            quantity: self.quantity,
        }
    }
}

// ============================================================================
// Trays
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tray {
    pub id: TrayId,
    pub request_id: MealRequestId,
    pub status: TrayStatus,
    pub accuracy_validated_at: Option<DateTime<Utc>>,
    pub en_route_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub retrieved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Tray {
    /// When the tray entered `status`. Preparation has no stamp of its own.
    pub fn stamp(&self, status: TrayStatus) -> Option<DateTime<Utc>> {
        match status {
            TrayStatus::PreparationStarted => None,
            TrayStatus::AccuracyValidated => self.accuracy_validated_at,
            TrayStatus::EnRoute => self.en_route_at,
            TrayStatus::Delivered => self.delivered_at,
            TrayStatus::Retrieved => self.retrieved_at,
        }
    }

    fn stamp_slot(&mut self, status: TrayStatus) -> Option<&mut Option<DateTime<Utc>>> {
        match status {
            TrayStatus::PreparationStarted => None,
            TrayStatus::AccuracyValidated => Some(&mut self.accuracy_validated_at),
            TrayStatus::EnRoute => Some(&mut self.en_route_at),
            TrayStatus::Delivered => Some(&mut self.delivered_at),
            TrayStatus::Retrieved => Some(&mut self.retrieved_at),
        }
    }

    /// Move exactly one step along the lifecycle, stamping the entered status.
    ///
    /// A stamp that is already set is left untouched.
    pub fn advance(&mut self, at: DateTime<Utc>) -> Result<TrayStatus, MealflowError> {
        let next = self.status.next().ok_or_else(|| {
            MealflowError::InvalidState("Tray already at final status".to_string())
        })?;
        if let Some(slot) = self.stamp_slot(next) {
            if slot.is_none() {
                *slot = Some(at);
            }
        }
        self.status = next;
        Ok(next)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrayDraft {
    pub request_id: MealRequestId,
    pub created_at: DateTime<Utc>,
}

impl TrayDraft {
    pub fn into_record(self, id: TrayId) -> Tray {
        Tray {
            id,
            request_id: self.request_id,
            status: TrayStatus::PreparationStarted,
            accuracy_validated_at: None,
            en_route_at: None,
            delivered_at: None,
            retrieved_at: None,
            created_at: self.created_at,
        }
    }
}

// ============================================================================
// Read-side views
// ============================================================================

/// Meal request joined with its patient for display
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MealRequestView {
    #[serde(flatten)]
    pub request: MealRequest,
    pub patient: Patient,
}

/// Request item joined with its recipe for display
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestItemView {
    #[serde(flatten)]
    pub item: RequestItem,
    pub recipe: Recipe,
}

/// Tray joined with its meal request and that request's patient
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrayView {
    #[serde(flatten)]
    pub tray: Tray,
    pub request: MealRequest,
    pub patient: Patient,
}
