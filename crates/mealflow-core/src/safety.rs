//! Meal safety validation.
//!
//! Checks a patient's allergy set and diet order against the recipes picked
//! for a meal request. Pure: no I/O, no clock, same input gives the same
//! ordered violations.

use crate::model::{Patient, Recipe};

/// Every reason the recipes are unsafe for this patient.
///
/// Allergen conflicts come first (recipe order, then allergen order), then
/// diet conflicts (recipe order). A recipe with no diet tags suits every
/// diet. Nothing short-circuits: an empty result means the meal is safe.
pub fn validate(patient: &Patient, recipes: &[Recipe]) -> Vec<String> {
    let allergy_conflicts = recipes.iter().flat_map(|recipe| {
        recipe
            .allergens
            .iter()
            .filter(move |allergen| patient.allergies.contains(*allergen))
            .map(move |allergen| format!("\"{}\" contains {} (patient allergy)", recipe.name, allergen))
    });

    let diet_conflicts = recipes
        .iter()
        .filter(|recipe| {
            !recipe.diet_tags.is_empty() && !recipe.diet_tags.contains(&patient.diet_order)
        })
        .map(|recipe| {
            format!(
                "\"{}\" is not compatible with {} diet",
                recipe.name, patient.diet_order
            )
        });

    allergy_conflicts.chain(diet_conflicts).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Allergen, ClinicalState, DietOrder, PatientId, RecipeId};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn patient(diet_order: DietOrder, allergies: &[Allergen]) -> Patient {
        let admitted = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        Patient {
            id: PatientId::from("PAT-001"),
            name: "Alice Johnson".to_string(),
            room_number: Some("12A".to_string()),
            diet_order,
            allergies: allergies.iter().copied().collect(),
            clinical_state: ClinicalState::Stable,
            admitted_at: admitted,
            updated_at: admitted,
        }
    }

    fn recipe(name: &str, allergens: &[Allergen], diet_tags: &[DietOrder]) -> Recipe {
        Recipe {
            id: RecipeId::from(format!("rec-{}", name.to_lowercase().replace(' ', "-"))),
            name: name.to_string(),
            description: None,
            allergens: allergens.iter().copied().collect(),
            diet_tags: diet_tags.iter().copied().collect(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_allergy_violation() {
        let p = patient(DietOrder::Regular, &[Allergen::Peanuts]);
        let violations = validate(&p, &[recipe("Peanut Soup", &[Allergen::Peanuts], &[])]);
        assert_eq!(violations, ["\"Peanut Soup\" contains Peanuts (patient allergy)"]);
    }

    #[test]
    fn test_diet_violation() {
        let p = patient(DietOrder::Renal, &[]);
        let violations = validate(&p, &[recipe("Garden Salad", &[], &[DietOrder::Vegetarian])]);
        assert_eq!(violations, ["\"Garden Salad\" is not compatible with Renal diet"]);
    }

    #[test]
    fn test_empty_diet_tags_suit_every_diet() {
        let universal = recipe("Broth", &[], &[]);
        for diet in DietOrder::ALL {
            assert!(validate(&patient(*diet, &[]), &[universal.clone()]).is_empty());
        }
    }

    #[test]
    fn test_multi_word_diet_name_in_message() {
        let p = patient(DietOrder::LowSodium, &[]);
        let violations = validate(&p, &[recipe("Ham Plate", &[], &[DietOrder::Regular])]);
        assert_eq!(violations, ["\"Ham Plate\" is not compatible with Low Sodium diet"]);
    }

    #[test]
    fn test_all_violations_reported_allergies_first() {
        let p = patient(DietOrder::Diabetic, &[Allergen::Fish, Allergen::Dairy]);
        let recipes = [
            recipe("Fish Pie", &[Allergen::Fish, Allergen::Dairy, Allergen::Gluten], &[DietOrder::Regular]),
            recipe("Fruit Cup", &[], &[DietOrder::Diabetic]),
            recipe("Cheesecake", &[Allergen::Dairy], &[DietOrder::Vegetarian]),
        ];
        let violations = validate(&p, &recipes);
        assert_eq!(
            violations,
            [
                // Dairy is declared before Fish, so it comes first within a recipe
                "\"Fish Pie\" contains Dairy (patient allergy)",
                "\"Fish Pie\" contains Fish (patient allergy)",
                "\"Cheesecake\" contains Dairy (patient allergy)",
                "\"Fish Pie\" is not compatible with Diabetic diet",
                "\"Cheesecake\" is not compatible with Diabetic diet",
            ]
        );
    }

    #[test]
    fn test_compatible_meal_has_no_violations() {
        let p = patient(DietOrder::Vegetarian, &[Allergen::Shellfish]);
        let recipes = [
            recipe("Veggie Curry", &[Allergen::Soy], &[DietOrder::Vegetarian, DietOrder::Regular]),
            recipe("Rice", &[], &[]),
        ];
        assert!(validate(&p, &recipes).is_empty());
    }

    fn allergen_set() -> impl Strategy<Value = BTreeSet<Allergen>> {
        proptest::collection::btree_set(proptest::sample::select(Allergen::ALL.to_vec()), 0..4)
    }

    fn diet_set() -> impl Strategy<Value = BTreeSet<DietOrder>> {
        proptest::collection::btree_set(proptest::sample::select(DietOrder::ALL.to_vec()), 0..3)
    }

    fn arb_recipes() -> impl Strategy<Value = Vec<Recipe>> {
        proptest::collection::vec((allergen_set(), diet_set()), 0..6).prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (allergens, diet_tags))| {
                    let mut r = recipe(&format!("Dish {i}"), &[], &[]);
                    r.allergens = allergens;
                    r.diet_tags = diet_tags;
                    r
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_validation_is_deterministic(
            allergies in allergen_set(),
            diet in proptest::sample::select(DietOrder::ALL.to_vec()),
            recipes in arb_recipes(),
        ) {
            let mut p = patient(diet, &[]);
            p.allergies = allergies;
            prop_assert_eq!(validate(&p, &recipes), validate(&p, &recipes));
        }

        #[test]
        fn prop_no_false_positives(
            allergies in allergen_set(),
            diet in proptest::sample::select(DietOrder::ALL.to_vec()),
            recipes in arb_recipes(),
        ) {
            let mut p = patient(diet, &[]);
            p.allergies = allergies;
            let safe: Vec<Recipe> = recipes
                .into_iter()
                .filter(|r| r.allergens.is_disjoint(&p.allergies))
                .filter(|r| r.diet_tags.is_empty() || r.diet_tags.contains(&p.diet_order))
                .collect();
            prop_assert!(validate(&p, &safe).is_empty());
        }

        #[test]
        fn prop_one_violation_per_conflict(
            allergies in allergen_set(),
            diet in proptest::sample::select(DietOrder::ALL.to_vec()),
            recipes in arb_recipes(),
        ) {
            let mut p = patient(diet, &[]);
            p.allergies = allergies;
            let expected: usize = recipes
                .iter()
                .map(|r| {
                    r.allergens.intersection(&p.allergies).count()
                        + usize::from(!r.diet_tags.is_empty() && !r.diet_tags.contains(&p.diet_order))
                })
                .sum();
            prop_assert_eq!(validate(&p, &recipes).len(), expected);
        }
    }
}
