//! Benchmarks for meal safety validation
use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mealflow_core::{
    safety, Allergen, ClinicalState, DietOrder, Patient, PatientId, Recipe, RecipeId,
};

fn patient() -> Patient {
    let admitted = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
    Patient {
        id: PatientId::from("bench-patient"),
        name: "Bench Patient".to_string(),
        room_number: Some("101".to_string()),
        diet_order: DietOrder::Diabetic,
        allergies: [Allergen::Peanuts, Allergen::Dairy, Allergen::Shellfish]
            .into_iter()
            .collect(),
        clinical_state: ClinicalState::Stable,
        admitted_at: admitted,
        updated_at: admitted,
    }
}

/// Recipes cycling through every allergen and diet so roughly half conflict
fn recipes(count: usize) -> Vec<Recipe> {
    let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..count)
        .map(|i| Recipe {
            id: RecipeId::new(format!("recipe-{i}")),
            name: format!("Dish {i}"),
            description: None,
            allergens: [Allergen::ALL[i % Allergen::ALL.len()]].into_iter().collect(),
            diet_tags: if i % 3 == 0 {
                Default::default()
            } else {
                [DietOrder::ALL[i % DietOrder::ALL.len()]].into_iter().collect()
            },
            created_at: created,
        })
        .collect()
}

fn bench_validate(c: &mut Criterion) {
    let patient = patient();
    let mut group = c.benchmark_group("safety_validate");

    for count in [1usize, 5, 25, 100] {
        let menu = recipes(count);
        group.bench_with_input(BenchmarkId::new("recipes", count), &menu, |b, menu| {
            b.iter(|| safety::validate(black_box(&patient), black_box(menu)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_validate);
criterion_main!(benches);
