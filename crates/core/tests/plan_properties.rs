//! Property tests for plans built from the built-in catalog.

use music_choreographer_core::{
    BuiltinCatalog, CatalogLoader, CatalogView, Category, Degradation, IntensityClass,
    MotionPrimitive, Plan, Planner, PlannerConfig, SegmentType, BUILTIN_PROFILE,
};
use proptest::prelude::*;

fn catalog() -> CatalogView {
    CatalogLoader::new(BuiltinCatalog)
        .load(BUILTIN_PROFILE)
        .expect("built-in catalog loads")
}

/// Regular beats with a start offset, plus a cycled energy curve.
fn features(duration: f64, interval: f64, offset: f64, levels: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let beats: Vec<f64> = (0..)
        .map(|k| offset + k as f64 * interval)
        .take_while(|t| *t < duration)
        .collect();
    let energies = (0..beats.len().saturating_sub(1))
        .map(|k| levels[k % levels.len()])
        .collect();
    (beats, energies)
}

fn build(duration: f64, beats: &[f64], energies: &[f64], seed: u64) -> Plan {
    let catalog = catalog();
    Planner::new(&catalog, PlannerConfig::default())
        .plan(duration, beats, energies, seed)
        .expect("planning succeeds with the built-in catalog")
}

fn primitive_strategy() -> impl Strategy<Value = (Category, f64, IntensityClass)> {
    (
        prop::sample::select(Category::ALL.to_vec()),
        0.05f64..12.0,
        prop::sample::select(vec![
            IntensityClass::Weak,
            IntensityClass::Medium,
            IntensityClass::Strong,
        ]),
    )
}

/// Small catalogs of any shape, from a lone light to several long actions.
fn catalog_strategy() -> impl Strategy<Value = CatalogView> {
    prop::collection::vec(primitive_strategy(), 1..10).prop_map(|entries| {
        let primitives = entries
            .into_iter()
            .enumerate()
            .map(|(i, (category, seconds, intensity))| MotionPrimitive {
                id: format!("{category}_{i}"),
                category,
                duration_seconds: seconds,
                intensity,
            });
        CatalogView::new("generated", primitives)
    })
}

fn assert_plan_invariants(plan: &Plan, duration: f64) -> Result<(), TestCaseError> {
    let config = PlannerConfig::default();
    prop_assert!(plan.validate(config.continuity_threshold, config.closing_tolerance).is_ok());

    let closing = plan.closing().expect("plan has segments");
    prop_assert_eq!(closing.segment_type, SegmentType::Action);
    prop_assert!((closing.end_time() - duration).abs() <= config.closing_tolerance);

    let motion: Vec<_> = plan.motion().collect();
    for pair in motion.windows(2) {
        prop_assert!(pair[1].start_time >= pair[0].end_time() - 1e-6);
    }
    for segment in plan.segments() {
        prop_assert!(segment.duration > 0.0);
        if !segment.segment_type.is_motion() {
            prop_assert!(segment.end_time() <= duration + 1e-6);
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn plans_cover_close_and_never_overlap(
        duration in 1.0f64..240.0,
        interval in 0.25f64..1.5,
        offset in 0.0f64..0.6,
        levels in prop::collection::vec(0.0f64..1.0, 1..16),
        seed in any::<u64>(),
    ) {
        let (beats, energies) = features(duration, interval, offset, &levels);
        let plan = build(duration, &beats, &energies, seed);
        assert_plan_invariants(&plan, duration)?;
    }

    #[test]
    fn planning_is_deterministic(
        duration in 5.0f64..120.0,
        interval in 0.3f64..1.2,
        levels in prop::collection::vec(0.0f64..1.0, 1..8),
        seed in any::<u64>(),
    ) {
        let (beats, energies) = features(duration, interval, 0.0, &levels);
        let first = build(duration, &beats, &energies, seed).to_json().unwrap();
        let second = build(duration, &beats, &energies, seed).to_json().unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn sparse_or_missing_beats_still_plan(
        duration in 1.0f64..60.0,
        beats in prop::collection::vec(-5.0f64..70.0, 0..4),
        seed in any::<u64>(),
    ) {
        let plan = build(duration, &beats, &[], seed);
        let config = PlannerConfig::default();
        prop_assert!(plan.validate(config.continuity_threshold, config.closing_tolerance).is_ok());
    }

    #[test]
    fn any_catalog_yields_a_closed_plan(
        catalog in catalog_strategy(),
        duration in 0.5f64..60.0,
        beats in prop::collection::vec(-5.0f64..70.0, 0..40),
        energies in prop::collection::vec(0.0f64..2.0, 0..40),
        seed in any::<u64>(),
    ) {
        let plan = Planner::new(&catalog, PlannerConfig::default())
            .plan(duration, &beats, &energies, seed)
            .expect("a non-empty catalog always plans without strict closing");
        assert_plan_invariants(&plan, duration)?;

        let closing = plan.closing().expect("plan has segments");
        match catalog.longest_fitting(Category::Action, duration + 1e-6) {
            Some(action) => {
                prop_assert_eq!(plan.degradation(), None);
                prop_assert_eq!(&closing.primitive_id, &action.id);
            }
            None => {
                prop_assert_eq!(plan.degradation(), Some(Degradation::InsufficientCatalog));
                prop_assert_eq!(closing.start_time, 0.0);
            }
        }
    }
}
