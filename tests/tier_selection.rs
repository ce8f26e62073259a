use factorforge::config::{BlendPolicyConfig, TierSelectionConfig};
use factorforge::engines::generation::tier_selector::project_into_bands;
use factorforge::engines::generation::{GenomeId, OutcomeRecord, TierSelector};
use factorforge::types::Tier;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

const MUTATION_TIERS: [Tier; 3] = [Tier::Parametric, Tier::Structural, Tier::Expression];

fn outcome(tier: Tier, accepted: bool, delta: Option<f64>) -> OutcomeRecord {
    OutcomeRecord {
        tier,
        before: GenomeId(1),
        after: GenomeId(2),
        accepted,
        fitness_delta: delta,
        generation: 0,
    }
}

fn assert_within_bands(selector: &TierSelector, config: &TierSelectionConfig) {
    let total: f64 = selector.distribution().iter().sum();
    assert!((total - 1.0).abs() < 1e-9, "distribution sums to {}", total);
    for tier in MUTATION_TIERS {
        let share = selector.share(tier);
        let target = config.target(tier);
        assert!(share <= target + config.share_band + 1e-9, "{} above band: {}", tier, share);
        assert!(share >= (target - config.share_band).max(config.min_share) - 1e-9, "{} below band: {}", tier, share);
    }
}

#[test]
fn test_starts_at_configured_targets() {
    let config = TierSelectionConfig::default();
    let selector = TierSelector::new(config.clone(), &MUTATION_TIERS);
    for tier in MUTATION_TIERS {
        assert!((selector.share(tier) - config.target(tier)).abs() < 1e-9);
    }
    assert!(!selector.is_enabled(Tier::Generator));
    assert_eq!(selector.share(Tier::Generator), 0.0);
}

#[test]
fn test_dominant_tier_held_inside_its_band() {
    let config = TierSelectionConfig {
        blend: BlendPolicyConfig::Linear { alpha: 1.0 },
        ..Default::default()
    };
    let mut selector = TierSelector::new(config.clone(), &MUTATION_TIERS);
    for _ in 0..40 {
        selector.record(outcome(Tier::Expression, true, Some(2.5)));
        selector.record(outcome(Tier::Structural, false, None));
        selector.record(outcome(Tier::Parametric, true, Some(-0.4)));
    }
    selector.refresh(false);

    assert!(selector.share(Tier::Expression) > config.expression_share);
    assert_within_bands(&selector, &config);
    assert!(selector.stats(Tier::Parametric).success_rate() == 0.0);
}

#[test]
fn test_rolling_window_forgets_old_outcomes() {
    let config = TierSelectionConfig {
        window: 5,
        ..Default::default()
    };
    let mut selector = TierSelector::new(config, &MUTATION_TIERS);
    for _ in 0..10 {
        selector.record(outcome(Tier::Structural, false, None));
    }
    for _ in 0..5 {
        selector.record(outcome(Tier::Structural, true, Some(1.0)));
    }
    selector.refresh(false);

    let stats = selector.stats(Tier::Structural);
    assert_eq!(stats.samples, 5);
    assert_eq!(stats.acceptance, 1.0);
    assert_eq!(selector.outcome_count(), 15);
}

#[test]
fn test_outcome_log_stays_within_capacity() {
    let config = TierSelectionConfig {
        window: 5,
        outcome_log_capacity: 30,
        ..Default::default()
    };
    let mut selector = TierSelector::new(config, &MUTATION_TIERS);
    for generation in 0..500 {
        // Only the most recent outcomes are accepted.
        let accepted = generation >= 495;
        selector.record(OutcomeRecord {
            generation,
            ..outcome(Tier::Structural, accepted, accepted.then_some(1.0))
        });
        assert!(selector.outcome_count() <= 30);
        if generation % 97 == 0 {
            selector.refresh(false);
        }
    }
    selector.refresh(false);

    assert_eq!(selector.outcome_count(), 30);
    assert_eq!(selector.outcomes_recorded(), 500);
    let kept = selector.outcomes();
    assert_eq!(kept.first().map(|o| o.generation), Some(470));
    assert_eq!(kept.last().map(|o| o.generation), Some(499));

    let stats = selector.stats(Tier::Structural);
    assert_eq!(stats.samples, 5);
    assert_eq!(stats.acceptance, 1.0);
}

#[test]
fn test_exploration_boost_moves_mass_off_parametric() {
    let config = TierSelectionConfig {
        blend: BlendPolicyConfig::Fixed,
        ..Default::default()
    };
    let mut selector = TierSelector::new(config.clone(), &MUTATION_TIERS);
    let before = selector.distribution();

    selector.refresh(true);
    assert!(selector.is_boosted());
    assert!(selector.share(Tier::Parametric) < before[Tier::Parametric.index()]);
    assert!(selector.share(Tier::Structural) > before[Tier::Structural.index()]);
    assert!(selector.share(Tier::Expression) > before[Tier::Expression.index()]);

    selector.refresh(false);
    assert!(!selector.is_boosted());
    assert!((selector.share(Tier::Parametric) - config.parametric_share).abs() < 1e-9);
}

#[test]
fn test_sampling_tracks_distribution() {
    let selector = TierSelector::new(TierSelectionConfig::default(), &MUTATION_TIERS);
    let mut rng = StdRng::seed_from_u64(99);
    let mut counts = [0usize; 4];
    let draws = 20_000;
    for _ in 0..draws {
        let tier = selector.sample(&mut rng).unwrap();
        counts[tier.index()] += 1;
    }
    assert_eq!(counts[Tier::Generator.index()], 0);
    for tier in MUTATION_TIERS {
        let observed = counts[tier.index()] as f64 / draws as f64;
        assert!((observed - selector.share(tier)).abs() < 0.02, "{}: {}", tier, observed);
    }
}

#[test]
fn test_generator_tier_competes_when_available() {
    let config = TierSelectionConfig {
        parametric_share: 0.3,
        structural_share: 0.4,
        expression_share: 0.2,
        generator_share: 0.1,
        ..Default::default()
    };
    let selector = TierSelector::new(config, &Tier::ALL);
    assert!(selector.is_enabled(Tier::Generator));
    assert!((selector.share(Tier::Generator) - 0.1).abs() < 1e-9);
}

proptest! {
    #[test]
    fn prop_projection_respects_bands(raw in proptest::array::uniform4(0.0f64..5.0)) {
        let lo = [0.1, 0.2, 0.05, 0.0];
        let hi = [0.45, 0.65, 0.35, 0.0];
        let projected = project_into_bands(&raw, &lo, &hi);
        let total: f64 = projected.iter().sum();
        prop_assert!((total - 1.0).abs() < 1e-6);
        for i in 0..4 {
            prop_assert!(projected[i] >= lo[i] - 1e-9 && projected[i] <= hi[i] + 1e-9);
        }
    }

    #[test]
    fn prop_random_feedback_keeps_shares_in_band(
        deltas in proptest::collection::vec((0usize..3, any::<bool>(), -3.0f64..3.0), 0..200),
        stale in any::<bool>(),
    ) {
        let config = TierSelectionConfig::default();
        let mut selector = TierSelector::new(config.clone(), &MUTATION_TIERS);
        for (tier, accepted, delta) in deltas {
            selector.record(outcome(MUTATION_TIERS[tier], accepted, accepted.then_some(delta)));
        }
        selector.refresh(stale);
        let total: f64 = selector.distribution().iter().sum();
        prop_assert!((total - 1.0).abs() < 1e-9);
        if !stale {
            for tier in MUTATION_TIERS {
                let share = selector.share(tier);
                let target = config.target(tier);
                prop_assert!(share <= target + config.share_band + 1e-9);
                prop_assert!(share >= (target - config.share_band).max(config.min_share) - 1e-9);
            }
        }
    }
}
