//! Property-based tests for the journey reducer.
//!
//! Arbitrary meal histories (pending, skipped and rated meals spread over a
//! few weeks) are replayed through the engine to check streak ordering,
//! monotonic gating, replay idempotence, and that skipped-only days never
//! count as activity.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use crate::core::config::Config;
use crate::engine::JourneyEngine;
use crate::journey::gate::InsightTab;
use crate::journey::machine::ApplyOutcome;
use crate::source::adapter;
use crate::source::meal::{DetectedTrigger, MealFact, MealId, RatingStatus};
use crate::streak::tracker::compute_streaks;

const CATEGORIES: [&str; 4] = ["dairy", "gluten", "rice", "fodmap"];
const HISTORY_DAYS: i64 = 21;

// ──────────────────── strategies ────────────────────

#[derive(Debug, Clone, Copy)]
enum Kind {
    Pending,
    Skipped,
    Rated(u8),
}

#[derive(Debug, Clone, Copy)]
struct MealSpec {
    day: i64,
    minute_of_day: i64,
    kind: Kind,
    category: usize,
}

fn arb_kind() -> impl Strategy<Value = Kind> {
    prop_oneof![
        1 => Just(Kind::Pending),
        1 => Just(Kind::Skipped),
        4 => (1u8..=5).prop_map(Kind::Rated),
    ]
}

fn arb_meal() -> impl Strategy<Value = MealSpec> {
    (0..HISTORY_DAYS, 6 * 60..22 * 60i64, arb_kind(), 0..CATEGORIES.len()).prop_map(
        |(day, minute_of_day, kind, category)| MealSpec {
            day,
            minute_of_day,
            kind,
            category,
        },
    )
}

fn arb_history() -> impl Strategy<Value = Vec<MealSpec>> {
    prop::collection::vec(arb_meal(), 0..60)
}

// ──────────────────── fixtures ────────────────────

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
}

fn now() -> DateTime<Utc> {
    base() + Duration::days(HISTORY_DAYS + 2)
}

fn config() -> Config {
    let mut config = Config::default();
    config.journey.utc_offset_minutes = Some(0);
    config
}

fn to_facts(specs: &[MealSpec], id_prefix: &str) -> Vec<MealFact> {
    specs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let created_at = base() + Duration::days(spec.day) + Duration::minutes(spec.minute_of_day);
            let category = CATEGORIES[spec.category];
            let (rating_status, bloating_rating, rated_at) = match spec.kind {
                Kind::Pending => (RatingStatus::Pending, None, None),
                Kind::Skipped => (RatingStatus::Skipped, None, Some(created_at + Duration::minutes(30))),
                Kind::Rated(r) => (
                    RatingStatus::Completed,
                    Some(r),
                    Some(created_at + Duration::minutes(30)),
                ),
            };
            MealFact {
                id: MealId::new(format!("{id_prefix}{i:03}")),
                created_at,
                rated_at,
                rating_status,
                bloating_rating,
                triggers: vec![DetectedTrigger {
                    category: category.to_string(),
                    food: format!("{category} dish"),
                    confidence: 0.9,
                }],
            }
        })
        .collect()
}

fn replayed(facts: &[MealFact]) -> JourneyEngine {
    let mut engine = JourneyEngine::new("prop", config(), base());
    engine.replay(facts, now()).unwrap();
    engine
}

// ──────────────────── property tests ────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The incremental tracker agrees with a full-history scan and the
    /// current streak never exceeds the longest.
    #[test]
    fn streaks_match_full_scan(specs in arb_history()) {
        let facts = to_facts(&specs, "m");
        let engine = replayed(&facts);
        let state = engine.state();
        let tz = engine.offset();
        let scan = compute_streaks(&facts, &tz, now().with_timezone(&tz).date_naive());

        prop_assert!(state.current_streak <= state.longest_streak);
        prop_assert_eq!(state.longest_streak, scan.longest_streak);
        prop_assert_eq!(state.current_streak, scan.current_streak);
        prop_assert!(state.total_meals_rated <= state.total_meals_logged);
    }

    /// Tabs never relock and the tier never moves backwards while events
    /// arrive one at a time.
    #[test]
    fn gating_is_monotonic(specs in arb_history()) {
        let facts = to_facts(&specs, "m");
        let mut engine = JourneyEngine::new("prop", config(), base());
        let mut unlocked = [false; 4];
        let mut tier = engine.state().current_tier;

        for event in adapter::events_for(&facts) {
            engine.apply(event).unwrap();
            let state = engine.state();
            prop_assert!(state.current_tier >= tier);
            tier = state.current_tier;
            for (slot, tab) in InsightTab::ALL.iter().enumerate() {
                let now_unlocked = engine.is_tab_unlocked(*tab);
                prop_assert!(now_unlocked || !unlocked[slot], "{} relocked", tab);
                unlocked[slot] = now_unlocked;
            }
            prop_assert!(state.check_invariants().is_ok());
        }
    }

    /// Replaying the same history again is a no-op: every event is a
    /// duplicate and the state, revision included, is unchanged.
    #[test]
    fn replay_is_idempotent(specs in arb_history()) {
        let facts = to_facts(&specs, "m");
        let mut engine = replayed(&facts);
        let before = engine.state().clone();

        let report = engine.replay(&facts, now()).unwrap();
        prop_assert!(report.outcomes.iter().all(|(_, o)| *o == ApplyOutcome::Duplicate));
        prop_assert!(report.tick.is_empty());
        prop_assert_eq!(engine.state(), &before);
    }

    /// Adding skipped meals never changes streaks, rated counts or progress.
    #[test]
    fn skipped_meals_are_not_activity(
        specs in arb_history(),
        skipped in prop::collection::vec(arb_meal(), 1..20),
    ) {
        let facts = to_facts(&specs, "m");
        let skipped: Vec<MealSpec> = skipped
            .into_iter()
            .map(|s| MealSpec { kind: Kind::Skipped, ..s })
            .collect();
        let mut with_skips = facts.clone();
        with_skips.extend(to_facts(&skipped, "s"));

        let plain = replayed(&facts);
        let noisy = replayed(&with_skips);
        let (a, b) = (plain.state(), noisy.state());

        prop_assert_eq!(a.current_streak, b.current_streak);
        prop_assert_eq!(a.longest_streak, b.longest_streak);
        prop_assert_eq!(a.total_meals_rated, b.total_meals_rated);
        prop_assert_eq!(a.current_tier, b.current_tier);
        prop_assert_eq!(&a.tier2.evidence_days, &b.tier2.evidence_days);
        prop_assert_eq!(b.total_meals_logged, a.total_meals_logged + u32::try_from(skipped.len()).unwrap());
    }
}

// ──────────────────── non-proptest invariant tests ────────────────────

#[test]
fn empty_history_stays_at_tier_one() {
    let engine = replayed(&[]);
    let state = engine.state();
    assert_eq!(state.current_streak, 0);
    assert_eq!(state.longest_streak, 0);
    assert!(InsightTab::ALL.iter().all(|t| !engine.is_tab_unlocked(*t)));
    assert_eq!(state.revision, 0);
}

#[test]
fn only_skipped_meals_never_start_a_streak() {
    let specs: Vec<MealSpec> = (0..10)
        .map(|day| MealSpec {
            day,
            minute_of_day: 12 * 60,
            kind: Kind::Skipped,
            category: 0,
        })
        .collect();
    let engine = replayed(&to_facts(&specs, "s"));
    assert_eq!(engine.state().longest_streak, 0);
    assert_eq!(engine.state().total_meals_rated, 0);
    assert_eq!(engine.state().total_meals_logged, 10);
}
