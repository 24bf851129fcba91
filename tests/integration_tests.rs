//! Integration tests: the public engine API driven through a full 90-day
//! journey, state-store round trips, and CLI smoke tests.

mod common;

use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Value, json};

use gut_journey::blueprint::report::Severity;
use gut_journey::core::config::Config;
use gut_journey::engine::JourneyEngine;
use gut_journey::experiment::model::ExperimentResult;
use gut_journey::journey::gate::InsightTab;
use gut_journey::journey::guide::AiGuideConsultation;
use gut_journey::journey::machine::{ApplyOutcome, Transition};
use gut_journey::journey::tier::{Tier, TierStatus};
use gut_journey::source::meal::{DetectedTrigger, MealFact, MealId, RatingStatus};
use gut_journey::store::sqlite::StateStore;

// ──────────────────── fixtures ────────────────────

fn day0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap()
}

fn at(day: i64, hour: i64, minute: i64) -> DateTime<Utc> {
    day0() + Duration::days(day) + Duration::hours(hour) + Duration::minutes(minute)
}

fn config() -> Config {
    let mut config = Config::default();
    config.journey.utc_offset_minutes = Some(0);
    config
}

fn rated(id: String, logged: DateTime<Utc>, rating: u8, category: &str, food: &str) -> MealFact {
    MealFact {
        id: MealId::new(id),
        created_at: logged,
        rated_at: Some(logged + Duration::minutes(30)),
        rating_status: RatingStatus::Completed,
        bloating_rating: Some(rating),
        triggers: vec![DetectedTrigger {
            category: category.to_string(),
            food: food.to_string(),
            confidence: 0.95,
        }],
    }
}

/// Three rated meals per day: rice breakfast (1), dairy lunch (4 or 5),
/// vegetable dinner (2).
fn day_meals(day: i64) -> Vec<MealFact> {
    vec![
        rated(format!("d{day:03}-breakfast"), at(day, 8, 0), 1, "rice", "rice porridge"),
        rated(
            format!("d{day:03}-lunch"),
            at(day, 12, 30),
            if day % 2 == 0 { 5 } else { 4 },
            "dairy",
            "cheese toastie",
        ),
        rated(format!("d{day:03}-dinner"), at(day, 19, 0), 2, "vegetables", "roast vegetables"),
    ]
}

fn history(days: std::ops::RangeInclusive<i64>) -> Vec<MealFact> {
    days.flat_map(day_meals).collect()
}

/// Engine past the evidence tier with a dairy experiment started on day 3.
fn engine_with_experiment() -> JourneyEngine {
    let mut engine = JourneyEngine::new("journey-user", config(), day0());
    engine.replay(&history(0..=2), at(2, 23, 0)).unwrap();
    assert!(engine.is_tab_unlocked(InsightTab::Experiments));
    engine.start_experiment("dairy", at(3, 6, 0)).unwrap();
    engine
}

// ──────────────────── engine ────────────────────

#[test]
fn ninety_day_journey_reaches_blueprint() {
    let mut engine = engine_with_experiment();
    let report = engine.replay(&history(0..=95), at(95, 23, 0)).unwrap();

    assert_eq!(report.duplicates(), 18);
    assert!(report.skipped().is_empty());

    let state = engine.state();
    assert_eq!(state.current_tier, Tier::Tier5);
    for tier in Tier::ALL {
        assert_eq!(state.tier_status(tier), TierStatus::Completed, "{tier}");
    }
    for tab in InsightTab::ALL {
        assert!(engine.is_tab_unlocked(tab), "{tab} still locked");
    }
    assert_eq!(state.total_meals_logged, 96 * 3);
    assert_eq!(state.total_meals_rated, 96 * 3);
    assert_eq!(state.longest_streak, 96);
    assert_eq!(state.current_streak, 96);

    let experiment = &state.tier3.completed_experiments[0];
    assert_eq!(experiment.result, Some(ExperimentResult::TriggerConfirmed));
    assert_eq!(experiment.experiment_meal_id, Some(MealId::new("d003-lunch")));
    assert_eq!(experiment.control_meal_ids.len(), 5);
    assert!(state.tier3.causality_confirmed);

    assert!(state.tier4.weekly_baseline_complete);
    assert!(state.tier5.day30.complete && state.tier5.day60.complete && state.tier5.day90.complete);

    let blueprint = state.tier5.blueprint.as_ref().expect("blueprint assembled at day 90");
    assert_eq!(blueprint.history_start, day0().date_naive());
    assert!(blueprint.rated_days >= 90);
    let dairy = blueprint
        .confirmed_triggers
        .iter()
        .find(|t| t.category == "dairy")
        .expect("dairy confirmed");
    assert_eq!(dairy.severity, Severity::Strong);
    assert_eq!(dairy.food, "cheese toastie");
    assert!(blueprint.safe_foods.iter().any(|s| s.category == "vegetables"));
    assert_eq!(blueprint.food_pyramid.avoid_completely, vec!["dairy".to_string()]);
    assert!(blueprint.food_pyramid.healing_foods.contains(&"rice".to_string()));
    assert!(!blueprint.food_pyramid.enjoy_freely.contains(&"rice".to_string()));

    let milestones = engine.milestones();
    assert!(milestones.iter().all(|m| m.status == TierStatus::Completed));
}

fn position(transitions: &[&Transition], pred: impl Fn(&Transition) -> bool) -> usize {
    transitions
        .iter()
        .position(|&t| pred(t))
        .expect("transition present")
}

#[test]
fn transitions_arrive_in_journey_order() {
    let mut engine = engine_with_experiment();
    let report = engine.replay(&history(0..=95), at(95, 23, 0)).unwrap();

    let transitions = report.transitions();
    let resolved = position(&transitions, |t| matches!(t, Transition::ExperimentResolved { .. }));
    let guide = position(&transitions, |t| {
        matches!(t, Transition::TabUnlocked { tab: InsightTab::AiGuide })
    });
    let day30 = position(&transitions, |t| matches!(t, Transition::CheckpointReached { day: 30, .. }));
    let day90 = position(&transitions, |t| matches!(t, Transition::CheckpointReached { day: 90, .. }));
    let assembled = position(&transitions, |t| matches!(t, Transition::BlueprintAssembled { .. }));
    assert!(resolved < guide && guide < day30 && day30 < day90 && day90 < assembled);
}

#[test]
fn blueprint_is_refused_before_thirty_rated_days() {
    let mut engine = JourneyEngine::new("early", config(), day0());
    engine.replay(&history(0..=10), at(10, 23, 0)).unwrap();
    let err = engine.preview_blueprint().unwrap_err();
    assert_eq!(err.code(), "GJ-2003");
    assert!(engine.regenerate_blueprint(at(11, 0, 0)).is_err());
}

#[test]
fn ai_guide_is_stored_after_baseline_week() {
    let mut engine = engine_with_experiment();
    let consultation = AiGuideConsultation {
        generated_at: at(4, 9, 0),
        greeting: "Hi".to_string(),
        analysis: "Dairy is a clear trigger.".to_string(),
        recommendations: vec!["Try lactose-free milk".to_string()],
        extra: Value::Null,
    };
    assert!(engine.store_ai_guide(consultation.clone(), at(4, 9, 0)).is_err());

    engine.replay(&history(0..=12), at(12, 23, 0)).unwrap();
    let inputs = engine.guide_inputs();
    assert_eq!(inputs.confirmed_triggers, vec!["dairy".to_string()]);
    assert_eq!(inputs.baseline_days.len(), 7);

    engine.store_ai_guide(consultation.clone(), at(13, 9, 0)).unwrap();
    assert_eq!(engine.state().tier4.ai_guide, Some(consultation));
}

#[test]
fn stored_state_restores_and_replays_as_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::open(&dir.path().join("journey.sqlite3")).unwrap();

    let mut engine = engine_with_experiment();
    engine.replay(&history(0..=40), at(40, 23, 0)).unwrap();
    store.save(None, engine.state()).unwrap();

    let loaded = store.load("journey-user").unwrap().expect("stored");
    assert_eq!(&loaded, engine.state());

    let mut restored = JourneyEngine::restore(loaded.clone(), config()).unwrap();
    let report = restored.replay(&history(0..=40), at(40, 23, 0)).unwrap();
    assert_eq!(report.applied(), 0);
    assert_eq!(restored.state(), &loaded);

    let report = restored.replay(&history(0..=41), at(41, 23, 0)).unwrap();
    assert_eq!(report.applied(), 6);
    store.save(Some(&loaded), restored.state()).unwrap();
    assert_eq!(store.load("journey-user").unwrap().as_ref(), Some(restored.state()));
}

#[test]
fn manual_meal_binds_and_clears_trigger() {
    let mut engine = engine_with_experiment();
    assert_eq!(engine.pending_experiment_meal_id(), None);

    let outcome = engine
        .log_meal(
            MealId::new("manual-dairy"),
            at(3, 7, 0),
            vec![DetectedTrigger {
                category: "dairy".to_string(),
                food: "latte".to_string(),
                confidence: 0.8,
            }],
        )
        .unwrap();
    assert!(matches!(
        outcome.transitions(),
        [Transition::ExperimentBound { .. }, ..]
    ));
    assert_eq!(engine.pending_experiment_meal_id(), Some(&MealId::new("manual-dairy")));

    let rated = engine.complete_experiment(&MealId::new("manual-dairy"), 1, at(3, 8, 0)).unwrap();
    let ApplyOutcome::Applied(transitions) = rated else {
        panic!("rating should apply");
    };
    assert!(transitions.iter().any(|t| matches!(
        t,
        Transition::ExperimentResolved {
            result: ExperimentResult::TriggerCleared,
            ..
        }
    )));
}

#[test]
fn silent_months_do_not_earn_later_checkpoints() {
    let mut engine = engine_with_experiment();
    let stream: Vec<MealFact> = history(0..=29).into_iter().chain(history(90..=105)).collect();
    engine.replay(&stream, at(105, 23, 0)).unwrap();

    let t5 = &engine.state().tier5;
    assert!(t5.day30.complete);
    let summary = t5.day30.summary.as_deref().expect("day 30 summary");
    assert!(summary.contains("2026-01-05 to 2026-02-03"), "{summary}");
    assert!(!t5.day60.complete);
    assert!(!t5.day90.complete);
    assert!(!t5.blueprint_unlocked);
    assert!(t5.blueprint.is_none());
    assert!(!engine.is_tab_unlocked(InsightTab::Blueprint));
}

// ──────────────────── CLI ────────────────────

fn meal_record(fact: &MealFact) -> Value {
    let trigger = &fact.triggers[0];
    json!({
        "id": fact.id.as_str(),
        "created_at": fact.created_at.to_rfc3339(),
        "rated_at": fact.rated_at.map(|t| t.to_rfc3339()),
        "rating_status": "completed",
        "bloating_rating": fact.bloating_rating,
        "detected_triggers": [{
            "category": trigger.category,
            "food": trigger.food,
            "confidence": trigger.confidence,
        }],
    })
}

fn write_meals(path: &Path, facts: &[MealFact]) {
    let records: Vec<Value> = facts.iter().map(meal_record).collect();
    fs::write(path, serde_json::to_string_pretty(&records).unwrap()).unwrap();
}

/// Config file pointing every data path into `dir`.
fn write_config(dir: &Path) -> String {
    let config_path = dir.join("config.toml");
    let body = format!(
        "[journey]\nutc_offset_minutes = 0\n\n[paths]\nstate_db = \"{}\"\njournal = \"{}\"\nmeal_stream = \"{}\"\n",
        dir.join("state/journey.sqlite3").display(),
        dir.join("journal.jsonl").display(),
        dir.join("meals.json").display(),
    );
    fs::write(&config_path, body).unwrap();
    config_path.to_string_lossy().into_owned()
}

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(
        result.stdout.contains("Usage: gutj [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn version_command_reports_package() {
    let result = common::run_cli_case("version_command_reports_package", &["version"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = result.json();
    assert_eq!(payload["binary"], "gutj");
    assert_eq!(payload["package"], "gut_journey");
}

#[test]
fn config_validate_accepts_file_and_rejects_missing() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let ok = common::run_cli_in("config_validate_ok", dir.path(), &["--config", &config, "config", "validate"]);
    assert!(ok.status.success(), "log: {}", ok.log_path.display());
    assert_eq!(ok.json()["valid"], true);

    let missing = dir.path().join("absent.toml");
    let missing = missing.to_string_lossy();
    let bad = common::run_cli_in("config_validate_missing", dir.path(), &["--config", &missing, "config", "validate"]);
    assert_eq!(bad.status.code(), Some(1), "log: {}", bad.log_path.display());
    assert_eq!(bad.json()["error_code"], "GJ-1002");
}

#[test]
fn cli_drives_evidence_and_experiment() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let meals = dir.path().join("meals.json");
    let home = dir.path();

    write_meals(&meals, &history(0..=2));
    let ingest = common::run_cli_in(
        "cli_ingest_evidence",
        home,
        &["--config", &config, "--now", "2026-01-07T23:00:00Z", "ingest"],
    );
    assert!(ingest.status.success(), "log: {}", ingest.log_path.display());
    let payload = ingest.json();
    assert_eq!(payload["applied"], 18);
    assert_eq!(payload["current_tier"], 3);

    let unbound = common::run_cli_in(
        "cli_bind_without_experiment",
        home,
        &["--config", &config, "--now", "2026-01-08T06:00:00Z", "experiment", "bind", "d002-lunch"],
    );
    assert_eq!(unbound.status.code(), Some(1), "log: {}", unbound.log_path.display());
    assert!(unbound.stderr.contains("GJ-2001"), "log: {}", unbound.log_path.display());

    let start = common::run_cli_in(
        "cli_experiment_start",
        home,
        &["--config", &config, "--now", "2026-01-08T06:00:00Z", "experiment", "start", "Dairy"],
    );
    assert!(start.status.success(), "log: {}", start.log_path.display());
    assert_eq!(start.json()["experiment"]["trigger_category"], "dairy");

    write_meals(&meals, &history(0..=3));
    let resolve = common::run_cli_in(
        "cli_ingest_experiment_day",
        home,
        &["--config", &config, "--now", "2026-01-08T23:00:00Z", "ingest"],
    );
    assert!(resolve.status.success(), "log: {}", resolve.log_path.display());
    let payload = resolve.json();
    assert_eq!(payload["applied"], 6);
    assert_eq!(payload["duplicates"], 18);
    assert_eq!(payload["current_tier"], 4);
    assert!(resolve.stdout.contains("experiment_resolved"));

    let again = common::run_cli_in(
        "cli_ingest_idempotent",
        home,
        &["--config", &config, "--now", "2026-01-08T23:00:00Z", "ingest"],
    );
    assert!(again.status.success(), "log: {}", again.log_path.display());
    assert_eq!(again.json()["applied"], 0);
    assert_eq!(again.json()["revision"], payload["revision"]);

    let tabs = common::run_cli_in("cli_tabs", home, &["--config", &config, "--now", "2026-01-08T23:00:00Z", "tabs"]);
    let tabs = tabs.json();
    let unlocked: Vec<&str> = tabs["tabs"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|t| t["unlocked"] == true)
        .map(|t| t["tab"].as_str().unwrap())
        .collect();
    assert_eq!(unlocked, vec!["analysis", "experiments"]);

    let journal = fs::read_to_string(dir.path().join("journal.jsonl")).unwrap();
    assert!(journal.lines().any(|l| l.contains("\"event\":\"experiment_resolved\"")));
    assert!(journal.lines().any(|l| l.contains("\"event\":\"tier_completed\"")));
    assert!(journal.lines().all(|l| l.contains("\"user\":\"default\"")));
}

#[test]
fn rejected_records_are_journaled_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let meals = dir.path().join("meals.json");
    fs::write(
        &meals,
        r#"[
            {"id": "ok", "created_at": "2026-01-05T08:00:00Z", "rating_status": "pending"},
            {"id": "", "created_at": "2026-01-05T09:00:00Z"},
            {"id": "late", "created_at": "not a time"}
        ]"#,
    )
    .unwrap();

    let result = common::run_cli_in(
        "cli_rejected_records",
        dir.path(),
        &["--config", &config, "--now", "2026-01-05T12:00:00Z", "ingest"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = result.json();
    assert_eq!(payload["applied"], 1);
    assert_eq!(payload["rejected"].as_array().unwrap().len(), 2);

    let journal = fs::read_to_string(dir.path().join("journal.jsonl")).unwrap();
    assert_eq!(
        journal
            .lines()
            .filter(|l| l.contains("\"result\":\"rejected_record\""))
            .count(),
        2
    );
}
