//! `JourneyEngine`: the per-user facade over the reducer, ledger and
//! experiment lifecycle.
//!
//! Every mutation runs against a scratch copy of the state. The copy is
//! committed only after [`MilestoneState::check_invariants`] passes; on
//! failure the ledger change is reverted too, so an event either updates
//! streak, tier and experiment state together or touches none of them.

#![allow(missing_docs)]

use chrono::{DateTime, FixedOffset, Utc};

use crate::blueprint::assembler;
use crate::blueprint::report::GutHealthBlueprint;
use crate::core::config::Config;
use crate::core::errors::{GjError, Result};
use crate::experiment::manager::{self, BindOutcome};
use crate::experiment::model::Experiment;
use crate::journey::gate::{self, InsightTab, UnlockProgress};
use crate::journey::guide::{self, AiGuideConsultation, GuideInputs};
use crate::journey::machine::{
    self, ApplyOutcome, JourneyCommand, ReduceContext, SkipReason, Transition,
};
use crate::journey::milestones::{self, Milestone};
use crate::journey::state::MilestoneState;
use crate::source::adapter::{self, JourneyEvent, RejectedRecord};
use crate::source::ledger::MealLedger;
use crate::source::meal::{DetectedTrigger, MealFact, MealId, calendar_day};
use crate::streak::tracker::{self, StreakSummary};

/// What a replay did, event by event.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    pub outcomes: Vec<(JourneyEvent, ApplyOutcome)>,
    /// Transitions from the closing calendar tick.
    pub tick: Vec<Transition>,
    /// Records the adapter refused (only populated by [`JourneyEngine::ingest`]).
    pub rejected: Vec<RejectedRecord>,
}

impl ReplayReport {
    #[must_use]
    pub fn applied(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ApplyOutcome::Applied(_)))
            .count()
    }

    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == ApplyOutcome::Duplicate)
            .count()
    }

    #[must_use]
    pub fn skipped(&self) -> Vec<&SkipReason> {
        self.outcomes
            .iter()
            .filter_map(|(_, o)| match o {
                ApplyOutcome::Skipped(reason) => Some(reason),
                _ => None,
            })
            .collect()
    }

    /// All transitions in order, the closing tick last.
    #[must_use]
    pub fn transitions(&self) -> Vec<&Transition> {
        self.outcomes
            .iter()
            .flat_map(|(_, o)| o.transitions())
            .chain(self.tick.iter())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct JourneyEngine {
    config: Config,
    tz: FixedOffset,
    state: MilestoneState,
    ledger: MealLedger,
}

impl JourneyEngine {
    /// Fresh journey for `user_id`.
    #[must_use]
    pub fn new(user_id: impl Into<String>, config: Config, now: DateTime<Utc>) -> Self {
        let tz = config.journey.offset();
        Self {
            config,
            tz,
            state: MilestoneState::new(user_id, now),
            ledger: MealLedger::new(),
        }
    }

    /// Resume from persisted state. The ledger starts empty; replay the meal
    /// stream to rebuild it (already-processed events are no-ops).
    pub fn restore(state: MilestoneState, config: Config) -> Result<Self> {
        state.check_invariants()?;
        let tz = config.journey.offset();
        Ok(Self {
            config,
            tz,
            state,
            ledger: MealLedger::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn offset(&self) -> FixedOffset {
        self.tz
    }

    /// Current milestone state.
    #[must_use]
    pub fn state(&self) -> &MilestoneState {
        &self.state
    }

    #[must_use]
    pub fn into_state(self) -> MilestoneState {
        self.state
    }

    #[must_use]
    pub fn ledger(&self) -> &MealLedger {
        &self.ledger
    }

    fn ctx(&self) -> ReduceContext<'_> {
        ReduceContext {
            config: &self.config,
            tz: self.tz,
        }
    }

    /// Validate and install a scratch state.
    fn commit(&mut self, mut next: MilestoneState, at: DateTime<Utc>) -> Result<()> {
        next.check_invariants()?;
        if next != self.state {
            next.revision = self.state.revision.saturating_add(1);
            next.updated_at = self.state.updated_at.max(at);
        }
        self.state = next;
        Ok(())
    }

    // ──────────────────── events ────────────────────

    /// Apply one meal event atomically.
    pub fn apply(&mut self, event: JourneyEvent) -> Result<ApplyOutcome> {
        let change = self.ledger.apply(&event);
        if self.state.processed.contains(&event.event_id()) {
            return Ok(ApplyOutcome::Duplicate);
        }

        let at = event.at();
        let mut next = self.state.clone();
        let outcome = machine::reduce(&mut next, &self.ledger, &JourneyCommand::Event(event), self.ctx());
        if let Err(err) = self.commit(next, at) {
            self.ledger.revert(change);
            return Err(err);
        }
        Ok(outcome)
    }

    /// Re-evaluate calendar-driven state as of `now`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<Vec<Transition>> {
        let mut next = self.state.clone();
        let outcome = machine::reduce(&mut next, &self.ledger, &JourneyCommand::Tick { now }, self.ctx());
        self.commit(next, now)?;
        Ok(outcome.transitions().to_vec())
    }

    pub fn log_meal(
        &mut self,
        meal_id: MealId,
        at: DateTime<Utc>,
        triggers: Vec<DetectedTrigger>,
    ) -> Result<ApplyOutcome> {
        self.apply(JourneyEvent::MealLogged {
            meal_id,
            at,
            triggers,
        })
    }

    /// Record a completed rating (1..=5).
    pub fn submit_rating(
        &mut self,
        meal_id: MealId,
        rating: u8,
        at: DateTime<Utc>,
    ) -> Result<ApplyOutcome> {
        if !(1..=5).contains(&rating) {
            return Err(GjError::MalformedEvent {
                details: format!("bloating rating {rating} for {meal_id} outside 1..=5"),
            });
        }
        self.apply(JourneyEvent::MealRated {
            meal_id,
            at,
            rating,
        })
    }

    pub fn skip_meal(&mut self, meal_id: MealId, at: DateTime<Utc>) -> Result<ApplyOutcome> {
        self.apply(JourneyEvent::MealSkipped { meal_id, at })
    }

    /// Feed normalized facts through the reducer in event order, then tick.
    pub fn replay(&mut self, facts: &[MealFact], now: DateTime<Utc>) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();
        for event in adapter::events_for(facts) {
            let outcome = self.apply(event.clone())?;
            report.outcomes.push((event, outcome));
        }
        report.tick = self.tick(now)?;
        Ok(report)
    }

    /// Parse, normalize and replay a raw meal-store export.
    pub fn ingest(&mut self, raw: &str, now: DateTime<Utc>) -> Result<ReplayReport> {
        let records = adapter::parse_stream(raw)?;
        let stream = adapter::normalize(&records);
        let mut report = self.replay(&stream.facts, now)?;
        report.rejected = stream.rejected;
        Ok(report)
    }

    // ──────────────────── queries ────────────────────

    #[must_use]
    pub fn is_tab_unlocked(&self, tab: InsightTab) -> bool {
        gate::is_tab_unlocked(tab, &self.state)
    }

    #[must_use]
    pub fn tab_unlock_progress(&self, tab: InsightTab) -> UnlockProgress {
        gate::unlock_progress(tab, &self.state)
    }

    /// Meal whose rating will resolve the current experiment.
    #[must_use]
    pub fn pending_experiment_meal_id(&self) -> Option<&MealId> {
        self.state
            .tier3
            .current_experiment
            .as_ref()
            .and_then(Experiment::pending_meal)
    }

    #[must_use]
    pub fn milestones(&self) -> Vec<Milestone> {
        milestones::milestones(&self.state)
    }

    #[must_use]
    pub fn streak_summary(&self, now: DateTime<Utc>) -> StreakSummary {
        tracker::compute_streaks(&self.ledger.snapshot(), &self.tz, calendar_day(now, &self.tz))
    }

    #[must_use]
    pub fn guide_inputs(&self) -> GuideInputs {
        guide::guide_inputs(&self.state, &self.ledger, &self.tz)
    }

    /// Assemble a Blueprint from the current ledger without storing it.
    pub fn preview_blueprint(&self) -> Result<GutHealthBlueprint> {
        assembler::assemble(&self.ledger.snapshot(), &self.tz, &self.config.blueprint)
    }

    // ──────────────────── commands ────────────────────

    pub fn start_experiment(&mut self, category: &str, now: DateTime<Utc>) -> Result<Experiment> {
        let mut next = self.state.clone();
        let experiment = manager::start(&next.tier2, &mut next.tier3, &self.ledger, category, now)?;
        self.commit(next, now)?;
        Ok(experiment)
    }

    pub fn bind_experiment_meal(
        &mut self,
        meal_id: &MealId,
        now: DateTime<Utc>,
    ) -> Result<BindOutcome> {
        let mut next = self.state.clone();
        let outcome = manager::bind(&mut next.tier3, &self.ledger, meal_id)?;
        self.commit(next, now)?;
        Ok(outcome)
    }

    /// Rate the pending experiment meal. Any other meal is rejected.
    pub fn complete_experiment(
        &mut self,
        meal_id: &MealId,
        rating: u8,
        at: DateTime<Utc>,
    ) -> Result<ApplyOutcome> {
        match self.pending_experiment_meal_id() {
            None => {
                return Err(GjError::transition(
                    "complete_experiment",
                    "no experiment meal is pending",
                ));
            }
            Some(pending) if pending != meal_id => {
                return Err(GjError::transition(
                    "complete_experiment",
                    format!("meal {meal_id} is not the pending experiment meal {pending}"),
                ));
            }
            Some(_) => {}
        }
        self.submit_rating(meal_id.clone(), rating, at)
    }

    pub fn abandon_experiment(&mut self, now: DateTime<Utc>) -> Result<Experiment> {
        let mut next = self.state.clone();
        let experiment = manager::abandon(&mut next.tier3)?;
        self.commit(next, now)?;
        Ok(experiment)
    }

    /// Store the generator's AI Guide payload.
    pub fn store_ai_guide(
        &mut self,
        consultation: AiGuideConsultation,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.state.tier4.ai_guide_unlocked {
            return Err(GjError::transition(
                "store_ai_guide",
                "the AI guide unlocks after the weekly baseline",
            ));
        }
        let mut next = self.state.clone();
        next.tier4.ai_guide = Some(consultation);
        self.commit(next, now)
    }

    /// Store prose the generator returned for the Blueprint.
    pub fn store_blueprint_narrative(&mut self, text: String, now: DateTime<Utc>) -> Result<()> {
        if self.state.tier5.blueprint.is_none() {
            return Err(GjError::transition(
                "store_blueprint_narrative",
                "no blueprint has been assembled",
            ));
        }
        let mut next = self.state.clone();
        next.tier5.blueprint_narrative = Some(text);
        self.commit(next, now)
    }

    /// Rebuild the stored Blueprint from the current ledger.
    pub fn regenerate_blueprint(&mut self, now: DateTime<Utc>) -> Result<GutHealthBlueprint> {
        if !self.state.tier5.blueprint_unlocked {
            return Err(GjError::transition(
                "regenerate_blueprint",
                "the blueprint unlocks at the day-90 checkpoint",
            ));
        }
        let blueprint = self.preview_blueprint()?;
        let mut next = self.state.clone();
        next.tier5.blueprint = Some(blueprint.clone());
        next.tier5.blueprint_generated_at = Some(now);
        self.commit(next, now)?;
        Ok(blueprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::model::ExperimentResult;
    use crate::journey::tier::Tier;
    use crate::source::meal::RatingStatus;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 6, 8, 0, 0).unwrap()
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.journey.utc_offset_minutes = Some(0);
        config
    }

    fn fact(id: &str, at: DateTime<Utc>, rating: Option<u8>, category: &str) -> MealFact {
        MealFact {
            id: MealId::new(id),
            created_at: at,
            rated_at: rating.map(|_| at + Duration::minutes(45)),
            rating_status: if rating.is_some() {
                RatingStatus::Completed
            } else {
                RatingStatus::Pending
            },
            bloating_rating: rating,
            triggers: vec![DetectedTrigger {
                category: category.to_string(),
                food: format!("{category} plate"),
                confidence: 1.0,
            }],
        }
    }

    /// Three rated days: dairy meals rated high, rice meals low.
    fn evidence_facts() -> Vec<MealFact> {
        vec![
            fact("a", t0(), Some(5), "dairy"),
            fact("b", t0() + Duration::hours(2), Some(4), "dairy"),
            fact("c", t0() + Duration::hours(4), Some(2), "rice"),
            fact("d", t0() + Duration::days(1), Some(2), "rice"),
            fact("e", t0() + Duration::days(2), Some(1), "rice"),
        ]
    }

    #[test]
    fn replay_is_idempotent() {
        let facts = evidence_facts();
        let now = t0() + Duration::days(3);
        let mut engine = JourneyEngine::new("u", config(), t0());
        let first = engine.replay(&facts, now).unwrap();
        assert_eq!(first.applied(), 10);
        let after_first = engine.state().clone();

        let second = engine.replay(&facts, now).unwrap();
        assert_eq!(second.duplicates(), 10);
        assert!(second.transitions().is_empty());
        assert_eq!(engine.state(), &after_first);
        assert_eq!(engine.state().total_meals_rated, 5);
    }

    #[test]
    fn restored_state_plus_replay_rebuilds_ledger_only() {
        let facts = evidence_facts();
        let now = t0() + Duration::days(3);
        let mut engine = JourneyEngine::new("u", config(), t0());
        engine.replay(&facts, now).unwrap();
        let saved = engine.state().clone();

        let mut resumed = JourneyEngine::restore(saved.clone(), config()).unwrap();
        assert!(resumed.ledger().is_empty());
        let report = resumed.replay(&facts, now).unwrap();
        assert_eq!(report.applied(), 0);
        assert_eq!(resumed.ledger().len(), 5);
        assert_eq!(resumed.state(), &saved);
    }

    #[test]
    fn fresh_engines_on_same_stream_agree() {
        let facts = evidence_facts();
        let now = t0() + Duration::days(3);
        let mut a = JourneyEngine::new("u", config(), t0());
        let mut b = JourneyEngine::new("u", config(), t0());
        a.replay(&facts, now).unwrap();
        let mut reversed = facts.clone();
        reversed.reverse();
        b.replay(&reversed, now).unwrap();
        assert_eq!(a.state(), b.state());
    }

    #[test]
    fn rejected_command_leaves_state_untouched() {
        let mut engine = JourneyEngine::new("u", config(), t0());
        engine.replay(&evidence_facts()[..3], t0()).unwrap();
        let before = engine.state().clone();
        let err = engine.start_experiment("dairy", t0()).unwrap_err();
        assert!(err.is_precondition());
        assert_eq!(engine.state(), &before);
    }

    #[test]
    fn experiment_round_trip_through_engine() {
        let mut engine = JourneyEngine::new("u", config(), t0());
        engine.replay(&evidence_facts(), t0() + Duration::days(2) + Duration::hours(1)).unwrap();
        assert!(engine.is_tab_unlocked(InsightTab::Experiments));
        assert_eq!(
            engine.state().tier2.suspected_trigger.as_ref().map(|s| s.category.as_str()),
            Some("dairy")
        );

        let start_at = t0() + Duration::days(2) + Duration::hours(2);
        let experiment = engine.start_experiment("dairy", start_at).unwrap();
        assert_eq!(experiment.trigger_name, "dairy plate");
        assert!(engine.pending_experiment_meal_id().is_none());

        let outcome = engine
            .log_meal(
                MealId::new("x"),
                start_at + Duration::hours(1),
                fact("x", start_at, None, "dairy").triggers,
            )
            .unwrap();
        assert!(matches!(
            outcome.transitions().first(),
            Some(Transition::ExperimentBound { .. })
        ));
        assert_eq!(engine.pending_experiment_meal_id(), Some(&MealId::new("x")));

        let wrong = engine
            .complete_experiment(&MealId::new("c"), 5, start_at + Duration::hours(2))
            .unwrap_err();
        assert_eq!(wrong.code(), "GJ-2001");

        let outcome = engine
            .complete_experiment(&MealId::new("x"), 5, start_at + Duration::hours(2))
            .unwrap();
        let resolved = outcome
            .transitions()
            .iter()
            .find_map(|t| match t {
                Transition::ExperimentResolved { result, .. } => Some(*result),
                _ => None,
            })
            .expect("resolution transition");
        assert_eq!(resolved, ExperimentResult::TriggerConfirmed);

        let state = engine.state();
        assert_eq!(state.tier3.experiments_completed, 1);
        assert!(state.tier3.causality_confirmed);
        assert_eq!(state.current_tier, Tier::Tier4);
        assert_eq!(state.tier4.completed_days(), 1);
        assert!(engine.pending_experiment_meal_id().is_none());
    }

    #[test]
    fn abandon_then_restart() {
        let mut engine = JourneyEngine::new("u", config(), t0());
        engine.replay(&evidence_facts(), t0() + Duration::days(3)).unwrap();
        let now = t0() + Duration::days(3);
        engine.start_experiment("dairy", now).unwrap();
        let abandoned = engine.abandon_experiment(now).unwrap();
        assert_eq!(abandoned.trigger_category, "dairy");
        assert_eq!(engine.state().tier3.abandoned_experiments.len(), 1);
        assert!(engine.start_experiment("rice", now).is_ok());
    }

    #[test]
    fn gated_stores_reject_before_unlock() {
        let mut engine = JourneyEngine::new("u", config(), t0());
        let guide = AiGuideConsultation {
            generated_at: t0(),
            greeting: "hi".to_string(),
            analysis: String::new(),
            recommendations: Vec::new(),
            extra: serde_json::Value::Null,
        };
        assert!(engine.store_ai_guide(guide, t0()).is_err());
        assert!(engine.regenerate_blueprint(t0()).is_err());
        assert!(engine.store_blueprint_narrative("x".to_string(), t0()).is_err());
        assert!(matches!(
            engine.preview_blueprint(),
            Err(GjError::InsufficientData { .. })
        ));
    }

    #[test]
    fn invalid_rating_is_malformed() {
        let mut engine = JourneyEngine::new("u", config(), t0());
        engine.log_meal(MealId::new("a"), t0(), Vec::new()).unwrap();
        let err = engine.submit_rating(MealId::new("a"), 9, t0()).unwrap_err();
        assert_eq!(err.code(), "GJ-2004");
        assert_eq!(engine.state().total_meals_rated, 0);
    }

    #[test]
    fn revision_moves_only_on_change() {
        let mut engine = JourneyEngine::new("u", config(), t0());
        engine.log_meal(MealId::new("a"), t0(), Vec::new()).unwrap();
        assert_eq!(engine.state().revision, 1);
        engine.log_meal(MealId::new("a"), t0(), Vec::new()).unwrap();
        engine.tick(t0()).unwrap();
        assert_eq!(engine.state().revision, 1);
    }

    #[test]
    fn ingest_reports_rejected_records() {
        let raw = r#"[
            {"id": "a", "created_at": "2026-04-06T08:00:00Z", "rating_status": "completed", "bloating_rating": 3},
            {"id": "b", "created_at": "not a date"}
        ]"#;
        let mut engine = JourneyEngine::new("u", config(), t0());
        let report = engine.ingest(raw, t0() + Duration::hours(3)).unwrap();
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.applied(), 2);
        assert_eq!(engine.state().total_meals_rated, 1);
    }
}
