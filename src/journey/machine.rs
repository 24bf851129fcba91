//! Tier state machine: a reducer over `(MilestoneState, MealLedger, command)`.
//!
//! The reducer is total. Expected conditions (duplicates, unknown meals,
//! skips of already-rated meals) come back as an [`ApplyOutcome`] rather than
//! an error. The ledger handed in must already reflect the event; the caller
//! owns atomicity (scratch copy, invariant check, commit or revert).

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;

use chrono::{DateTime, Days, FixedOffset, NaiveDate, Utc};
use serde::Serialize;

use crate::blueprint::assembler;
use crate::core::config::Config;
use crate::core::errors::GjError;
use crate::experiment::manager;
use crate::experiment::model::ExperimentResult;
use crate::journey::gate::InsightTab;
use crate::journey::milestones::{baseline_day_id, checkpoint_id, evidence_day_id};
use crate::journey::state::{
    BASELINE_DAYS, CHECKPOINT_DAYS, EVIDENCE_DAYS, EvidenceDay, MilestoneState,
    ONBOARDING_RATINGS, SuspectedTrigger,
};
use crate::journey::tier::Tier;
use crate::source::adapter::JourneyEvent;
use crate::source::ledger::MealLedger;
use crate::source::meal::{MealFact, MealId, RatingStatus, calendar_day};
use crate::streak::tracker::DayRecord;

/// Length of the activity window that ends at each checkpoint.
const ACTIVITY_WINDOW_DAYS: u64 = 30;

// ──────────────────── commands and outcomes ────────────────────

/// Input to [`reduce`].
#[derive(Debug, Clone, PartialEq)]
pub enum JourneyCommand {
    Event(JourneyEvent),
    /// Re-evaluate calendar-driven state (streak decay, checkpoints).
    Tick { now: DateTime<Utc> },
}

impl JourneyCommand {
    #[must_use]
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Event(event) => event.at(),
            Self::Tick { now } => *now,
        }
    }
}

/// Something observable that happened while reducing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Transition {
    MilestoneReached {
        milestone: String,
        tier: Tier,
    },
    TierCompleted {
        tier: Tier,
    },
    TabUnlocked {
        tab: InsightTab,
    },
    ExperimentStarted {
        experiment_id: String,
        category: String,
    },
    ExperimentBound {
        experiment_id: String,
        meal_id: MealId,
    },
    ExperimentResolved {
        experiment_id: String,
        category: String,
        result: ExperimentResult,
        percentage_change: Option<f64>,
    },
    ExperimentAbandoned {
        experiment_id: String,
        category: String,
    },
    CheckpointReached {
        day: u32,
        summary: String,
    },
    BlueprintAssembled {
        source_digest: String,
        rated_days: usize,
    },
    BlueprintRefused {
        error_code: &'static str,
        reason: String,
    },
    AiGuideStored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    /// The event references a meal the ledger has never seen.
    MissingReferent { meal_id: MealId },
    /// A skip arrived for a meal that already carries a rating.
    AlreadyRated { meal_id: MealId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied(Vec<Transition>),
    Duplicate,
    Skipped(SkipReason),
}

impl ApplyOutcome {
    #[must_use]
    pub fn transitions(&self) -> &[Transition] {
        match self {
            Self::Applied(transitions) => transitions,
            Self::Duplicate | Self::Skipped(_) => &[],
        }
    }
}

/// Read-only inputs shared by every reduction.
#[derive(Debug, Clone, Copy)]
pub struct ReduceContext<'a> {
    pub config: &'a Config,
    pub tz: FixedOffset,
}

// ──────────────────── reducer ────────────────────

/// Apply one command to `state`.
pub fn reduce(
    state: &mut MilestoneState,
    ledger: &MealLedger,
    command: &JourneyCommand,
    ctx: ReduceContext<'_>,
) -> ApplyOutcome {
    let mut out = Vec::new();
    match command {
        JourneyCommand::Event(event) => {
            let event_id = event.event_id();
            if state.processed.contains(&event_id) {
                return ApplyOutcome::Duplicate;
            }
            match event {
                JourneyEvent::MealLogged { meal_id, at, .. } => {
                    let Some(meal) = ledger.get(meal_id) else {
                        return missing(meal_id);
                    };
                    on_logged(state, ledger, meal, *at, ctx, &mut out);
                }
                JourneyEvent::MealRated {
                    meal_id,
                    at,
                    rating,
                } => {
                    let Some(meal) = ledger.get(meal_id) else {
                        return missing(meal_id);
                    };
                    let rating = meal.completed_rating().unwrap_or(*rating);
                    on_rated(state, ledger, meal_id, rating, *at, ctx, &mut out);
                }
                JourneyEvent::MealSkipped { meal_id, .. } => {
                    let Some(meal) = ledger.get(meal_id) else {
                        return missing(meal_id);
                    };
                    if meal.rating_status == RatingStatus::Completed {
                        return ApplyOutcome::Skipped(SkipReason::AlreadyRated {
                            meal_id: meal_id.clone(),
                        });
                    }
                }
            }
            state.processed.insert(event_id);
            advance_calendar(state, ledger, event.at(), ctx, &mut out);
        }
        JourneyCommand::Tick { now } => {
            let today = calendar_day(*now, &ctx.tz);
            state.current_streak = state.streak.current_as_of(today);
            advance_calendar(state, ledger, *now, ctx, &mut out);
        }
    }
    state.current_tier = state.derived_tier();
    ApplyOutcome::Applied(out)
}

fn missing(meal_id: &MealId) -> ApplyOutcome {
    ApplyOutcome::Skipped(SkipReason::MissingReferent {
        meal_id: meal_id.clone(),
    })
}

fn reached(out: &mut Vec<Transition>, tier: Tier, milestone: impl Into<String>) {
    out.push(Transition::MilestoneReached {
        milestone: milestone.into(),
        tier,
    });
}

fn on_logged(
    state: &mut MilestoneState,
    ledger: &MealLedger,
    meal: &MealFact,
    at: DateTime<Utc>,
    ctx: ReduceContext<'_>,
    out: &mut Vec<Transition>,
) {
    state.total_meals_logged = state.total_meals_logged.saturating_add(1);
    let day = calendar_day(at, &ctx.tz);
    state.journey_start_date = Some(state.journey_start_date.map_or(day, |start| start.min(day)));

    if !state.tier1.first_meal_logged {
        state.tier1.first_meal_logged = true;
        state.tier1.first_meal_logged_at = Some(at);
        reached(out, Tier::Tier1, "first_meal_logged");
    }

    if state.is_tier_open(Tier::Tier3)
        && let Some(experiment_id) = manager::auto_bind(&mut state.tier3, meal)
    {
        out.push(Transition::ExperimentBound {
            experiment_id,
            meal_id: meal.id.clone(),
        });
    }

    record_baseline_day(state, ledger, day, at, ctx, out);
}

fn on_rated(
    state: &mut MilestoneState,
    ledger: &MealLedger,
    meal_id: &MealId,
    rating: u8,
    at: DateTime<Utc>,
    ctx: ReduceContext<'_>,
    out: &mut Vec<Transition>,
) {
    state.total_meals_rated = state
        .total_meals_rated
        .saturating_add(1)
        .min(state.total_meals_logged);
    let day = calendar_day(at, &ctx.tz);

    if state.streak.record_day(day) == DayRecord::Backfill {
        state.streak.rebuild(&ledger.rated_days(&ctx.tz));
    }
    state.longest_streak = state.streak.longest;
    state.current_streak = state.streak.current_as_of(day);

    // Tier 1: onboarding.
    let t1 = &mut state.tier1;
    if !t1.first_meal_rated {
        t1.first_meal_rated = true;
        t1.first_meal_rated_at = Some(at);
        reached(out, Tier::Tier1, "first_meal_rated");
    }
    if !t1.three_meals_completed && state.total_meals_rated >= ONBOARDING_RATINGS {
        t1.three_meals_completed = true;
        t1.three_meals_completed_at = Some(at);
        t1.pattern_detection_unlocked = true;
        reached(out, Tier::Tier1, "three_meals_completed");
        out.push(Transition::TierCompleted { tier: Tier::Tier1 });
        out.push(Transition::TabUnlocked {
            tab: InsightTab::Analysis,
        });
    }

    // Tier 2: distinct rated days.
    if state.is_tier_open(Tier::Tier2)
        && !state.tier2.evidence_streak_complete
        && !state.tier2.has_day(day)
    {
        let t2 = &mut state.tier2;
        t2.evidence_days.push(EvidenceDay {
            date: day,
            completed_at: at,
        });
        let n = t2.evidence_days.len();
        match n {
            1 => t2.day1_complete = true,
            2 => t2.day2_complete = true,
            _ => t2.day3_complete = true,
        }
        reached(out, Tier::Tier2, evidence_day_id(n));
        if n >= EVIDENCE_DAYS {
            t2.evidence_streak_complete = true;
            t2.completed_at = Some(at);
            t2.suspected_trigger = suspect_trigger(ledger, ctx.config.journey.suspect_min_rating);
            t2.experiments_unlocked = true;
            reached(out, Tier::Tier2, "suspected_trigger");
            out.push(Transition::TierCompleted { tier: Tier::Tier2 });
            out.push(Transition::TabUnlocked {
                tab: InsightTab::Experiments,
            });
        }
    }

    // Tier 3: the experiment meal's rating resolves the experiment.
    if state.is_tier_open(Tier::Tier3) {
        let had_first = state.tier3.first_experiment_completed;
        let had_causality = state.tier3.causality_confirmed;
        if let Some(experiment) = manager::resolve_on_rating(
            &mut state.tier3,
            ledger,
            meal_id,
            rating,
            at,
            &ctx.config.experiment,
        ) {
            out.push(Transition::ExperimentResolved {
                experiment_id: experiment.id.clone(),
                category: experiment.trigger_category.clone(),
                result: experiment.result.unwrap_or(ExperimentResult::Inconclusive),
                percentage_change: experiment.percentage_change,
            });
            if !had_first {
                reached(out, Tier::Tier3, "first_experiment_completed");
                out.push(Transition::TierCompleted { tier: Tier::Tier3 });
            }
            if !had_causality && state.tier3.causality_confirmed {
                reached(out, Tier::Tier3, "causality_confirmed");
            }
        }
    }

    record_baseline_day(state, ledger, day, at, ctx, out);
}

/// Tier 4: count `day` once it has both a logged and a rated meal.
fn record_baseline_day(
    state: &mut MilestoneState,
    ledger: &MealLedger,
    day: NaiveDate,
    at: DateTime<Utc>,
    ctx: ReduceContext<'_>,
    out: &mut Vec<Transition>,
) {
    if !state.is_tier_open(Tier::Tier4) || state.tier4.weekly_baseline_complete {
        return;
    }
    let opened_on = state
        .tier3
        .first_experiment_completed_at
        .map(|ts| calendar_day(ts, &ctx.tz));
    if opened_on.is_some_and(|opened| day < opened)
        || state.tier4.has_day(day)
        || !ledger.day_has_log_and_rating(day, &ctx.tz)
    {
        return;
    }

    let t4 = &mut state.tier4;
    let Some(slot) = t4.day_completions.iter_mut().find(|d| !d.is_complete) else {
        return;
    };
    slot.date = Some(day);
    slot.is_complete = true;
    slot.completed_at = Some(at);
    reached(out, Tier::Tier4, baseline_day_id(usize::from(slot.day_number)));

    if t4.completed_days() >= BASELINE_DAYS {
        t4.weekly_baseline_complete = true;
        t4.completed_at = Some(at);
        t4.ai_guide_unlocked = true;
        out.push(Transition::TierCompleted { tier: Tier::Tier4 });
        out.push(Transition::TabUnlocked {
            tab: InsightTab::AiGuide,
        });
    }
}

/// Tier 5: day-30/60/90 checkpoints, in order. Day N is due N days after the
/// journey start and needs enough rated days in its own window
/// `[start + N - 30, start + N)`.
fn advance_calendar(
    state: &mut MilestoneState,
    ledger: &MealLedger,
    now: DateTime<Utc>,
    ctx: ReduceContext<'_>,
    out: &mut Vec<Transition>,
) {
    if !state.is_tier_open(Tier::Tier5) {
        return;
    }
    let Some(start) = state.journey_start_date else {
        return;
    };
    let today = calendar_day(now, &ctx.tz);
    let ratio = ctx.config.checkpoints.min_activity_ratio;

    for (index, offset) in CHECKPOINT_DAYS.iter().enumerate() {
        let Some(checkpoint) = state.tier5.checkpoint_mut(index) else {
            break;
        };
        if checkpoint.complete {
            continue;
        }
        let Some(due) = start.checked_add_days(Days::new(u64::from(*offset))) else {
            break;
        };
        if today < due {
            break;
        }
        let Some(activity) = window_activity(ledger, due, &ctx.tz) else {
            break;
        };
        if (activity.rated_days as f64) < ratio * ACTIVITY_WINDOW_DAYS as f64 {
            break;
        }

        let summary = activity.summary(*offset);
        checkpoint.complete = true;
        checkpoint.completed_at = Some(now);
        checkpoint.summary = Some(summary.clone());
        reached(out, Tier::Tier5, checkpoint_id(*offset));
        out.push(Transition::CheckpointReached {
            day: *offset,
            summary,
        });

        if index + 1 == CHECKPOINT_DAYS.len() {
            state.tier5.blueprint_unlocked = true;
            out.push(Transition::TierCompleted { tier: Tier::Tier5 });
            out.push(Transition::TabUnlocked {
                tab: InsightTab::Blueprint,
            });
            assemble_into(state, ledger, now, ctx, out);
        }
    }
}

/// Assemble the Blueprint and store it. A refusal leaves the stored
/// Blueprint untouched and is reported as a transition.
pub fn assemble_into(
    state: &mut MilestoneState,
    ledger: &MealLedger,
    now: DateTime<Utc>,
    ctx: ReduceContext<'_>,
    out: &mut Vec<Transition>,
) {
    match assembler::assemble(&ledger.snapshot(), &ctx.tz, &ctx.config.blueprint) {
        Ok(blueprint) => {
            let first = state.tier5.blueprint.is_none();
            out.push(Transition::BlueprintAssembled {
                source_digest: blueprint.source_digest.clone(),
                rated_days: blueprint.rated_days,
            });
            state.tier5.blueprint = Some(blueprint);
            state.tier5.blueprint_generated_at = Some(now);
            if first {
                reached(out, Tier::Tier5, "blueprint_ready");
            }
        }
        Err(err) => out.push(refusal(&err)),
    }
}

fn refusal(err: &GjError) -> Transition {
    Transition::BlueprintRefused {
        error_code: err.code(),
        reason: err.to_string(),
    }
}

struct WindowActivity {
    start: NaiveDate,
    end: NaiveDate,
    rated_days: usize,
    mean_rating: Option<f64>,
}

impl WindowActivity {
    fn summary(&self, offset: u32) -> String {
        let mean = self
            .mean_rating
            .map_or_else(|| "n/a".to_string(), |m| format!("{m:.1}"));
        let last = self.end.pred_opt().unwrap_or(self.end);
        format!(
            "Day {offset}: rated on {}/{ACTIVITY_WINDOW_DAYS} days from {} to {last}, average bloating {mean}",
            self.rated_days, self.start
        )
    }
}

/// Activity in the window `[end - 30, end)`.
fn window_activity(ledger: &MealLedger, end: NaiveDate, tz: &FixedOffset) -> Option<WindowActivity> {
    let start = end.checked_sub_days(Days::new(ACTIVITY_WINDOW_DAYS))?;
    let meals = ledger.ratings_between(start, end, tz);
    let mut days: Vec<NaiveDate> = meals.iter().filter_map(|m| m.rated_day(tz)).collect();
    days.sort_unstable();
    days.dedup();
    let ratings: Vec<f64> = meals
        .iter()
        .filter_map(|m| m.completed_rating().map(f64::from))
        .collect();
    let mean_rating = if ratings.is_empty() {
        None
    } else {
        Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
    };
    Some(WindowActivity {
        start,
        end,
        rated_days: days.len(),
        mean_rating,
    })
}

// ──────────────────── suspected trigger ────────────────────

#[derive(Default)]
struct Suspicion {
    count: usize,
    sum: f64,
    first_seen: usize,
    foods: BTreeMap<String, usize>,
}

/// Most frequent category among completed ratings at or above `min_rating`;
/// ties go to the higher average rating, then to the category seen first.
#[must_use]
pub fn suspect_trigger(ledger: &MealLedger, min_rating: u8) -> Option<SuspectedTrigger> {
    let mut tallies: BTreeMap<&str, Suspicion> = BTreeMap::new();
    let mut seen = 0usize;
    for meal in ledger.rated_oldest_first() {
        let Some(rating) = meal.completed_rating().filter(|r| *r >= min_rating) else {
            continue;
        };
        for category in meal.categories() {
            let tally = tallies.entry(category).or_insert_with(|| {
                seen += 1;
                Suspicion {
                    first_seen: seen,
                    ..Suspicion::default()
                }
            });
            tally.count += 1;
            tally.sum += f64::from(rating);
        }
        for trigger in &meal.triggers {
            if let Some(tally) = tallies.get_mut(trigger.category.as_str()) {
                *tally.foods.entry(trigger.food.clone()).or_default() += 1;
            }
        }
    }

    tallies
        .into_iter()
        .max_by(|(_, a), (_, b)| {
            a.count
                .cmp(&b.count)
                .then_with(|| (a.sum / a.count as f64).total_cmp(&(b.sum / b.count as f64)))
                .then_with(|| b.first_seen.cmp(&a.first_seen))
        })
        .map(|(category, tally)| SuspectedTrigger {
            category: category.to_string(),
            food: tally
                .foods
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                .map_or_else(|| category.to_string(), |(food, _)| food.clone()),
            occurrences: tally.count,
            average_rating: tally.sum / tally.count as f64,
        })
}
