//! Milestone display projection. Recomputed from state on every read.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::journey::state::MilestoneState;
use crate::journey::tier::{Tier, TierStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Milestone {
    pub id: String,
    pub tier: Tier,
    pub title: String,
    pub status: TierStatus,
    pub completed_at: Option<DateTime<Utc>>,
    /// 1-based position across the whole journey.
    pub order: u32,
}

/// Milestone id for the n-th (1-based) evidence day.
#[must_use]
pub fn evidence_day_id(n: usize) -> String {
    format!("evidence_day_{n}")
}

/// Milestone id for the n-th (1-based) baseline day.
#[must_use]
pub fn baseline_day_id(n: usize) -> String {
    format!("baseline_day_{n}")
}

/// Milestone id for a day-N checkpoint.
#[must_use]
pub fn checkpoint_id(day: u32) -> String {
    format!("day_{day}")
}

struct Step {
    id: String,
    tier: Tier,
    title: String,
    done: bool,
    completed_at: Option<DateTime<Utc>>,
}

fn step(
    tier: Tier,
    id: impl Into<String>,
    title: impl Into<String>,
    done: bool,
    completed_at: Option<DateTime<Utc>>,
) -> Step {
    Step {
        id: id.into(),
        tier,
        title: title.into(),
        done,
        completed_at,
    }
}

fn steps(state: &MilestoneState) -> Vec<Step> {
    let t1 = &state.tier1;
    let t2 = &state.tier2;
    let t3 = &state.tier3;
    let t4 = &state.tier4;
    let t5 = &state.tier5;

    let mut out = vec![
        step(Tier::Tier1, "first_meal_logged", "Log your first meal", t1.first_meal_logged, t1.first_meal_logged_at),
        step(Tier::Tier1, "first_meal_rated", "Rate your first meal", t1.first_meal_rated, t1.first_meal_rated_at),
        step(
            Tier::Tier1,
            "three_meals_completed",
            "Rate three meals",
            t1.three_meals_completed,
            t1.three_meals_completed_at,
        ),
    ];

    for n in 1..=3 {
        let day = t2.evidence_days.get(n - 1);
        out.push(step(
            Tier::Tier2,
            evidence_day_id(n),
            format!("Evidence day {n}"),
            day.is_some(),
            day.map(|d| d.completed_at),
        ));
    }
    out.push(step(
        Tier::Tier2,
        "suspected_trigger",
        "Identify a suspected trigger",
        t2.experiments_unlocked,
        t2.completed_at,
    ));

    let started = t3.current_experiment.is_some()
        || !t3.completed_experiments.is_empty()
        || !t3.abandoned_experiments.is_empty();
    let first_started_at = t3
        .completed_experiments
        .iter()
        .chain(t3.abandoned_experiments.iter())
        .chain(t3.current_experiment.iter())
        .map(|e| e.started_at)
        .min();
    out.push(step(Tier::Tier3, "experiment_started", "Start an experiment", started, first_started_at));
    out.push(step(
        Tier::Tier3,
        "first_experiment_completed",
        "Complete an experiment",
        t3.first_experiment_completed,
        t3.first_experiment_completed_at,
    ));
    out.push(step(
        Tier::Tier3,
        "causality_confirmed",
        "Confirm or clear a trigger",
        t3.causality_confirmed,
        t3.causality_confirmed_at,
    ));

    for day in &t4.day_completions {
        out.push(step(
            Tier::Tier4,
            baseline_day_id(usize::from(day.day_number)),
            format!("Baseline day {}", day.day_number),
            day.is_complete,
            day.completed_at,
        ));
    }

    for (day, checkpoint) in t5.checkpoints() {
        out.push(step(
            Tier::Tier5,
            checkpoint_id(day),
            format!("Day {day} checkpoint"),
            checkpoint.complete,
            checkpoint.completed_at,
        ));
    }
    out.push(step(
        Tier::Tier5,
        "blueprint_ready",
        "Receive your Blueprint",
        t5.blueprint.is_some(),
        t5.blueprint_generated_at,
    ));
    out
}

/// Ordered milestone list. In every open tier the first unfinished milestone
/// is `in_progress`; everything else unfinished is `locked`.
#[must_use]
pub fn milestones(state: &MilestoneState) -> Vec<Milestone> {
    let mut active_marked: Vec<Tier> = Vec::new();
    steps(state)
        .into_iter()
        .zip(1u32..)
        .map(|(s, order)| {
            let status = if s.done {
                TierStatus::Completed
            } else if state.is_tier_open(s.tier) && !active_marked.contains(&s.tier) {
                active_marked.push(s.tier);
                TierStatus::InProgress
            } else {
                TierStatus::Locked
            };
            Milestone {
                id: s.id,
                tier: s.tier,
                title: s.title,
                status,
                completed_at: s.completed_at,
                order,
            }
        })
        .collect()
}
