//! Elimination experiment lifecycle: start, bind, resolve, abandon.
//!
//! Every function here mutates only the tier-3 record it is handed. Callers
//! run them on a scratch copy of the state and commit only on success.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::config::ExperimentConfig;
use crate::core::errors::{GjError, Result};
use crate::experiment::model::{Experiment, ExperimentResult};
use crate::journey::state::{Tier2State, Tier3State};
use crate::source::ledger::MealLedger;
use crate::source::meal::{MealFact, MealId};

/// Result of a bind attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum BindOutcome {
    Bound { experiment_id: String },
    /// The experiment already has a meal; first match wins.
    AlreadyBound { experiment_id: String, meal_id: MealId },
}

/// Start an experiment on `category`.
pub fn start(
    tier2: &Tier2State,
    tier3: &mut Tier3State,
    ledger: &MealLedger,
    category: &str,
    now: DateTime<Utc>,
) -> Result<Experiment> {
    let category = category.trim().to_ascii_lowercase();
    if category.is_empty() {
        return Err(GjError::transition(
            "start_experiment",
            "trigger category must not be empty",
        ));
    }
    if !tier2.experiments_unlocked {
        return Err(GjError::transition(
            "start_experiment",
            "experiments unlock after the 72-hour evidence streak",
        ));
    }
    if let Some(active) = &tier3.current_experiment {
        return Err(GjError::transition(
            "start_experiment",
            format!("experiment {} on {} is still active", active.id, active.trigger_category),
        ));
    }

    let trigger_name = ledger
        .latest_food_for(&category)
        .unwrap_or(category.as_str())
        .to_string();
    let experiment = Experiment {
        id: new_experiment_id(),
        hypothesis: format!(
            "Meals containing {trigger_name} ({category}) cause noticeably more bloating than meals without it."
        ),
        trigger_category: category,
        trigger_name,
        started_at: now,
        completed_at: None,
        experiment_meal_id: None,
        control_meal_ids: Vec::new(),
        result: None,
        bloating_with_trigger: None,
        bloating_without_trigger: None,
        percentage_change: None,
    };
    tier3.current_experiment = Some(experiment.clone());
    Ok(experiment)
}

/// Bind a meal explicitly chosen by the caller.
pub fn bind(tier3: &mut Tier3State, ledger: &MealLedger, meal_id: &MealId) -> Result<BindOutcome> {
    let Some(experiment) = tier3.current_experiment.as_mut() else {
        return Err(GjError::transition("bind_experiment_meal", "no active experiment"));
    };
    if let Some(bound) = &experiment.experiment_meal_id {
        return Ok(BindOutcome::AlreadyBound {
            experiment_id: experiment.id.clone(),
            meal_id: bound.clone(),
        });
    }
    let Some(meal) = ledger.get(meal_id) else {
        return Err(GjError::MissingReferent {
            meal_id: meal_id.to_string(),
        });
    };
    if !meal.has_category(&experiment.trigger_category) {
        return Err(GjError::transition(
            "bind_experiment_meal",
            format!("meal {meal_id} does not contain {}", experiment.trigger_category),
        ));
    }
    if meal.created_at < experiment.started_at {
        return Err(GjError::transition(
            "bind_experiment_meal",
            format!("meal {meal_id} was logged before the experiment started"),
        ));
    }
    if meal.is_rated() {
        return Err(GjError::transition(
            "bind_experiment_meal",
            format!("meal {meal_id} is already rated"),
        ));
    }
    experiment.experiment_meal_id = Some(meal_id.clone());
    Ok(BindOutcome::Bound {
        experiment_id: experiment.id.clone(),
    })
}

/// First-match binding for a freshly logged meal. Returns the experiment id
/// when the meal was bound.
pub fn auto_bind(tier3: &mut Tier3State, meal: &MealFact) -> Option<String> {
    let experiment = tier3.current_experiment.as_mut()?;
    if experiment.experiment_meal_id.is_some()
        || meal.is_rated()
        || meal.created_at < experiment.started_at
        || !meal.has_category(&experiment.trigger_category)
    {
        return None;
    }
    experiment.experiment_meal_id = Some(meal.id.clone());
    Some(experiment.id.clone())
}

/// Resolve the current experiment if `meal_id` is its bound meal. The ledger
/// must already hold the rating. Returns the frozen experiment.
pub fn resolve_on_rating(
    tier3: &mut Tier3State,
    ledger: &MealLedger,
    meal_id: &MealId,
    rating: u8,
    at: DateTime<Utc>,
    cfg: &ExperimentConfig,
) -> Option<Experiment> {
    let pending = tier3.current_experiment.as_ref()?.pending_meal()?;
    if pending != meal_id {
        return None;
    }
    let mut experiment = tier3.current_experiment.take()?;

    let controls: Vec<&MealFact> = ledger
        .rated_newest_first()
        .into_iter()
        .filter(|m| m.id != *meal_id && !m.has_category(&experiment.trigger_category))
        .take(cfg.max_control_meals)
        .collect();
    let with_trigger = f64::from(rating);
    let without_trigger = mean_rating(&controls);
    let percentage_change =
        without_trigger.map(|without| (with_trigger - without) / without.max(1.0) * 100.0);

    experiment.control_meal_ids = controls.iter().map(|m| m.id.clone()).collect();
    experiment.bloating_with_trigger = Some(with_trigger);
    experiment.bloating_without_trigger = without_trigger;
    experiment.percentage_change = percentage_change;
    experiment.result = Some(classify(percentage_change, controls.len(), cfg));
    experiment.completed_at = Some(at);

    tier3.experiments_completed = tier3.experiments_completed.saturating_add(1);
    if !tier3.first_experiment_completed {
        tier3.first_experiment_completed = true;
        tier3.first_experiment_completed_at = Some(at);
    }
    if experiment.result.is_some_and(ExperimentResult::is_decisive) && !tier3.causality_confirmed {
        tier3.causality_confirmed = true;
        tier3.causality_confirmed_at = Some(at);
    }
    tier3.completed_experiments.push(experiment.clone());
    Some(experiment)
}

/// Move the unresolved current experiment to the abandoned list.
pub fn abandon(tier3: &mut Tier3State) -> Result<Experiment> {
    let Some(experiment) = tier3.current_experiment.take() else {
        return Err(GjError::transition("abandon_experiment", "no active experiment"));
    };
    tier3.abandoned_experiments.push(experiment.clone());
    Ok(experiment)
}

/// Threshold classifier. Too few controls is always inconclusive.
#[must_use]
pub fn classify(
    percentage_change: Option<f64>,
    controls: usize,
    cfg: &ExperimentConfig,
) -> ExperimentResult {
    match percentage_change {
        Some(pct) if controls >= cfg.min_control_meals.max(1) => {
            if pct >= cfg.confirm_pct {
                ExperimentResult::TriggerConfirmed
            } else if pct <= cfg.clear_pct {
                ExperimentResult::TriggerCleared
            } else {
                ExperimentResult::Inconclusive
            }
        }
        _ => ExperimentResult::Inconclusive,
    }
}

fn mean_rating(meals: &[&MealFact]) -> Option<f64> {
    let ratings: Vec<f64> = meals
        .iter()
        .filter_map(|m| m.completed_rating().map(f64::from))
        .collect();
    if ratings.is_empty() {
        None
    } else {
        Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
    }
}

fn new_experiment_id() -> String {
    format!("exp-{:08x}", rand::random::<u32>())
}
