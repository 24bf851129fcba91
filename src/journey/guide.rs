//! AI Guide payloads exchanged with the external content generator.

#![allow(missing_docs)]

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::experiment::model::ExperimentResult;
use crate::journey::state::{MilestoneState, SuspectedTrigger};
use crate::source::ledger::MealLedger;

/// Content returned by the generator. Stored as given; prose is not validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiGuideConsultation {
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub greeting: String,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Any other fields the generator returned.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentOutcome {
    pub category: String,
    pub food: String,
    pub result: ExperimentResult,
    pub percentage_change: Option<f64>,
}

/// Structured inputs handed to the generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuideInputs {
    pub suspected_trigger: Option<SuspectedTrigger>,
    pub experiments: Vec<ExperimentOutcome>,
    pub confirmed_triggers: Vec<String>,
    pub cleared_triggers: Vec<String>,
    pub baseline_days: Vec<NaiveDate>,
    /// Mean completed rating over the baseline days.
    pub baseline_average: Option<f64>,
    pub meals_logged: u32,
    pub meals_rated: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
}

#[must_use]
pub fn guide_inputs(state: &MilestoneState, ledger: &MealLedger, tz: &FixedOffset) -> GuideInputs {
    let experiments: Vec<ExperimentOutcome> = state
        .tier3
        .completed_experiments
        .iter()
        .filter_map(|e| {
            Some(ExperimentOutcome {
                category: e.trigger_category.clone(),
                food: e.trigger_name.clone(),
                result: e.result?,
                percentage_change: e.percentage_change,
            })
        })
        .collect();
    let with_result = |wanted: ExperimentResult| {
        let mut categories: Vec<String> = experiments
            .iter()
            .filter(|o| o.result == wanted)
            .map(|o| o.category.clone())
            .collect();
        categories.sort();
        categories.dedup();
        categories
    };

    let baseline_days: Vec<NaiveDate> = state
        .tier4
        .day_completions
        .iter()
        .filter(|d| d.is_complete)
        .filter_map(|d| d.date)
        .collect();
    let baseline_ratings: Vec<f64> = ledger
        .rated_oldest_first()
        .into_iter()
        .filter(|m| m.rated_day(tz).is_some_and(|d| baseline_days.contains(&d)))
        .filter_map(|m| m.completed_rating().map(f64::from))
        .collect();
    let baseline_average = if baseline_ratings.is_empty() {
        None
    } else {
        Some(baseline_ratings.iter().sum::<f64>() / baseline_ratings.len() as f64)
    };

    GuideInputs {
        suspected_trigger: state.tier2.suspected_trigger.clone(),
        confirmed_triggers: with_result(ExperimentResult::TriggerConfirmed),
        cleared_triggers: with_result(ExperimentResult::TriggerCleared),
        experiments,
        baseline_days,
        baseline_average,
        meals_logged: state.total_meals_logged,
        meals_rated: state.total_meals_rated,
        current_streak: state.current_streak,
        longest_streak: state.longest_streak,
    }
}
