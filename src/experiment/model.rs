//! Elimination experiment record.

#![allow(missing_docs)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::source::meal::MealId;

/// Classification of a resolved experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentResult {
    TriggerConfirmed,
    TriggerCleared,
    Inconclusive,
}

impl ExperimentResult {
    /// Whether the result says something causal about the trigger.
    #[must_use]
    pub const fn is_decisive(self) -> bool {
        matches!(self, Self::TriggerConfirmed | Self::TriggerCleared)
    }
}

impl fmt::Display for ExperimentResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TriggerConfirmed => write!(f, "trigger_confirmed"),
            Self::TriggerCleared => write!(f, "trigger_cleared"),
            Self::Inconclusive => write!(f, "inconclusive"),
        }
    }
}

/// A single-subject trial of one suspected trigger category.
///
/// Immutable once `result` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub trigger_category: String,
    pub trigger_name: String,
    pub hypothesis: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub experiment_meal_id: Option<MealId>,
    #[serde(default)]
    pub control_meal_ids: Vec<MealId>,
    #[serde(default)]
    pub result: Option<ExperimentResult>,
    #[serde(default)]
    pub bloating_with_trigger: Option<f64>,
    #[serde(default)]
    pub bloating_without_trigger: Option<f64>,
    #[serde(default)]
    pub percentage_change: Option<f64>,
}

impl Experiment {
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.result.is_some()
    }

    /// The meal whose rating will resolve this experiment, while unresolved.
    #[must_use]
    pub fn pending_meal(&self) -> Option<&MealId> {
        if self.is_resolved() {
            None
        } else {
            self.experiment_meal_id.as_ref()
        }
    }
}
