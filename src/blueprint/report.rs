//! The 90-day Gut Health Blueprint report.

#![allow(missing_docs)]

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Severity band of a confirmed trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Strong,
    Moderate,
    Mild,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strong => write!(f, "strong"),
            Self::Moderate => write!(f, "moderate"),
            Self::Mild => write!(f, "mild"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedTrigger {
    pub category: String,
    /// Most frequently seen food carrying the category.
    pub food: String,
    pub mean_rating: f64,
    pub occurrences: usize,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeFood {
    pub category: String,
    pub food: String,
    pub mean_rating: f64,
    pub occurrences: usize,
}

/// Category names arranged by how freely they can be eaten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoodPyramid {
    pub avoid_completely: Vec<String>,
    pub limit_intake: Vec<String>,
    /// Safe categories outside the healing allowlist.
    pub enjoy_freely: Vec<String>,
    pub healing_foods: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
}

impl MealType {
    pub const ALL: [Self; 3] = [Self::Breakfast, Self::Lunch, Self::Dinner];

    /// Local-hour bucket `[start, end)` for the meal type.
    #[must_use]
    pub const fn hours(self) -> (u32, u32) {
        match self {
            Self::Breakfast => (5, 11),
            Self::Lunch => (11, 16),
            Self::Dinner => (16, 22),
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Breakfast => "breakfast",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
        }
    }
}

/// Two-hour local window `[start_hour, end_hour)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EatingWindow {
    pub meal_type: MealType,
    pub start_hour: u32,
    pub end_hour: u32,
    pub mean_rating: f64,
    pub meals: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimalEatingTimes {
    pub breakfast: Option<EatingWindow>,
    pub lunch: Option<EatingWindow>,
    pub dinner: Option<EatingWindow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekAverage {
    /// 1-based history week.
    pub week: u32,
    pub average: f64,
    pub rated_meals: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressJourney {
    pub week1_avg: f64,
    pub week4_avg: f64,
    pub week8_avg: f64,
    pub week12_avg: f64,
    /// Percent drop from week 1 to week 12; 0 when week 1 has no average.
    pub overall_improvement: f64,
    pub weekly: Vec<WeekAverage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayPattern {
    BetterWeekends,
    BetterWeekdays,
    Similar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekdayWeekend {
    pub weekday_avg: Option<f64>,
    pub weekend_avg: Option<f64>,
    pub pattern: DayPattern,
}

/// Static report assembled from the full meal history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GutHealthBlueprint {
    pub history_start: NaiveDate,
    pub history_end: NaiveDate,
    pub meals_logged: usize,
    pub meals_rated: usize,
    pub rated_days: usize,
    pub confirmed_triggers: Vec<ConfirmedTrigger>,
    pub safe_foods: Vec<SafeFood>,
    pub food_pyramid: FoodPyramid,
    pub optimal_eating_times: OptimalEatingTimes,
    pub progress_journey: ProgressJourney,
    pub weekday_weekend: WeekdayWeekend,
    /// SHA-256 over the canonical history the report was built from.
    pub source_digest: String,
}
