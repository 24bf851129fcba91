//! Normalized meal facts as read from the external meal store.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Opaque meal identifier assigned by the meal store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MealId(String);

impl MealId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MealId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Rating lifecycle of a logged meal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingStatus {
    Pending,
    Skipped,
    Completed,
}

impl fmt::Display for RatingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Skipped => write!(f, "skipped"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// A trigger the food-recognition collaborator attached to a meal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedTrigger {
    /// Lowercased trigger category (`dairy`, `gluten`, ...).
    pub category: String,
    pub food: String,
    pub confidence: f64,
}

/// One meal as the engine sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealFact {
    pub id: MealId,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rated_at: Option<DateTime<Utc>>,
    pub rating_status: RatingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bloating_rating: Option<u8>,
    #[serde(default)]
    pub triggers: Vec<DetectedTrigger>,
}

impl MealFact {
    /// The bloating rating if the meal has a completed rating.
    #[must_use]
    pub fn completed_rating(&self) -> Option<u8> {
        match self.rating_status {
            RatingStatus::Completed => self.bloating_rating,
            _ => None,
        }
    }

    #[must_use]
    pub fn is_rated(&self) -> bool {
        self.completed_rating().is_some()
    }

    #[must_use]
    pub fn has_category(&self, category: &str) -> bool {
        self.triggers
            .iter()
            .any(|t| t.category.eq_ignore_ascii_case(category))
    }

    /// Distinct categories on the meal, each counted once.
    #[must_use]
    pub fn categories(&self) -> BTreeSet<&str> {
        self.triggers.iter().map(|t| t.category.as_str()).collect()
    }

    /// When the rating landed; the creation time when the store omitted it.
    #[must_use]
    pub fn rating_time(&self) -> DateTime<Utc> {
        self.rated_at
            .filter(|at| *at >= self.created_at)
            .unwrap_or(self.created_at)
    }

    #[must_use]
    pub fn logged_day(&self, tz: &FixedOffset) -> NaiveDate {
        calendar_day(self.created_at, tz)
    }

    /// Calendar day of a completed rating.
    #[must_use]
    pub fn rated_day(&self, tz: &FixedOffset) -> Option<NaiveDate> {
        self.is_rated().then(|| calendar_day(self.rating_time(), tz))
    }
}

/// Calendar day of `ts` in the user's offset.
#[must_use]
pub fn calendar_day(ts: DateTime<Utc>, tz: &FixedOffset) -> NaiveDate {
    ts.with_timezone(tz).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fact(status: RatingStatus, rating: Option<u8>) -> MealFact {
        MealFact {
            id: MealId::new("m1"),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap(),
            rated_at: Some(Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap()),
            rating_status: status,
            bloating_rating: rating,
            triggers: vec![DetectedTrigger {
                category: "dairy".to_string(),
                food: "latte".to_string(),
                confidence: 0.9,
            }],
        }
    }

    #[test]
    fn only_completed_ratings_count() {
        assert_eq!(fact(RatingStatus::Completed, Some(4)).completed_rating(), Some(4));
        assert_eq!(fact(RatingStatus::Pending, Some(4)).completed_rating(), None);
        assert_eq!(fact(RatingStatus::Skipped, None).completed_rating(), None);
    }

    #[test]
    fn days_follow_the_configured_offset() {
        let meal = fact(RatingStatus::Completed, Some(2));
        let utc = FixedOffset::east_opt(0).unwrap();
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        assert_eq!(
            meal.logged_day(&utc),
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
        );
        assert_eq!(
            meal.logged_day(&tokyo),
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
        );
        assert_eq!(
            meal.rated_day(&utc),
            Some(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap())
        );
    }

    #[test]
    fn rating_time_never_precedes_creation() {
        let mut meal = fact(RatingStatus::Completed, Some(3));
        meal.rated_at = Some(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(meal.rating_time(), meal.created_at);
    }

    #[test]
    fn category_lookup_is_case_insensitive() {
        let meal = fact(RatingStatus::Completed, Some(3));
        assert!(meal.has_category("Dairy"));
        assert!(!meal.has_category("gluten"));
    }
}
