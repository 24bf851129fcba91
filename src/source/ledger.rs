//! In-memory meal ledger rebuilt from the event stream.
//!
//! The ledger is the engine's read model of the meal store: referent checks,
//! control-meal selection, per-day activity, and Blueprint input all read it.
//! Every mutation returns a [`LedgerChange`] that can be reverted, so a failed
//! event leaves the ledger exactly as it was.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};

use chrono::{FixedOffset, NaiveDate};

use crate::source::adapter::JourneyEvent;
use crate::source::meal::{MealFact, MealId, RatingStatus};

/// Result of applying one event to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerChange {
    /// A new meal was inserted.
    Inserted(MealId),
    /// An existing meal changed; holds the previous fact.
    Updated(Box<MealFact>),
    /// The event carried nothing new (duplicate or unknown referent).
    Unchanged,
}

#[derive(Debug, Clone, Default)]
pub struct MealLedger {
    meals: BTreeMap<MealId, MealFact>,
}

impl MealLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.meals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.meals.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &MealId) -> Option<&MealFact> {
        self.meals.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &MealId) -> bool {
        self.meals.contains_key(id)
    }

    /// Apply an event. Ratings and skips for unknown meals are `Unchanged`;
    /// the reducer reports those as missing referents.
    pub fn apply(&mut self, event: &JourneyEvent) -> LedgerChange {
        match event {
            JourneyEvent::MealLogged {
                meal_id,
                at,
                triggers,
            } => {
                if self.meals.contains_key(meal_id) {
                    return LedgerChange::Unchanged;
                }
                self.meals.insert(
                    meal_id.clone(),
                    MealFact {
                        id: meal_id.clone(),
                        created_at: *at,
                        rated_at: None,
                        rating_status: RatingStatus::Pending,
                        bloating_rating: None,
                        triggers: triggers.clone(),
                    },
                );
                LedgerChange::Inserted(meal_id.clone())
            }
            JourneyEvent::MealRated {
                meal_id,
                at,
                rating,
            } => {
                let Some(meal) = self.meals.get_mut(meal_id) else {
                    return LedgerChange::Unchanged;
                };
                if meal.rating_status == RatingStatus::Completed {
                    return LedgerChange::Unchanged;
                }
                let previous = Box::new(meal.clone());
                meal.rating_status = RatingStatus::Completed;
                meal.bloating_rating = Some(*rating);
                meal.rated_at = Some(*at);
                LedgerChange::Updated(previous)
            }
            JourneyEvent::MealSkipped { meal_id, at } => {
                let Some(meal) = self.meals.get_mut(meal_id) else {
                    return LedgerChange::Unchanged;
                };
                if meal.rating_status != RatingStatus::Pending {
                    return LedgerChange::Unchanged;
                }
                let previous = Box::new(meal.clone());
                meal.rating_status = RatingStatus::Skipped;
                meal.rated_at = Some(*at);
                LedgerChange::Updated(previous)
            }
        }
    }

    /// Undo a change returned by [`MealLedger::apply`].
    pub fn revert(&mut self, change: LedgerChange) {
        match change {
            LedgerChange::Inserted(id) => {
                self.meals.remove(&id);
            }
            LedgerChange::Updated(previous) => {
                self.meals.insert(previous.id.clone(), *previous);
            }
            LedgerChange::Unchanged => {}
        }
    }

    /// All meals ordered by creation time.
    #[must_use]
    pub fn facts(&self) -> Vec<&MealFact> {
        let mut facts: Vec<&MealFact> = self.meals.values().collect();
        facts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        facts
    }

    /// Owned copy of [`MealLedger::facts`] for pure consumers.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MealFact> {
        self.facts().into_iter().cloned().collect()
    }

    /// Meals with a completed rating, most recently rated first.
    #[must_use]
    pub fn rated_newest_first(&self) -> Vec<&MealFact> {
        let mut rated: Vec<&MealFact> = self.meals.values().filter(|m| m.is_rated()).collect();
        rated.sort_by(|a, b| {
            b.rating_time()
                .cmp(&a.rating_time())
                .then_with(|| b.id.cmp(&a.id))
        });
        rated
    }

    /// Meals with a completed rating, in rating order.
    #[must_use]
    pub fn rated_oldest_first(&self) -> Vec<&MealFact> {
        let mut rated = self.rated_newest_first();
        rated.reverse();
        rated
    }

    #[must_use]
    pub fn rated_count(&self) -> usize {
        self.meals.values().filter(|m| m.is_rated()).count()
    }

    /// Calendar days carrying at least one completed rating.
    #[must_use]
    pub fn rated_days(&self, tz: &FixedOffset) -> BTreeSet<NaiveDate> {
        self.meals.values().filter_map(|m| m.rated_day(tz)).collect()
    }

    /// Whether `day` has at least one logged meal and one completed rating.
    #[must_use]
    pub fn day_has_log_and_rating(&self, day: NaiveDate, tz: &FixedOffset) -> bool {
        let logged = self.meals.values().any(|m| m.logged_day(tz) == day);
        logged && self.meals.values().any(|m| m.rated_day(tz) == Some(day))
    }

    /// Completed ratings whose rating falls within `[start, end)`.
    #[must_use]
    pub fn ratings_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        tz: &FixedOffset,
    ) -> Vec<&MealFact> {
        self.meals
            .values()
            .filter(|m| m.rated_day(tz).is_some_and(|d| d >= start && d < end))
            .collect()
    }

    /// Most recently seen food name for a category.
    #[must_use]
    pub fn latest_food_for(&self, category: &str) -> Option<&str> {
        self.facts()
            .into_iter()
            .rev()
            .flat_map(|m| m.triggers.iter())
            .find(|t| t.category.eq_ignore_ascii_case(category))
            .map(|t| t.food.as_str())
    }
}
