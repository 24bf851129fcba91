//! Blueprint assembly over the full meal history.
//!
//! Pure computation: no wall clock and no I/O, so assembling the same history
//! twice yields byte-identical reports. Only completed ratings contribute to
//! any mean; pending and skipped meals count toward `meals_logged` only.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, FixedOffset, NaiveDate, Timelike, Weekday};
use sha2::{Digest, Sha256};

use crate::blueprint::report::{
    ConfirmedTrigger, DayPattern, EatingWindow, FoodPyramid, GutHealthBlueprint, MealType,
    OptimalEatingTimes, ProgressJourney, SafeFood, Severity, WeekAverage, WeekdayWeekend,
};
use crate::core::config::BlueprintConfig;
use crate::core::errors::{GjError, Result};
use crate::source::meal::MealFact;

const WINDOW_HOURS: u32 = 2;
/// Weeks always present in the trend series.
const TRACKED_WEEKS: u32 = 12;

/// Assemble a Blueprint, refusing with `InsufficientData` when fewer than
/// `cfg.min_rated_days` distinct days carry a completed rating.
pub fn assemble(
    facts: &[MealFact],
    tz: &FixedOffset,
    cfg: &BlueprintConfig,
) -> Result<GutHealthBlueprint> {
    let mut history: Vec<&MealFact> = facts.iter().collect();
    history.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let rated_days: BTreeSet<NaiveDate> = history.iter().filter_map(|m| m.rated_day(tz)).collect();
    if rated_days.len() < cfg.min_rated_days {
        return Err(GjError::InsufficientData {
            rated_days: rated_days.len(),
            required: cfg.min_rated_days,
        });
    }

    let rated: Vec<(&MealFact, f64)> = history
        .iter()
        .filter_map(|m| m.completed_rating().map(|r| (*m, f64::from(r))))
        .collect();

    let history_start = history
        .iter()
        .map(|m| m.logged_day(tz))
        .chain(rated_days.iter().copied())
        .min()
        .ok_or_else(|| GjError::Runtime {
            details: "blueprint history has rated days but no meals".to_string(),
        })?;
    let history_end = history
        .iter()
        .map(|m| m.logged_day(tz))
        .chain(rated_days.iter().copied())
        .max()
        .unwrap_or(history_start);

    let (confirmed_triggers, safe_foods) = partition_categories(&rated, cfg);
    let food_pyramid = build_pyramid(&confirmed_triggers, &safe_foods, cfg);

    Ok(GutHealthBlueprint {
        history_start,
        history_end,
        meals_logged: history.len(),
        meals_rated: rated.len(),
        rated_days: rated_days.len(),
        confirmed_triggers,
        safe_foods,
        food_pyramid,
        optimal_eating_times: optimal_eating_times(&rated, tz),
        progress_journey: progress_journey(&rated, tz, history_start, history_end),
        weekday_weekend: weekday_weekend(&rated, tz, cfg.weekend_tolerance),
        source_digest: source_digest(&history)?,
    })
}

// ──────────────────── triggers and safe foods ────────────────────

#[derive(Default)]
struct CategoryTally {
    sum: f64,
    count: usize,
    foods: BTreeMap<String, usize>,
}

impl CategoryTally {
    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    fn top_food(&self, category: &str) -> String {
        self.foods
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map_or_else(|| category.to_string(), |(food, _)| food.clone())
    }
}

fn partition_categories(
    rated: &[(&MealFact, f64)],
    cfg: &BlueprintConfig,
) -> (Vec<ConfirmedTrigger>, Vec<SafeFood>) {
    let mut tallies: BTreeMap<&str, CategoryTally> = BTreeMap::new();
    for (meal, rating) in rated {
        for category in meal.categories() {
            let tally = tallies.entry(category).or_default();
            tally.sum += rating;
            tally.count += 1;
        }
        for trigger in &meal.triggers {
            *tallies
                .entry(trigger.category.as_str())
                .or_default()
                .foods
                .entry(trigger.food.clone())
                .or_default() += 1;
        }
    }

    let mut confirmed = Vec::new();
    let mut safe = Vec::new();
    for (category, tally) in &tallies {
        if tally.count < cfg.min_occurrences {
            continue;
        }
        let mean = tally.mean();
        if mean >= cfg.trigger_min_mean {
            let severity = if mean >= cfg.strong_severity {
                Severity::Strong
            } else if mean >= cfg.moderate_severity {
                Severity::Moderate
            } else {
                Severity::Mild
            };
            confirmed.push(ConfirmedTrigger {
                category: (*category).to_string(),
                food: tally.top_food(category),
                mean_rating: mean,
                occurrences: tally.count,
                severity,
            });
        } else if mean <= cfg.safe_max_mean {
            safe.push(SafeFood {
                category: (*category).to_string(),
                food: tally.top_food(category),
                mean_rating: mean,
                occurrences: tally.count,
            });
        }
    }

    confirmed.sort_by(|a, b| {
        b.mean_rating
            .total_cmp(&a.mean_rating)
            .then_with(|| b.occurrences.cmp(&a.occurrences))
            .then_with(|| a.category.cmp(&b.category))
    });
    safe.sort_by(|a, b| {
        a.mean_rating
            .total_cmp(&b.mean_rating)
            .then_with(|| b.occurrences.cmp(&a.occurrences))
            .then_with(|| a.category.cmp(&b.category))
    });
    (confirmed, safe)
}

fn build_pyramid(
    confirmed: &[ConfirmedTrigger],
    safe: &[SafeFood],
    cfg: &BlueprintConfig,
) -> FoodPyramid {
    let mut pyramid = FoodPyramid::default();
    for trigger in confirmed {
        match trigger.severity {
            Severity::Strong => pyramid.avoid_completely.push(trigger.category.clone()),
            Severity::Moderate | Severity::Mild => {
                pyramid.limit_intake.push(trigger.category.clone());
            }
        }
    }
    for food in safe {
        if cfg.is_healing(&food.category) {
            pyramid.healing_foods.push(food.category.clone());
        } else {
            pyramid.enjoy_freely.push(food.category.clone());
        }
    }
    pyramid
}

// ──────────────────── timing ────────────────────

fn optimal_eating_times(rated: &[(&MealFact, f64)], tz: &FixedOffset) -> OptimalEatingTimes {
    let hours: Vec<(u32, f64)> = rated
        .iter()
        .map(|(meal, rating)| (meal.created_at.with_timezone(tz).hour(), *rating))
        .collect();

    let mut times = OptimalEatingTimes::default();
    for meal_type in MealType::ALL {
        let window = best_window(meal_type, &hours);
        match meal_type {
            MealType::Breakfast => times.breakfast = window,
            MealType::Lunch => times.lunch = window,
            MealType::Dinner => times.dinner = window,
        }
    }
    times
}

/// Slide a two-hour window hourly across the bucket; the lowest mean wins and
/// ties keep the earlier window.
fn best_window(meal_type: MealType, hours: &[(u32, f64)]) -> Option<EatingWindow> {
    let (bucket_start, bucket_end) = meal_type.hours();
    let mut best: Option<EatingWindow> = None;
    for start in bucket_start..=bucket_end.saturating_sub(WINDOW_HOURS) {
        let end = start + WINDOW_HOURS;
        let ratings: Vec<f64> = hours
            .iter()
            .filter(|(hour, _)| *hour >= start && *hour < end)
            .map(|(_, rating)| *rating)
            .collect();
        let Some(window_mean) = mean(&ratings) else {
            continue;
        };
        if best.as_ref().is_none_or(|b| window_mean < b.mean_rating) {
            best = Some(EatingWindow {
                meal_type,
                start_hour: start,
                end_hour: end,
                mean_rating: window_mean,
                meals: ratings.len(),
            });
        }
    }
    best
}

// ──────────────────── trends ────────────────────

fn progress_journey(
    rated: &[(&MealFact, f64)],
    tz: &FixedOffset,
    start: NaiveDate,
    end: NaiveDate,
) -> ProgressJourney {
    let total_weeks = week_of(start, end).max(TRACKED_WEEKS);
    let mut buckets: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for (meal, rating) in rated {
        buckets
            .entry(week_of(start, meal.logged_day(tz)))
            .or_default()
            .push(*rating);
    }

    let weekly: Vec<WeekAverage> = (1..=total_weeks)
        .map(|week| {
            let ratings = buckets.get(&week).map_or(&[][..], Vec::as_slice);
            WeekAverage {
                week,
                average: mean(ratings).unwrap_or(0.0),
                rated_meals: ratings.len(),
            }
        })
        .collect();
    let avg = |week: u32| {
        weekly
            .iter()
            .find(|w| w.week == week)
            .map_or(0.0, |w| w.average)
    };

    let week1_avg = avg(1);
    let week12_avg = avg(12);
    let overall_improvement = if week1_avg == 0.0 {
        0.0
    } else {
        (week1_avg - week12_avg) / week1_avg * 100.0
    };

    ProgressJourney {
        week1_avg,
        week4_avg: avg(4),
        week8_avg: avg(8),
        week12_avg,
        overall_improvement,
        weekly,
    }
}

fn week_of(start: NaiveDate, day: NaiveDate) -> u32 {
    let offset = (day - start).num_days().max(0);
    u32::try_from(offset / 7 + 1).unwrap_or(u32::MAX)
}

fn weekday_weekend(rated: &[(&MealFact, f64)], tz: &FixedOffset, tolerance: f64) -> WeekdayWeekend {
    let mut weekend = Vec::new();
    let mut weekday = Vec::new();
    for (meal, rating) in rated {
        match meal.logged_day(tz).weekday() {
            Weekday::Sat | Weekday::Sun => weekend.push(*rating),
            _ => weekday.push(*rating),
        }
    }
    let weekday_avg = mean(&weekday);
    let weekend_avg = mean(&weekend);

    // Lower bloating is better.
    let pattern = match (weekday_avg, weekend_avg) {
        (Some(wd), Some(we)) if wd - we > tolerance => DayPattern::BetterWeekends,
        (Some(wd), Some(we)) if we - wd > tolerance => DayPattern::BetterWeekdays,
        _ => DayPattern::Similar,
    };
    WeekdayWeekend {
        weekday_avg,
        weekend_avg,
        pattern,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn source_digest(history: &[&MealFact]) -> Result<String> {
    let canonical = serde_json::to_vec(history)?;
    let digest = Sha256::digest(&canonical);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}
