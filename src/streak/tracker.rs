//! Consecutive-day rating streaks.
//!
//! [`StreakTracker`] is the incremental form carried in the persisted state:
//! appending a rated day is O(1). [`compute_streaks`] is the full-history
//! scan used for reporting and to rebuild the tracker when a day arrives out
//! of order.

#![allow(missing_docs)]

use std::collections::BTreeSet;

use chrono::{Days, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::source::meal::MealFact;

/// What a call to [`StreakTracker::record_day`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayRecord {
    /// First rated day ever.
    Started,
    /// The day directly follows the last rated day.
    Extended,
    /// A gap preceded the day; the run restarted at 1.
    Restarted,
    /// The day was already the last rated day.
    SameDay,
    /// The day precedes the last rated day; the tracker needs a rebuild.
    Backfill,
}

/// Append-only streak state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakTracker {
    pub last_rated_day: Option<NaiveDate>,
    /// Length of the run ending at `last_rated_day`.
    pub run_length: u32,
    pub longest: u32,
}

impl StreakTracker {
    pub fn record_day(&mut self, day: NaiveDate) -> DayRecord {
        let outcome = match self.last_rated_day {
            None => {
                self.run_length = 1;
                DayRecord::Started
            }
            Some(last) if day == last => DayRecord::SameDay,
            Some(last) if day < last => return DayRecord::Backfill,
            Some(last) if last.checked_add_days(Days::new(1)) == Some(day) => {
                self.run_length = self.run_length.saturating_add(1);
                DayRecord::Extended
            }
            Some(_) => {
                self.run_length = 1;
                DayRecord::Restarted
            }
        };
        self.last_rated_day = Some(day);
        self.longest = self.longest.max(self.run_length);
        outcome
    }

    /// Rebuild from the complete set of rated days. `longest` never shrinks.
    pub fn rebuild(&mut self, days: &BTreeSet<NaiveDate>) {
        let previous_longest = self.longest;
        *self = Self::default();
        for day in days {
            self.record_day(*day);
        }
        self.longest = self.longest.max(previous_longest);
    }

    /// Current streak as seen on `today`. Today without a rating does not
    /// break the run until it has fully elapsed.
    #[must_use]
    pub fn current_as_of(&self, today: NaiveDate) -> u32 {
        let Some(last) = self.last_rated_day else {
            return 0;
        };
        if last >= today || last.checked_add_days(Days::new(1)) == Some(today) {
            self.run_length
        } else {
            0
        }
    }
}

/// One calendar day of the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayCompletion {
    pub date: NaiveDate,
    /// At least one meal rated that day.
    pub completed: bool,
}

/// Full-history streak report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreakSummary {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub day_completions: Vec<DayCompletion>,
}

/// Scan a meal history and report streaks as of `today`.
///
/// Days with only pending or skipped meals are present in `day_completions`
/// but never count toward a streak.
#[must_use]
pub fn compute_streaks(facts: &[MealFact], tz: &FixedOffset, today: NaiveDate) -> StreakSummary {
    let rated: BTreeSet<NaiveDate> = facts.iter().filter_map(|m| m.rated_day(tz)).collect();
    let mut tracker = StreakTracker::default();
    for day in &rated {
        tracker.record_day(*day);
    }

    let first = facts
        .iter()
        .map(|m| m.logged_day(tz))
        .chain(rated.iter().copied())
        .min();
    let mut day_completions = Vec::new();
    if let Some(first) = first {
        let last = today.max(rated.last().copied().unwrap_or(today));
        let mut day = first;
        while day <= last {
            day_completions.push(DayCompletion {
                date: day,
                completed: rated.contains(&day),
            });
            match day.checked_add_days(Days::new(1)) {
                Some(next) => day = next,
                None => break,
            }
        }
    }

    StreakSummary {
        current_streak: tracker.current_as_of(today),
        longest_streak: tracker.longest,
        day_completions,
    }
}
