//! `MilestoneState`: the per-user root aggregate.
//!
//! Each tier owns a plain sub-state record. A tier's record stays at its
//! default value until the previous tier completes; [`MilestoneState::check_invariants`]
//! verifies that mechanically after every mutation.

#![allow(missing_docs)]

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::blueprint::report::GutHealthBlueprint;
use crate::core::errors::{GjError, Result};
use crate::experiment::model::Experiment;
use crate::journey::guide::AiGuideConsultation;
use crate::journey::tier::{Tier, TierStatus};
use crate::streak::tracker::StreakTracker;

/// Completed ratings needed to unlock pattern detection.
pub const ONBOARDING_RATINGS: u32 = 3;
/// Distinct rated days in the evidence streak.
pub const EVIDENCE_DAYS: usize = 3;
/// Distinct logged-and-rated days in the weekly baseline.
pub const BASELINE_DAYS: usize = 7;
/// Day offsets of the long-horizon checkpoints.
pub const CHECKPOINT_DAYS: [u32; 3] = [30, 60, 90];

// ──────────────────── tier sub-states ────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tier1State {
    pub first_meal_logged: bool,
    pub first_meal_logged_at: Option<DateTime<Utc>>,
    pub first_meal_rated: bool,
    pub first_meal_rated_at: Option<DateTime<Utc>>,
    pub three_meals_completed: bool,
    pub three_meals_completed_at: Option<DateTime<Utc>>,
    pub pattern_detection_unlocked: bool,
}

/// Most frequent high-bloating trigger category seen during the evidence streak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspectedTrigger {
    pub category: String,
    pub food: String,
    pub occurrences: usize,
    pub average_rating: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceDay {
    pub date: NaiveDate,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tier2State {
    pub day1_complete: bool,
    pub day2_complete: bool,
    pub day3_complete: bool,
    /// Distinct rated days counted so far, in arrival order. Gaps between
    /// them are allowed, so progress here is not a streak.
    pub evidence_days: Vec<EvidenceDay>,
    pub evidence_streak_complete: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub suspected_trigger: Option<SuspectedTrigger>,
    pub experiments_unlocked: bool,
}

impl Tier2State {
    #[must_use]
    pub fn has_day(&self, date: NaiveDate) -> bool {
        self.evidence_days.iter().any(|d| d.date == date)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tier3State {
    pub experiments_completed: u32,
    pub current_experiment: Option<Experiment>,
    pub completed_experiments: Vec<Experiment>,
    pub abandoned_experiments: Vec<Experiment>,
    pub first_experiment_completed: bool,
    pub first_experiment_completed_at: Option<DateTime<Utc>>,
    pub causality_confirmed: bool,
    pub causality_confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineDay {
    /// 1-based position in the baseline week.
    pub day_number: u8,
    pub date: Option<NaiveDate>,
    pub is_complete: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tier4State {
    pub day_completions: Vec<BaselineDay>,
    pub weekly_baseline_complete: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub ai_guide_unlocked: bool,
    pub ai_guide: Option<AiGuideConsultation>,
}

impl Default for Tier4State {
    fn default() -> Self {
        Self {
            day_completions: (1..=BASELINE_DAYS)
                .map(|n| BaselineDay {
                    day_number: u8::try_from(n).unwrap_or(u8::MAX),
                    date: None,
                    is_complete: false,
                    completed_at: None,
                })
                .collect(),
            weekly_baseline_complete: false,
            completed_at: None,
            ai_guide_unlocked: false,
            ai_guide: None,
        }
    }
}

impl Tier4State {
    #[must_use]
    pub fn completed_days(&self) -> usize {
        self.day_completions.iter().filter(|d| d.is_complete).count()
    }

    #[must_use]
    pub fn has_day(&self, date: NaiveDate) -> bool {
        self.day_completions.iter().any(|d| d.date == Some(date))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Checkpoint {
    pub complete: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tier5State {
    pub day30: Checkpoint,
    pub day60: Checkpoint,
    pub day90: Checkpoint,
    pub blueprint_unlocked: bool,
    pub blueprint: Option<GutHealthBlueprint>,
    pub blueprint_generated_at: Option<DateTime<Utc>>,
    /// Prose the external generator returned for the Blueprint, stored verbatim.
    pub blueprint_narrative: Option<String>,
}

impl Tier5State {
    #[must_use]
    pub fn checkpoints(&self) -> [(u32, &Checkpoint); 3] {
        [
            (CHECKPOINT_DAYS[0], &self.day30),
            (CHECKPOINT_DAYS[1], &self.day60),
            (CHECKPOINT_DAYS[2], &self.day90),
        ]
    }

    pub fn checkpoint_mut(&mut self, index: usize) -> Option<&mut Checkpoint> {
        match index {
            0 => Some(&mut self.day30),
            1 => Some(&mut self.day60),
            2 => Some(&mut self.day90),
            _ => None,
        }
    }

    #[must_use]
    pub fn checkpoints_complete(&self) -> usize {
        self.checkpoints().iter().filter(|(_, c)| c.complete).count()
    }
}

// ──────────────────── root aggregate ────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneState {
    pub user_id: String,
    pub current_tier: Tier,
    pub total_meals_logged: u32,
    pub total_meals_rated: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    /// Calendar day of the earliest logged meal.
    pub journey_start_date: Option<NaiveDate>,
    pub streak: StreakTracker,
    pub tier1: Tier1State,
    pub tier2: Tier2State,
    pub tier3: Tier3State,
    pub tier4: Tier4State,
    pub tier5: Tier5State,
    /// Event ids already applied (`logged:<id>`, `rated:<id>`, `skipped:<id>`).
    pub processed: BTreeSet<String>,
    /// Bumped on every applied mutation; optimistic-write token.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MilestoneState {
    #[must_use]
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            current_tier: Tier::Tier1,
            total_meals_logged: 0,
            total_meals_rated: 0,
            current_streak: 0,
            longest_streak: 0,
            journey_start_date: None,
            streak: StreakTracker::default(),
            tier1: Tier1State::default(),
            tier2: Tier2State::default(),
            tier3: Tier3State::default(),
            tier4: Tier4State::default(),
            tier5: Tier5State::default(),
            processed: BTreeSet::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a tier's completion predicate has been satisfied.
    #[must_use]
    pub fn is_tier_complete(&self, tier: Tier) -> bool {
        match tier {
            Tier::Tier1 => self.tier1.pattern_detection_unlocked,
            Tier::Tier2 => self.tier2.experiments_unlocked,
            Tier::Tier3 => self.tier3.first_experiment_completed,
            Tier::Tier4 => self.tier4.ai_guide_unlocked,
            Tier::Tier5 => self.tier5.blueprint_unlocked,
        }
    }

    /// A tier is open once every earlier tier has completed.
    #[must_use]
    pub fn is_tier_open(&self, tier: Tier) -> bool {
        tier.previous().is_none_or(|prev| self.is_tier_complete(prev))
    }

    #[must_use]
    pub fn tier_status(&self, tier: Tier) -> TierStatus {
        if self.is_tier_complete(tier) {
            TierStatus::Completed
        } else if self.is_tier_open(tier) {
            TierStatus::InProgress
        } else {
            TierStatus::Locked
        }
    }

    /// Lowest incomplete tier; `Tier5` once everything is done.
    #[must_use]
    pub fn derived_tier(&self) -> Tier {
        Tier::ALL
            .into_iter()
            .find(|t| !self.is_tier_complete(*t))
            .unwrap_or(Tier::Tier5)
    }

    fn tier_untouched(&self, tier: Tier) -> bool {
        match tier {
            Tier::Tier1 => self.tier1 == Tier1State::default(),
            Tier::Tier2 => self.tier2 == Tier2State::default(),
            Tier::Tier3 => self.tier3 == Tier3State::default(),
            Tier::Tier4 => self.tier4 == Tier4State::default(),
            Tier::Tier5 => self.tier5 == Tier5State::default(),
        }
    }

    /// Verify the aggregate's structural invariants.
    pub fn check_invariants(&self) -> Result<()> {
        let fail = |details: String| Err(GjError::InvariantViolation { details });

        if self.current_streak > self.longest_streak {
            return fail(format!(
                "current_streak {} exceeds longest_streak {}",
                self.current_streak, self.longest_streak
            ));
        }
        if self.total_meals_rated > self.total_meals_logged {
            return fail(format!(
                "total_meals_rated {} exceeds total_meals_logged {}",
                self.total_meals_rated, self.total_meals_logged
            ));
        }
        for tier in Tier::ALL {
            if !self.is_tier_open(tier) && !self.tier_untouched(tier) {
                return fail(format!("{tier} has progress while a previous tier is incomplete"));
            }
        }
        if self.current_tier != self.derived_tier() {
            return fail(format!(
                "current_tier {} disagrees with derived {}",
                self.current_tier,
                self.derived_tier()
            ));
        }

        let t3 = &self.tier3;
        if t3.current_experiment.as_ref().is_some_and(Experiment::is_resolved) {
            return fail("current experiment already carries a result".to_string());
        }
        if t3.completed_experiments.iter().any(|e| !e.is_resolved()) {
            return fail("completed experiment without a result".to_string());
        }
        if t3.abandoned_experiments.iter().any(Experiment::is_resolved) {
            return fail("abandoned experiment carries a result".to_string());
        }
        if usize::try_from(t3.experiments_completed).ok() != Some(t3.completed_experiments.len()) {
            return fail(format!(
                "experiments_completed {} disagrees with {} completed experiments",
                t3.experiments_completed,
                t3.completed_experiments.len()
            ));
        }

        let t4 = &self.tier4;
        if t4.day_completions.len() != BASELINE_DAYS {
            return fail(format!(
                "tier4 holds {} baseline days, expected {BASELINE_DAYS}",
                t4.day_completions.len()
            ));
        }
        let mut seen_gap = false;
        for day in &t4.day_completions {
            if seen_gap && day.is_complete {
                return fail("tier4 baseline days completed out of order".to_string());
            }
            seen_gap |= !day.is_complete;
        }

        let t5 = &self.tier5;
        let flags = [t5.day30.complete, t5.day60.complete, t5.day90.complete];
        if flags.windows(2).any(|w| w[1] && !w[0]) {
            return fail("tier5 checkpoints completed out of order".to_string());
        }
        if t5.blueprint_unlocked != t5.day90.complete {
            return fail("blueprint_unlocked must track the day-90 checkpoint".to_string());
        }

        Ok(())
    }
}
