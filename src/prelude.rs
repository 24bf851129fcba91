//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use gut_journey::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{GjError, Result};

// Source
pub use crate::source::adapter::{JourneyEvent, MealRecord, NormalizedStream, RejectedRecord};
pub use crate::source::ledger::MealLedger;
pub use crate::source::meal::{DetectedTrigger, MealFact, MealId, RatingStatus};

// Streak
pub use crate::streak::tracker::{StreakSummary, StreakTracker, compute_streaks};

// Journey
pub use crate::journey::gate::{InsightTab, UnlockProgress};
pub use crate::journey::guide::{AiGuideConsultation, GuideInputs};
pub use crate::journey::machine::{ApplyOutcome, JourneyCommand, SkipReason, Transition};
pub use crate::journey::milestones::Milestone;
pub use crate::journey::state::MilestoneState;
pub use crate::journey::tier::{Tier, TierStatus};

// Experiment
pub use crate::experiment::manager::BindOutcome;
pub use crate::experiment::model::{Experiment, ExperimentResult};

// Blueprint
pub use crate::blueprint::report::GutHealthBlueprint;

// Engine
pub use crate::engine::{JourneyEngine, ReplayReport};

// Journal
pub use crate::logger::journal::Journal;
pub use crate::logger::jsonl::{JsonlConfig, LogEntry};

// Store
#[cfg(feature = "sqlite")]
pub use crate::store::sqlite::StateStore;
