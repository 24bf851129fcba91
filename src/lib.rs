#![forbid(unsafe_code)]

//! Gut Journey (gutj): progression and elimination-experiment engine for a
//! meal-and-symptom tracker.
//!
//! Meal events from the tracker's store flow through one deterministic
//! reducer that maintains:
//! 1. **Streaks**: consecutive calendar days with at least one rated meal
//! 2. **Tiers**: a five-stage journey from onboarding to the 90-day Blueprint
//! 3. **Experiments**: single-meal trials of a suspected trigger against controls
//!
//! Insight tabs are gated on tier progress, and the Gut Health Blueprint is
//! assembled from the full history once the day-90 checkpoint is reached.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use gut_journey::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use gut_journey::engine::JourneyEngine;
//! use gut_journey::journey::gate::InsightTab;
//! ```

pub mod prelude;

pub mod blueprint;
pub mod core;
pub mod engine;
pub mod experiment;
pub mod journey;
pub mod logger;
pub mod source;
#[cfg(feature = "sqlite")]
pub mod store;
pub mod streak;

#[cfg(test)]
mod journey_property_tests;
