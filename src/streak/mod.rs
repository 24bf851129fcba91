//! Streak calculator: consecutive calendar days with at least one completed rating.

pub mod tracker;
