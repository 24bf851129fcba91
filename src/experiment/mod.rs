//! Single-subject elimination experiments.

pub mod manager;
pub mod model;
