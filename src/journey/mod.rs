//! Five-tier progression: state aggregate, reducer, and read-side projections.

pub mod gate;
pub mod guide;
pub mod machine;
pub mod milestones;
pub mod state;
pub mod tier;
