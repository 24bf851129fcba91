//! Long-horizon Blueprint report and its assembler.

pub mod assembler;
pub mod report;
