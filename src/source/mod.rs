//! Event source: meal facts from the external store, normalized into journey events.

pub mod adapter;
pub mod ledger;
pub mod meal;
