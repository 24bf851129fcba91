//! Durable per-user journey state.

pub mod sqlite;
