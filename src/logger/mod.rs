//! Append-only JSONL journal of journey events with graceful degradation.

pub mod journal;
pub mod jsonl;
