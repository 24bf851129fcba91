//! GJ-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, GjError>;

/// Top-level error type for the gut journey engine.
#[derive(Debug, Error)]
pub enum GjError {
    #[error("[GJ-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[GJ-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[GJ-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[GJ-2001] invalid transition for {action}: {reason}")]
    InvalidTransition {
        action: &'static str,
        reason: String,
    },

    #[error("[GJ-2002] unknown meal referenced: {meal_id}")]
    MissingReferent { meal_id: String },

    #[error("[GJ-2003] insufficient data: {rated_days} rated days, {required} required")]
    InsufficientData { rated_days: usize, required: usize },

    #[error("[GJ-2004] malformed event payload: {details}")]
    MalformedEvent { details: String },

    #[error("[GJ-2005] state invariant violated: {details}")]
    InvariantViolation { details: String },

    #[error("[GJ-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[GJ-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[GJ-2103] stale write for user {user_id}: stored version {stored}, expected {expected}")]
    StaleWrite {
        user_id: String,
        stored: String,
        expected: String,
    },

    #[error("[GJ-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[GJ-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl GjError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "GJ-1001",
            Self::MissingConfig { .. } => "GJ-1002",
            Self::ConfigParse { .. } => "GJ-1003",
            Self::InvalidTransition { .. } => "GJ-2001",
            Self::MissingReferent { .. } => "GJ-2002",
            Self::InsufficientData { .. } => "GJ-2003",
            Self::MalformedEvent { .. } => "GJ-2004",
            Self::InvariantViolation { .. } => "GJ-2005",
            Self::Serialization { .. } => "GJ-2101",
            Self::Sql { .. } => "GJ-2102",
            Self::StaleWrite { .. } => "GJ-2103",
            Self::Io { .. } => "GJ-3002",
            Self::Runtime { .. } => "GJ-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Sql { .. } | Self::StaleWrite { .. } | Self::Runtime { .. }
        )
    }

    /// Whether the error is an expected precondition failure the caller can
    /// surface to the user rather than log as a fault.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. }
                | Self::MissingReferent { .. }
                | Self::InsufficientData { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for rejected commands.
    #[must_use]
    pub fn transition(action: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            action,
            reason: reason.into(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for GjError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for GjError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for GjError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
