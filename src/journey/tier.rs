//! The five sequential journey tiers.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// A progression stage. Serialized as its number (1..=5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Tier {
    Tier1,
    Tier2,
    Tier3,
    Tier4,
    Tier5,
}

impl Tier {
    pub const ALL: [Self; 5] = [Self::Tier1, Self::Tier2, Self::Tier3, Self::Tier4, Self::Tier5];

    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::Tier1 => 1,
            Self::Tier2 => 2,
            Self::Tier3 => 3,
            Self::Tier4 => 4,
            Self::Tier5 => 5,
        }
    }

    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Tier1 => Some(Self::Tier2),
            Self::Tier2 => Some(Self::Tier3),
            Self::Tier3 => Some(Self::Tier4),
            Self::Tier4 => Some(Self::Tier5),
            Self::Tier5 => None,
        }
    }

    #[must_use]
    pub const fn previous(self) -> Option<Self> {
        match self {
            Self::Tier1 => None,
            Self::Tier2 => Some(Self::Tier1),
            Self::Tier3 => Some(Self::Tier2),
            Self::Tier4 => Some(Self::Tier3),
            Self::Tier5 => Some(Self::Tier4),
        }
    }

    /// Short display name.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Tier1 => "Getting Started",
            Self::Tier2 => "72-Hour Evidence",
            Self::Tier3 => "First Experiment",
            Self::Tier4 => "Weekly Baseline",
            Self::Tier5 => "90-Day Journey",
        }
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.number()
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Tier1),
            2 => Ok(Self::Tier2),
            3 => Ok(Self::Tier3),
            4 => Ok(Self::Tier4),
            5 => Ok(Self::Tier5),
            other => Err(format!("tier must be 1..=5, got {other}")),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier{}", self.number())
    }
}

/// Display status of a tier or milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierStatus {
    Locked,
    InProgress,
    Completed,
}

impl fmt::Display for TierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked => write!(f, "locked"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
        }
    }
}
