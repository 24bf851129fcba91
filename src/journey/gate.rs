//! Insight-tab gate: pure derivations over `MilestoneState`.

#![allow(missing_docs)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::journey::state::{
    BASELINE_DAYS, CHECKPOINT_DAYS, EVIDENCE_DAYS, MilestoneState, ONBOARDING_RATINGS,
};

/// A downstream feature view gated by journey progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightTab {
    Analysis,
    Experiments,
    AiGuide,
    Blueprint,
}

impl InsightTab {
    pub const ALL: [Self; 4] = [Self::Analysis, Self::Experiments, Self::AiGuide, Self::Blueprint];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Experiments => "experiments",
            Self::AiGuide => "ai_guide",
            Self::Blueprint => "blueprint",
        }
    }
}

impl fmt::Display for InsightTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for InsightTab {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "analysis" => Ok(Self::Analysis),
            "experiments" => Ok(Self::Experiments),
            "ai_guide" | "guide" => Ok(Self::AiGuide),
            "blueprint" => Ok(Self::Blueprint),
            other => Err(format!("unknown insight tab {other:?}")),
        }
    }
}

/// Progress toward a tab unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnlockProgress {
    pub current: u32,
    pub target: u32,
    /// Whole percent, 100 once unlocked.
    pub percentage: u8,
}

/// Whether `tab` is visible.
#[must_use]
pub fn is_tab_unlocked(tab: InsightTab, state: &MilestoneState) -> bool {
    match tab {
        InsightTab::Analysis => state.tier1.pattern_detection_unlocked,
        InsightTab::Experiments => state.tier2.experiments_unlocked,
        InsightTab::AiGuide => state.tier4.ai_guide_unlocked,
        InsightTab::Blueprint => state.tier5.blueprint_unlocked,
    }
}

#[must_use]
pub fn unlock_progress(tab: InsightTab, state: &MilestoneState) -> UnlockProgress {
    let (current, target) = match tab {
        InsightTab::Analysis => (state.total_meals_rated, ONBOARDING_RATINGS),
        InsightTab::Experiments => (count(state.tier2.evidence_days.len()), count(EVIDENCE_DAYS)),
        InsightTab::AiGuide => (count(state.tier4.completed_days()), count(BASELINE_DAYS)),
        InsightTab::Blueprint => {
            let done = state.tier5.checkpoints_complete();
            let reached = done
                .checked_sub(1)
                .and_then(|i| CHECKPOINT_DAYS.get(i))
                .copied()
                .unwrap_or(0);
            (reached, CHECKPOINT_DAYS[CHECKPOINT_DAYS.len() - 1])
        }
    };

    if is_tab_unlocked(tab, state) {
        return UnlockProgress {
            current: target,
            target,
            percentage: 100,
        };
    }
    let current = current.min(target);
    let percentage = if target == 0 {
        0
    } else {
        u8::try_from(u64::from(current) * 100 / u64::from(target)).unwrap_or(100)
    };
    UnlockProgress {
        current,
        target,
        percentage,
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
