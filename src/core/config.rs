//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{FixedOffset, Local, Offset};
use serde::{Deserialize, Serialize};

use crate::core::errors::{GjError, Result};
use crate::core::paths;

/// Full engine configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub journey: JourneyConfig,
    pub checkpoints: CheckpointConfig,
    pub experiment: ExperimentConfig,
    pub blueprint: BlueprintConfig,
    pub paths: PathsConfig,
}

/// Calendar and tier-gate knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JourneyConfig {
    /// Offset used to bucket timestamps into calendar days. `None` uses the
    /// host's local offset at load time.
    pub utc_offset_minutes: Option<i32>,
    /// Minimum bloating rating for a meal to count toward the suspected trigger.
    pub suspect_min_rating: u8,
}

/// Day-30/60/90 checkpoint gating.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Fraction of days in the preceding window that must carry a rating.
    pub min_activity_ratio: f64,
}

/// Elimination-experiment classifier thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExperimentConfig {
    /// `percentage_change` at or above this confirms the trigger.
    pub confirm_pct: f64,
    /// `percentage_change` at or below this clears the trigger.
    pub clear_pct: f64,
    /// Fewer control meals than this is always inconclusive.
    pub min_control_meals: usize,
    /// Most recent control meals considered.
    pub max_control_meals: usize,
}

/// Blueprint partition and banding thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BlueprintConfig {
    pub min_rated_days: usize,
    pub trigger_min_mean: f64,
    pub safe_max_mean: f64,
    pub min_occurrences: usize,
    pub strong_severity: f64,
    pub moderate_severity: f64,
    pub weekend_tolerance: f64,
    /// Categories eligible for the `healing_foods` tier of the pyramid.
    pub healing_allowlist: Vec<String>,
}

/// Filesystem paths used by gutj.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub state_db: PathBuf,
    pub journal: PathBuf,
    pub meal_stream: PathBuf,
}

impl Default for JourneyConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: None,
            suspect_min_rating: 4,
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            min_activity_ratio: 0.5,
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            confirm_pct: 40.0,
            clear_pct: -10.0,
            min_control_meals: 2,
            max_control_meals: 5,
        }
    }
}

impl Default for BlueprintConfig {
    fn default() -> Self {
        Self {
            min_rated_days: 30,
            trigger_min_mean: 3.5,
            safe_max_mean: 2.0,
            min_occurrences: 3,
            strong_severity: 4.2,
            moderate_severity: 3.8,
            weekend_tolerance: 0.3,
            healing_allowlist: [
                "ginger",
                "peppermint",
                "fennel",
                "oats",
                "rice",
                "bananas",
                "papaya",
                "kefir",
                "yogurt",
                "leafy_greens",
                "bone_broth",
                "fermented",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let data = paths::default_data_dir();
        Self {
            config_file: paths::default_config_file(),
            state_db: data.join("journey.sqlite3"),
            journal: data.join("journal.jsonl"),
            meal_stream: data.join("meals.json"),
        }
    }
}

impl JourneyConfig {
    /// The offset used for calendar-day grouping.
    #[must_use]
    pub fn offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .and_then(|minutes| FixedOffset::east_opt(minutes.saturating_mul(60)))
            .unwrap_or_else(|| Local::now().offset().fix())
    }
}

impl BlueprintConfig {
    #[must_use]
    pub fn is_healing(&self, category: &str) -> bool {
        self.healing_allowlist
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category))
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        paths::default_config_file()
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| GjError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(GjError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic FNV-1a hash of the effective config for journal entries.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("GJ_JOURNEY_UTC_OFFSET_MINUTES") {
            self.journey.utc_offset_minutes =
                Some(parse_env("GJ_JOURNEY_UTC_OFFSET_MINUTES", &raw)?);
        }
        set_env(
            &mut lookup,
            "GJ_JOURNEY_SUSPECT_MIN_RATING",
            &mut self.journey.suspect_min_rating,
        )?;
        set_env(
            &mut lookup,
            "GJ_CHECKPOINTS_MIN_ACTIVITY_RATIO",
            &mut self.checkpoints.min_activity_ratio,
        )?;

        set_env(
            &mut lookup,
            "GJ_EXPERIMENT_CONFIRM_PCT",
            &mut self.experiment.confirm_pct,
        )?;
        set_env(
            &mut lookup,
            "GJ_EXPERIMENT_CLEAR_PCT",
            &mut self.experiment.clear_pct,
        )?;
        set_env(
            &mut lookup,
            "GJ_EXPERIMENT_MIN_CONTROL_MEALS",
            &mut self.experiment.min_control_meals,
        )?;
        set_env(
            &mut lookup,
            "GJ_EXPERIMENT_MAX_CONTROL_MEALS",
            &mut self.experiment.max_control_meals,
        )?;

        set_env(
            &mut lookup,
            "GJ_BLUEPRINT_MIN_RATED_DAYS",
            &mut self.blueprint.min_rated_days,
        )?;
        set_env(
            &mut lookup,
            "GJ_BLUEPRINT_TRIGGER_MIN_MEAN",
            &mut self.blueprint.trigger_min_mean,
        )?;
        set_env(
            &mut lookup,
            "GJ_BLUEPRINT_SAFE_MAX_MEAN",
            &mut self.blueprint.safe_max_mean,
        )?;
        set_env(
            &mut lookup,
            "GJ_BLUEPRINT_WEEKEND_TOLERANCE",
            &mut self.blueprint.weekend_tolerance,
        )?;

        if let Some(raw) = lookup("GJ_PATHS_STATE_DB") {
            self.paths.state_db = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("GJ_PATHS_JOURNAL") {
            self.paths.journal = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("GJ_PATHS_MEAL_STREAM") {
            self.paths.meal_stream = PathBuf::from(raw);
        }

        Ok(())
    }

    /// Lowercase allowlist entries and expand `~` in data paths.
    fn normalize(&mut self) {
        for entry in &mut self.blueprint.healing_allowlist {
            *entry = entry.trim().to_ascii_lowercase();
        }
        self.blueprint.healing_allowlist.retain(|e| !e.is_empty());
        self.blueprint.healing_allowlist.sort();
        self.blueprint.healing_allowlist.dedup();

        for path in [
            &mut self.paths.state_db,
            &mut self.paths.journal,
            &mut self.paths.meal_stream,
        ] {
            if path.starts_with("~") {
                *path = paths::resolve_user_path(path);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(minutes) = self.journey.utc_offset_minutes
            && !(-14 * 60..=14 * 60).contains(&minutes)
        {
            return Err(GjError::InvalidConfig {
                details: format!("journey.utc_offset_minutes must be within ±840, got {minutes}"),
            });
        }
        if !(1..=5).contains(&self.journey.suspect_min_rating) {
            return Err(GjError::InvalidConfig {
                details: format!(
                    "journey.suspect_min_rating must be in [1, 5], got {}",
                    self.journey.suspect_min_rating
                ),
            });
        }

        validate_prob(
            "checkpoints.min_activity_ratio",
            self.checkpoints.min_activity_ratio,
        )?;

        let exp = &self.experiment;
        if exp.clear_pct >= exp.confirm_pct {
            return Err(GjError::InvalidConfig {
                details: format!(
                    "experiment.clear_pct ({}) must be < experiment.confirm_pct ({})",
                    exp.clear_pct, exp.confirm_pct
                ),
            });
        }
        if exp.max_control_meals == 0 || exp.min_control_meals > exp.max_control_meals {
            return Err(GjError::InvalidConfig {
                details: "experiment control meals must satisfy 0 <= min <= max, max >= 1"
                    .to_string(),
            });
        }

        let bp = &self.blueprint;
        if bp.min_rated_days == 0 || bp.min_occurrences == 0 {
            return Err(GjError::InvalidConfig {
                details: "blueprint.min_rated_days and blueprint.min_occurrences must be > 0"
                    .to_string(),
            });
        }
        for (name, val) in [
            ("trigger_min_mean", bp.trigger_min_mean),
            ("safe_max_mean", bp.safe_max_mean),
            ("strong_severity", bp.strong_severity),
            ("moderate_severity", bp.moderate_severity),
        ] {
            if !(1.0..=5.0).contains(&val) {
                return Err(GjError::InvalidConfig {
                    details: format!("blueprint.{name} must be in [1, 5], got {val}"),
                });
            }
        }
        if bp.safe_max_mean >= bp.trigger_min_mean {
            return Err(GjError::InvalidConfig {
                details: "blueprint.safe_max_mean must be < blueprint.trigger_min_mean".to_string(),
            });
        }
        if !(bp.trigger_min_mean <= bp.moderate_severity
            && bp.moderate_severity <= bp.strong_severity)
        {
            return Err(GjError::InvalidConfig {
                details: "blueprint severity bands must ascend: trigger_min_mean <= moderate <= strong"
                    .to_string(),
            });
        }
        if bp.weekend_tolerance < 0.0 {
            return Err(GjError::InvalidConfig {
                details: "blueprint.weekend_tolerance must be >= 0".to_string(),
            });
        }

        Ok(())
    }
}

fn validate_prob(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(GjError::InvalidConfig {
            details: format!("{name} must be in [0,1], got {value}"),
        });
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_env<F, T>(lookup: &mut F, name: &str, slot: &mut T) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| GjError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}
