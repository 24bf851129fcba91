//! SQLite state store: one `MilestoneState` row per user, WAL mode.
//!
//! Scalar header fields are plain columns; each tier sub-state, the streak
//! tracker and the processed-event set live in their own JSON column, so a
//! mutation rewrites only the sections it touched. Writes are conditional on
//! the `(revision, updated_at)` pair the caller last read.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params, params_from_iter};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::errors::{GjError, Result};
use crate::journey::state::MilestoneState;
use crate::journey::tier::Tier;

// ──────────────────── sections ────────────────────

/// A JSON-encoded column of the state row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Streak,
    Tier1,
    Tier2,
    Tier3,
    Tier4,
    Tier5,
    Processed,
}

impl Section {
    pub const ALL: [Self; 7] = [
        Self::Streak,
        Self::Tier1,
        Self::Tier2,
        Self::Tier3,
        Self::Tier4,
        Self::Tier5,
        Self::Processed,
    ];

    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Streak => "streak",
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
            Self::Tier3 => "tier3",
            Self::Tier4 => "tier4",
            Self::Tier5 => "tier5",
            Self::Processed => "processed",
        }
    }

    fn changed(self, old: &MilestoneState, new: &MilestoneState) -> bool {
        match self {
            Self::Streak => old.streak != new.streak,
            Self::Tier1 => old.tier1 != new.tier1,
            Self::Tier2 => old.tier2 != new.tier2,
            Self::Tier3 => old.tier3 != new.tier3,
            Self::Tier4 => old.tier4 != new.tier4,
            Self::Tier5 => old.tier5 != new.tier5,
            Self::Processed => old.processed != new.processed,
        }
    }

    fn encode(self, state: &MilestoneState) -> Result<String> {
        match self {
            Self::Streak => to_json(&state.streak),
            Self::Tier1 => to_json(&state.tier1),
            Self::Tier2 => to_json(&state.tier2),
            Self::Tier3 => to_json(&state.tier3),
            Self::Tier4 => to_json(&state.tier4),
            Self::Tier5 => to_json(&state.tier5),
            Self::Processed => to_json(&state.processed),
        }
    }
}

/// Sections that differ between two versions of the same user's state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatePatch {
    sections: Vec<(Section, String)>,
}

impl StatePatch {
    pub fn between(old: &MilestoneState, new: &MilestoneState) -> Result<Self> {
        let sections = Section::ALL
            .into_iter()
            .filter(|s| s.changed(old, new))
            .map(|s| s.encode(new).map(|json| (s, json)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { sections })
    }

    /// Every section, for a first insert.
    pub fn full(state: &MilestoneState) -> Result<Self> {
        let sections = Section::ALL
            .into_iter()
            .map(|s| s.encode(state).map(|json| (s, json)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { sections })
    }

    pub fn sections(&self) -> impl Iterator<Item = Section> + '_ {
        self.sections.iter().map(|(s, _)| *s)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

// ──────────────────── store ────────────────────

pub struct StateStore {
    conn: Connection,
    path: PathBuf,
}

impl StateStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| GjError::io(parent, source))?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self, user_id: &str) -> Result<Option<MilestoneState>> {
        let row = self
            .conn
            .prepare_cached(
                "SELECT current_tier, total_meals_logged, total_meals_rated, current_streak,
                        longest_streak, journey_start_date, streak, tier1, tier2, tier3,
                        tier4, tier5, processed, revision, created_at, updated_at
                 FROM milestone_state WHERE user_id = ?1",
            )?
            .query_row(params![user_id], |row| {
                Ok(RawRow {
                    current_tier: row.get(0)?,
                    total_meals_logged: row.get(1)?,
                    total_meals_rated: row.get(2)?,
                    current_streak: row.get(3)?,
                    longest_streak: row.get(4)?,
                    journey_start_date: row.get(5)?,
                    streak: row.get(6)?,
                    tier1: row.get(7)?,
                    tier2: row.get(8)?,
                    tier3: row.get(9)?,
                    tier4: row.get(10)?,
                    tier5: row.get(11)?,
                    processed: row.get(12)?,
                    revision: row.get(13)?,
                    created_at: row.get(14)?,
                    updated_at: row.get(15)?,
                })
            })
            .optional()?;
        row.map(|raw| raw.into_state(user_id)).transpose()
    }

    /// Persist `new`. `expected` is the version the caller loaded, `None` for
    /// a user that has never been stored.
    pub fn save(&self, expected: Option<&MilestoneState>, new: &MilestoneState) -> Result<()> {
        match expected {
            None => self.insert(new),
            Some(old) => self.update(old, new),
        }
    }

    pub fn users(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT user_id FROM milestone_state ORDER BY user_id")?;
        let users = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(users)
    }

    fn insert(&self, state: &MilestoneState) -> Result<()> {
        let patch = StatePatch::full(state)?;
        let mut columns: Vec<&str> = vec!["user_id", "created_at"];
        let mut values: Vec<Value> = vec![
            Value::Text(state.user_id.clone()),
            Value::Text(timestamp(state.created_at)),
        ];
        push_header(state, &mut columns, &mut values)?;
        for (section, json) in &patch.sections {
            columns.push(section.column());
            values.push(Value::Text(json.clone()));
        }
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO milestone_state ({}) VALUES ({}) ON CONFLICT(user_id) DO NOTHING",
            columns.join(", "),
            placeholders.join(", ")
        );
        let inserted = self.conn.prepare_cached(&sql)?.execute(params_from_iter(values))?;
        if inserted == 0 {
            return Err(self.stale(&state.user_id, "none"));
        }
        Ok(())
    }

    fn update(&self, old: &MilestoneState, new: &MilestoneState) -> Result<()> {
        if old.user_id != new.user_id {
            return Err(GjError::Runtime {
                details: format!("cannot save {} over {}", new.user_id, old.user_id),
            });
        }
        let patch = StatePatch::between(old, new)?;
        if patch.is_empty() && old.revision == new.revision && old.updated_at == new.updated_at {
            return Ok(());
        }

        let mut columns: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        push_header(new, &mut columns, &mut values)?;
        for (section, json) in &patch.sections {
            columns.push(section.column());
            values.push(Value::Text(json.clone()));
        }
        let assignments: Vec<String> = columns
            .iter()
            .zip(1..)
            .map(|(col, i)| format!("{col} = ?{i}"))
            .collect();
        let n = values.len();
        let sql = format!(
            "UPDATE milestone_state SET {} WHERE user_id = ?{} AND revision = ?{} AND updated_at = ?{}",
            assignments.join(", "),
            n + 1,
            n + 2,
            n + 3
        );
        values.push(Value::Text(old.user_id.clone()));
        values.push(Value::Integer(to_i64(old.revision)?));
        values.push(Value::Text(timestamp(old.updated_at)));

        let updated = self.conn.prepare_cached(&sql)?.execute(params_from_iter(values))?;
        if updated == 0 {
            return Err(self.stale(
                &old.user_id,
                &format!("{}@{}", old.revision, timestamp(old.updated_at)),
            ));
        }
        Ok(())
    }

    fn stale(&self, user_id: &str, expected: &str) -> GjError {
        let stored = self
            .conn
            .query_row(
                "SELECT revision, updated_at FROM milestone_state WHERE user_id = ?1",
                params![user_id],
                |row| Ok(format!("{}@{}", row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .ok()
            .flatten()
            .unwrap_or_else(|| "none".to_string());
        GjError::StaleWrite {
            user_id: user_id.to_string(),
            stored,
            expected: expected.to_string(),
        }
    }
}

// ──────────────────── row encoding ────────────────────

struct RawRow {
    current_tier: u8,
    total_meals_logged: u32,
    total_meals_rated: u32,
    current_streak: u32,
    longest_streak: u32,
    journey_start_date: Option<String>,
    streak: String,
    tier1: String,
    tier2: String,
    tier3: String,
    tier4: String,
    tier5: String,
    processed: String,
    revision: i64,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn into_state(self, user_id: &str) -> Result<MilestoneState> {
        let current_tier = Tier::try_from(self.current_tier).map_err(|details| GjError::Serialization {
            context: "current_tier",
            details,
        })?;
        let journey_start_date = self
            .journey_start_date
            .map(|raw| {
                raw.parse::<NaiveDate>().map_err(|e| GjError::Serialization {
                    context: "journey_start_date",
                    details: e.to_string(),
                })
            })
            .transpose()?;
        Ok(MilestoneState {
            user_id: user_id.to_string(),
            current_tier,
            total_meals_logged: self.total_meals_logged,
            total_meals_rated: self.total_meals_rated,
            current_streak: self.current_streak,
            longest_streak: self.longest_streak,
            journey_start_date,
            streak: from_json("streak", &self.streak)?,
            tier1: from_json("tier1", &self.tier1)?,
            tier2: from_json("tier2", &self.tier2)?,
            tier3: from_json("tier3", &self.tier3)?,
            tier4: from_json("tier4", &self.tier4)?,
            tier5: from_json("tier5", &self.tier5)?,
            processed: from_json("processed", &self.processed)?,
            revision: u64::try_from(self.revision).map_err(|e| GjError::Serialization {
                context: "revision",
                details: e.to_string(),
            })?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

fn push_header<'a>(
    state: &MilestoneState,
    columns: &mut Vec<&'a str>,
    values: &mut Vec<Value>,
) -> Result<()> {
    columns.extend([
        "current_tier",
        "total_meals_logged",
        "total_meals_rated",
        "current_streak",
        "longest_streak",
        "journey_start_date",
        "revision",
        "updated_at",
    ]);
    values.extend([
        Value::Integer(i64::from(state.current_tier.number())),
        Value::Integer(i64::from(state.total_meals_logged)),
        Value::Integer(i64::from(state.total_meals_rated)),
        Value::Integer(i64::from(state.current_streak)),
        Value::Integer(i64::from(state.longest_streak)),
        state
            .journey_start_date
            .map_or(Value::Null, |d| Value::Text(d.to_string())),
        Value::Integer(to_i64(state.revision)?),
        Value::Text(timestamp(state.updated_at)),
    ]);
    Ok(())
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(context: &'static str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| GjError::Serialization {
            context,
            details: format!("{raw:?}: {e}"),
        })
}

fn to_i64(revision: u64) -> Result<i64> {
    i64::try_from(revision).map_err(|e| GjError::Serialization {
        context: "revision",
        details: e.to_string(),
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(context: &'static str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| GjError::Serialization {
        context,
        details: e.to_string(),
    })
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[GJ-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS milestone_state (
            user_id TEXT PRIMARY KEY,
            current_tier INTEGER NOT NULL,
            total_meals_logged INTEGER NOT NULL,
            total_meals_rated INTEGER NOT NULL,
            current_streak INTEGER NOT NULL,
            longest_streak INTEGER NOT NULL,
            journey_start_date TEXT,
            streak TEXT NOT NULL,
            tier1 TEXT NOT NULL,
            tier2 TEXT NOT NULL,
            tier3 TEXT NOT NULL,
            tier4 TEXT NOT NULL,
            tier5 TEXT NOT NULL,
            processed TEXT NOT NULL,
            revision INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}
