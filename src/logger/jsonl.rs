//! Append-only JSONL journal writer.
//!
//! One self-contained JSON object per line, written with a single
//! `write_all` so a tailing reader never sees a partial line. When the
//! journal file cannot be written the writer degrades instead of failing:
//!
//! 1. Primary path
//! 2. Fallback path
//! 3. stderr, each line prefixed with `[GJ-JSONL]`
//! 4. Discard
//!
//! Journal failures never fail the command that produced the entry.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{GjError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Journal event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MealLogged,
    MealRated,
    MealSkipped,
    EventSkipped,
    DuplicateEvent,
    MilestoneReached,
    TierCompleted,
    TabUnlocked,
    ExperimentStarted,
    ExperimentBound,
    ExperimentResolved,
    ExperimentAbandoned,
    CheckpointReached,
    BlueprintAssembled,
    BlueprintRefused,
    AiGuideStored,
    Error,
}

/// One journal line. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp of the domain event, not of the write.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    /// Milestone id, experiment result, or other short outcome label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Rating, percentage change, or checkpoint day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    #[must_use]
    pub fn new(event: EventType, severity: Severity, ts: DateTime<Utc>) -> Self {
        Self {
            ts: ts.to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
            severity,
            user: None,
            meal_id: None,
            tier: None,
            tab: None,
            experiment_id: None,
            result: None,
            value: None,
            error_code: None,
            details: None,
        }
    }

    #[must_use]
    pub fn meal(mut self, meal_id: impl Into<String>) -> Self {
        self.meal_id = Some(meal_id.into());
        self
    }

    #[must_use]
    pub fn tier(mut self, tier: u8) -> Self {
        self.tier = Some(tier);
        self
    }

    #[must_use]
    pub fn tab(mut self, tab: impl Into<String>) -> Self {
        self.tab = Some(tab.into());
        self
    }

    #[must_use]
    pub fn experiment(mut self, id: impl Into<String>) -> Self {
        self.experiment_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    #[must_use]
    pub fn value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    #[must_use]
    pub fn error(mut self, err: &GjError) -> Self {
        self.error_code = Some(err.code().to_string());
        self.details = Some(err.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the active file would exceed this size.
    pub max_size_bytes: u64,
    /// Rotated files kept as `<path>.1` .. `<path>.N`.
    pub max_rotated_files: u32,
}

impl JsonlConfig {
    /// Journal at `path` with a fallback under the system temp dir.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fallback_path: Some(std::env::temp_dir().join("gutj-journal.jsonl")),
            max_size_bytes: 16 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

enum Sink {
    Primary(BufWriter<File>),
    Fallback(BufWriter<File>),
    Stderr,
    Discard,
}

impl Sink {
    fn label(&self) -> &'static str {
        match self {
            Self::Primary(_) => "primary",
            Self::Fallback(_) => "fallback",
            Self::Stderr => "stderr",
            Self::Discard => "discard",
        }
    }
}

pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
    bytes_written: u64,
}

impl JsonlWriter {
    /// Open the journal, degrading as far as needed.
    #[must_use]
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            sink: Sink::Discard,
            bytes_written: 0,
        };
        writer.open_primary_or_degrade();
        writer
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(json) => self.write_line(&format!("{json}\n")),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[GJ-JSONL] cannot serialize entry: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Sink::Primary(w) | Sink::Fallback(w) = &mut self.sink {
            let _ = w.flush();
        }
    }

    /// `primary`, `fallback`, `stderr` or `discard`.
    #[must_use]
    pub fn state(&self) -> &'static str {
        self.sink.label()
    }

    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if self.bytes_written.saturating_add(len) > self.config.max_size_bytes {
            self.rotate();
        }

        let failed = match &mut self.sink {
            Sink::Primary(w) | Sink::Fallback(w) => w.write_all(line.as_bytes()).is_err(),
            Sink::Stderr => {
                let _ = write!(io::stderr(), "[GJ-JSONL] {line}");
                false
            }
            Sink::Discard => false,
        };
        if failed {
            self.degrade();
            if matches!(self.sink, Sink::Primary(_) | Sink::Fallback(_) | Sink::Stderr) {
                self.write_line(line);
            }
        } else if matches!(self.sink, Sink::Primary(_) | Sink::Fallback(_)) {
            self.bytes_written = self.bytes_written.saturating_add(len);
        }
    }

    fn open_primary_or_degrade(&mut self) {
        match open_append(&self.config.path) {
            Ok((file, size)) => {
                self.sink = Sink::Primary(BufWriter::new(file));
                self.bytes_written = size;
            }
            Err(_) => self.open_fallback_or_stderr(),
        }
    }

    fn open_fallback_or_stderr(&mut self) {
        let opened = self
            .config
            .fallback_path
            .as_deref()
            .map(|fallback| (fallback, open_append(fallback)));
        match opened {
            Some((fallback, Ok((file, size)))) => {
                let _ = writeln!(
                    io::stderr(),
                    "[GJ-JSONL] journal {} unavailable, writing to {}",
                    self.config.path.display(),
                    fallback.display()
                );
                self.sink = Sink::Fallback(BufWriter::new(file));
                self.bytes_written = size;
            }
            _ => {
                let _ = writeln!(
                    io::stderr(),
                    "[GJ-JSONL] no writable journal path, writing entries to stderr"
                );
                self.sink = Sink::Stderr;
            }
        }
    }

    fn degrade(&mut self) {
        match self.sink {
            Sink::Primary(_) => self.open_fallback_or_stderr(),
            Sink::Fallback(_) => {
                let _ = writeln!(io::stderr(), "[GJ-JSONL] fallback journal failed, writing to stderr");
                self.sink = Sink::Stderr;
            }
            Sink::Stderr | Sink::Discard => self.sink = Sink::Discard,
        }
    }

    fn active_path(&self) -> Option<PathBuf> {
        match self.sink {
            Sink::Primary(_) => Some(self.config.path.clone()),
            Sink::Fallback(_) => self.config.fallback_path.clone(),
            Sink::Stderr | Sink::Discard => None,
        }
    }

    /// `<path>` becomes `<path>.1`, older files shift up, the oldest is dropped.
    fn rotate(&mut self) {
        let Some(base) = self.active_path() else {
            return;
        };
        self.flush();
        let was_fallback = matches!(self.sink, Sink::Fallback(_));
        self.sink = Sink::Discard;

        let keep = self.config.max_rotated_files.max(1);
        let _ = fs::remove_file(rotated_name(&base, keep));
        for index in (1..keep).rev() {
            let _ = fs::rename(rotated_name(&base, index), rotated_name(&base, index + 1));
        }
        let _ = fs::rename(&base, rotated_name(&base, 1));

        match open_append(&base) {
            Ok((file, _)) => {
                let w = BufWriter::new(file);
                self.sink = if was_fallback {
                    Sink::Fallback(w)
                } else {
                    Sink::Primary(w)
                };
                self.bytes_written = 0;
            }
            Err(_) if was_fallback => self.sink = Sink::Stderr,
            Err(_) => self.open_fallback_or_stderr(),
        }
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| GjError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| GjError::io(path, source))?;
    let size = file.metadata().map_or(0, |m| m.len());
    Ok((file, size))
}

fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}
