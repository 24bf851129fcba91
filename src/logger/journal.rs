//! Maps journey outcomes onto journal lines.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use chrono::{DateTime, Utc};

use crate::core::errors::GjError;
use crate::engine::ReplayReport;
use crate::journey::machine::{ApplyOutcome, SkipReason, Transition};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
use crate::source::adapter::JourneyEvent;

// ──────────────────── pure mapping ────────────────────

/// Journal line for one state transition.
#[must_use]
pub fn transition_entry(transition: &Transition, ts: DateTime<Utc>) -> LogEntry {
    match transition {
        Transition::MilestoneReached { milestone, tier } => {
            LogEntry::new(EventType::MilestoneReached, Severity::Info, ts)
                .tier(tier.number())
                .result(milestone.as_str())
        }
        Transition::TierCompleted { tier } => {
            LogEntry::new(EventType::TierCompleted, Severity::Info, ts).tier(tier.number())
        }
        Transition::TabUnlocked { tab } => {
            LogEntry::new(EventType::TabUnlocked, Severity::Info, ts).tab(tab.label())
        }
        Transition::ExperimentStarted {
            experiment_id,
            category,
        } => LogEntry::new(EventType::ExperimentStarted, Severity::Info, ts)
            .experiment(experiment_id.as_str())
            .details(category.as_str()),
        Transition::ExperimentBound {
            experiment_id,
            meal_id,
        } => LogEntry::new(EventType::ExperimentBound, Severity::Info, ts)
            .experiment(experiment_id.as_str())
            .meal(meal_id.as_str()),
        Transition::ExperimentResolved {
            experiment_id,
            category,
            result,
            percentage_change,
        } => {
            let entry = LogEntry::new(EventType::ExperimentResolved, Severity::Info, ts)
                .experiment(experiment_id.as_str())
                .result(result.to_string())
                .details(category.as_str());
            match percentage_change {
                Some(pct) => entry.value(*pct),
                None => entry,
            }
        }
        Transition::ExperimentAbandoned {
            experiment_id,
            category,
        } => LogEntry::new(EventType::ExperimentAbandoned, Severity::Info, ts)
            .experiment(experiment_id.as_str())
            .details(category.as_str()),
        Transition::CheckpointReached { day, summary } => {
            LogEntry::new(EventType::CheckpointReached, Severity::Info, ts)
                .tier(5)
                .value(f64::from(*day))
                .details(summary.as_str())
        }
        Transition::BlueprintAssembled {
            source_digest,
            rated_days,
        } => LogEntry::new(EventType::BlueprintAssembled, Severity::Info, ts)
            .tier(5)
            .result(source_digest.as_str())
            .value(*rated_days as f64),
        Transition::BlueprintRefused { error_code, reason } => {
            let mut entry = LogEntry::new(EventType::BlueprintRefused, Severity::Warning, ts)
                .tier(5)
                .details(reason.as_str());
            entry.error_code = Some((*error_code).to_string());
            entry
        }
        Transition::AiGuideStored => LogEntry::new(EventType::AiGuideStored, Severity::Info, ts).tier(4),
    }
}

/// Journal lines for one applied, duplicate, or skipped event.
#[must_use]
pub fn outcome_entries(event: &JourneyEvent, outcome: &ApplyOutcome) -> Vec<LogEntry> {
    let ts = event.at();
    let meal = event.meal_id().as_str();
    match outcome {
        ApplyOutcome::Applied(transitions) => {
            let head = match event {
                JourneyEvent::MealLogged { triggers, .. } => {
                    let entry = LogEntry::new(EventType::MealLogged, Severity::Info, ts).meal(meal);
                    if triggers.is_empty() {
                        entry
                    } else {
                        let names: Vec<&str> = triggers.iter().map(|t| t.category.as_str()).collect();
                        entry.details(names.join(","))
                    }
                }
                JourneyEvent::MealRated { rating, .. } => {
                    LogEntry::new(EventType::MealRated, Severity::Info, ts)
                        .meal(meal)
                        .value(f64::from(*rating))
                }
                JourneyEvent::MealSkipped { .. } => {
                    LogEntry::new(EventType::MealSkipped, Severity::Info, ts).meal(meal)
                }
            };
            std::iter::once(head)
                .chain(transitions.iter().map(|t| transition_entry(t, ts)))
                .collect()
        }
        ApplyOutcome::Duplicate => vec![
            LogEntry::new(EventType::DuplicateEvent, Severity::Info, ts)
                .meal(meal)
                .details(event.event_id()),
        ],
        ApplyOutcome::Skipped(SkipReason::MissingReferent { meal_id }) => vec![
            LogEntry::new(EventType::EventSkipped, Severity::Warning, ts)
                .meal(meal_id.as_str())
                .result("missing_referent")
                .details(format!("{} references an unknown meal", event.kind_label())),
        ],
        ApplyOutcome::Skipped(SkipReason::AlreadyRated { meal_id }) => vec![
            LogEntry::new(EventType::EventSkipped, Severity::Info, ts)
                .meal(meal_id.as_str())
                .result("already_rated"),
        ],
    }
}

// ──────────────────── writer façade ────────────────────

/// Journal bound to one user.
pub struct Journal {
    writer: JsonlWriter,
    user: String,
}

impl Journal {
    #[must_use]
    pub fn open(config: JsonlConfig, user: impl Into<String>) -> Self {
        Self {
            writer: JsonlWriter::open(config),
            user: user.into(),
        }
    }

    pub fn record(&mut self, mut entry: LogEntry) {
        entry.user.get_or_insert_with(|| self.user.clone());
        self.writer.write_entry(&entry);
    }

    pub fn record_outcome(&mut self, event: &JourneyEvent, outcome: &ApplyOutcome) {
        for entry in outcome_entries(event, outcome) {
            self.record(entry);
        }
    }

    pub fn record_transitions(&mut self, transitions: &[Transition], ts: DateTime<Utc>) {
        for t in transitions {
            self.record(transition_entry(t, ts));
        }
    }

    /// Every outcome of a replay, then rejected records, then the closing tick.
    pub fn record_report(&mut self, report: &ReplayReport, now: DateTime<Utc>) {
        for (event, outcome) in &report.outcomes {
            self.record_outcome(event, outcome);
        }
        for rejected in &report.rejected {
            self.record(
                LogEntry::new(EventType::EventSkipped, Severity::Warning, now)
                    .meal(rejected.id.as_str())
                    .result("rejected_record")
                    .details(rejected.reason.to_string()),
            );
        }
        self.record_transitions(&report.tick, now);
    }

    pub fn record_error(&mut self, err: &GjError, ts: DateTime<Utc>) {
        self.record(LogEntry::new(EventType::Error, Severity::Error, ts).error(err));
    }

    #[must_use]
    pub fn state(&self) -> &'static str {
        self.writer.state()
    }

    pub fn flush(&mut self) {
        self.writer.flush();
    }
}
