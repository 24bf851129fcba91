//! Event source adapter: turns the meal store's export into ordered journey events.
//!
//! The store hands over records shaped like
//! `{id, created_at, rating_status, bloating_rating, detected_triggers[]}`.
//! A payload that is not an array of objects with an `id` is a hard error.
//! Individual records with unusable content (bad timestamps, ratings outside
//! 1..=5, a completed status with no rating) are rejected one by one and
//! reported back, never silently repaired.

#![allow(missing_docs)]

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{GjError, Result};
use crate::source::meal::{DetectedTrigger, MealFact, MealId, RatingStatus};

// ──────────────────── wire records ────────────────────

/// Trigger entry as produced by the recognition collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerRecord {
    pub category: Option<String>,
    pub food: Option<String>,
    pub confidence: Option<f64>,
}

/// One meal row from the external meal store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealRecord {
    pub id: String,
    pub created_at: String,
    #[serde(default)]
    pub rated_at: Option<String>,
    #[serde(default)]
    pub rating_status: Option<String>,
    #[serde(default)]
    pub bloating_rating: Option<i64>,
    #[serde(default)]
    pub detected_triggers: Vec<TriggerRecord>,
}

/// Why a record was left out of the normalized stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum RejectReason {
    EmptyId,
    BadTimestamp { field: &'static str, value: String },
    UnknownStatus { value: String },
    RatingOutOfRange { value: i64 },
    CompletedWithoutRating,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyId => write!(f, "empty meal id"),
            Self::BadTimestamp { field, value } => write!(f, "unparseable {field}: {value:?}"),
            Self::UnknownStatus { value } => write!(f, "unknown rating_status {value:?}"),
            Self::RatingOutOfRange { value } => write!(f, "bloating_rating {value} outside 1..=5"),
            Self::CompletedWithoutRating => write!(f, "completed rating with no bloating_rating"),
        }
    }
}

/// A record the adapter could not use.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedRecord {
    pub id: String,
    #[serde(flatten)]
    pub reason: RejectReason,
}

/// Normalized, deduplicated facts ordered by creation time.
#[derive(Debug, Clone, Default)]
pub struct NormalizedStream {
    pub facts: Vec<MealFact>,
    pub rejected: Vec<RejectedRecord>,
}

// ──────────────────── journey events ────────────────────

/// A discrete input to the progression reducer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum JourneyEvent {
    MealLogged {
        meal_id: MealId,
        at: DateTime<Utc>,
        triggers: Vec<DetectedTrigger>,
    },
    MealRated {
        meal_id: MealId,
        at: DateTime<Utc>,
        rating: u8,
    },
    MealSkipped {
        meal_id: MealId,
        at: DateTime<Utc>,
    },
}

impl JourneyEvent {
    /// Stable identifier used for replay deduplication.
    #[must_use]
    pub fn event_id(&self) -> String {
        format!("{}:{}", self.kind_label(), self.meal_id())
    }

    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::MealLogged { .. } => "logged",
            Self::MealRated { .. } => "rated",
            Self::MealSkipped { .. } => "skipped",
        }
    }

    #[must_use]
    pub fn meal_id(&self) -> &MealId {
        match self {
            Self::MealLogged { meal_id, .. }
            | Self::MealRated { meal_id, .. }
            | Self::MealSkipped { meal_id, .. } => meal_id,
        }
    }

    #[must_use]
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::MealLogged { at, .. } | Self::MealRated { at, .. } | Self::MealSkipped { at, .. } => {
                *at
            }
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::MealLogged { .. } => 0,
            Self::MealRated { .. } => 1,
            Self::MealSkipped { .. } => 2,
        }
    }
}

// ──────────────────── adapter ────────────────────

/// Parse a JSON export from the meal store.
pub fn parse_stream(raw: &str) -> Result<Vec<MealRecord>> {
    serde_json::from_str(raw).map_err(|e| GjError::MalformedEvent {
        details: format!("meal stream: {e}"),
    })
}

/// Normalize one record into a [`MealFact`].
pub fn normalize_record(record: &MealRecord) -> std::result::Result<MealFact, RejectReason> {
    let id = record.id.trim();
    if id.is_empty() {
        return Err(RejectReason::EmptyId);
    }

    let created_at = parse_ts("created_at", &record.created_at)?;
    let rated_at = match record.rated_at.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(parse_ts("rated_at", raw)?),
    };

    let rating_status = match record
        .rating_status
        .as_deref()
        .map(|s| s.trim().to_ascii_lowercase())
        .as_deref()
    {
        None | Some("" | "pending") => RatingStatus::Pending,
        Some("completed" | "rated") => RatingStatus::Completed,
        Some("skipped") => RatingStatus::Skipped,
        Some(other) => {
            return Err(RejectReason::UnknownStatus {
                value: other.to_string(),
            });
        }
    };

    let bloating_rating = match record.bloating_rating {
        None => None,
        Some(value) => Some(
            u8::try_from(value)
                .ok()
                .filter(|r| (1..=5).contains(r))
                .ok_or(RejectReason::RatingOutOfRange { value })?,
        ),
    };
    if rating_status == RatingStatus::Completed && bloating_rating.is_none() {
        return Err(RejectReason::CompletedWithoutRating);
    }

    let mut triggers: Vec<DetectedTrigger> = record
        .detected_triggers
        .iter()
        .filter_map(|t| {
            let category = t.category.as_deref()?.trim().to_ascii_lowercase();
            if category.is_empty() {
                return None;
            }
            let food = t
                .food
                .as_deref()
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .unwrap_or(&category)
                .to_string();
            Some(DetectedTrigger {
                category,
                food,
                confidence: t.confidence.unwrap_or(1.0).clamp(0.0, 1.0),
            })
        })
        .collect();
    triggers.sort_by(|a, b| {
        a.category
            .cmp(&b.category)
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });
    triggers.dedup_by(|a, b| a.category == b.category && a.food == b.food);

    Ok(MealFact {
        id: MealId::new(id),
        created_at,
        rated_at: rated_at.filter(|_| rating_status != RatingStatus::Pending),
        rating_status,
        bloating_rating: bloating_rating.filter(|_| rating_status == RatingStatus::Completed),
        triggers,
    })
}

/// Normalize a full export. Records sharing an id collapse to the one with
/// the most advanced rating status (later records win ties).
#[must_use]
pub fn normalize(records: &[MealRecord]) -> NormalizedStream {
    let mut by_id: BTreeMap<MealId, MealFact> = BTreeMap::new();
    let mut rejected = Vec::new();

    for record in records {
        match normalize_record(record) {
            Ok(fact) => {
                let keep_existing = by_id
                    .get(&fact.id)
                    .is_some_and(|existing| existing.rating_status > fact.rating_status);
                if !keep_existing {
                    by_id.insert(fact.id.clone(), fact);
                }
            }
            Err(reason) => rejected.push(RejectedRecord {
                id: record.id.clone(),
                reason,
            }),
        }
    }

    let mut facts: Vec<MealFact> = by_id.into_values().collect();
    facts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    NormalizedStream { facts, rejected }
}

/// Expand facts into the chronological event sequence the reducer consumes.
#[must_use]
pub fn events_for(facts: &[MealFact]) -> Vec<JourneyEvent> {
    let mut events = Vec::with_capacity(facts.len() * 2);
    for fact in facts {
        events.push(JourneyEvent::MealLogged {
            meal_id: fact.id.clone(),
            at: fact.created_at,
            triggers: fact.triggers.clone(),
        });
        match fact.rating_status {
            RatingStatus::Completed => {
                if let Some(rating) = fact.bloating_rating {
                    events.push(JourneyEvent::MealRated {
                        meal_id: fact.id.clone(),
                        at: fact.rating_time(),
                        rating,
                    });
                }
            }
            RatingStatus::Skipped => events.push(JourneyEvent::MealSkipped {
                meal_id: fact.id.clone(),
                at: fact.rated_at.unwrap_or(fact.created_at),
            }),
            RatingStatus::Pending => {}
        }
    }
    events.sort_by(compare_events);
    events
}

fn compare_events(a: &JourneyEvent, b: &JourneyEvent) -> Ordering {
    a.at()
        .cmp(&b.at())
        .then_with(|| a.rank().cmp(&b.rank()))
        .then_with(|| a.meal_id().cmp(b.meal_id()))
}

fn parse_ts(field: &'static str, raw: &str) -> std::result::Result<DateTime<Utc>, RejectReason> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RejectReason::BadTimestamp {
            field,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, created: &str, status: &str, rating: Option<i64>) -> MealRecord {
        MealRecord {
            id: id.to_string(),
            created_at: created.to_string(),
            rated_at: None,
            rating_status: Some(status.to_string()),
            bloating_rating: rating,
            detected_triggers: vec![TriggerRecord {
                category: Some(" Dairy ".to_string()),
                food: Some("cheese".to_string()),
                confidence: Some(0.8),
            }],
        }
    }

    #[test]
    fn parses_store_export() {
        let raw = r#"[
            {"id": "a", "created_at": "2026-03-01T08:00:00Z", "rating_status": "completed",
             "bloating_rating": 4, "detected_triggers": [{"category": "gluten", "food": "toast", "confidence": 0.7}]},
            {"id": "b", "created_at": "2026-03-01T12:00:00+02:00"}
        ]"#;
        let records = parse_stream(raw).expect("parse");
        let stream = normalize(&records);
        assert_eq!(stream.facts.len(), 2);
        assert!(stream.rejected.is_empty());
        // "b" is 10:00Z once its +02:00 offset is applied.
        assert_eq!(stream.facts[0].id.as_str(), "a");
        assert_eq!(stream.facts[0].bloating_rating, Some(4));
        assert_eq!(stream.facts[0].triggers[0].category, "gluten");
        assert_eq!(stream.facts[1].id.as_str(), "b");
        assert_eq!(stream.facts[1].rating_status, RatingStatus::Pending);
    }

    #[test]
    fn malformed_payload_shape_is_hard_error() {
        let err = parse_stream(r#"{"not": "an array"}"#).unwrap_err();
        assert_eq!(err.code(), "GJ-2004");
        assert!(parse_stream(r#"[{"created_at": "2026-03-01T08:00:00Z"}]"#).is_err());
    }

    #[test]
    fn bad_records_are_rejected_individually() {
        let records = vec![
            record("ok", "2026-03-01T08:00:00Z", "completed", Some(3)),
            record("late", "yesterday", "pending", None),
            record("hot", "2026-03-01T09:00:00Z", "completed", Some(9)),
            record("empty", "2026-03-01T10:00:00Z", "completed", None),
            record("odd", "2026-03-01T11:00:00Z", "maybe", None),
            record("  ", "2026-03-01T11:00:00Z", "pending", None),
        ];
        let stream = normalize(&records);
        assert_eq!(stream.facts.len(), 1);
        let reasons: Vec<&RejectReason> = stream.rejected.iter().map(|r| &r.reason).collect();
        assert!(matches!(reasons[0], RejectReason::BadTimestamp { field: "created_at", .. }));
        assert_eq!(reasons[1], &RejectReason::RatingOutOfRange { value: 9 });
        assert_eq!(reasons[2], &RejectReason::CompletedWithoutRating);
        assert!(matches!(reasons[3], RejectReason::UnknownStatus { .. }));
        assert_eq!(reasons[4], &RejectReason::EmptyId);
    }

    #[test]
    fn categories_are_normalized_and_deduplicated() {
        let mut rec = record("m", "2026-03-01T08:00:00Z", "pending", None);
        rec.detected_triggers.push(TriggerRecord {
            category: Some("dairy".to_string()),
            food: Some("cheese".to_string()),
            confidence: Some(0.5),
        });
        rec.detected_triggers.push(TriggerRecord {
            category: None,
            food: Some("mystery".to_string()),
            confidence: None,
        });
        let fact = normalize_record(&rec).expect("normalize");
        assert_eq!(fact.triggers.len(), 1);
        assert_eq!(fact.triggers[0].category, "dairy");
        assert!((fact.triggers[0].confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn duplicate_ids_keep_most_advanced_status() {
        let records = vec![
            record("m", "2026-03-01T08:00:00Z", "completed", Some(2)),
            record("m", "2026-03-01T08:00:00Z", "pending", None),
        ];
        let stream = normalize(&records);
        assert_eq!(stream.facts.len(), 1);
        assert_eq!(stream.facts[0].rating_status, RatingStatus::Completed);
    }

    #[test]
    fn events_are_chronological_with_logs_before_ratings() {
        let mut a = record("a", "2026-03-01T08:00:00Z", "completed", Some(2));
        a.rated_at = Some("2026-03-01T20:00:00Z".to_string());
        let b = record("b", "2026-03-01T09:00:00Z", "skipped", None);
        let c = record("c", "2026-03-01T10:00:00Z", "pending", None);
        let stream = normalize(&[a, b, c]);
        let events = events_for(&stream.facts);
        let labels: Vec<String> = events.iter().map(JourneyEvent::event_id).collect();
        assert_eq!(
            labels,
            vec!["logged:a", "logged:b", "skipped:b", "logged:c", "rated:a"]
        );
    }
}
