use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Calendar event aggregate.
///
/// The id is client-supplied and doubles as the idempotency key for create.
/// Timestamps serialise as RFC3339 and are stored as UTC instants.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    #[serde(rename = "dateEvent")]
    #[sqlx(rename = "start_date_event")]
    pub date_event: DateTime<Utc>,
    #[serde(rename = "endDateEvent")]
    pub end_date_event: DateTime<Utc>,
    #[serde(rename = "creationDate")]
    pub creation_date: DateTime<Utc>,
    #[serde(rename = "descriptionEvent", default)]
    pub description_event: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "timeForNotification", default)]
    pub time_for_notification: Option<DateTime<Utc>>,
    #[serde(rename = "rqTm")]
    pub rq_tm: DateTime<Utc>,
}

/// Partial update of an event. Absent (or empty-string) fields keep the
/// stored value.
#[derive(Debug, Clone, Deserialize)]
pub struct EventPatch {
    pub id: Uuid,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "dateEvent", default)]
    pub date_event: Option<DateTime<Utc>>,
    #[serde(rename = "endDateEvent", default)]
    pub end_date_event: Option<DateTime<Utc>>,
    #[serde(rename = "creationDate", default)]
    pub creation_date: Option<DateTime<Utc>>,
    #[serde(rename = "descriptionEvent", default)]
    pub description_event: Option<String>,
    #[serde(rename = "userID", default)]
    pub user_id: Option<String>,
    #[serde(rename = "timeForNotification", default)]
    pub time_for_notification: Option<DateTime<Utc>>,
    #[serde(rename = "rqTm", default)]
    pub rq_tm: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
#[error("unknown value for closed set: {0}")]
pub struct ClosedSetError(String);

/// Outbox record lifecycle. `Sent` and `GaveUp` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    New,
    Sent,
    Failed,
    GaveUp,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::New => "NEW",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
            OutboxStatus::GaveUp => "GAVE_UP",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Sent | OutboxStatus::GaveUp)
    }
}

impl FromStr for OutboxStatus {
    type Err = ClosedSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OutboxStatus::New),
            "SENT" => Ok(OutboxStatus::Sent),
            "FAILED" => Ok(OutboxStatus::Failed),
            "GAVE_UP" => Ok(OutboxStatus::GaveUp),
            other => Err(ClosedSetError(other.to_string())),
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateType {
    Event,
}

impl AggregateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Event => "event",
        }
    }
}

impl FromStr for AggregateType {
    type Err = ClosedSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(AggregateType::Event),
            other => Err(ClosedSetError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxEventType {
    EventCreated,
}

impl OutboxEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxEventType::EventCreated => "event_created",
        }
    }
}

impl FromStr for OutboxEventType {
    type Err = ClosedSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event_created" => Ok(OutboxEventType::EventCreated),
            other => Err(ClosedSetError(other.to_string())),
        }
    }
}

/// Durable intent to publish, drained by the relay.
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub id: i64,
    pub aggregate_id: Uuid,
    pub aggregate_type: AggregateType,
    pub event_type: OutboxEventType,
    /// Snapshot of the aggregate at commit time; immutable after insert.
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
