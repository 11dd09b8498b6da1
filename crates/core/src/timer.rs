//! Task timers and the history they produce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::entity::Entity;
use crate::error::{DomainError, DomainResult};
use crate::id::TimerId;

/// Mutation currently in flight for a timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingOp {
    #[default]
    None,
    Starting,
    Stopping,
}

/// A named timer running independently of the shift clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "TimerRecord")]
pub struct TaskTimer {
    pub id: TimerId,
    pub label: String,
    pub project_ref: Option<String>,
    pub started_at: DateTime<Utc>,
    pub pending: PendingOp,
    pub failed: bool,
}

/// Timer as read from the server or the cache. The server may send the task
/// name, a label, or both.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimerRecord {
    id: TimerId,
    #[serde(default, deserialize_with = "blank_as_none")]
    label: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    task: Option<String>,
    #[serde(alias = "projectNumber", default, deserialize_with = "blank_as_none")]
    project_ref: Option<String>,
    #[serde(alias = "inISO")]
    started_at: DateTime<Utc>,
    #[serde(default)]
    pending: PendingOp,
    #[serde(default)]
    failed: bool,
}

impl From<TimerRecord> for TaskTimer {
    fn from(record: TimerRecord) -> Self {
        Self {
            id: record.id,
            label: record.label.or(record.task).unwrap_or_default(),
            project_ref: record.project_ref,
            started_at: record.started_at,
            pending: record.pending,
            failed: record.failed,
        }
    }
}

impl TaskTimer {
    /// A locally started timer awaiting confirmation.
    pub fn starting(spec: &TimerSpec, started_at: DateTime<Utc>) -> Self {
        Self {
            id: TimerId::temporary(),
            label: spec.label.clone(),
            project_ref: spec.project_ref.clone(),
            started_at,
            pending: PendingOp::Starting,
            failed: false,
        }
    }

    /// Confirmed by the server, idle and not failed.
    pub fn is_settled(&self) -> bool {
        self.pending == PendingOp::None && !self.failed && !self.id.is_temporary()
    }

    /// Exists only on this client (never acknowledged, or rejected).
    pub fn is_local_only(&self) -> bool {
        self.id.is_temporary() || self.failed
    }

    /// The spec this timer was started from, used to retry a rejected start.
    pub fn spec(&self) -> TimerSpec {
        TimerSpec {
            label: self.label.clone(),
            project_ref: self.project_ref.clone(),
            billable: true,
        }
    }
}

impl Entity for TaskTimer {
    type Id = TimerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// What the user asked for when starting a timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSpec {
    pub label: String,
    pub project_ref: Option<String>,
    pub billable: bool,
}

impl TimerSpec {
    pub fn new(label: impl Into<String>, project_ref: Option<String>) -> DomainResult<Self> {
        let label = label.into().trim().to_string();
        if label.is_empty() {
            return Err(DomainError::validation("timer label must not be blank"));
        }
        let project_ref = project_ref
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        Ok(Self {
            label,
            project_ref,
            billable: true,
        })
    }

    pub fn billable(mut self, billable: bool) -> Self {
        self.billable = billable;
        self
    }
}

/// Immutable historical record produced by a stopped timer or shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeLogEntry {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "projectNumber", default, deserialize_with = "blank_as_none")]
    pub project_ref: Option<String>,
    #[serde(default)]
    pub task: String,
    #[serde(alias = "inISO")]
    pub started_at: DateTime<Utc>,
    #[serde(alias = "outISO")]
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub minutes: f64,
}

impl TimeLogEntry {
    /// Build the history line for a timer the server stopped without echoing
    /// one back.
    pub fn from_stopped(timer: &TaskTimer, ended_at: DateTime<Utc>) -> Self {
        let seconds = ended_at
            .signed_duration_since(timer.started_at)
            .num_seconds()
            .max(0);
        Self {
            id: timer.id.to_string(),
            project_ref: timer.project_ref.clone(),
            task: timer.label.clone(),
            started_at: timer.started_at,
            ended_at,
            minutes: (seconds as f64 / 60.0).round(),
        }
    }
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}
