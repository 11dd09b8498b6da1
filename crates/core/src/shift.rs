//! Shift (clock-in / clock-out) state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single continuous clocked-in period that has not ended yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftSpan {
    #[serde(alias = "inISO")]
    pub started_at: DateTime<Utc>,
}

impl ShiftSpan {
    pub fn starting_at(started_at: DateTime<Utc>) -> Self {
        Self { started_at }
    }
}

/// Shift state for the signed-in user.
///
/// `active` is `Some` exactly when the user is clocked in. The minute totals
/// are aggregates last confirmed by the remote store; they are never derived
/// locally from `active`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "ShiftRecord")]
pub struct ShiftState {
    pub active: Option<ShiftSpan>,
    pub today_minutes: f64,
    pub week_minutes: f64,
}

/// Older backends report totals in hours. Minutes win when both are sent.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShiftRecord {
    #[serde(default)]
    active: Option<ShiftSpan>,
    today_minutes: Option<f64>,
    week_minutes: Option<f64>,
    today_hours: Option<f64>,
    week_hours: Option<f64>,
}

impl From<ShiftRecord> for ShiftState {
    fn from(record: ShiftRecord) -> Self {
        let minutes = |minutes: Option<f64>, hours: Option<f64>| {
            minutes.or(hours.map(|h| h * 60.0)).unwrap_or(0.0)
        };
        Self {
            active: record.active,
            today_minutes: minutes(record.today_minutes, record.today_hours),
            week_minutes: minutes(record.week_minutes, record.week_hours),
        }
    }
}

impl ShiftState {
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Same aggregates, with `active` replaced.
    pub fn with_active(&self, active: Option<ShiftSpan>) -> Self {
        Self {
            active,
            ..self.clone()
        }
    }
}
