//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

const TEMPORARY_PREFIX: &str = "tmp-";

/// Identifier of a task timer.
///
/// Confirmed timers carry the id assigned by the remote store. A timer that
/// has been started locally but not yet acknowledged carries a client-generated
/// temporary id (`tmp-<uuid>`), which is never sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TimerId(String);

impl TimerId {
    /// Create a fresh temporary identifier.
    ///
    /// Uses UUIDv7 (time-ordered) so temporary ids sort by creation.
    pub fn temporary() -> Self {
        Self(format!("{TEMPORARY_PREFIX}{}", Uuid::now_v7()))
    }

    /// Wrap an id assigned by the remote store.
    pub fn confirmed(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_id("TimerId: empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Whether this id was generated locally and is awaiting confirmation.
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMPORARY_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for TimerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TimerId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::confirmed(s)
    }
}

// The backing store hands out row numbers for some sheets, so ids arrive
// either as strings or as bare numbers.
impl<'de> Deserialize<'de> for TimerId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        let raw = match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s,
            Raw::Number(n) => n.to_string(),
        };
        TimerId::confirmed(raw).map_err(serde::de::Error::custom)
    }
}
