//! Small shared types used by both engines.

use serde::{Deserialize, Serialize};

use crate::remote::RemoteError;

/// Connectivity state of the client, as last observed by a remote call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// The backend answered the last call (successfully or not).
    #[default]
    Online,
    /// The last call timed out or never reached the backend.
    Offline,
}

impl ConnectivityState {
    pub fn after<T>(result: &Result<T, RemoteError>) -> Option<Self> {
        match result {
            Ok(_) => Some(Self::Online),
            Err(err) if err.is_connectivity() => Some(Self::Offline),
            Err(RemoteError::Application { .. }) | Err(RemoteError::Parse(_)) => {
                Some(Self::Online)
            }
            Err(_) => None,
        }
    }
}

/// What an engine operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation ran and its result was applied.
    Applied,
    /// The operation was a no-op: guarded, already in the target state, or
    /// its result was stale by the time it arrived.
    Ignored,
}
