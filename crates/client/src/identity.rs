//! Health and identity calls used by the sign-in flow.

use serde::Deserialize;
use serde_json::Value;

use crate::remote::{Method, Params, RemoteApi, RemoteError};
use crate::types::ConnectivityState;

pub const ACTION_PING: &str = "ping";
pub const ACTION_VERSION: &str = "version";
pub const ACTION_WHOAMI: &str = "whoami";

/// The server's verdict on an email address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WhoAmI {
    pub email: String,
    /// Whether the address passes the allowed-domain policy. A server that
    /// answers `ok` without the flag is taken to allow it.
    #[serde(default = "allowed_by_default")]
    pub allowed: bool,
    #[serde(default)]
    pub name: Option<String>,
}

fn allowed_by_default() -> bool {
    true
}

pub async fn whoami(remote: &dyn RemoteApi, email: &str) -> Result<WhoAmI, RemoteError> {
    let mut body = remote
        .call(ACTION_WHOAMI, Params::new().with("email", email), Method::Read)
        .await?;
    if body.get("email").and_then(Value::as_str).is_none() {
        if let Some(object) = body.as_object_mut() {
            object.insert("email".into(), Value::String(email.to_string()));
        }
    }
    serde_json::from_value(body).map_err(|e| RemoteError::Parse(format!("whoami: {e}")))
}

/// Probe the backend. Any answer, even a refusal, means it is reachable.
pub async fn ping(remote: &dyn RemoteApi) -> ConnectivityState {
    let result = remote.call(ACTION_PING, Params::new(), Method::Read).await;
    if let Err(err) = &result {
        tracing::debug!(error = %err, "ping failed");
    }
    ConnectivityState::after(&result).unwrap_or(ConnectivityState::Offline)
}

pub async fn version(remote: &dyn RemoteApi) -> Result<String, RemoteError> {
    let body = remote
        .call(ACTION_VERSION, Params::new(), Method::Read)
        .await?;
    match body.get("version") {
        Some(Value::String(v)) => Ok(v.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(RemoteError::Parse("version: missing version field".into())),
    }
}
