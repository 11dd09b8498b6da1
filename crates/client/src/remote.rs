//! Request abstraction over the backing HTTP API.
//!
//! Every logical action is a single HTTP round trip against one endpoint:
//! reads are `GET base?action=..&key=..`, writes are form-encoded `POST`s with
//! the same fields. Responses are JSON objects; an explicit `"ok": false`
//! wins over whatever the HTTP status said.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::session::SessionContext;

/// Whether an action reads or mutates remote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Read,
    Write,
}

impl Method {
    fn verb(self) -> &'static str {
        match self {
            Method::Read => "GET",
            Method::Write => "POST",
        }
    }
}

/// Scalar parameter value. The wire format is flat key/value text.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Scalar {
    pub fn to_wire(&self) -> String {
        match self {
            Scalar::Text(s) => s.clone(),
            Scalar::Number(n) => n.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Number(value as f64)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Number(value)
    }
}

/// Parameters of a single call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(BTreeMap<String, Scalar>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Scalar>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Scalar)> {
        self.0.iter()
    }
}

/// Failure of a remote call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    /// Missing endpoint/credential or a malformed action. Never retried.
    #[error("configuration error: {0}")]
    Config(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    /// The server answered and reported a business-rule failure.
    #[error("{message}")]
    Application { message: String },
    #[error("parse error: {0}")]
    Parse(String),
    /// A user-scoped write was attempted with nobody signed in.
    #[error("not signed in")]
    NoSession,
}

impl RemoteError {
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
        }
    }

    /// Fatal errors are shown once as a persistent banner and never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RemoteError::Config(_))
    }

    /// Errors that say the backend could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RemoteError::Timeout(_) | RemoteError::Network(_))
    }
}

/// The seam between the sync engines and the network.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn call(&self, action: &str, params: Params, method: Method)
    -> Result<Value, RemoteError>;
}

/// HTTP implementation of [`RemoteApi`].
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
    timeout: Duration,
    session: SessionContext,
}

impl RemoteClient {
    pub fn new(config: &ClientConfig, session: SessionContext) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RemoteError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
            session,
        })
    }

    fn endpoint(&self) -> Result<(&str, &str), RemoteError> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| RemoteError::Config("missing API base URL (F15_API_URL)".into()))?;
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| RemoteError::Config("missing API key (F15_API_KEY)".into()))?;
        Ok((base, key))
    }

    /// Flatten action, credential, identity and params into wire pairs.
    fn wire_pairs(
        &self,
        action: &str,
        key: &str,
        params: &Params,
        method: Method,
    ) -> Result<Vec<(String, String)>, RemoteError> {
        let email = match params.get("email") {
            Some(explicit) => Some(explicit.to_wire()),
            None => self.session.email(),
        };
        if method == Method::Write && email.is_none() {
            return Err(RemoteError::NoSession);
        }

        let mut pairs = vec![
            ("action".to_string(), action.to_string()),
            ("key".to_string(), key.to_string()),
        ];
        if let Some(email) = email {
            pairs.push(("email".to_string(), email));
        }
        for (name, value) in params.iter() {
            match name.as_str() {
                "email" => {}
                "action" | "key" => {
                    tracing::warn!(action, param = %name, "ignoring reserved parameter");
                }
                _ => pairs.push((name.clone(), value.to_wire())),
            }
        }
        Ok(pairs)
    }

    fn classify(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl RemoteApi for RemoteClient {
    async fn call(
        &self,
        action: &str,
        params: Params,
        method: Method,
    ) -> Result<Value, RemoteError> {
        validate_action(action)?;
        let (base, key) = self.endpoint()?;
        let pairs = self.wire_pairs(action, key, &params, method)?;

        let request = match method {
            Method::Read => self.http.get(base).query(&pairs),
            Method::Write => self.http.post(base).form(&pairs),
        };

        let started = Instant::now();
        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        let result = decode_envelope(action, method, status, &body);
        match &result {
            Ok(_) => tracing::debug!(
                action,
                method = method.verb(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "remote call ok"
            ),
            Err(err) => tracing::debug!(
                action,
                method = method.verb(),
                status = status.as_u16(),
                error = %err,
                "remote call failed"
            ),
        }
        result
    }
}

fn validate_action(action: &str) -> Result<(), RemoteError> {
    let valid = !action.is_empty()
        && action
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(RemoteError::Config(format!("invalid action name '{action}'")))
    }
}

/// Normalize a raw response into the JSON body or a [`RemoteError`].
pub(crate) fn decode_envelope(
    action: &str,
    method: Method,
    status: StatusCode,
    body: &[u8],
) -> Result<Value, RemoteError> {
    let parsed: Result<Value, _> = serde_json::from_slice(body);

    if let Ok(json) = &parsed {
        if json.get("ok").and_then(Value::as_bool) == Some(false) {
            let message = json
                .get("error")
                .and_then(Value::as_str)
                .filter(|m| !m.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("{action} failed"));
            return Err(RemoteError::application(message));
        }
    }

    if !status.is_success() {
        return Err(RemoteError::Network(format!(
            "{} {action} {}",
            method.verb(),
            status.as_u16()
        )));
    }

    parsed.map_err(|e| RemoteError::Parse(format!("{action}: {e}")))
}
