//! Client configuration, read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{default_cache_path, CacheLocation};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(12);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the backing API. Missing is a fatal configuration error,
    /// reported on the first call rather than at startup.
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub tick_interval: Duration,
    pub cache: CacheLocation,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            tick_interval: DEFAULT_TICK_INTERVAL,
            cache: CacheLocation::Memory,
        }
    }
}

impl ClientConfig {
    /// Read `F15_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let cache = match get("F15_CACHE_PATH").as_deref() {
            Some("memory") => CacheLocation::Memory,
            Some("off") | Some("disabled") => CacheLocation::Disabled,
            Some(path) => CacheLocation::File(PathBuf::from(path)),
            None => match default_cache_path() {
                Ok(path) => CacheLocation::File(path),
                Err(err) => {
                    tracing::warn!("no usable cache location, running without cache: {err:?}");
                    CacheLocation::Disabled
                }
            },
        };

        Self {
            api_url: get("F15_API_URL"),
            api_key: get("F15_API_KEY"),
            request_timeout: duration_var(
                get("F15_TIMEOUT_SECS"),
                "F15_TIMEOUT_SECS",
                Duration::from_secs,
                DEFAULT_REQUEST_TIMEOUT,
            ),
            poll_interval: duration_var(
                get("F15_POLL_SECS"),
                "F15_POLL_SECS",
                Duration::from_secs,
                DEFAULT_POLL_INTERVAL,
            ),
            tick_interval: duration_var(
                get("F15_TICK_MILLIS"),
                "F15_TICK_MILLIS",
                Duration::from_millis,
                DEFAULT_TICK_INTERVAL,
            ),
            cache,
        }
    }

    pub fn with_api(mut self, api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn duration_var(
    raw: Option<String>,
    name: &str,
    unit: fn(u64) -> Duration,
    default: Duration,
) -> Duration {
    match raw {
        None => default,
        Some(raw) => match raw.parse::<u64>() {
            Ok(0) | Err(_) => {
                tracing::warn!(var = name, value = %raw, "invalid duration, using default");
                default
            }
            Ok(n) => unit(n),
        },
    }
}
