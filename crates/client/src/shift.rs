//! Shift clock-in / clock-out with optimistic-then-reconciled semantics.
//!
//! ```text
//! Idle --start()--> ActiveOptimistic --ok--> ActiveConfirmed
//!                                    --err-> Idle (pre-start state restored)
//! ActiveConfirmed --stop()--> StoppingOptimistic --ok--> Idle (server totals)
//!                                                --err-> resync from server
//! ```
//!
//! A background poll overwrites local state with `shiftSummary`, except
//! while a start/stop is in flight or when one started or settled while the
//! poll was outstanding.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use f15_core::{Session, ShiftSpan, ShiftState};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};

use crate::cache::{keys, LocalCache};
use crate::optimistic::{reconcile, OptimisticMutation, Reconcilable};
use crate::remote::{Method, Params, RemoteApi, RemoteError};
use crate::scheduler::{start_interval, CancelHandle};
use crate::session::SessionContext;
use crate::types::{ConnectivityState, Outcome};

pub const ACTION_SUMMARY: &str = "shiftSummary";
pub const ACTION_START: &str = "startShift";
pub const ACTION_STOP: &str = "stopShift";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ShiftPhase {
    Idle,
    ActiveOptimistic,
    ActiveConfirmed,
    StoppingOptimistic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShiftMutation {
    Start,
    Stop,
}

/// What readers of the shift engine see.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShiftSnapshot {
    pub state: ShiftState,
    pub connectivity: ConnectivityState,
    /// When the server last confirmed `state`.
    pub last_synced_at: Option<DateTime<Utc>>,
    pending: Option<ShiftMutation>,
    /// Whether `state` came from the server or the cache, rather than being
    /// the empty default.
    loaded: bool,
    epoch: u64,
}

impl ShiftSnapshot {
    pub fn phase(&self) -> ShiftPhase {
        match (self.pending, self.state.is_active()) {
            (Some(ShiftMutation::Start), _) => ShiftPhase::ActiveOptimistic,
            (Some(ShiftMutation::Stop), _) => ShiftPhase::StoppingOptimistic,
            (None, true) => ShiftPhase::ActiveConfirmed,
            (None, false) => ShiftPhase::Idle,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn confirm(&mut self, state: ShiftState) {
        self.state = state;
        self.pending = None;
        self.loaded = true;
        self.connectivity = ConnectivityState::Online;
        self.last_synced_at = Some(Utc::now());
    }
}

impl Reconcilable for ShiftSnapshot {
    fn epoch(&self) -> u64 {
        self.epoch
    }

    fn bump_epoch(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }

    fn holds_reads(&self) -> bool {
        self.is_busy()
    }
}

/// Owns the shift state for the signed-in user.
pub struct ShiftEngine {
    remote: Arc<dyn RemoteApi>,
    cache: LocalCache,
    session: SessionContext,
    store: watch::Sender<ShiftSnapshot>,
    /// Serializes cache mirroring so the last write reflects the latest state.
    cache_lock: Mutex<()>,
}

impl ShiftEngine {
    pub fn new(remote: Arc<dyn RemoteApi>, cache: LocalCache, session: SessionContext) -> Self {
        let (store, _) = watch::channel(ShiftSnapshot::default());
        Self {
            remote,
            cache,
            session,
            store,
            cache_lock: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ShiftSnapshot> {
        self.store.subscribe()
    }

    pub fn snapshot(&self) -> ShiftSnapshot {
        self.store.borrow().clone()
    }

    /// Paint the cached state, if nothing fresher has been loaded yet.
    pub async fn restore_from_cache(&self) -> bool {
        let Some(session) = self.session.current() else {
            return false;
        };
        let Some(cached) = self.cache.get_as::<ShiftState>(&keys::shift(session.email())).await
        else {
            return false;
        };

        let painted = self.store.send_if_modified(|s| {
            if s.loaded || s.is_busy() {
                return false;
            }
            s.state = cached;
            s.loaded = true;
            true
        });
        if painted {
            tracing::debug!(email = session.email(), "painted shift state from cache");
        }
        painted
    }

    /// Fetch the authoritative summary and overwrite local state with it.
    ///
    /// Returns `Ignored` when the result was discarded because a mutation was
    /// in flight or settled while the read was outstanding. On failure the
    /// last known state is kept.
    pub async fn refresh(&self) -> Result<Outcome, RemoteError> {
        let Some(session) = self.session.current() else {
            return Ok(Outcome::Ignored);
        };
        let seen = self.store.borrow().epoch;

        let result = self.fetch_summary().await;
        self.note_connectivity(&result);

        match result {
            Ok(state) => {
                let applied = reconcile(&self.store, seen, |s| s.confirm(state));
                if !applied {
                    tracing::debug!("discarding shift summary that raced a mutation");
                    return Ok(Outcome::Ignored);
                }
                self.persist_current(&session).await;
                Ok(Outcome::Applied)
            }
            Err(err) => {
                let loaded = self.store.borrow().loaded;
                if !loaded {
                    self.restore_from_cache().await;
                }
                Err(err)
            }
        }
    }

    /// Clock in.
    ///
    /// The shift shows as active immediately. If the server rejects the
    /// start, the state returns to exactly what it was before and the cached
    /// entry is dropped.
    pub async fn start(&self) -> Result<Outcome, RemoteError> {
        let session = self.session.current().ok_or(RemoteError::NoSession)?;
        let span = ShiftSpan::starting_at(Utc::now());

        let Some(mutation) = OptimisticMutation::apply(
            &self.store,
            "shift.start",
            |s| {
                if s.is_busy() || s.state.is_active() {
                    return None;
                }
                let before = s.state.clone();
                s.state.active = Some(span);
                s.pending = Some(ShiftMutation::Start);
                Some(before)
            },
            |s, before| {
                s.state = before;
                s.pending = None;
            },
        ) else {
            tracing::debug!("start ignored: busy or already clocked in");
            return Ok(Outcome::Ignored);
        };
        self.persist_current(&session).await;

        let result = mutation
            .settle(self.write_then_summary(ACTION_START), |s, _before, summary| {
                let active = summary.active.or(s.state.active);
                s.confirm(summary.with_active(active));
            })
            .await;
        self.note_connectivity(&result);
        self.persist_current(&session).await;

        match result {
            Ok(_) => {
                tracing::info!(email = session.email(), "clocked in");
                Ok(Outcome::Applied)
            }
            Err(err) => Err(err),
        }
    }

    /// Clock out.
    ///
    /// The shift shows as stopped immediately. If the server rejects the
    /// stop, the engine does not guess at the previous span; it re-reads the
    /// authoritative summary instead.
    pub async fn stop(&self) -> Result<Outcome, RemoteError> {
        let session = self.session.current().ok_or(RemoteError::NoSession)?;

        let Some(mutation) = OptimisticMutation::apply(
            &self.store,
            "shift.stop",
            |s| {
                if s.is_busy() || !s.state.is_active() {
                    return None;
                }
                s.state.active = None;
                s.pending = Some(ShiftMutation::Stop);
                Some(())
            },
            // Abandoned mid-flight: stay clocked out, the next poll resyncs.
            |s, ()| s.pending = None,
        ) else {
            tracing::debug!("stop ignored: busy or not clocked in");
            return Ok(Outcome::Ignored);
        };
        self.persist_current(&session).await;

        let result = self.write_then_summary(ACTION_STOP).await;
        self.note_connectivity(&result);

        let outcome = match result {
            Ok(summary) => {
                mutation.commit(|s, ()| s.confirm(summary.with_active(None)));
                tracing::info!(email = session.email(), "clocked out");
                Ok(Outcome::Applied)
            }
            Err(err) => {
                tracing::warn!(error = %err, "clock out rejected, resyncing from server");
                let fresh = self.fetch_summary().await;
                self.note_connectivity(&fresh);
                mutation.commit(|s, ()| match fresh {
                    Ok(state) => s.confirm(state),
                    Err(_) => s.pending = None,
                });
                Err(err)
            }
        };
        self.persist_current(&session).await;
        outcome
    }

    /// Forget all in-memory state (sign-out). The cache is left alone.
    pub fn reset(&self) {
        self.store.send_modify(|s| {
            let epoch = s.epoch.wrapping_add(1);
            *s = ShiftSnapshot {
                epoch,
                ..ShiftSnapshot::default()
            };
        });
    }

    /// Poll `shiftSummary` every `period`, starting now.
    ///
    /// Poll failures are silent; the last known state stays on screen.
    pub fn spawn_polling(self: &Arc<Self>, period: Duration) -> CancelHandle {
        let engine = Arc::clone(self);
        start_interval("shift-poll", period, move || {
            let engine = Arc::clone(&engine);
            async move {
                if let Err(err) = engine.refresh().await {
                    tracing::debug!(error = %err, "shift poll failed, keeping last known state");
                }
            }
        })
    }

    async fn fetch_summary(&self) -> Result<ShiftState, RemoteError> {
        let body = self
            .remote
            .call(ACTION_SUMMARY, Params::new(), Method::Read)
            .await?;
        decode_summary(body)
    }

    /// Issue a write; use the summary it returns, or read one if it didn't.
    async fn write_then_summary(&self, action: &str) -> Result<ShiftState, RemoteError> {
        let body = self.remote.call(action, Params::new(), Method::Write).await?;
        match summary_in(&body) {
            Some(summary) => decode_summary(summary.clone()),
            None => self.fetch_summary().await,
        }
    }

    /// Mirror the current state to the cache: present iff clocked in.
    async fn persist_current(&self, session: &Session) {
        let _guard = self.cache_lock.lock().await;
        let state = self.store.borrow().state.clone();
        let key = keys::shift(session.email());
        if state.is_active() {
            self.cache.set_as(&key, &state).await;
        } else {
            self.cache.remove(&key).await;
        }
    }

    fn note_connectivity<T>(&self, result: &Result<T, RemoteError>) {
        if let Some(connectivity) = ConnectivityState::after(result) {
            self.store.send_if_modified(|s| {
                let changed = s.connectivity != connectivity;
                s.connectivity = connectivity;
                changed
            });
        }
    }
}

fn summary_in(body: &Value) -> Option<&Value> {
    if let Some(nested) = body.get("summary").filter(|v| v.is_object()) {
        return Some(nested);
    }
    let has_fields = ["active", "todayMinutes", "weekMinutes", "todayHours", "weekHours"]
        .iter()
        .any(|field| body.get(field).is_some());
    has_fields.then_some(body)
}

fn decode_summary(body: Value) -> Result<ShiftState, RemoteError> {
    serde_json::from_value(body).map_err(|e| RemoteError::Parse(format!("shift summary: {e}")))
}
