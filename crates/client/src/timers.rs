//! Concurrent task timers, each with its own optimistic start/stop.
//!
//! A timer moves `Starting -> settled -> Stopping -> gone`. A rejected start
//! is kept on the board as `failed` (with its label and project) so the user
//! can retry or discard it; a rejected stop just clears `Stopping`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use f15_core::entity::position_of;
use f15_core::{PendingOp, Session, TaskTimer, TimeLogEntry, TimerId, TimerSpec};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};

use crate::cache::{keys, LocalCache};
use crate::optimistic::{reconcile, OptimisticMutation, Reconcilable};
use crate::remote::{Method, Params, RemoteApi, RemoteError};
use crate::scheduler::{start_interval, CancelHandle};
use crate::session::SessionContext;
use crate::types::{ConnectivityState, Outcome};

pub const ACTION_TIMERS: &str = "timers";
pub const ACTION_START_TIMER: &str = "startTimer";
pub const ACTION_STOP_TIMER: &str = "stopTimer";
pub const ACTION_TIME_LOG: &str = "timeLog";

/// Most recent history entries kept on the board.
pub const RECENT_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimerError {
    /// The server refused to start the timer. The record stays on the board
    /// under `id`, marked failed.
    #[error("timer {id} was not started: {source}")]
    Rejected { id: TimerId, source: RemoteError },
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl TimerError {
    pub fn remote(&self) -> &RemoteError {
        match self {
            TimerError::Rejected { source, .. } => source,
            TimerError::Remote(err) => err,
        }
    }
}

/// Running timers and recent history, newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimerBoard {
    pub timers: Vec<TaskTimer>,
    pub recent: Vec<TimeLogEntry>,
    pub connectivity: ConnectivityState,
    pub last_synced_at: Option<DateTime<Utc>>,
    loaded: bool,
    epoch: u64,
}

impl TimerBoard {
    pub fn get(&self, id: &TimerId) -> Option<&TaskTimer> {
        position_of(&self.timers, id).map(|pos| &self.timers[pos])
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn timer_mut(&mut self, id: &TimerId) -> Option<&mut TaskTimer> {
        self.timers.iter_mut().find(|t| &t.id == id)
    }

    fn push_recent(&mut self, entry: TimeLogEntry) {
        self.recent.retain(|e| e.id != entry.id);
        self.recent.insert(0, entry);
        self.recent.truncate(RECENT_LIMIT);
    }

    fn mark_failed(&mut self, id: &TimerId) {
        if let Some(timer) = self.timer_mut(id) {
            timer.pending = PendingOp::None;
            timer.failed = true;
        }
    }

    /// Swap the temporary record for the server's timer, keeping local
    /// values for anything the server left out.
    fn confirm_started(&mut self, temp: &TimerId, server: ServerTimer) {
        if position_of(&self.timers, temp).is_none() {
            tracing::debug!(timer = %temp, "confirmed timer no longer on the board");
            return;
        }
        // A refresh may already have brought the confirmed timer in.
        self.timers.retain(|t| t.id != server.id);
        let Some(local) = self.timer_mut(temp) else {
            return;
        };

        let label = server.label();
        local.id = server.id;
        if let Some(label) = label {
            local.label = label;
        }
        if let Some(project) = server.project_ref.filter(|p| !p.trim().is_empty()) {
            local.project_ref = Some(project);
        }
        if let Some(started_at) = server.started_at {
            local.started_at = started_at;
        }
        local.pending = PendingOp::None;
        local.failed = false;
    }

    /// Replace the board with the server list, keeping records the server
    /// cannot know about yet.
    fn merge_server(&mut self, server: Vec<TaskTimer>) {
        let kept: Vec<TaskTimer> = self
            .timers
            .iter()
            .filter(|t| t.is_local_only() || t.pending != PendingOp::None)
            .cloned()
            .collect();
        let fresh: Vec<TaskTimer> = server
            .into_iter()
            .filter(|t| position_of(&kept, &t.id).is_none())
            .map(|mut t| {
                t.pending = PendingOp::None;
                t.failed = false;
                t
            })
            .collect();

        self.timers = kept;
        self.timers.extend(fresh);
        self.loaded = true;
    }

    fn synced(&mut self) {
        self.connectivity = ConnectivityState::Online;
        self.last_synced_at = Some(Utc::now());
    }
}

impl Reconcilable for TimerBoard {
    fn epoch(&self) -> u64 {
        self.epoch
    }

    fn bump_epoch(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }
}

/// Timer fields as echoed by `startTimer`. Only the id is required.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTimer {
    id: TimerId,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    task: Option<String>,
    #[serde(alias = "projectNumber", default)]
    project_ref: Option<String>,
    #[serde(alias = "inISO", default)]
    started_at: Option<DateTime<Utc>>,
}

impl ServerTimer {
    /// The display label, falling back to the task name.
    fn label(&self) -> Option<String> {
        [&self.label, &self.task]
            .into_iter()
            .flatten()
            .find(|l| !l.trim().is_empty())
            .cloned()
    }
}

/// Owns the task timers for the signed-in user.
pub struct TaskTimerRegistry {
    remote: Arc<dyn RemoteApi>,
    cache: LocalCache,
    session: SessionContext,
    store: watch::Sender<TimerBoard>,
    cache_lock: Mutex<()>,
}

impl TaskTimerRegistry {
    pub fn new(remote: Arc<dyn RemoteApi>, cache: LocalCache, session: SessionContext) -> Self {
        let (store, _) = watch::channel(TimerBoard::default());
        Self {
            remote,
            cache,
            session,
            store,
            cache_lock: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerBoard> {
        self.store.subscribe()
    }

    pub fn snapshot(&self) -> TimerBoard {
        self.store.borrow().clone()
    }

    /// Start a timer. It appears on the board at once with a temporary id;
    /// on success the server id is returned.
    pub async fn start_timer(&self, spec: TimerSpec) -> Result<TimerId, TimerError> {
        let session = self.session.current().ok_or(RemoteError::NoSession)?;
        let record = TaskTimer::starting(&spec, Utc::now());
        let temp = record.id.clone();

        let mutation = OptimisticMutation::apply(
            &self.store,
            "timer.start",
            |board| {
                board.timers.insert(0, record);
                Some(temp.clone())
            },
            |board, temp| board.mark_failed(&temp),
        )
        .ok_or(RemoteError::Config("timer board refused a new timer".into()))?;
        tracing::debug!(timer = %temp, label = %spec.label, "timer started locally");

        self.send_start(&session, mutation, temp, &spec).await
    }

    /// Re-issue the start of a timer whose start was rejected.
    ///
    /// Returns `None` when `id` is not a failed timer.
    pub async fn retry_timer(&self, id: &TimerId) -> Result<Option<TimerId>, TimerError> {
        let session = self.session.current().ok_or(RemoteError::NoSession)?;
        let mut spec = None;

        let Some(mutation) = OptimisticMutation::apply(
            &self.store,
            "timer.retry",
            |board| {
                let timer = board.timer_mut(id)?;
                if !timer.failed || timer.pending != PendingOp::None {
                    return None;
                }
                timer.failed = false;
                timer.pending = PendingOp::Starting;
                spec = Some(timer.spec());
                Some(id.clone())
            },
            |board, temp| board.mark_failed(&temp),
        ) else {
            return Ok(None);
        };
        let Some(spec) = spec else {
            return Ok(None);
        };

        self.send_start(&session, mutation, id.clone(), &spec)
            .await
            .map(Some)
    }

    /// Drop a failed timer from the board.
    pub async fn discard_timer(&self, id: &TimerId) -> Outcome {
        let Some(session) = self.session.current() else {
            return Outcome::Ignored;
        };
        let removed = self.store.send_if_modified(|board| {
            let Some(pos) = position_of(&board.timers, id) else {
                return false;
            };
            let timer = &board.timers[pos];
            if !timer.failed || timer.pending != PendingOp::None {
                return false;
            }
            board.timers.remove(pos);
            board.bump_epoch();
            true
        });
        if !removed {
            return Outcome::Ignored;
        }
        tracing::debug!(timer = %id, "discarded failed timer");
        self.persist_current(&session).await;
        Outcome::Applied
    }

    /// Stop a confirmed timer. Timers that are starting, stopping, failed or
    /// unknown are left alone.
    pub async fn stop_timer(&self, id: &TimerId) -> Result<Outcome, TimerError> {
        let session = self.session.current().ok_or(RemoteError::NoSession)?;

        let Some(mutation) = OptimisticMutation::apply(
            &self.store,
            "timer.stop",
            |board| {
                let timer = board.timer_mut(id)?;
                if !timer.is_settled() {
                    return None;
                }
                timer.pending = PendingOp::Stopping;
                Some(id.clone())
            },
            |board, id| {
                if let Some(timer) = board.timer_mut(&id) {
                    timer.pending = PendingOp::None;
                }
            },
        ) else {
            tracing::debug!(timer = %id, "stop ignored: timer not running or busy");
            return Ok(Outcome::Ignored);
        };

        let params = Params::new().with("id", id.as_str());
        let result = self
            .remote
            .call(ACTION_STOP_TIMER, params, Method::Write)
            .await;
        self.note_connectivity(&result);

        let outcome = match result {
            Ok(body) => {
                let server_entry = entry_in(&body);
                let ended_at = Utc::now();
                mutation.commit(|board, id| {
                    let Some(pos) = position_of(&board.timers, &id) else {
                        return;
                    };
                    let timer = board.timers.remove(pos);
                    let entry = server_entry
                        .unwrap_or_else(|| TimeLogEntry::from_stopped(&timer, ended_at));
                    board.push_recent(entry);
                    board.synced();
                });
                tracing::info!(timer = %id, "timer stopped");
                Ok(Outcome::Applied)
            }
            Err(err) => {
                tracing::warn!(timer = %id, error = %err, "stop rejected, timer keeps running");
                mutation.rollback();
                Err(err.into())
            }
        };
        self.persist_current(&session).await;
        outcome
    }

    /// Read the running timers and replace the board with them.
    pub async fn refresh(&self) -> Result<Outcome, RemoteError> {
        let Some(session) = self.session.current() else {
            return Ok(Outcome::Ignored);
        };
        let seen = self.store.borrow().epoch;

        let result = self
            .remote
            .call(ACTION_TIMERS, Params::new(), Method::Read)
            .await
            .and_then(decode_timers);
        self.note_connectivity(&result);

        match result {
            Ok(server) => {
                let applied = reconcile(&self.store, seen, |board| {
                    board.merge_server(server);
                    board.synced();
                });
                if !applied {
                    tracing::debug!("discarding timer list that raced a mutation");
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

    /// Read recent history and replace the board's copy of it.
    pub async fn refresh_time_log(&self) -> Result<Outcome, RemoteError> {
        let Some(session) = self.session.current() else {
            return Ok(Outcome::Ignored);
        };
        let seen = self.store.borrow().epoch;

        let result = self
            .remote
            .call(ACTION_TIME_LOG, Params::new(), Method::Read)
            .await
            .and_then(decode_time_log);
        self.note_connectivity(&result);

        let mut entries = result?;
        entries.truncate(RECENT_LIMIT);
        if !reconcile(&self.store, seen, |board| board.recent = entries) {
            return Ok(Outcome::Ignored);
        }
        self.persist_current(&session).await;
        Ok(Outcome::Applied)
    }

    /// Paint cached timers and history, if nothing fresher has been loaded.
    ///
    /// Mutations that were in flight when the cache was written never
    /// settled: starts come back as failed, stops as running. Records already
    /// on the board (including ones with a start or stop in flight) win over
    /// their cached copies.
    pub async fn restore_from_cache(&self) -> bool {
        let Some(session) = self.session.current() else {
            return false;
        };
        let email = session.email();
        let timers = self.cache.get_as::<Vec<TaskTimer>>(&keys::timers(email)).await;
        let recent = self
            .cache
            .get_as::<Vec<TimeLogEntry>>(&keys::timelog(email))
            .await;
        if timers.is_none() && recent.is_none() {
            return false;
        }

        let timers: Vec<TaskTimer> = timers
            .unwrap_or_default()
            .into_iter()
            .map(|mut t| {
                if t.pending == PendingOp::Starting {
                    t.failed = true;
                }
                t.pending = PendingOp::None;
                t
            })
            .collect();

        let painted = self.store.send_if_modified(|board| {
            if board.loaded {
                return false;
            }
            let cached: Vec<TaskTimer> = timers
                .into_iter()
                .filter(|t| position_of(&board.timers, &t.id).is_none())
                .collect();
            board.timers.extend(cached);
            if board.recent.is_empty() {
                board.recent = recent.unwrap_or_default();
                board.recent.truncate(RECENT_LIMIT);
            }
            board.loaded = true;
            true
        });
        if painted {
            tracing::debug!(email, "painted timers from cache");
        }
        painted
    }

    /// Forget all in-memory state (sign-out). The cache is left alone.
    pub fn reset(&self) {
        self.store.send_modify(|board| {
            let epoch = board.epoch.wrapping_add(1);
            *board = TimerBoard {
                epoch,
                ..TimerBoard::default()
            };
        });
    }

    /// Poll the running timers every `period`, starting now.
    pub fn spawn_polling(self: &Arc<Self>, period: Duration) -> CancelHandle {
        let registry = Arc::clone(self);
        start_interval("timer-poll", period, move || {
            let registry = Arc::clone(&registry);
            async move {
                if let Err(err) = registry.refresh().await {
                    tracing::debug!(error = %err, "timer poll failed, keeping last known timers");
                }
            }
        })
    }

    async fn send_start(
        &self,
        session: &Session,
        mutation: OptimisticMutation<'_, TimerBoard, TimerId>,
        temp: TimerId,
        spec: &TimerSpec,
    ) -> Result<TimerId, TimerError> {
        self.persist_current(session).await;

        let mut params = Params::new()
            .with("task", spec.label.as_str())
            .with("label", spec.label.as_str())
            .with("billable", spec.billable);
        if let Some(project) = &spec.project_ref {
            params.insert("projectNumber", project.as_str());
        }

        let result = self
            .remote
            .call(ACTION_START_TIMER, params, Method::Write)
            .await
            .and_then(decode_started);
        self.note_connectivity(&result);

        let outcome = match result {
            Ok(server) => {
                let id = server.id.clone();
                mutation.commit(|board, temp| {
                    board.confirm_started(&temp, server);
                    board.synced();
                });
                tracing::info!(timer = %id, label = %spec.label, "timer confirmed");
                Ok(id)
            }
            Err(source) => {
                tracing::warn!(timer = %temp, error = %source, "timer start rejected");
                mutation.commit(|board, temp| board.mark_failed(&temp));
                Err(TimerError::Rejected { id: temp, source })
            }
        };
        self.persist_current(session).await;
        outcome
    }

    /// Mirror timers and history to the cache.
    async fn persist_current(&self, session: &Session) {
        let _guard = self.cache_lock.lock().await;
        let (timers, recent) = {
            let board = self.store.borrow();
            (board.timers.clone(), board.recent.clone())
        };
        self.cache
            .set_as(&keys::timers(session.email()), &timers)
            .await;
        self.cache
            .set_as(&keys::timelog(session.email()), &recent)
            .await;
    }

    fn note_connectivity<T>(&self, result: &Result<T, RemoteError>) {
        if let Some(connectivity) = ConnectivityState::after(result) {
            self.store.send_if_modified(|board| {
                let changed = board.connectivity != connectivity;
                board.connectivity = connectivity;
                changed
            });
        }
    }
}

fn decode_started(body: Value) -> Result<ServerTimer, RemoteError> {
    let timer = match body.get("timer") {
        Some(nested) if nested.is_object() => nested.clone(),
        _ => body,
    };
    serde_json::from_value(timer).map_err(|e| RemoteError::Parse(format!("startTimer: {e}")))
}

fn decode_timers(body: Value) -> Result<Vec<TaskTimer>, RemoteError> {
    let list = match body {
        Value::Array(_) => body,
        mut object => object
            .get_mut("timers")
            .map(Value::take)
            .unwrap_or(Value::Array(Vec::new())),
    };
    serde_json::from_value(list).map_err(|e| RemoteError::Parse(format!("timers: {e}")))
}

fn decode_time_log(body: Value) -> Result<Vec<TimeLogEntry>, RemoteError> {
    let list = match body {
        Value::Array(_) => body,
        mut object => object
            .get_mut("entries")
            .map(Value::take)
            .unwrap_or(Value::Array(Vec::new())),
    };
    serde_json::from_value(list).map_err(|e| RemoteError::Parse(format!("timeLog: {e}")))
}

fn entry_in(body: &Value) -> Option<TimeLogEntry> {
    let entry = body.get("entry").filter(|e| e.is_object())?;
    match serde_json::from_value(entry.clone()) {
        Ok(entry) => Some(entry),
        Err(err) => {
            tracing::debug!(error = %err, "ignoring malformed stopTimer entry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::Scalar;
    use crate::testing::ScriptedRemote;
    use serde_json::json;

    const EMAIL: &str = "ana@frame15.com";

    struct Fixture {
        remote: Arc<ScriptedRemote>,
        cache: LocalCache,
        registry: Arc<TaskTimerRegistry>,
    }

    fn fixture() -> Fixture {
        let remote = Arc::new(ScriptedRemote::new());
        let cache = LocalCache::in_memory();
        let session = SessionContext::signed_in(Session::new(EMAIL).unwrap());
        let registry = Arc::new(TaskTimerRegistry::new(remote.clone(), cache.clone(), session));
        Fixture {
            remote,
            cache,
            registry,
        }
    }

    fn edit_pass() -> TimerSpec {
        TimerSpec::new("Edit pass", Some("P-1001".into())).unwrap()
    }

    fn confirmed(id: &str, label: &str) -> Value {
        json!({
            "ok": true,
            "timer": {
                "id": id,
                "task": label,
                "projectNumber": "P-1001",
                "startedAt": "2026-10-19T09:00:00Z"
            }
        })
    }

    fn id(raw: &str) -> TimerId {
        TimerId::confirmed(raw).unwrap()
    }

    #[tokio::test]
    async fn start_shows_immediately_then_takes_server_id() {
        let f = fixture();
        let mut gate = f.remote.gated(ACTION_START_TIMER, Ok(confirmed("T-99", "Edit pass")));

        let registry = f.registry.clone();
        let start = tokio::spawn(async move { registry.start_timer(edit_pass()).await });
        gate.entered().await;

        let board = f.registry.snapshot();
        assert_eq!(board.timers.len(), 1);
        let local = &board.timers[0];
        assert!(local.id.is_temporary());
        assert_eq!(local.label, "Edit pass");
        assert_eq!(local.project_ref.as_deref(), Some("P-1001"));
        assert_eq!(local.pending, PendingOp::Starting);

        gate.release();
        assert_eq!(start.await.unwrap(), Ok(id("T-99")));

        let board = f.registry.snapshot();
        assert_eq!(board.timers.len(), 1);
        assert_eq!(board.timers[0].id, id("T-99"));
        assert_eq!(board.timers[0].pending, PendingOp::None);
        assert!(!board.timers[0].failed);

        let calls = f.remote.calls();
        assert_eq!(calls[0].method, Method::Write);
        assert_eq!(calls[0].params.get("task"), Some(&Scalar::from("Edit pass")));
        assert_eq!(calls[0].params.get("label"), Some(&Scalar::from("Edit pass")));
        assert_eq!(calls[0].params.get("projectNumber"), Some(&Scalar::from("P-1001")));
        assert_eq!(calls[0].params.get("billable"), Some(&Scalar::Bool(true)));
    }

    #[tokio::test]
    async fn rejected_start_keeps_a_failed_record() {
        let f = fixture();
        f.remote
            .fail(ACTION_START_TIMER, RemoteError::application("unknown project"));

        let err = f.registry.start_timer(edit_pass()).await.unwrap_err();

        let TimerError::Rejected { id: temp, source } = err else {
            panic!("expected a rejection");
        };
        assert_eq!(source, RemoteError::application("unknown project"));
        let board = f.registry.snapshot();
        let timer = board.get(&temp).unwrap();
        assert!(timer.failed);
        assert_eq!(timer.pending, PendingOp::None);
        assert_eq!(timer.label, "Edit pass");
        assert_eq!(timer.project_ref.as_deref(), Some("P-1001"));
    }

    #[tokio::test]
    async fn failed_timer_can_be_retried() {
        let f = fixture();
        f.remote
            .fail(ACTION_START_TIMER, RemoteError::Timeout(Duration::from_secs(12)))
            .ok(ACTION_START_TIMER, json!({"ok": true, "id": 99}));
        let Err(TimerError::Rejected { id: temp, .. }) = f.registry.start_timer(edit_pass()).await
        else {
            panic!("expected a rejection");
        };

        let retried = f.registry.retry_timer(&temp).await.unwrap();

        assert_eq!(retried, Some(id("99")));
        let board = f.registry.snapshot();
        assert_eq!(board.timers.len(), 1);
        assert!(board.timers[0].is_settled());
        assert_eq!(board.timers[0].label, "Edit pass");
        assert_eq!(f.registry.retry_timer(&id("99")).await, Ok(None));
    }

    #[tokio::test]
    async fn failed_timer_can_be_discarded() {
        let f = fixture();
        f.remote
            .fail(ACTION_START_TIMER, RemoteError::application("nope"));
        let Err(TimerError::Rejected { id: temp, .. }) = f.registry.start_timer(edit_pass()).await
        else {
            panic!("expected a rejection");
        };

        assert_eq!(f.registry.discard_timer(&temp).await, Outcome::Applied);
        assert!(f.registry.snapshot().timers.is_empty());
        assert_eq!(f.registry.discard_timer(&temp).await, Outcome::Ignored);
    }

    #[tokio::test]
    async fn stop_moves_timer_into_recent_history() {
        let f = fixture();
        f.remote
            .ok(ACTION_START_TIMER, confirmed("T-99", "Edit pass"))
            .ok(ACTION_STOP_TIMER, json!({"ok": true}));
        let timer = f.registry.start_timer(edit_pass()).await.unwrap();

        assert_eq!(f.registry.stop_timer(&timer).await, Ok(Outcome::Applied));

        let board = f.registry.snapshot();
        assert!(board.timers.is_empty());
        assert_eq!(board.recent.len(), 1);
        assert_eq!(board.recent[0].id, "T-99");
        assert_eq!(board.recent[0].task, "Edit pass");
        assert_eq!(
            f.remote.calls()[1].params.get("id"),
            Some(&Scalar::from("T-99"))
        );
    }

    #[tokio::test]
    async fn stop_uses_the_server_entry_when_returned() {
        let f = fixture();
        f.remote
            .ok(ACTION_START_TIMER, confirmed("T-99", "Edit pass"))
            .ok(
                ACTION_STOP_TIMER,
                json!({"ok": true, "entry": {
                    "id": 501,
                    "projectNumber": "P-1001",
                    "task": "Edit pass",
                    "inISO": "2026-10-19T09:00:00Z",
                    "outISO": "2026-10-19T10:30:00Z",
                    "minutes": 90
                }}),
            );
        let timer = f.registry.start_timer(edit_pass()).await.unwrap();
        f.registry.stop_timer(&timer).await.unwrap();

        let board = f.registry.snapshot();
        assert_eq!(board.recent[0].id, "501");
        assert_eq!(board.recent[0].minutes, 90.0);
    }

    #[tokio::test]
    async fn rejected_stop_keeps_the_timer_running() {
        let f = fixture();
        f.remote
            .ok(ACTION_START_TIMER, confirmed("T-99", "Edit pass"))
            .fail(ACTION_STOP_TIMER, RemoteError::Network("reset".into()));
        let timer = f.registry.start_timer(edit_pass()).await.unwrap();

        let err = f.registry.stop_timer(&timer).await.unwrap_err();

        assert!(err.remote().is_connectivity());
        let board = f.registry.snapshot();
        assert!(board.get(&timer).unwrap().is_settled());
        assert!(board.recent.is_empty());
        assert_eq!(board.connectivity, ConnectivityState::Offline);
    }

    #[tokio::test]
    async fn stop_ignores_unknown_starting_and_failed_timers() {
        let f = fixture();
        assert_eq!(f.registry.stop_timer(&id("T-1")).await, Ok(Outcome::Ignored));

        let mut gate = f.remote.gated(ACTION_START_TIMER, Ok(confirmed("T-99", "Edit pass")));
        let registry = f.registry.clone();
        let start = tokio::spawn(async move { registry.start_timer(edit_pass()).await });
        gate.entered().await;
        let temp = f.registry.snapshot().timers[0].id.clone();
        assert_eq!(f.registry.stop_timer(&temp).await, Ok(Outcome::Ignored));
        gate.release();
        start.await.unwrap().unwrap();

        f.remote.fail(ACTION_START_TIMER, RemoteError::application("nope"));
        let Err(TimerError::Rejected { id: failed, .. }) = f.registry.start_timer(edit_pass()).await
        else {
            panic!("expected a rejection");
        };
        assert_eq!(f.registry.stop_timer(&failed).await, Ok(Outcome::Ignored));
        assert_eq!(f.remote.calls_to(ACTION_STOP_TIMER), 0);
    }

    #[tokio::test]
    async fn second_stop_while_stopping_is_ignored() {
        let f = fixture();
        f.remote.ok(ACTION_START_TIMER, confirmed("T-99", "Edit pass"));
        let timer = f.registry.start_timer(edit_pass()).await.unwrap();
        let mut gate = f.remote.gated(ACTION_STOP_TIMER, Ok(json!({"ok": true})));

        let registry = f.registry.clone();
        let stopping = timer.clone();
        let stop = tokio::spawn(async move { registry.stop_timer(&stopping).await });
        gate.entered().await;

        assert_eq!(
            f.registry.snapshot().get(&timer).unwrap().pending,
            PendingOp::Stopping
        );
        assert_eq!(f.registry.stop_timer(&timer).await, Ok(Outcome::Ignored));

        gate.release();
        assert_eq!(stop.await.unwrap(), Ok(Outcome::Applied));
        assert_eq!(f.remote.calls_to(ACTION_STOP_TIMER), 1);
    }

    #[tokio::test]
    async fn refresh_replaces_list_but_keeps_local_records() {
        let f = fixture();
        f.remote
            .fail(ACTION_START_TIMER, RemoteError::application("nope"))
            .ok(
                ACTION_TIMERS,
                json!({"ok": true, "timers": [
                    {"id": "T-1", "task": "Color grade", "inISO": "2026-10-19T08:00:00Z"},
                    {"id": 2, "label": "Sound mix", "startedAt": "2026-10-19T08:30:00Z"}
                ]}),
            );
        let Err(TimerError::Rejected { id: failed, .. }) = f.registry.start_timer(edit_pass()).await
        else {
            panic!("expected a rejection");
        };

        assert_eq!(f.registry.refresh().await, Ok(Outcome::Applied));

        let board = f.registry.snapshot();
        let ids: Vec<&str> = board.timers.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![failed.as_str(), "T-1", "2"]);
        assert!(board.is_loaded());
    }

    #[tokio::test]
    async fn refresh_that_raced_a_start_is_discarded() {
        let f = fixture();
        let mut poll = f.remote.gated(ACTION_TIMERS, Ok(json!({"timers": []})));
        f.remote.ok(ACTION_START_TIMER, confirmed("T-99", "Edit pass"));

        let registry = f.registry.clone();
        let refresh = tokio::spawn(async move { registry.refresh().await });
        poll.entered().await;
        f.registry.start_timer(edit_pass()).await.unwrap();
        poll.release();

        assert_eq!(refresh.await.unwrap(), Ok(Outcome::Ignored));
        assert_eq!(f.registry.snapshot().timers.len(), 1);
    }

    #[tokio::test]
    async fn confirmation_does_not_duplicate_a_refreshed_timer() {
        let f = fixture();
        let mut gate = f.remote.gated(ACTION_START_TIMER, Ok(confirmed("T-99", "Edit pass")));
        f.remote.ok(
            ACTION_TIMERS,
            json!([{"id": "T-99", "task": "Edit pass", "startedAt": "2026-10-19T09:00:00Z"}]),
        );

        let registry = f.registry.clone();
        let start = tokio::spawn(async move { registry.start_timer(edit_pass()).await });
        gate.entered().await;
        assert_eq!(f.registry.refresh().await, Ok(Outcome::Applied));
        assert_eq!(f.registry.snapshot().timers.len(), 2);

        gate.release();
        start.await.unwrap().unwrap();

        let board = f.registry.snapshot();
        assert_eq!(board.timers.len(), 1);
        assert_eq!(board.timers[0].id, id("T-99"));
    }

    #[tokio::test]
    async fn confirmation_with_task_and_label_prefers_the_label() {
        let f = fixture();
        f.remote.ok(
            ACTION_START_TIMER,
            json!({"ok": true, "timer": {"id": "T-99", "task": "Edit", "label": "Edit pass v2"}}),
        );
        f.remote.ok(
            ACTION_TIMERS,
            json!({"timers": [{
                "id": "T-99",
                "task": "Edit",
                "label": "Edit pass v2",
                "inISO": "2026-10-19T09:00:00Z"
            }]}),
        );

        let timer = f.registry.start_timer(edit_pass()).await.unwrap();
        assert_eq!(f.registry.snapshot().get(&timer).unwrap().label, "Edit pass v2");

        assert_eq!(f.registry.refresh().await, Ok(Outcome::Applied));
        let board = f.registry.snapshot();
        assert_eq!(board.timers.len(), 1);
        assert_eq!(board.timers[0].label, "Edit pass v2");
    }

    #[tokio::test]
    async fn failed_poll_leaves_an_in_flight_start_alone() {
        let f = fixture();
        let mut gate = f.remote.gated(ACTION_START_TIMER, Ok(confirmed("T-99", "Edit pass")));
        f.remote.fail(ACTION_TIMERS, RemoteError::Network("reset".into()));

        let registry = f.registry.clone();
        let start = tokio::spawn(async move { registry.start_timer(edit_pass()).await });
        gate.entered().await;
        let temp = f.registry.snapshot().timers[0].id.clone();

        assert!(f.registry.refresh().await.is_err());

        let board = f.registry.snapshot();
        let starting = board.get(&temp).unwrap();
        assert_eq!(starting.pending, PendingOp::Starting);
        assert!(!starting.failed);
        assert_eq!(f.registry.retry_timer(&temp).await, Ok(None));

        gate.release();
        assert_eq!(start.await.unwrap(), Ok(id("T-99")));
        assert_eq!(f.remote.calls_to(ACTION_START_TIMER), 1);
        let board = f.registry.snapshot();
        assert_eq!(board.timers.len(), 1);
        assert_eq!(board.timers[0].id, id("T-99"));
    }

    #[tokio::test]
    async fn failed_poll_leaves_an_in_flight_stop_alone() {
        let f = fixture();
        f.remote.ok(ACTION_START_TIMER, confirmed("T-99", "Edit pass"));
        let timer = f.registry.start_timer(edit_pass()).await.unwrap();
        let mut gate = f.remote.gated(ACTION_STOP_TIMER, Ok(json!({"ok": true})));
        f.remote.fail(ACTION_TIMERS, RemoteError::Network("reset".into()));

        let registry = f.registry.clone();
        let stopping = timer.clone();
        let stop = tokio::spawn(async move { registry.stop_timer(&stopping).await });
        gate.entered().await;

        assert!(f.registry.refresh().await.is_err());
        assert_eq!(
            f.registry.snapshot().get(&timer).unwrap().pending,
            PendingOp::Stopping
        );
        assert_eq!(f.registry.stop_timer(&timer).await, Ok(Outcome::Ignored));

        gate.release();
        assert_eq!(stop.await.unwrap(), Ok(Outcome::Applied));
        assert_eq!(f.remote.calls_to(ACTION_STOP_TIMER), 1);
        assert!(f.registry.snapshot().timers.is_empty());
    }

    #[tokio::test]
    async fn time_log_is_capped() {
        let f = fixture();
        let entries: Vec<Value> = (0..25)
            .map(|n| {
                json!({
                    "id": n,
                    "task": "Edit pass",
                    "inISO": "2026-10-19T08:00:00Z",
                    "outISO": "2026-10-19T09:00:00Z",
                    "minutes": 60
                })
            })
            .collect();
        f.remote.ok(ACTION_TIME_LOG, json!({"ok": true, "entries": entries}));

        assert_eq!(f.registry.refresh_time_log().await, Ok(Outcome::Applied));

        let board = f.registry.snapshot();
        assert_eq!(board.recent.len(), RECENT_LIMIT);
        assert_eq!(board.recent[0].id, "0");
    }

    #[tokio::test]
    async fn cache_restore_settles_orphaned_mutations() {
        let f = fixture();
        let spec = edit_pass();
        let orphan = TaskTimer::starting(&spec, Utc::now());
        let mut stopping: TaskTimer = serde_json::from_value(json!({
            "id": "T-5", "task": "Sound mix", "startedAt": "2026-10-19T08:00:00Z"
        }))
        .unwrap();
        stopping.pending = PendingOp::Stopping;
        f.cache
            .set_as(&keys::timers(EMAIL), &vec![orphan.clone(), stopping])
            .await;

        assert!(f.registry.restore_from_cache().await);

        let board = f.registry.snapshot();
        let orphan = board.get(&orphan.id).unwrap();
        assert!(orphan.failed);
        assert_eq!(orphan.pending, PendingOp::None);
        assert!(board.get(&id("T-5")).unwrap().is_settled());
    }

    #[tokio::test]
    async fn confirmed_timers_survive_a_restart() {
        let f = fixture();
        f.remote.ok(ACTION_START_TIMER, confirmed("T-99", "Edit pass"));
        f.registry.start_timer(edit_pass()).await.unwrap();

        let session = SessionContext::signed_in(Session::new(EMAIL).unwrap());
        let restarted = TaskTimerRegistry::new(
            Arc::new(ScriptedRemote::new()),
            f.cache.clone(),
            session,
        );
        assert!(restarted.restore_from_cache().await);
        assert_eq!(restarted.snapshot().timers, f.registry.snapshot().timers);
    }
}
