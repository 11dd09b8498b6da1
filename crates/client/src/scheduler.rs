//! Cancellable fixed-period tasks (polling, clock ticks).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Owner's handle to a running interval.
///
/// Dropping the handle cancels the interval, so a task never outlives the
/// component that started it.
#[derive(Debug)]
pub struct CancelHandle {
    name: &'static str,
    shutdown: Arc<Notify>,
    join: Option<JoinHandle<()>>,
}

impl CancelHandle {
    /// Request cancellation. The current tick, if one is running, is aborted.
    pub fn cancel(&mut self) {
        self.shutdown.notify_one();
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }

    /// Cancel and wait for the task to finish.
    pub async fn stop(mut self) {
        self.shutdown.notify_one();
        if let Some(join) = self.join.take() {
            join.abort();
            let _ = join.await;
        }
        tracing::debug!(interval = self.name, "interval stopped");
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Run `tick` every `period`, starting immediately.
///
/// Ticks never overlap: a slow tick delays the next one and missed ticks are
/// skipped rather than replayed.
pub fn start_interval<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> CancelHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    let period = period.max(MIN_PERIOD);

    let join = tokio::spawn(async move {
        tracing::debug!(interval = name, period_ms = period.as_millis() as u64, "interval started");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = signal.notified() => {
                    tracing::debug!(interval = name, "interval received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    tick().await;
                }
            }
        }
    });

    CancelHandle {
        name,
        shutdown,
        join: Some(join),
    }
}
