//! Display-only ticking clock.
//!
//! Reads engine snapshots and publishes elapsed times; it never writes to an
//! engine, so cancelling it has no effect on sync state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use f15_core::{ShiftSpan, TaskTimer, TimerId};
use tokio::sync::watch;

use crate::scheduler::{start_interval, CancelHandle};
use crate::shift::ShiftSnapshot;
use crate::timers::TimerBoard;

/// Elapsed time of one running timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerElapsed {
    pub id: TimerId,
    pub label: String,
    pub elapsed: Duration,
}

/// What the clock shows at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockFrame {
    pub at: Option<DateTime<Utc>>,
    /// Time on the clock for the current shift, if clocked in.
    pub shift: Option<Duration>,
    pub timers: Vec<TimerElapsed>,
}

/// `now - started_at`, never negative (the server clock may run ahead).
pub fn elapsed(started_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(started_at)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Render as `H:MM:SS`. Hours are not wrapped.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!("{}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

/// Build a frame from the active shift span and the timer board.
///
/// Failed timers never ran on the server and get no elapsed time.
pub fn compute_frame(
    shift: Option<&ShiftSpan>,
    timers: &[TaskTimer],
    now: DateTime<Utc>,
) -> ClockFrame {
    ClockFrame {
        at: Some(now),
        shift: shift.map(|span| elapsed(span.started_at, now)),
        timers: timers
            .iter()
            .filter(|t| !t.failed)
            .map(|t| TimerElapsed {
                id: t.id.clone(),
                label: t.label.clone(),
                elapsed: elapsed(t.started_at, now),
            })
            .collect(),
    }
}

/// Periodically recomputes a [`ClockFrame`] from engine snapshots.
#[derive(Debug)]
pub struct TimerClock {
    frames: watch::Receiver<ClockFrame>,
    handle: CancelHandle,
}

impl TimerClock {
    pub fn start(
        shift: watch::Receiver<ShiftSnapshot>,
        timers: watch::Receiver<TimerBoard>,
        period: Duration,
    ) -> Self {
        let (tx, frames) = watch::channel(ClockFrame::default());

        let handle = start_interval("clock", period, move || {
            let active = shift.borrow().state.active;
            let frame = {
                let board = timers.borrow();
                compute_frame(active.as_ref(), &board.timers, Utc::now())
            };
            tx.send_replace(frame);
            std::future::ready(())
        });

        Self { frames, handle }
    }

    pub fn subscribe(&self) -> watch::Receiver<ClockFrame> {
        self.frames.clone()
    }

    pub fn current(&self) -> ClockFrame {
        self.frames.borrow().clone()
    }

    pub fn cancel(&mut self) {
        self.handle.cancel();
    }

    pub async fn stop(self) {
        self.handle.stop().await;
    }
}
