//! `f15-client`
//!
//! **Responsibility:** Optimistic sync core of the Frame 15 dashboard.
//!
//! This crate provides:
//! - A uniform request abstraction over the backing HTTP API ([`RemoteClient`])
//! - A best-effort local cache surviving restarts ([`LocalCache`])
//! - The shift clock-in/out engine ([`ShiftEngine`]) and task timers
//!   ([`TaskTimerRegistry`]), both optimistic with rollback and polling
//!   reconciliation
//! - A display-only ticking clock ([`TimerClock`])
//!
//! The remote store is the authority. Local state wins only until the server
//! acknowledges or rejects a change.

pub mod cache;
pub mod clock;
pub mod config;
pub mod identity;
pub mod lists;
pub mod optimistic;
pub mod remote;
pub mod scheduler;
pub mod session;
pub mod shift;
pub mod timers;
pub mod types;

#[cfg(test)]
mod testing;

pub use cache::{CacheEntry, CacheLocation, LocalCache};
pub use clock::{format_elapsed, ClockFrame, TimerClock};
pub use config::ClientConfig;
pub use identity::WhoAmI;
pub use lists::{ListsProvider, ReferenceLists};
pub use remote::{Method, Params, RemoteApi, RemoteClient, RemoteError};
pub use scheduler::{start_interval, CancelHandle};
pub use session::SessionContext;
pub use shift::{ShiftEngine, ShiftPhase, ShiftSnapshot};
pub use timers::{TaskTimerRegistry, TimerBoard, TimerError};
pub use types::{ConnectivityState, Outcome};
