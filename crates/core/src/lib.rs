//! `f15-core`: domain types shared by the Frame 15 client crates.
//!
//! This crate contains **pure domain** data (no IO, no async). The sync
//! engines in `f15-client` own and mutate these values; everything else only
//! reads snapshots of them.

pub mod entity;
pub mod error;
pub mod id;
pub mod session;
pub mod shift;
pub mod timer;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::TimerId;
pub use session::Session;
pub use shift::{ShiftSpan, ShiftState};
pub use timer::{PendingOp, TaskTimer, TimeLogEntry, TimerSpec};
