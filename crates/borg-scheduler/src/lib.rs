//! `borg-scheduler` — watches the incoming queue and drives messages
//! through routing, prompt assembly and dispatch.
//!
//! One engine task owns the scan loop; each claimed message runs on its
//! own tokio task. The four counters that make the concurrency contract
//! (`active_count`, `active_threads`, `active_heartbeat_count`,
//! `scanning`) live in a single [`state::SchedulerState`] value behind one
//! mutex, and the engine is their only mutator.

pub mod engine;
pub mod process;
pub mod state;

pub use engine::Engine;
pub use state::{ClaimDecision, SchedulerState};
