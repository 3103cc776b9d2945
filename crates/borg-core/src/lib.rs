//! `borg-core` — shared types for the Borg orchestration backbone.
//!
//! Everything that crosses a crate boundary lives here: thread and tier
//! identifiers, the three wire envelopes, history entries, routing
//! decisions, the settings schema, and the `.borg` directory layout.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BorgPaths, Settings};
pub use error::{BorgError, Result};
pub use types::{
    clip_chars, now_ts, CommandEnvelope, CommandKind, Direction, HistoryEntry, IncomingEnvelope,
    OutgoingEnvelope, RoutingDecision, Source, StatusBeacon, Thread, ThreadId, Tier,
    MASTER_THREAD,
};
