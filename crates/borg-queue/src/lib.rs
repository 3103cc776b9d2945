//! `borg-queue` — the durable file queue under `.borg/queue/`.
//!
//! Six directories (`incoming`, `processing`, `outgoing`, `dead-letter`,
//! `commands`, `status`) shared with the chat adapter. Every publish is
//! write-temp-then-rename; every transition between directories is a
//! single `rename` within the queue root. Filenames carry the metadata the
//! scheduler sorts on: a `heartbeat_` prefix for the low-priority class
//! and a `_retryN` suffix for the retry counter.

pub mod commands;
pub mod names;
pub mod queue;
pub mod recovery;
pub mod status;
pub mod watch;

pub use commands::drain_commands;
pub use queue::{Queue, QueueFile, RetryOutcome};
pub use recovery::recover_processing;
pub use status::StatusDir;
pub use watch::spawn_incoming_watcher;
