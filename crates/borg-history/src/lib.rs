//! `borg-history` — append-only record of every message in and out.
//!
//! One JSON object per line, multi-writer safe through O_APPEND single-write
//! lines, rotated once past 10 MiB with a single `.1` backup. Reads are
//! bounded tails that tolerate rotation and partial lines — monitoring
//! readers share these files live.

pub mod context;
pub mod log;
pub mod prompts;

pub use context::{format_history_lines, router_input};
pub use log::HistoryLog;
pub use prompts::PromptLog;
