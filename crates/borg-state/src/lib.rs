//! `borg-state` — durable process state under `.borg/`.
//!
//! Three small stores, all file-backed and atomic on write:
//!
//! | Store | File | Policy |
//! |---|---|---|
//! | [`ThreadStore`] | `threads.json` | read-modify-write, last-writer-wins |
//! | [`SettingsCache`] | `settings.json` | mtime-cached reads |
//! | [`ModelMap`] | `message-models.json` | newest ≈1000 entries kept |
//!
//! The chat adapter is a separate process sharing the same files, so the
//! registry is re-read from disk on every access and every write goes
//! through temp-then-rename in the same directory.

pub mod atomic;
pub mod models;
pub mod settings;
pub mod threads;

pub use atomic::write_json_atomic;
pub use models::ModelMap;
pub use settings::SettingsCache;
pub use threads::{ThreadStore, Threads};
