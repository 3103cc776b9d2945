use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Json},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{BorgError, Result};
use crate::types::ThreadId;

// Fixed operating constants. These are contracts with the chat adapter and
// the monitoring readers, not tunables.
pub const MAX_RESPONSE_CHARS: usize = 4000;
pub const RESPONSE_TRUNCATE_AT: usize = 3900;
pub const TRUNCATION_NOTICE: &str = "\n\n[Response truncated]";
pub const NO_RESPONSE_PLACEHOLDER: &str = "(No response generated)";
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";
pub const LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;
pub const TAIL_READ_BYTES: u64 = 64 * 1024;
pub const MODEL_MAP_CAP: usize = 1000;
pub const MAX_ATTEMPTS: u32 = 3;
pub const SCAN_INTERVAL_SECS: u64 = 5;
pub const LOG_SYNC_INTERVAL_SECS: u64 = 5;
pub const HISTORY_CONTEXT_THREAD: usize = 20;
pub const HISTORY_CONTEXT_MASTER: usize = 30;
pub const HISTORY_SNIPPET_CHARS: usize = 200;
pub const ROUTER_ENRICH_ENTRIES: usize = 5;
pub const PROMPT_LOG_BODY_CAP: usize = 500;

/// Knowledge-base files readable through `query_knowledge_base`.
pub const KNOWLEDGE_BASE_FILES: &[&str] = &["context.md", "decisions.md", "active-projects.md"];

/// Process-wide settings (`settings.json` + `BORG_*` env overrides).
///
/// Unknown fields are ignored; a missing file yields the defaults below.
/// The file is operator-owned — the core never writes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// IANA timezone name used for prompt timestamps (e.g. "Europe/Berlin").
    #[serde(default = "default_timezone", alias = "timeZone")]
    pub timezone: String,

    #[serde(default)]
    pub chat: ChatSettings,

    /// Minutes between self-produced heartbeat check-ins. 0 disables.
    #[serde(default = "default_heartbeat_interval", alias = "heartbeatIntervalMinutes")]
    pub heartbeat_interval_minutes: u64,

    /// Upper bound on concurrently dispatched sessions. Clamped to ≥ 1.
    #[serde(default = "default_max_concurrent", alias = "maxConcurrentSessions")]
    pub max_concurrent_sessions: usize,

    /// Minutes of inactivity before a thread's session is dropped so the
    /// next message starts fresh. 0 disables.
    #[serde(default, alias = "idleTimeoutMinutes")]
    pub idle_timeout_minutes: u64,
}

/// Credentials the chat adapter reads from the shared settings file.
/// Opaque to the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default, alias = "botToken")]
    pub bot_token: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            chat: ChatSettings::default(),
            heartbeat_interval_minutes: default_heartbeat_interval(),
            max_concurrent_sessions: default_max_concurrent(),
            idle_timeout_minutes: 0,
        }
    }
}

impl Settings {
    /// Load from `settings.json` with `BORG_*` env overrides.
    ///
    /// A missing file yields defaults; a malformed file is an error the
    /// caller downgrades to defaults (state-store corruption policy).
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default().normalized());
        }
        let settings: Settings = Figment::new()
            .merge(Json::file(path))
            .merge(Env::prefixed("BORG_"))
            .extract()
            .map_err(|e| BorgError::Config(e.to_string()))?;
        Ok(settings.normalized())
    }

    /// Enforce documented invariants on loaded values.
    fn normalized(mut self) -> Self {
        if self.max_concurrent_sessions == 0 {
            tracing::warn!("maxConcurrentSessions 0 clamped to 1");
            self.max_concurrent_sessions = 1;
        }
        self
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_max_concurrent() -> usize {
    3
}

/// The `.borg` on-disk layout. All durable state lives under one root.
#[derive(Debug, Clone)]
pub struct BorgPaths {
    root: PathBuf,
}

impl BorgPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$HOME/.borg`, falling back to `./.borg` when HOME is unset.
    pub fn default_root() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Path::new(&home).join(".borg")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn threads_file(&self) -> PathBuf {
        self.root.join("threads.json")
    }
    pub fn settings_file(&self) -> PathBuf {
        self.root.join("settings.json")
    }
    pub fn history_file(&self) -> PathBuf {
        self.root.join("message-history.jsonl")
    }
    pub fn history_backup_file(&self) -> PathBuf {
        self.root.join("message-history.1.jsonl")
    }
    pub fn models_file(&self) -> PathBuf {
        self.root.join("message-models.json")
    }

    pub fn incoming_dir(&self) -> PathBuf {
        self.root.join("queue/incoming")
    }
    pub fn processing_dir(&self) -> PathBuf {
        self.root.join("queue/processing")
    }
    pub fn outgoing_dir(&self) -> PathBuf {
        self.root.join("queue/outgoing")
    }
    pub fn dead_letter_dir(&self) -> PathBuf {
        self.root.join("queue/dead-letter")
    }
    pub fn commands_dir(&self) -> PathBuf {
        self.root.join("queue/commands")
    }
    pub fn status_dir(&self) -> PathBuf {
        self.root.join("status")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
    pub fn queue_log_file(&self) -> PathBuf {
        self.root.join("logs/queue.log")
    }
    pub fn routing_log_file(&self) -> PathBuf {
        self.root.join("logs/routing.jsonl")
    }
    pub fn prompts_log_file(&self) -> PathBuf {
        self.root.join("logs/prompts.jsonl")
    }
    pub fn prompts_log_backup_file(&self) -> PathBuf {
        self.root.join("logs/prompts.1.jsonl")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    /// Create every directory of the layout. Idempotent.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        for dir in [
            self.root.clone(),
            self.incoming_dir(),
            self.processing_dir(),
            self.outgoing_dir(),
            self.dead_letter_dir(),
            self.commands_dir(),
            self.status_dir(),
            self.logs_dir(),
            self.sessions_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Working directory for an auto-created thread: `$DEFAULT_CWD`, else the
/// documented placeholder. Never refuses.
pub fn default_thread_cwd(id: ThreadId) -> PathBuf {
    match std::env::var("DEFAULT_CWD") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(format!("/tmp/borg-threads/{id}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_settings_file_yields_defaults() {
        let s = Settings::load(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(s.timezone, "UTC");
        assert_eq!(s.max_concurrent_sessions, 3);
        assert_eq!(s.heartbeat_interval_minutes, 30);
        assert_eq!(s.idle_timeout_minutes, 0);
    }

    #[test]
    fn unknown_fields_ignored_and_camel_case_accepted() {
        let dir = std::env::temp_dir().join(format!("borg-settings-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        std::fs::write(
            &path,
            r#"{"maxConcurrentSessions": 5, "timezone": "Europe/Berlin", "someFutureKnob": 1}"#,
        )
        .unwrap();
        let s = Settings::load(&path).unwrap();
        assert_eq!(s.max_concurrent_sessions, 5);
        assert_eq!(s.timezone, "Europe/Berlin");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let dir = std::env::temp_dir().join(format!("borg-clamp-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        std::fs::write(&path, r#"{"maxConcurrentSessions": 0}"#).unwrap();
        let s = Settings::load(&path).unwrap();
        assert_eq!(s.max_concurrent_sessions, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn layout_paths_stay_under_root() {
        let p = BorgPaths::new("/srv/borg/.borg");
        assert!(p.incoming_dir().starts_with(p.root()));
        assert!(p.queue_log_file().starts_with(p.root()));
        assert!(p.sessions_dir().starts_with(p.root()));
    }
}
