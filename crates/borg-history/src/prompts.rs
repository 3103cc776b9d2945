use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;
use tracing::warn;

use borg_core::config::{LOG_ROTATE_BYTES, PROMPT_LOG_BODY_CAP};
use borg_core::types::clip_chars;
use borg_core::{BorgPaths, Result, Source, ThreadId, Tier};

/// One line of `logs/prompts.jsonl` — enough to analyze routing and prompt
/// assembly offline without re-running anything.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PromptRecord<'a> {
    ts: i64,
    thread_id: ThreadId,
    message_id: &'a str,
    source: Source,
    tier: Tier,
    new_session: bool,
    prompt_chars: usize,
    prompt: &'a str,
}

/// Bounded, rotating log of every assembled prompt. Best-effort: a failed
/// write is logged, never propagated into the message path.
pub struct PromptLog {
    path: PathBuf,
    backup: PathBuf,
}

impl PromptLog {
    pub fn new(paths: &BorgPaths) -> Self {
        Self {
            path: paths.prompts_log_file(),
            backup: paths.prompts_log_backup_file(),
        }
    }

    pub fn record(
        &self,
        thread_id: ThreadId,
        message_id: &str,
        source: Source,
        tier: Tier,
        new_session: bool,
        prompt: &str,
    ) {
        let record = PromptRecord {
            ts: borg_core::types::now_ts(),
            thread_id,
            message_id,
            source,
            tier,
            new_session,
            prompt_chars: prompt.chars().count(),
            prompt: clip_chars(prompt, PROMPT_LOG_BODY_CAP),
        };
        if let Err(e) = self.append(&record) {
            warn!(err = %e, "prompt log write failed");
        }
    }

    fn append(&self, record: &PromptRecord<'_>) -> Result<()> {
        if let Ok(meta) = std::fs::metadata(&self.path) {
            if meta.len() > LOG_ROTATE_BYTES {
                std::fs::rename(&self.path, &self.backup)?;
            }
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_body_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BorgPaths::new(dir.path());
        paths.ensure_layout().unwrap();
        let log = PromptLog::new(&paths);

        let long = "p".repeat(2000);
        log.record(ThreadId(2), "m1", Source::User, Tier::Medium, true, &long);

        let raw = std::fs::read_to_string(paths.prompts_log_file()).unwrap();
        let v: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(v["promptChars"], 2000);
        assert_eq!(v["prompt"].as_str().unwrap().len(), PROMPT_LOG_BODY_CAP);
        assert_eq!(v["newSession"], true);
    }
}
