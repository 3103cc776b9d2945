use std::path::PathBuf;
use std::time::SystemTime;

use serde::Deserialize;
use tracing::{debug, info, warn};

use borg_core::config::MAX_ATTEMPTS;
use borg_core::types::now_ts;
use borg_core::{
    BorgError, BorgPaths, IncomingEnvelope, OutgoingEnvelope, Result, Source, ThreadId,
};
use borg_state::atomic::write_string_atomic;

use crate::names;

/// Cheap pre-claim parse: only what the scheduler sorts and gates on.
/// The strict schema check happens after the claim.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeHead {
    pub thread_id: ThreadId,
    pub source: Source,
}

/// One schedulable file in `incoming/`.
#[derive(Debug, Clone)]
pub struct QueueFile {
    pub name: String,
    pub path: PathBuf,
    pub mtime: SystemTime,
    pub heartbeat: bool,
    /// `None` when the cheap parse failed — still claimed, so the strict
    /// validation can dead-letter it.
    pub head: Option<EnvelopeHead>,
}

/// Outcome of the failure path for one processing file.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Renamed back into `incoming/` under the returned name.
    Retried(String),
    /// Retry budget exhausted; moved to `dead-letter/`.
    DeadLettered(String),
}

/// Handle over the six queue directories.
#[derive(Clone)]
pub struct Queue {
    paths: BorgPaths,
}

impl Queue {
    pub fn new(paths: BorgPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &BorgPaths {
        &self.paths
    }

    /// Publish an envelope into `incoming/`. Heartbeat sources get the
    /// class-prefixed name so the scheduler sorts them last.
    pub fn publish_incoming(&self, envelope: &IncomingEnvelope) -> Result<PathBuf> {
        let name = match envelope.source {
            Source::Heartbeat => names::heartbeat_name(&envelope.message_id),
            _ => names::incoming_name(&envelope.channel, &envelope.message_id),
        };
        let path = self.paths.incoming_dir().join(&name);
        write_string_atomic(&path, &serde_json::to_string_pretty(envelope)?)?;
        debug!(name = %name, thread_id = %envelope.thread_id, "incoming envelope published");
        Ok(path)
    }

    /// Publish a response into `outgoing/`.
    pub fn publish_outgoing(&self, envelope: &OutgoingEnvelope, heartbeat: bool) -> Result<PathBuf> {
        let name = if heartbeat {
            names::heartbeat_outgoing_name(&envelope.message_id)
        } else {
            names::outgoing_name(&envelope.channel, &envelope.message_id, envelope.timestamp)
        };
        let path = self.paths.outgoing_dir().join(&name);
        write_string_atomic(&path, &serde_json::to_string_pretty(envelope)?)?;
        Ok(path)
    }

    /// All schedulable files, sorted priority-then-FIFO: the heartbeat
    /// class compares after everything else; within a class, mtime
    /// ascending.
    pub fn list_incoming(&self) -> Result<Vec<QueueFile>> {
        let mut files = Vec::new();
        let entries = match std::fs::read_dir(self.paths.incoming_dir()) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(BorgError::Io(e)),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };
            let mtime = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let head = std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<EnvelopeHead>(&raw).ok());
            files.push(QueueFile {
                heartbeat: names::is_heartbeat(&name),
                name,
                path,
                mtime,
                head,
            });
        }
        files.sort_by(|a, b| {
            (a.heartbeat, a.mtime, &a.name).cmp(&(b.heartbeat, b.mtime, &b.name))
        });
        Ok(files)
    }

    /// Claim a file by moving it into `processing/`. `None` means another
    /// worker (or a crashed run's recovery) got there first — not an error.
    pub fn claim(&self, name: &str) -> Result<Option<PathBuf>> {
        let from = self.paths.incoming_dir().join(name);
        let to = self.paths.processing_dir().join(name);
        match std::fs::rename(&from, &to) {
            Ok(()) => Ok(Some(to)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BorgError::Io(e)),
        }
    }

    /// Strict read of a claimed file.
    pub fn read_claimed(&self, name: &str) -> Result<IncomingEnvelope> {
        let raw = std::fs::read_to_string(self.paths.processing_dir().join(name))?;
        let envelope: IncomingEnvelope = serde_json::from_str(&raw)
            .map_err(|e| BorgError::Validation(format!("envelope schema: {e}")))?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Success path: drop the processing file.
    pub fn complete(&self, name: &str) -> Result<()> {
        std::fs::remove_file(self.paths.processing_dir().join(name))?;
        Ok(())
    }

    /// Failure path: re-queue with a bumped retry counter, or move to
    /// `dead-letter/` once the attempt budget is spent.
    pub fn retry_or_dead_letter(&self, name: &str) -> Result<RetryOutcome> {
        let attempts = names::retry_count(name);
        let from = self.paths.processing_dir().join(name);
        if attempts + 1 >= MAX_ATTEMPTS {
            let dead = names::dead_letter_name(name, now_ts());
            std::fs::rename(&from, self.paths.dead_letter_dir().join(&dead))?;
            warn!(name = %name, "retry budget exhausted, dead-lettered");
            Ok(RetryOutcome::DeadLettered(dead))
        } else {
            let next = names::with_retry(name, attempts + 1);
            std::fs::rename(&from, self.paths.incoming_dir().join(&next))?;
            info!(name = %name, next = %next, "re-queued for retry");
            Ok(RetryOutcome::Retried(next))
        }
    }

    /// Validation failures skip the retry budget entirely.
    pub fn dead_letter(&self, name: &str) -> Result<String> {
        let dead = names::dead_letter_name(name, now_ts());
        std::fs::rename(
            self.paths.processing_dir().join(name),
            self.paths.dead_letter_dir().join(&dead),
        )?;
        warn!(name = %name, "invalid envelope dead-lettered");
        Ok(dead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn queue() -> (tempfile::TempDir, Queue) {
        let dir = tempfile::tempdir().unwrap();
        let paths = BorgPaths::new(dir.path());
        paths.ensure_layout().unwrap();
        (dir, Queue::new(paths))
    }

    fn envelope(thread: u32, source: Source, message_id: &str) -> IncomingEnvelope {
        IncomingEnvelope {
            channel: "tg".into(),
            source,
            thread_id: ThreadId(thread),
            source_thread_id: None,
            sender: "Alice".into(),
            message: "hello".into(),
            is_reply: false,
            reply_to_text: None,
            reply_to_model: None,
            topic_name: None,
            timestamp: 1,
            message_id: message_id.into(),
        }
    }

    #[test]
    fn publish_and_list_round_trip() {
        let (_dir, q) = queue();
        q.publish_incoming(&envelope(7, Source::User, "m1")).unwrap();
        let files = q.list_incoming().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "tg_m1.json");
        assert!(!files[0].heartbeat);
        assert_eq!(files[0].head.as_ref().unwrap().thread_id, ThreadId(7));
    }

    #[test]
    fn heartbeats_sort_after_users_regardless_of_mtime() {
        let (_dir, q) = queue();
        // heartbeats published first => older mtime
        q.publish_incoming(&envelope(2, Source::Heartbeat, "hb-a"))
            .unwrap();
        q.publish_incoming(&envelope(3, Source::Heartbeat, "hb-b"))
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        q.publish_incoming(&envelope(7, Source::User, "u1")).unwrap();

        let files = q.list_incoming().unwrap();
        assert_eq!(files[0].name, "tg_u1.json");
        assert!(files[1].heartbeat && files[2].heartbeat);
    }

    #[test]
    fn claim_is_race_tolerant() {
        let (_dir, q) = queue();
        q.publish_incoming(&envelope(7, Source::User, "m1")).unwrap();
        assert!(q.claim("tg_m1.json").unwrap().is_some());
        // second claim sees NotFound => None, silently
        assert!(q.claim("tg_m1.json").unwrap().is_none());
    }

    #[test]
    fn retry_then_dead_letter_after_budget() {
        let (dir, q) = queue();
        q.publish_incoming(&envelope(7, Source::User, "m1")).unwrap();

        q.claim("tg_m1.json").unwrap();
        let out = q.retry_or_dead_letter("tg_m1.json").unwrap();
        assert_eq!(out, RetryOutcome::Retried("tg_m1_retry1.json".into()));

        q.claim("tg_m1_retry1.json").unwrap();
        let out = q.retry_or_dead_letter("tg_m1_retry1.json").unwrap();
        assert_eq!(out, RetryOutcome::Retried("tg_m1_retry2.json".into()));

        q.claim("tg_m1_retry2.json").unwrap();
        let out = q.retry_or_dead_letter("tg_m1_retry2.json").unwrap();
        assert!(matches!(out, RetryOutcome::DeadLettered(_)));

        let dead: Vec<_> = std::fs::read_dir(dir.path().join("queue/dead-letter"))
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(dead.len(), 1);
        // the suffix never accumulates
        assert!(dead[0]
            .file_name()
            .to_string_lossy()
            .ends_with("_tg_m1_retry2.json"));
    }

    #[test]
    fn read_claimed_validates_strictly() {
        let (dir, q) = queue();
        let bad = dir.path().join("queue/processing/tg_bad.json");
        std::fs::write(&bad, r#"{"channel":"tg","source":"user"}"#).unwrap();
        assert!(matches!(
            q.read_claimed("tg_bad.json"),
            Err(BorgError::Validation(_))
        ));
    }

    #[test]
    fn outgoing_heartbeat_uses_bare_message_id() {
        let (dir, q) = queue();
        let out = OutgoingEnvelope {
            channel: "heartbeat".into(),
            thread_id: ThreadId(2),
            sender: "borg".into(),
            message: "HEARTBEAT_OK".into(),
            original_message: "check".into(),
            timestamp: 99,
            message_id: "hb-1".into(),
            model: "haiku".into(),
            target_thread_id: None,
        };
        q.publish_outgoing(&out, true).unwrap();
        assert!(dir.path().join("queue/outgoing/hb-1.json").exists());

        q.publish_outgoing(&out, false).unwrap();
        assert!(dir
            .path()
            .join("queue/outgoing/heartbeat_hb-1_99.json")
            .exists());
    }

    #[test]
    fn outgoing_envelope_json_round_trips() {
        let (_dir, q) = queue();
        let out = OutgoingEnvelope {
            channel: "tg".into(),
            thread_id: ThreadId(7),
            sender: "borg".into(),
            message: "Paris.".into(),
            original_message: "What is the capital of France?".into(),
            timestamp: 12,
            message_id: "m1".into(),
            model: "haiku".into(),
            target_thread_id: None,
        };
        let path = q.publish_outgoing(&out, false).unwrap();
        let parsed: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed["model"], "haiku");
        assert_eq!(parsed["threadId"], 7);
        assert!(!parsed.contains_key("targetThreadId"));
    }
}
