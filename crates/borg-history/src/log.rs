use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use tracing::{debug, warn};

use borg_core::config::{LOG_ROTATE_BYTES, TAIL_READ_BYTES};
use borg_core::{BorgError, BorgPaths, HistoryEntry, Result, ThreadId};

/// The shared `message-history.jsonl` append log.
///
/// Appends are one complete line per entry, well under the 4 KiB write
/// that local filesystems deliver atomically for O_APPEND writers, so the
/// chat adapter can append from its own process without coordination.
pub struct HistoryLog {
    path: PathBuf,
    backup: PathBuf,
}

impl HistoryLog {
    pub fn new(paths: &BorgPaths) -> Self {
        Self {
            path: paths.history_file(),
            backup: paths.history_backup_file(),
        }
    }

    /// Append one entry, rotating first if the file has outgrown its cap.
    pub fn append(&self, entry: &HistoryEntry) -> Result<()> {
        self.rotate_if_needed()?;

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        if line.len() > 4096 {
            // keep the single-write atomicity guarantee: trim the message
            let mut clipped = entry.clone();
            clipped.message = borg_core::types::clip_chars(&clipped.message, 800).to_string();
            line = serde_json::to_string(&clipped)?;
            line.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Newest `limit` entries, oldest first, optionally filtered by thread.
    ///
    /// Reads at most the last [`TAIL_READ_BYTES`] of the file; the first
    /// (possibly partial) line of a mid-file read is dropped and malformed
    /// lines are skipped. A zero-byte or missing file yields an empty vec.
    pub fn tail(&self, limit: usize, thread: Option<ThreadId>) -> Vec<HistoryEntry> {
        match self.read_tail_entries(thread) {
            Ok(mut entries) => {
                if entries.len() > limit {
                    entries.drain(..entries.len() - limit);
                }
                entries
            }
            Err(e) => {
                warn!(err = %e, "history tail read failed");
                Vec::new()
            }
        }
    }

    fn read_tail_entries(&self, thread: Option<ThreadId>) -> Result<Vec<HistoryEntry>> {
        let mut file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BorgError::Io(e)),
        };
        let len = file.metadata()?.len();
        let start = len.saturating_sub(TAIL_READ_BYTES);
        file.seek(SeekFrom::Start(start))?;

        let mut buf = String::new();
        file.read_to_string(&mut buf)?;

        let mut lines = buf.lines();
        if start > 0 {
            // the read began mid-file; the first line is likely partial
            lines.next();
        }

        let mut entries = Vec::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryEntry>(line) {
                Ok(entry) => {
                    if thread.map_or(true, |t| entry.thread_id == t) {
                        entries.push(entry);
                    }
                }
                Err(_) => continue, // torn or foreign line at the tail
            }
        }
        Ok(entries)
    }

    fn rotate_if_needed(&self) -> Result<()> {
        let len = match std::fs::metadata(&self.path) {
            Ok(m) => m.len(),
            Err(_) => return Ok(()),
        };
        if len <= LOG_ROTATE_BYTES {
            return Ok(());
        }
        debug!(bytes = len, "rotating message history");
        std::fs::rename(&self.path, &self.backup)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use borg_core::{Direction, Source};

    fn entry(thread: u32, msg: &str, direction: Direction) -> HistoryEntry {
        HistoryEntry {
            ts: 1_700_000_000,
            thread_id: ThreadId(thread),
            channel: "tg".into(),
            sender: "Alice".into(),
            direction,
            message: msg.into(),
            source: Some(Source::User),
            source_thread_id: None,
            session_id: None,
            model: None,
        }
    }

    fn log() -> (tempfile::TempDir, HistoryLog) {
        let dir = tempfile::tempdir().unwrap();
        let paths = BorgPaths::new(dir.path());
        paths.ensure_layout().unwrap();
        (dir, HistoryLog::new(&paths))
    }

    #[test]
    fn empty_file_tail_is_empty() {
        let (dir, log) = log();
        std::fs::write(dir.path().join("message-history.jsonl"), "").unwrap();
        assert!(log.tail(10, None).is_empty());
    }

    #[test]
    fn append_then_tail_round_trips() {
        let (_dir, log) = log();
        for i in 0..5 {
            log.append(&entry(7, &format!("msg {i}"), Direction::In))
                .unwrap();
        }
        let got = log.tail(3, None);
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].message, "msg 2");
        assert_eq!(got[2].message, "msg 4");
    }

    #[test]
    fn thread_filter_applies_after_parse() {
        let (_dir, log) = log();
        log.append(&entry(1, "one", Direction::In)).unwrap();
        log.append(&entry(2, "two", Direction::In)).unwrap();
        log.append(&entry(1, "three", Direction::Out)).unwrap();

        let got = log.tail(10, Some(ThreadId(1)));
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|e| e.thread_id == ThreadId(1)));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let (dir, log) = log();
        log.append(&entry(1, "good", Direction::In)).unwrap();
        let path = dir.path().join("message-history.jsonl");
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{torn line\n").unwrap();
        log.append(&entry(1, "also good", Direction::In)).unwrap();

        let got = log.tail(10, None);
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn rotation_keeps_one_backup() {
        let (dir, log) = log();
        let path = dir.path().join("message-history.jsonl");
        // inflate past the cap without writing 10 MiB of JSON lines
        let filler = "x".repeat(1024);
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        for _ in 0..(LOG_ROTATE_BYTES / 1024 + 2) {
            f.write_all(filler.as_bytes()).unwrap();
            f.write_all(b"\n").unwrap();
        }
        drop(f);

        log.append(&entry(1, "fresh", Direction::In)).unwrap();
        assert!(dir.path().join("message-history.1.jsonl").exists());
        let got = log.tail(10, None);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].message, "fresh");
    }
}
