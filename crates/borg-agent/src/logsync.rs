use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use borg_core::BorgPaths;
use borg_state::ThreadStore;

/// Mirrors the LLM runtime's per-session event logs into
/// `.borg/sessions/{sessionId}.jsonl` so monitoring readers can follow
/// them without knowing the runtime's own layout.
///
/// Byte-offset incremental; a shrunken source means the runtime rotated
/// its file, so the mirror restarts from zero. Only sessions present in
/// the thread registry are mirrored, and both endpoints must resolve
/// inside their intended roots.
pub struct LogSync {
    runtime_root: PathBuf,
    paths: BorgPaths,
    threads: Arc<ThreadStore>,
    offsets: HashMap<String, u64>,
    sources: HashMap<String, PathBuf>,
}

impl LogSync {
    pub fn new(runtime_root: PathBuf, paths: BorgPaths, threads: Arc<ThreadStore>) -> Self {
        Self {
            runtime_root,
            paths,
            threads,
            offsets: HashMap::new(),
            sources: HashMap::new(),
        }
    }

    /// One mirroring pass. Returns the number of sessions that received
    /// new bytes.
    pub fn sync_once(&mut self) -> usize {
        let registry = self.threads.load();
        let mut synced = 0;
        for thread in registry.values() {
            let Some(session_id) = thread.session_id.as_deref() else {
                continue;
            };
            if !safe_session_id(session_id) {
                warn!(session_id, "unsafe session id skipped");
                continue;
            }
            match self.sync_session(session_id) {
                Ok(true) => synced += 1,
                Ok(false) => {}
                Err(e) => debug!(session_id, err = %e, "session mirror pass failed"),
            }
        }
        synced
    }

    fn sync_session(&mut self, session_id: &str) -> std::io::Result<bool> {
        let source = match self.locate_source(session_id) {
            Some(p) => p,
            None => return Ok(false),
        };

        // containment check on the resolved path, not the constructed one
        let canonical = source.canonicalize()?;
        let root = self.runtime_root.canonicalize()?;
        if !canonical.starts_with(&root) {
            warn!(path = %canonical.display(), "session log escapes runtime root, skipped");
            return Ok(false);
        }

        let dest = self.paths.sessions_dir().join(format!("{session_id}.jsonl"));
        let src_len = std::fs::metadata(&canonical)?.len();
        let mut offset = *self.offsets.get(session_id).unwrap_or(
            // resume from the mirror's size after a restart
            &dest.metadata().map(|m| m.len()).unwrap_or(0),
        );

        if src_len < offset {
            // source rotated or rewritten; restart the mirror
            offset = 0;
            let _ = std::fs::remove_file(&dest);
        }
        if src_len == offset {
            self.offsets.insert(session_id.to_string(), offset);
            return Ok(false);
        }

        let mut src = std::fs::File::open(&canonical)?;
        src.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::new();
        src.read_to_end(&mut buf)?;

        let mut out = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&dest)?;
        out.write_all(&buf)?;

        self.offsets.insert(session_id.to_string(), src_len);
        Ok(true)
    }

    /// Find `{session_id}.jsonl` under the runtime root (cached once
    /// found — the runtime never moves a live session file).
    fn locate_source(&mut self, session_id: &str) -> Option<PathBuf> {
        if let Some(path) = self.sources.get(session_id) {
            if path.exists() {
                return Some(path.clone());
            }
            self.sources.remove(session_id);
        }
        let name = format!("{session_id}.jsonl");
        let found = find_file(&self.runtime_root, &name, 4)?;
        self.sources.insert(session_id.to_string(), found.clone());
        Some(found)
    }
}

fn safe_session_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn find_file(dir: &Path, name: &str, depth: usize) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && entry.file_name().to_str() == Some(name) {
            return Some(path);
        }
        if path.is_dir() {
            subdirs.push(path);
        }
    }
    if depth == 0 {
        return None;
    }
    subdirs.into_iter().find_map(|d| find_file(&d, name, depth - 1))
}
