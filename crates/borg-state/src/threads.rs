use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{error, warn};

use borg_core::config::default_thread_cwd;
use borg_core::types::now_ts;
use borg_core::{BorgPaths, Result, Thread, ThreadId, Tier, MASTER_THREAD};

use crate::atomic::write_json_atomic;

/// The registry as stored in `threads.json`. Integer keys serialize as
/// JSON object keys ("7").
pub type Threads = BTreeMap<ThreadId, Thread>;

/// Thread registry with the file as the single source of truth.
///
/// There is deliberately no in-process cache: the chat adapter mutates the
/// same file from another process, so every access re-reads it. The inner
/// mutex only serializes read-modify-write cycles within this process;
/// cross-process conflicts resolve last-writer-wins.
pub struct ThreadStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ThreadStore {
    pub fn new(paths: &BorgPaths) -> Self {
        Self {
            path: paths.threads_file(),
            write_lock: Mutex::new(()),
        }
    }

    /// Load the registry. Corrupt or absent file falls back to the default
    /// registry (master entry only) per the state-store corruption policy.
    pub fn load(&self) -> Threads {
        let mut threads = match std::fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str::<Threads>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    error!(path = %self.path.display(), err = %e, "threads.json corrupt, using defaults");
                    Threads::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Threads::new(),
            Err(e) => {
                error!(path = %self.path.display(), err = %e, "threads.json unreadable, using defaults");
                Threads::new()
            }
        };
        threads.entry(MASTER_THREAD).or_insert_with(|| {
            let mut master = Thread::new_default(MASTER_THREAD, default_thread_cwd(MASTER_THREAD));
            master.name = "Master".to_string();
            master
        });
        threads
    }

    pub fn save(&self, threads: &Threads) -> Result<()> {
        write_json_atomic(&self.path, threads)
    }

    pub fn get(&self, id: ThreadId) -> Option<Thread> {
        self.load().get(&id).cloned()
    }

    /// Fetch a thread, creating a default record on first sight.
    ///
    /// Backfills the display name from `topic_name` while the stored name
    /// is still the generic placeholder, and bumps `lastActive`.
    pub fn ensure_thread(&self, id: ThreadId, topic_name: Option<&str>) -> Result<Thread> {
        self.mutate(|threads| {
            let is_new = !threads.contains_key(&id);
            let thread = threads
                .entry(id)
                .or_insert_with(|| Thread::new_default(id, default_thread_cwd(id)));
            if is_new {
                if let Err(e) = std::fs::create_dir_all(&thread.cwd) {
                    warn!(thread_id = %id, err = %e, "thread cwd not creatable");
                }
            }
            if let Some(topic) = topic_name {
                if !topic.is_empty() && thread.has_generic_name(id) {
                    thread.name = topic.to_string();
                }
            }
            thread.last_active = now_ts();
            thread.clone()
        })
    }

    /// Persist the session identifier captured from the runtime stream
    /// (`None` clears it, e.g. after a resume failure).
    pub fn set_session(&self, id: ThreadId, session_id: Option<String>) -> Result<()> {
        self.mutate(|threads| {
            if let Some(thread) = threads.get_mut(&id) {
                thread.session_id = session_id;
                thread.last_active = now_ts();
            } else {
                warn!(thread_id = %id, "set_session for unregistered thread ignored");
            }
        })
    }

    pub fn set_model(&self, id: ThreadId, tier: Tier) -> Result<()> {
        self.mutate(|threads| {
            if let Some(thread) = threads.get_mut(&id) {
                thread.model = tier;
            }
        })
    }

    /// `reset` command: drop the resumable session so the next message
    /// starts a fresh one.
    pub fn reset_thread(&self, id: ThreadId) -> Result<()> {
        self.set_session(id, None)
    }

    /// `setdir` command: repoint the thread's working directory.
    pub fn set_cwd(&self, id: ThreadId, cwd: PathBuf) -> Result<()> {
        self.mutate(|threads| {
            if let Some(thread) = threads.get_mut(&id) {
                thread.cwd = cwd;
            }
        })
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Threads) -> R) -> Result<R> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut threads = self.load();
        let out = f(&mut threads);
        self.save(&threads)?;
        Ok(out)
    }
}
