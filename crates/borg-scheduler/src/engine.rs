use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use borg_agent::{AgentRuntime, Dispatcher};
use borg_core::config::SCAN_INTERVAL_SECS;
use borg_core::types::now_ts;
use borg_core::{BorgPaths, CommandEnvelope, CommandKind, IncomingEnvelope, Source};
use borg_history::{HistoryLog, PromptLog};
use borg_queue::{drain_commands, recover_processing, spawn_incoming_watcher, Queue, StatusDir};
use borg_router::{Router, RoutingLog};
use borg_state::{ModelMap, SettingsCache, ThreadStore};

use crate::state::{ClaimDecision, SchedulerState};

/// How long shutdown waits for in-flight dispatches before giving up and
/// leaving their files in `processing/` for the next start's recovery.
const SHUTDOWN_DRAIN_SECS: u64 = 30;
/// Heartbeat producer / idle sweep cadence.
const MAINTENANCE_INTERVAL_SECS: u64 = 60;

/// The scheduler engine. One instance per process; `run` is the scan
/// loop, one spawned task per claimed message.
pub struct Engine {
    pub(crate) paths: BorgPaths,
    pub(crate) queue: Queue,
    pub(crate) threads: Arc<ThreadStore>,
    pub(crate) settings: SettingsCache,
    pub(crate) history: HistoryLog,
    pub(crate) prompt_log: PromptLog,
    pub(crate) routing_log: RoutingLog,
    pub(crate) models: ModelMap,
    pub(crate) router: Router,
    pub(crate) status: StatusDir,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) docker_proxy_url: Option<String>,
    pub(crate) http: reqwest::Client,
    state: Mutex<SchedulerState>,
    rescan_tx: mpsc::Sender<()>,
    rescan_rx: Mutex<Option<mpsc::Receiver<()>>>,
    last_heartbeat_sweep: Mutex<i64>,
}

impl Engine {
    pub fn new(paths: BorgPaths, runtime: Arc<dyn AgentRuntime>) -> Self {
        let threads = Arc::new(ThreadStore::new(&paths));
        let status = StatusDir::new(&paths);
        let dispatcher = Dispatcher::new(runtime, Arc::clone(&threads), status.clone());
        let (rescan_tx, rescan_rx) = mpsc::channel(1);
        Self {
            queue: Queue::new(paths.clone()),
            settings: SettingsCache::new(&paths),
            history: HistoryLog::new(&paths),
            prompt_log: PromptLog::new(&paths),
            routing_log: RoutingLog::new(&paths),
            models: ModelMap::new(&paths),
            router: Router::default(),
            threads,
            status,
            dispatcher,
            docker_proxy_url: std::env::var("DOCKER_PROXY_URL").ok().filter(|u| !u.is_empty()),
            http: reqwest::Client::new(),
            state: Mutex::new(SchedulerState::default()),
            rescan_tx,
            rescan_rx: Mutex::new(Some(rescan_rx)),
            last_heartbeat_sweep: Mutex::new(now_ts()),
            paths,
        }
    }

    /// Messages currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock_state().active_count
    }

    pub(crate) fn lock_state(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Main loop: startup recovery, then scan on wake-ups until shutdown.
    ///
    /// Wake-ups: the guaranteed periodic interval, the best-effort
    /// directory watcher, and completion of any in-flight task. The loop
    /// itself never blocks on a dispatch.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        recover_processing(&self.paths);

        let (_watch_guard, mut watch_rx) = match spawn_incoming_watcher(&self.paths) {
            Some((guard, rx)) => (Some(guard), Some(rx)),
            None => (None, None),
        };
        let Some(mut rescan_rx) = self
            .rescan_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            error!("engine run started twice, refusing second loop");
            return;
        };

        let mut scan_interval = tokio::time::interval(Duration::from_secs(SCAN_INTERVAL_SECS));
        let mut maintenance_interval =
            tokio::time::interval(Duration::from_secs(MAINTENANCE_INTERVAL_SECS));

        info!("scheduler engine started");
        loop {
            tokio::select! {
                _ = scan_interval.tick() => Arc::clone(&self).scan().await,
                _ = maintenance_interval.tick() => self.maintenance(),
                Some(()) = rescan_rx.recv() => Arc::clone(&self).scan().await,
                event = recv_opt(&mut watch_rx) => {
                    match event {
                        Some(()) => Arc::clone(&self).scan().await,
                        // watcher backend died; polling carries on alone
                        None => watch_rx = None,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("scheduler engine shutting down");
        self.lock_state().shutting_down = true;
        // persist the registry as-is; in-flight tasks keep updating it
        // while they drain
        let registry = self.threads.load();
        if let Err(e) = self.threads.save(&registry) {
            error!(err = %e, "registry persist on shutdown failed");
        }
        self.drain(Duration::from_secs(SHUTDOWN_DRAIN_SECS)).await;
    }

    /// One scan step. Re-entry safe: a scan already in progress makes
    /// this a no-op.
    pub async fn scan(self: Arc<Self>) {
        {
            let mut st = self.lock_state();
            if st.scanning || st.shutting_down {
                return;
            }
            st.scanning = true;
        }

        for command in drain_commands(&self.paths) {
            self.apply_command(command);
        }

        let settings = self.settings.load();
        let files = match self.queue.list_incoming() {
            Ok(files) => files,
            Err(e) => {
                error!(err = %e, "incoming scan failed");
                self.lock_state().scanning = false;
                return;
            }
        };

        let heartbeats = files.iter().filter(|f| f.heartbeat).count();
        debug!(
            user = files.len() - heartbeats,
            heartbeat = heartbeats,
            "queue depth"
        );

        for file in files {
            let thread = file.head.as_ref().map(|h| h.thread_id);
            let heartbeat = file.heartbeat;
            let decision = self
                .lock_state()
                .try_claim(thread, heartbeat, settings.max_concurrent_sessions);
            match decision {
                ClaimDecision::Claimed => {
                    let engine = Arc::clone(&self);
                    tokio::spawn(async move {
                        engine.process_and_release(file).await;
                    });
                }
                ClaimDecision::AtCapacity => break,
                ClaimDecision::ThreadBusy | ClaimDecision::HeartbeatBusy => continue,
            }
        }

        self.lock_state().scanning = false;
    }

    /// Process one claimed file on its own task, then release the claim
    /// and trigger another scan.
    pub(crate) async fn process_and_release(self: Arc<Self>, file: borg_queue::QueueFile) {
        let thread = file.head.as_ref().map(|h| h.thread_id);
        let heartbeat = file.heartbeat;

        self.process_message(&file).await;

        self.lock_state().release(thread, heartbeat);
        let _ = self.rescan_tx.try_send(());
    }

    /// Typed out-of-band commands, applied at the start of every scan.
    fn apply_command(&self, command: CommandEnvelope) {
        match command.command {
            CommandKind::Reset => {
                info!(thread_id = %command.thread_id, "command: reset session");
                if let Err(e) = self.threads.reset_thread(command.thread_id) {
                    error!(err = %e, "reset command failed");
                }
            }
            CommandKind::Setdir => {
                let dir = command
                    .args
                    .as_ref()
                    .and_then(|a| a.get("dir").and_then(|d| d.as_str()).or(a.as_str()));
                match dir {
                    Some(dir) if dir.starts_with('/') => {
                        info!(thread_id = %command.thread_id, dir, "command: setdir");
                        if let Err(e) = self
                            .threads
                            .set_cwd(command.thread_id, std::path::PathBuf::from(dir))
                        {
                            error!(err = %e, "setdir command failed");
                        }
                    }
                    _ => warn!(thread_id = %command.thread_id, "setdir without an absolute dir ignored"),
                }
            }
            CommandKind::Unknown => {
                debug!(thread_id = %command.thread_id, "unrecognized command ignored")
            }
        }
    }

    /// Periodic duties outside the message path: the heartbeat producer
    /// and the idle-session sweep.
    fn maintenance(&self) {
        let settings = self.settings.load();
        self.produce_heartbeats(settings.heartbeat_interval_minutes);
        self.sweep_idle_sessions(settings.idle_timeout_minutes);
    }

    fn produce_heartbeats(&self, interval_minutes: u64) {
        if interval_minutes == 0 {
            return;
        }
        let now = now_ts();
        {
            let mut last = self
                .last_heartbeat_sweep
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if now - *last < (interval_minutes * 60) as i64 {
                return;
            }
            *last = now;
        }

        let registry = self.threads.load();
        info!(threads = registry.len(), "enqueueing heartbeat check-ins");
        for (id, _) in registry {
            let envelope = IncomingEnvelope {
                channel: "heartbeat".to_string(),
                source: Source::Heartbeat,
                thread_id: id,
                source_thread_id: None,
                sender: "borg".to_string(),
                message: "Scheduled check-in".to_string(),
                is_reply: false,
                reply_to_text: None,
                reply_to_model: None,
                topic_name: None,
                timestamp: now,
                message_id: format!("hb-{now}-{id}"),
            };
            if let Err(e) = self.queue.publish_incoming(&envelope) {
                warn!(thread_id = %id, err = %e, "heartbeat enqueue failed");
            }
        }
        let _ = self.rescan_tx.try_send(());
    }

    fn sweep_idle_sessions(&self, timeout_minutes: u64) {
        if timeout_minutes == 0 {
            return;
        }
        let cutoff = now_ts() - (timeout_minutes * 60) as i64;
        let registry = self.threads.load();
        for (id, thread) in registry {
            if thread.session_id.is_some() && thread.last_active < cutoff {
                info!(thread_id = %id, "dropping idle session");
                if let Err(e) = self.threads.reset_thread(id) {
                    warn!(thread_id = %id, err = %e, "idle reset failed");
                }
            }
        }
    }

    async fn drain(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let active = self.in_flight();
            if active == 0 {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(active, "drain timeout, leaving files in processing/ for recovery");
                return;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

/// `recv` over an optional receiver: absent watcher means pending forever
/// (the periodic interval still drives scans).
async fn recv_opt(rx: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
