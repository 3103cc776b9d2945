use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use borg_agent::{ClaudeCliRuntime, LogSync};
use borg_core::config::LOG_SYNC_INTERVAL_SECS;
use borg_core::{BorgPaths, Settings};
use borg_scheduler::Engine;
use borg_state::ThreadStore;

mod tool_bridge;

/// Borg — multi-tenant agent orchestration backbone.
#[derive(Debug, Parser)]
#[command(name = "borg-daemon", version)]
struct Cli {
    /// State root (default: ~/.borg).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Log filter, e.g. "borg=debug" (also honours RUST_LOG).
    #[arg(long)]
    log_filter: Option<String>,

    /// Command used to launch the LLM runtime.
    #[arg(long, default_value = "claude")]
    runtime: String,

    /// MCP bridge binary handed to the runtime. Defaults to this
    /// executable, whose `tool-bridge` subcommand serves the tools.
    #[arg(long)]
    mcp_bridge: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve one thread's cross-thread tool server over MCP stdio.
    /// Spawned by the LLM runtime, one process per query.
    ToolBridge {
        /// Thread whose identity the tools carry.
        #[arg(long)]
        thread_id: u32,
        /// Transport tag of the triggering envelope.
        #[arg(long)]
        channel: String,
    },
}

#[tokio::main]
async fn main() {
    let Cli {
        root,
        log_filter,
        runtime,
        mcp_bridge,
        command,
    } = Cli::parse();

    let result = match command {
        Some(Command::ToolBridge { thread_id, channel }) => {
            // stdout belongs to the MCP protocol; logs go to stderr
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| "borg=info".into()),
                )
                .with_writer(std::io::stderr)
                .init();
            tool_bridge::serve(
                root.unwrap_or_else(BorgPaths::default_root),
                thread_id,
                channel,
            )
            .await
        }
        None => run(root, log_filter, runtime, mcp_bridge).await,
    };

    if let Err(e) = result {
        eprintln!("borg-daemon: {e:#}");
        std::process::exit(2);
    }
}

async fn run(
    root: Option<PathBuf>,
    log_filter: Option<String>,
    runtime_command: String,
    mcp_bridge: Option<PathBuf>,
) -> anyhow::Result<()> {
    let paths = BorgPaths::new(root.unwrap_or_else(BorgPaths::default_root));
    paths.ensure_layout()?;

    // run log: stderr plus the human-readable queue.log under .borg/logs
    let file_appender = tracing_appender::rolling::never(paths.logs_dir(), "queue.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    let filter = log_filter
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or_else(|_| "borg=info".into()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    let settings = Settings::load(&paths.settings_file()).unwrap_or_else(|e| {
        warn!(err = %e, "settings unreadable, starting with defaults");
        Settings::default()
    });
    info!(
        root = %paths.root().display(),
        max_concurrent = settings.max_concurrent_sessions,
        heartbeat_minutes = settings.heartbeat_interval_minutes,
        timezone = %settings.timezone,
        "borg starting"
    );

    // the runtime reaches the tool server by spawning this very binary's
    // tool-bridge subcommand
    let bridge = mcp_bridge.or_else(|| std::env::current_exe().ok());
    if bridge.is_none() {
        warn!("own executable path unresolvable, runtime gets no tool bridge");
    }
    let runtime = ClaudeCliRuntime::new(runtime_command).with_mcp_bridge(bridge);
    let engine = Arc::new(Engine::new(paths.clone(), Arc::new(runtime)));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    spawn_signal_trap(shutdown_tx.clone());
    spawn_log_sync(paths.clone(), shutdown_rx.clone());

    Arc::clone(&engine).run(shutdown_rx).await;

    info!("borg stopped cleanly");
    Ok(())
}

/// SIGINT/SIGTERM flip the shutdown flag; the engine drains and exits.
fn spawn_signal_trap(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(term) => term,
                    Err(e) => {
                        error!(err = %e, "SIGTERM handler unavailable");
                        let _ = ctrl_c.await;
                        let _ = shutdown_tx.send(true);
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
}

/// Mirror the runtime's per-session event logs into `.borg/sessions/`
/// until shutdown.
fn spawn_log_sync(paths: BorgPaths, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let runtime_root = PathBuf::from(home).join(".claude/projects");
    let threads = Arc::new(ThreadStore::new(&paths));
    let mut sync = LogSync::new(runtime_root, paths, threads);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(LOG_SYNC_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let _ = sync.sync_once();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    });
}
