use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use borg_core::BorgPaths;

/// Keeps the notify backend alive; dropping it stops the watcher.
pub struct IncomingWatcher {
    _watcher: RecommendedWatcher,
}

/// Watch `queue/incoming/` for changes as a scan-latency reducer.
///
/// Strictly best-effort: the scheduler's periodic scan provides
/// correctness, this only wakes it early. When the platform watcher can't
/// be set up the caller proceeds on polling alone.
pub fn spawn_incoming_watcher(
    paths: &BorgPaths,
) -> Option<(IncomingWatcher, mpsc::Receiver<()>)> {
    let (tx, rx) = mpsc::channel(1);

    let mut watcher = match notify::recommended_watcher(
        move |res: notify::Result<notify::Event>| match res {
            Ok(_) => {
                // a full channel already has a wake-up pending
                let _ = tx.try_send(());
            }
            Err(e) => debug!(err = %e, "incoming watcher event error"),
        },
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!(err = %e, "incoming watcher unavailable, polling only");
            return None;
        }
    };

    if let Err(e) = watcher.watch(&paths.incoming_dir(), RecursiveMode::NonRecursive) {
        warn!(err = %e, "incoming watcher setup failed, polling only");
        return None;
    }

    Some((IncomingWatcher { _watcher: watcher }, rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watcher_signals_on_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BorgPaths::new(dir.path());
        paths.ensure_layout().unwrap();

        let Some((_guard, mut rx)) = spawn_incoming_watcher(&paths) else {
            // platform without a usable watcher backend — polling covers it
            return;
        };

        std::fs::write(paths.incoming_dir().join("tg_m1.json"), "{}").unwrap();

        let woke = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv()).await;
        assert!(woke.is_ok());
    }
}
