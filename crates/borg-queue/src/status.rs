use std::path::PathBuf;

use tracing::debug;

use borg_core::types::now_ts;
use borg_core::{BorgPaths, StatusBeacon};
use borg_state::atomic::write_string_atomic;

/// Best-effort per-in-flight-message progress files under `status/`.
///
/// Dashboards poll these; nothing in the message path depends on them, so
/// every write error is swallowed after a debug log.
#[derive(Clone)]
pub struct StatusDir {
    dir: PathBuf,
}

impl StatusDir {
    pub fn new(paths: &BorgPaths) -> Self {
        Self {
            dir: paths.status_dir(),
        }
    }

    pub fn set(&self, message_id: &str, text: impl Into<String>) {
        let beacon = StatusBeacon {
            text: text.into(),
            ts: now_ts(),
        };
        let path = self.dir.join(format!("{message_id}.json"));
        let payload = match serde_json::to_string(&beacon) {
            Ok(p) => p,
            Err(_) => return,
        };
        if let Err(e) = write_string_atomic(&path, &payload) {
            debug!(message_id, err = %e, "status beacon write failed");
        }
    }

    pub fn clear(&self, message_id: &str) {
        let _ = std::fs::remove_file(self.dir.join(format!("{message_id}.json")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BorgPaths::new(dir.path());
        paths.ensure_layout().unwrap();
        let status = StatusDir::new(&paths);

        status.set("m1", "Thinking… (0s)");
        let raw = std::fs::read_to_string(paths.status_dir().join("m1.json")).unwrap();
        let beacon: StatusBeacon = serde_json::from_str(&raw).unwrap();
        assert_eq!(beacon.text, "Thinking… (0s)");

        status.clear("m1");
        assert!(!paths.status_dir().join("m1.json").exists());
        // clearing twice is fine
        status.clear("m1");
    }
}
