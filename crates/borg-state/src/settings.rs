use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

use tracing::{debug, error};

use borg_core::{BorgPaths, Settings};

/// mtime-cached view of `settings.json`.
///
/// The file is operator-owned and changes rarely; re-parsing it on every
/// message would be wasteful, but edits must take effect without a restart.
/// Any mtime change invalidates the cache.
pub struct SettingsCache {
    path: PathBuf,
    cached: Mutex<Option<(SystemTime, Settings)>>,
}

impl SettingsCache {
    pub fn new(paths: &BorgPaths) -> Self {
        Self {
            path: paths.settings_file(),
            cached: Mutex::new(None),
        }
    }

    /// Current settings. Corrupt file ⇒ defaults (logged once per change).
    pub fn load(&self) -> Settings {
        let mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((seen, settings)) = cached.as_ref() {
            if *seen == mtime {
                return settings.clone();
            }
            debug!(path = %self.path.display(), "settings mtime changed, reloading");
        }

        let settings = Settings::load(&self.path).unwrap_or_else(|e| {
            error!(err = %e, "settings.json unreadable, using defaults");
            Settings::default()
        });
        *cached = Some((mtime, settings.clone()));
        settings
    }
}
