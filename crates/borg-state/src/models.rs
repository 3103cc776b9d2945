use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::warn;

use borg_core::config::MODEL_MAP_CAP;
use borg_core::{BorgPaths, Result, Tier};

use crate::atomic::write_json_atomic;

/// `message-models.json` — messageId → model name of the tier that produced
/// the assistant turn. Replies consult it (via `replyToModel`) so a
/// follow-up can never downgrade below the tier of the turn it answers.
///
/// Keyed by assistant outputs only. Bounded: writes prune to the newest
/// [`MODEL_MAP_CAP`] entries. Message ids carry a monotone-ish prefix, so
/// "newest" is the lexicographically largest keys.
pub struct ModelMap {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ModelMap {
    pub fn new(paths: &BorgPaths) -> Self {
        Self {
            path: paths.models_file(),
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> BTreeMap<String, String> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(err = %e, "message-models.json corrupt, starting empty");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        }
    }

    /// Record the tier used for an assistant output, pruning old entries.
    pub fn record(&self, message_id: &str, tier: Tier) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.load();
        map.insert(message_id.to_string(), tier.model().to_string());
        while map.len() > MODEL_MAP_CAP {
            // BTreeMap orders keys ascending; the smallest key is oldest.
            let oldest = match map.keys().next() {
                Some(k) => k.clone(),
                None => break,
            };
            map.remove(&oldest);
        }
        write_json_atomic(&self.path, &map)
    }

    pub fn lookup(&self, message_id: &str) -> Option<Tier> {
        self.load().get(message_id).and_then(|m| Tier::parse(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> (tempfile::TempDir, ModelMap) {
        let dir = tempfile::tempdir().unwrap();
        let paths = BorgPaths::new(dir.path());
        paths.ensure_layout().unwrap();
        let map = ModelMap::new(&paths);
        (dir, map)
    }

    #[test]
    fn records_model_names() {
        let (_dir, map) = map();
        map.record("m42", Tier::Complex).unwrap();
        assert_eq!(map.lookup("m42"), Some(Tier::Complex));
        assert_eq!(map.lookup("missing"), None);
    }

    #[test]
    fn prunes_oldest_beyond_cap() {
        let (_dir, map) = map();
        for i in 0..(MODEL_MAP_CAP + 10) {
            map.record(&format!("m{i:06}"), Tier::Simple).unwrap();
        }
        let stored = map.load();
        assert_eq!(stored.len(), MODEL_MAP_CAP);
        assert!(!stored.contains_key("m000000"));
        assert!(stored.contains_key(&format!("m{:06}", MODEL_MAP_CAP + 9)));
    }
}
