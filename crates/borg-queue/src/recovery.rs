use tracing::{info, warn};

use borg_core::BorgPaths;

/// Startup recovery: return every `*.json` stranded in `processing/` to
/// `incoming/` under its original name.
///
/// A crash mid-dispatch leaves its file in `processing/`; without this it
/// would be stranded forever. Running it twice is a no-op — the second run
/// finds an empty directory.
pub fn recover_processing(paths: &BorgPaths) -> usize {
    let entries = match std::fs::read_dir(paths.processing_dir()) {
        Ok(e) => e,
        Err(_) => return 0,
    };

    let mut recovered = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let name = entry.file_name();
        let target = paths.incoming_dir().join(&name);
        match std::fs::rename(&path, &target) {
            Ok(()) => recovered += 1,
            Err(e) => {
                warn!(name = %name.to_string_lossy(), err = %e, "recovery rename failed")
            }
        }
    }
    if recovered > 0 {
        info!(count = recovered, "processing files recovered to incoming");
    }
    recovered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_stranded_files_back() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BorgPaths::new(dir.path());
        paths.ensure_layout().unwrap();

        std::fs::write(paths.processing_dir().join("tg_m9.json"), "{}").unwrap();
        std::fs::write(paths.processing_dir().join("notes.txt"), "skip me").unwrap();

        assert_eq!(recover_processing(&paths), 1);
        assert!(paths.incoming_dir().join("tg_m9.json").exists());
        assert!(paths.processing_dir().join("notes.txt").exists());

        // idempotent: a second run has nothing to do
        assert_eq!(recover_processing(&paths), 0);
    }
}
