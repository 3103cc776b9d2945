use tracing::{debug, warn};

use borg_core::{BorgPaths, CommandEnvelope};

/// Read and consume every command file under `queue/commands/`.
///
/// Files are deleted whether or not they parsed — commands are never
/// retried. Returned oldest-first by mtime so `setdir` sequences apply in
/// the order they were issued.
pub fn drain_commands(paths: &BorgPaths) -> Vec<CommandEnvelope> {
    let entries = match std::fs::read_dir(paths.commands_dir()) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };

    let mut files: Vec<_> = entries
        .flatten()
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
        .map(|e| {
            let mtime = e
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            (mtime, e.path())
        })
        .collect();
    files.sort();

    let mut commands = Vec::new();
    for (_, path) in files {
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<CommandEnvelope>(&raw) {
                Ok(cmd) => {
                    debug!(command = ?cmd.command, thread_id = %cmd.thread_id, "command consumed");
                    commands.push(cmd);
                }
                Err(e) => warn!(path = %path.display(), err = %e, "malformed command ignored"),
            },
            Err(e) => warn!(path = %path.display(), err = %e, "unreadable command ignored"),
        }
        let _ = std::fs::remove_file(&path);
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use borg_core::{CommandKind, ThreadId};

    #[test]
    fn drains_and_deletes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BorgPaths::new(dir.path());
        paths.ensure_layout().unwrap();

        std::fs::write(
            paths.commands_dir().join("a.json"),
            r#"{"command":"reset","threadId":4,"timestamp":1}"#,
        )
        .unwrap();
        std::fs::write(paths.commands_dir().join("b.json"), "not json").unwrap();

        let cmds = drain_commands(&paths);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].command, CommandKind::Reset);
        assert_eq!(cmds[0].thread_id, ThreadId(4));

        // both files consumed, parse failure included
        assert_eq!(std::fs::read_dir(paths.commands_dir()).unwrap().count(), 0);
    }

    #[test]
    fn missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BorgPaths::new(dir.path().join("nope"));
        assert!(drain_commands(&paths).is_empty());
    }
}
