use borg_core::config::HISTORY_SNIPPET_CHARS;
use borg_core::types::clip_chars;
use borg_core::{Direction, HistoryEntry};

/// Format history entries for prompt injection, oldest first.
///
/// One line per entry, tagged with channel and sender, message clipped to
/// the snippet cap.
pub fn format_history_lines(entries: &[HistoryEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| {
            let who = match e.direction {
                Direction::In => e.sender.as_str(),
                Direction::Out => "assistant",
            };
            format!(
                "[{}] {}: {}",
                e.channel,
                who,
                clip_chars(&e.message, HISTORY_SNIPPET_CHARS)
            )
        })
        .collect()
}

/// The router's input string: recent same-thread turns as bracketed role
/// tags, the optional reply-to text, then the message itself. This is the
/// string the routing log hashes.
pub fn router_input(
    recent: &[HistoryEntry],
    reply_to_text: Option<&str>,
    message: &str,
) -> String {
    let mut out = String::new();
    for e in recent {
        let role = match e.direction {
            Direction::In => "user",
            Direction::Out => "assistant",
        };
        out.push_str(&format!(
            "[{role}] {}\n",
            clip_chars(&e.message, HISTORY_SNIPPET_CHARS)
        ));
    }
    if let Some(reply) = reply_to_text {
        out.push_str(&format!(
            "[reply-to] {}\n",
            clip_chars(reply, HISTORY_SNIPPET_CHARS)
        ));
    }
    out.push_str(message);
    out
}
