//! Queue filename codec.
//!
//! `incoming/` names: `{channel}_{messageId}[_retryN].json`, or
//! `heartbeat_{messageId}[_retryN].json` for the heartbeat class.
//! `outgoing/` names: `{channel}_{messageId}_{ts}.json`, or bare
//! `{messageId}.json` for heartbeat responses. Dead letters keep their
//! last queue name behind a `{ts}_` prefix.

const RETRY_MARKER: &str = "_retry";
pub const HEARTBEAT_PREFIX: &str = "heartbeat_";

pub fn incoming_name(channel: &str, message_id: &str) -> String {
    format!("{channel}_{message_id}.json")
}

pub fn heartbeat_name(message_id: &str) -> String {
    format!("{HEARTBEAT_PREFIX}{message_id}.json")
}

pub fn outgoing_name(channel: &str, message_id: &str, ts: i64) -> String {
    format!("{channel}_{message_id}_{ts}.json")
}

pub fn heartbeat_outgoing_name(message_id: &str) -> String {
    format!("{message_id}.json")
}

pub fn dead_letter_name(name: &str, ts: i64) -> String {
    format!("{ts}_{name}")
}

pub fn is_heartbeat(name: &str) -> bool {
    name.starts_with(HEARTBEAT_PREFIX)
}

/// Retry counter encoded in the name. Absent suffix means attempt zero.
pub fn retry_count(name: &str) -> u32 {
    let stem = name.strip_suffix(".json").unwrap_or(name);
    match stem.rfind(RETRY_MARKER) {
        Some(idx) => stem[idx + RETRY_MARKER.len()..].parse().unwrap_or(0),
        None => 0,
    }
}

/// Rewrite a name to carry retry counter `n`, stripping any previous
/// `_retryN` so suffixes never accumulate.
pub fn with_retry(name: &str, n: u32) -> String {
    let stem = name.strip_suffix(".json").unwrap_or(name);
    let base = match stem.rfind(RETRY_MARKER) {
        Some(idx) if stem[idx + RETRY_MARKER.len()..].parse::<u32>().is_ok() => &stem[..idx],
        _ => stem,
    };
    format!("{base}{RETRY_MARKER}{n}.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_heartbeat_names() {
        assert!(is_heartbeat("heartbeat_hb-17.json"));
        assert!(!is_heartbeat("tg_m1.json"));
    }

    #[test]
    fn retry_count_parses_suffix() {
        assert_eq!(retry_count("tg_m1.json"), 0);
        assert_eq!(retry_count("tg_m1_retry1.json"), 1);
        assert_eq!(retry_count("tg_m1_retry2.json"), 2);
        assert_eq!(retry_count("heartbeat_hb_retry1.json"), 1);
    }

    #[test]
    fn with_retry_replaces_previous_suffix() {
        assert_eq!(with_retry("tg_m1.json", 1), "tg_m1_retry1.json");
        assert_eq!(with_retry("tg_m1_retry1.json", 2), "tg_m1_retry2.json");
        // a message id that happens to contain "_retry" but no number
        // keeps its full stem
        assert_eq!(
            with_retry("tg_retry_policy.json", 1),
            "tg_retry_policy_retry1.json"
        );
    }

    #[test]
    fn dead_letter_prefixes_timestamp() {
        assert_eq!(dead_letter_name("tg_m9.json", 42), "42_tg_m9.json");
    }
}
