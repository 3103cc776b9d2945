//! `borg-router` — stateless rules classifier for model-tier selection.
//!
//! `classify` scores a message across 14 weighted dimensions into [-1, 1]
//! and maps the score to SIMPLE/MEDIUM/COMPLEX with a sigmoid confidence.
//! Deterministic for a fixed config; no I/O. The reply-clamp lives beside
//! it: a reply never runs on a lower tier than the turn it replies to.

pub mod classify;
pub mod log;

pub use classify::{Router, RouterConfig};
pub use log::RoutingLog;

use borg_core::Tier;

/// Clamp for replies: `max(reply-to tier, routed tier)`.
///
/// `reply_to_model` is the model name the chat adapter resolved from the
/// message-model map; unparseable values leave the routed tier untouched.
pub fn effective_tier(routed: Tier, reply_to_model: Option<&str>) -> Tier {
    match reply_to_model.and_then(Tier::parse) {
        Some(reply_tier) => routed.max(reply_tier),
        None => routed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_never_downgrade() {
        assert_eq!(effective_tier(Tier::Simple, Some("opus")), Tier::Complex);
        assert_eq!(effective_tier(Tier::Complex, Some("haiku")), Tier::Complex);
        assert_eq!(effective_tier(Tier::Medium, Some("sonnet")), Tier::Medium);
    }

    #[test]
    fn fresh_messages_keep_the_routed_tier() {
        assert_eq!(effective_tier(Tier::Simple, None), Tier::Simple);
        assert_eq!(effective_tier(Tier::Simple, Some("not-a-model")), Tier::Simple);
    }
}
