use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use borg_core::types::now_ts;
use borg_core::{BorgPaths, RoutingDecision, Tier};

/// One line of `logs/routing.jsonl` per decision.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoutingRecord<'a> {
    ts: i64,
    /// SHA-256 hex of the enriched router input, so decisions can be
    /// correlated offline without storing message text here.
    prompt_hash: String,
    tier: Tier,
    model: &'a str,
    tokens: usize,
    confidence: f64,
    signals: &'a [String],
}

/// Append-only decision log. Best-effort, like the prompt log.
pub struct RoutingLog {
    path: PathBuf,
}

impl RoutingLog {
    pub fn new(paths: &BorgPaths) -> Self {
        Self {
            path: paths.routing_log_file(),
        }
    }

    pub fn record(&self, router_input: &str, decision: &RoutingDecision) {
        let record = RoutingRecord {
            ts: now_ts(),
            prompt_hash: hex::encode(Sha256::digest(router_input.as_bytes())),
            tier: decision.tier,
            model: &decision.model,
            tokens: decision.estimated_tokens,
            confidence: (decision.confidence * 100.0).round() / 100.0,
            signals: &decision.signals,
        };
        if let Err(e) = self.append(&record) {
            warn!(err = %e, "routing log write failed");
        }
    }

    fn append(&self, record: &RoutingRecord<'_>) -> std::io::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}
