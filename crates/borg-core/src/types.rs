use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Identifier of one addressable conversation (a forum topic).
///
/// Thread 1 is the distinguished master thread: it receives cross-thread
/// summaries and owns the knowledge base.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ThreadId(pub u32);

pub const MASTER_THREAD: ThreadId = ThreadId(1);

impl ThreadId {
    pub fn is_master(&self) -> bool {
        *self == MASTER_THREAD
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ThreadId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Model tier chosen by the router. Ordered: a reply may never run on a
/// lower tier than the turn it replies to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Simple,
    #[default]
    Medium,
    Complex,
}

impl Tier {
    /// Model name delivered in outgoing envelopes and the message-model map.
    pub fn model(&self) -> &'static str {
        match self {
            Tier::Simple => "haiku",
            Tier::Medium => "sonnet",
            Tier::Complex => "opus",
        }
    }

    /// Parse either a tier name or a model name. The chat adapter stores
    /// model names (`"opus"`), older config stored tier names — accept both.
    pub fn parse(s: &str) -> Option<Tier> {
        match s.to_ascii_lowercase().as_str() {
            "simple" | "haiku" => Some(Tier::Simple),
            "medium" | "sonnet" => Some(Tier::Medium),
            "complex" | "opus" => Some(Tier::Complex),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Simple => write!(f, "simple"),
            Tier::Medium => write!(f, "medium"),
            Tier::Complex => write!(f, "complex"),
        }
    }
}

/// Where an incoming envelope came from. Closed set — unknown values on
/// disk are a validation failure, never coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    User,
    CrossThread,
    Heartbeat,
    Cli,
    System,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::User => write!(f, "user"),
            Source::CrossThread => write!(f, "cross-thread"),
            Source::Heartbeat => write!(f, "heartbeat"),
            Source::Cli => write!(f, "cli"),
            Source::System => write!(f, "system"),
        }
    }
}

/// One registered thread: display name, working directory, current tier,
/// and the resumable LLM session bound to it (if any).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub name: String,
    pub cwd: PathBuf,
    #[serde(default)]
    pub model: Tier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub last_active: i64,
    #[serde(default)]
    pub is_master: bool,
}

impl Thread {
    /// Default record for a thread seen for the first time.
    pub fn new_default(id: ThreadId, cwd: PathBuf) -> Self {
        Self {
            name: format!("Thread {id}"),
            cwd,
            model: Tier::Medium,
            session_id: None,
            last_active: now_ts(),
            is_master: id.is_master(),
        }
    }

    /// Whether the stored name is still the auto-generated placeholder.
    pub fn has_generic_name(&self, id: ThreadId) -> bool {
        self.name == format!("Thread {id}")
    }
}

/// Envelope published by the chat adapter (or the tool server, or the
/// heartbeat producer) into `queue/incoming/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingEnvelope {
    pub channel: String,
    pub source: Source,
    pub thread_id: ThreadId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_thread_id: Option<ThreadId>,
    pub sender: String,
    pub message: String,
    #[serde(default)]
    pub is_reply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_name: Option<String>,
    pub timestamp: i64,
    pub message_id: String,
}

impl IncomingEnvelope {
    /// Schema checks beyond what serde enforces. Violations dead-letter the
    /// file instead of entering the retry path.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.thread_id.as_u32() == 0 {
            return Err(crate::error::BorgError::Validation(
                "threadId must be a positive integer".into(),
            ));
        }
        if self.message_id.is_empty() {
            return Err(crate::error::BorgError::Validation(
                "messageId must not be empty".into(),
            ));
        }
        if self.channel.is_empty() {
            return Err(crate::error::BorgError::Validation(
                "channel must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Envelope published into `queue/outgoing/` for the chat adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingEnvelope {
    pub channel: String,
    pub thread_id: ThreadId,
    pub sender: String,
    pub message: String,
    pub original_message: String,
    pub timestamp: i64,
    pub message_id: String,
    /// Model name of the tier that produced the response.
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_thread_id: Option<ThreadId>,
}

/// Recognized out-of-band commands. Anything else parses to `Unknown` and
/// is ignored (the file is still consumed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Reset,
    Setdir,
    #[serde(other)]
    Unknown,
}

/// Typed control message from `queue/commands/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub command: CommandKind,
    pub thread_id: ThreadId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
    pub timestamp: i64,
}

/// Output of the router for one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub tier: Tier,
    pub model: String,
    pub confidence: f64,
    pub signals: Vec<String>,
    pub estimated_tokens: usize,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// One line of `message-history.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub ts: i64,
    pub thread_id: ThreadId,
    pub channel: String,
    pub sender: String,
    pub direction: Direction,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_thread_id: Option<ThreadId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Per-in-flight-message progress file under `status/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusBeacon {
    pub text: String,
    pub ts: i64,
}

/// Current unix time in seconds.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// First `max_chars` characters of `s`. Safe on multi-byte content, where
/// `String::truncate` would panic off a char boundary.
pub fn clip_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
