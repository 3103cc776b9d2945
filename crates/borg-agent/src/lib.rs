//! `borg-agent` — everything between a claimed message and its response.
//!
//! The [`runtime::AgentRuntime`] trait is the seam to the LLM runtime: one
//! streaming `run` call per query, events over an mpsc channel. The
//! [`dispatch::Dispatcher`] consumes that stream — capturing session ids,
//! reflecting progress into the status beacon, assembling and capping the
//! textual result. Prompt assembly, the per-query cross-thread tool
//! server, the tool permission gate, and the session-log mirror live here
//! too.

pub mod claude_cli;
pub mod dispatch;
pub mod logsync;
pub mod permission;
pub mod prompt;
pub mod runtime;
pub mod tools;

pub use claude_cli::ClaudeCliRuntime;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use logsync::LogSync;
pub use permission::{Permission, ToolGate, ToolPermission};
pub use prompt::PromptAssembler;
pub use runtime::{AgentRuntime, QueryRequest, RuntimeError, RuntimeEvent};
pub use tools::{ToolCtx, ToolResult, ToolServer};
