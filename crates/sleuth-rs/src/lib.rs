//! Conversational host-inspection agent: a REPL that exchanges messages with
//! a pluggable LLM backend and executes read-only inspection tools on the
//! model's behalf.
//!
//! The core of the crate is the conversation-state and tool-safety engine:
//!
//! - [`ContextStore`](context::ContextStore) — ordered, append-only message
//!   history with turn/token accounting and a view-producing slicer.
//! - [`SummarizeConfig`](context::SummarizeConfig) — the turn/token-based
//!   compaction trigger and procedure.
//! - [`StateTracker`](agent::StateTracker) — working hypothesis, per-turn
//!   actions, tool events, and the denial counter.
//! - [`validate_command`](tools::validate_command) — command-safety checks
//!   for shell invocations.
//! - [`ToolExecutor`](tools::ToolExecutor) — dispatch to named tool handlers
//!   with workspace-boundary enforcement, output truncation, and
//!   denial limiting.
//! - [`Session`](agent::Session) — the turn loop tying all of the above to a
//!   [`Backend`](backend::Backend).
//!
//! Backends are a constructor-time choice: [`LocalBackend`](backend::LocalBackend)
//! runs offline heuristics (no keys needed), [`ApiBackend`](backend::ApiBackend)
//! talks to any OpenAI-format chat completions endpoint.
//!
//! # Getting started
//!
//! ```ignore
//! use sleuth_rs::agent::Session;
//! use sleuth_rs::backend::LocalBackend;
//! use sleuth_rs::tools::ToolExecutor;
//!
//! let tools = ToolExecutor::new().with_inspection_tools("/my/project", None);
//! let mut session = Session::new(Box::new(LocalBackend::new()), tools);
//! let reply = session.run_turn("what's running on this box?").await?;
//! println!("{reply}");
//! ```

pub mod agent;
pub mod backend;
pub mod context;
pub mod tools;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. This is the bridge between strong Rust argument
/// types and the `serde_json::Value` a tool definition carries.
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Token estimation ───────────────────────────────────────────────

/// Rough token count using a 4-chars-per-token heuristic.
///
/// Deliberately approximate — no tokenizer dependency. Callers should only
/// rely on threshold-crossing behavior, never exact counts.
pub fn approx_tokens(text: &str) -> usize {
    if text.is_empty() { 0 } else { (text.len() / 4).max(1) }
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A tool call requested by the model. `arguments` is the raw JSON string
/// exactly as the backend produced it; handlers parse it themselves.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// A message in the conversation. Immutable once appended to the
/// [`ContextStore`](context::ContextStore).
///
/// A `Tool` message always carries a `tool_call_id` referencing a prior
/// assistant tool-call id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            name: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }

    /// Whether this message counts toward the summarization turn quota.
    ///
    /// Only user messages and plain assistant replies (no attached tool
    /// calls) are countable. Tool-call and tool-result messages ride along
    /// without consuming the quota, so tool-heavy exchanges never displace
    /// real turns from a recency window.
    pub fn is_countable_turn(&self) -> bool {
        match self.role {
            MessageRole::User => true,
            MessageRole::Assistant => self.tool_calls.as_ref().is_none_or(|c| c.is_empty()),
            MessageRole::System | MessageRole::Tool => false,
        }
    }

    /// Summary-friendly transcript line: `role: content`.
    pub fn to_chunk(&self) -> String {
        format!("{}: {}", self.role, self.content.trim())
    }
}

// ── Tool definitions ───────────────────────────────────────────────

/// Tool definition exported to the backend: name, description, and a JSON
/// Schema for the arguments. Backends are responsible for any wire-format
/// wrapping their API expects.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
