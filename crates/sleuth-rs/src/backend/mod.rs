//! Backend abstraction: anything that can turn a message view into a reply.
//!
//! A backend is chosen once at session construction and never switched
//! mid-conversation. Two implementations ship with the crate:
//! [`LocalBackend`] answers offline with canned heuristics (useful for tests
//! and air-gapped runs), [`ApiBackend`] talks to an OpenAI-format chat
//! completions endpoint over HTTP.

pub mod api;
pub mod local;

pub use api::ApiBackend;
pub use local::LocalBackend;

use std::future::Future;
use std::pin::Pin;

use crate::{Message, ToolCall, ToolDef};

/// Boxed future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send + 'a>>;

/// One model reply: free text, a batch of tool calls, or both.
///
/// An empty reply (no text, no calls) is valid and ends the turn.
#[derive(Clone, Debug, Default)]
pub struct BackendReply {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl BackendReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls: calls,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.as_deref().is_none_or(str::is_empty) && self.tool_calls.is_empty()
    }
}

/// Why a turn failed. Cancellation is not an error in the conversation
/// sense: the session stays alive and accepts the next input.
#[derive(Debug, PartialEq, Eq)]
pub enum TurnError {
    /// The user interrupted the in-flight turn (Ctrl-C).
    Cancelled,
    /// The backend reported a failure (network, auth, bad response).
    Backend(String),
}

impl std::fmt::Display for TurnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnError::Cancelled => write!(f, "turn cancelled"),
            TurnError::Backend(e) => write!(f, "backend error: {e}"),
        }
    }
}

impl std::error::Error for TurnError {}

/// A conversational model backend.
///
/// `generate` receives a read-only message view (already sliced by the
/// session) and the tool definitions it may call. `summarize` condenses a
/// transcript into a compact summary; it must not call tools.
pub trait Backend: Send + Sync {
    /// Short backend name for logs and the REPL banner.
    fn name(&self) -> &str;

    fn generate<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDef],
    ) -> BackendFuture<'a, BackendReply>;

    fn summarize<'a>(&'a self, transcript: &'a str) -> BackendFuture<'a, String>;
}
