//! Tool dispatch: the handler trait, the executor, and output truncation.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use tracing::{debug, warn};

use crate::{ToolCall, ToolDef};

/// Default cap on tool output fed back to the model.
pub const MAX_OUTPUT_BYTES: usize = 50_000;

/// Boxed future returned by [`ToolHandler::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;

/// Why a handler did not produce output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// Refused by a safety check. Denials feed the session denial counter.
    Denied(String),
    /// Attempted but failed (missing file, timeout, I/O error).
    Failed(String),
}

/// Outcome classification of one tool invocation.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Denied,
    Error,
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolStatus::Ok => write!(f, "ok"),
            ToolStatus::Denied => write!(f, "denied"),
            ToolStatus::Error => write!(f, "error"),
        }
    }
}

/// Result of [`ToolExecutor::execute`]: classification, the (possibly
/// truncated) output text, and a short argument summary for event records.
///
/// `denied_limit_reached` is set by the session when the denial limit
/// short-circuits a call before it reaches the executor.
#[derive(Clone, Debug)]
pub struct ToolOutcome {
    pub status: ToolStatus,
    pub output: String,
    pub detail: String,
    pub denied_limit_reached: bool,
}

/// An executable tool. `arguments` is the raw JSON string from the model;
/// handlers parse their own typed argument structs out of it.
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> ToolDef;

    fn execute<'a>(&'a self, arguments: &'a str) -> ToolFuture<'a>;
}

/// Callback invoked before each tool execution: `(tool name, detail)`.
pub type Notifier = Box<dyn Fn(&str, &str) + Send + Sync>;

/// Named-dispatch registry for tool handlers.
///
/// Executes exactly one call at a time; the session drives batches
/// sequentially in the order the model emitted them.
pub struct ToolExecutor {
    handlers: Vec<(String, Box<dyn ToolHandler>)>,
    max_output_bytes: usize,
    notifier: Option<Notifier>,
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolExecutor {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            max_output_bytes: MAX_OUTPUT_BYTES,
            notifier: None,
        }
    }

    /// Register a handler under its definition name.
    pub fn register(mut self, handler: Box<dyn ToolHandler>) -> Self {
        let name = handler.definition().name;
        self.handlers.push((name, handler));
        self
    }

    /// Cap on bytes of tool output returned to the model.
    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Install a pre-execution notifier (the REPL prints these lines).
    pub fn notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Tool definitions for the backend, in registration order.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.handlers.iter().map(|(_, h)| h.definition()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Execute one call: notify, dispatch by name, classify, truncate.
    ///
    /// Never panics and never unwinds into the session loop — unknown tools
    /// and handler failures come back as `Error` outcomes with a message the
    /// model can read.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutcome {
        let detail = describe_arguments(&call.arguments);
        if let Some(ref notify) = self.notifier {
            notify(&call.name, &detail);
        }

        let Some((_, handler)) = self.handlers.iter().find(|(name, _)| *name == call.name) else {
            warn!(tool = %call.name, "Unknown tool requested");
            return ToolOutcome {
                status: ToolStatus::Error,
                output: format!("Unknown tool: {}", call.name),
                detail,
                denied_limit_reached: false,
            };
        };

        debug!(tool = %call.name, args = %call.arguments, "Executing tool");
        match handler.execute(&call.arguments).await {
            Ok(output) => ToolOutcome {
                status: ToolStatus::Ok,
                output: truncate_output(&output, self.max_output_bytes),
                detail,
                denied_limit_reached: false,
            },
            Err(ToolError::Denied(reason)) => {
                warn!(tool = %call.name, %reason, "Tool call denied");
                ToolOutcome {
                    status: ToolStatus::Denied,
                    output: format!("Command denied: {reason}"),
                    detail,
                    denied_limit_reached: false,
                }
            }
            Err(ToolError::Failed(error)) => {
                warn!(tool = %call.name, %error, "Tool call failed");
                ToolOutcome {
                    status: ToolStatus::Error,
                    output: format!("Error: {error}"),
                    detail,
                    denied_limit_reached: false,
                }
            }
        }
    }
}

/// Cap output at `max_bytes`, cutting on a char boundary and appending a
/// marker with the original size.
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !output.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = output.get(..end).unwrap_or_default().to_string();
    truncated.push_str(&format!("\n[truncated: {} bytes total]", output.len()));
    truncated
}

/// Short human-readable summary of a call's arguments, for notifications
/// and tool-event records.
fn describe_arguments(arguments: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(arguments) {
        for key in ["command", "path", "pattern", "dir"] {
            if let Some(s) = value.get(key).and_then(|v| v.as_str()) {
                return s.to_string();
            }
        }
    }
    arguments.trim().to_string()
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct EchoTool;

    impl ToolHandler for EchoTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new("echo", "Echo the arguments back", serde_json::json!({}))
        }

        fn execute<'a>(&'a self, arguments: &'a str) -> ToolFuture<'a> {
            Box::pin(async move { Ok(arguments.to_string()) })
        }
    }

    struct DenyTool;

    impl ToolHandler for DenyTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new("deny", "Always refuses", serde_json::json!({}))
        }

        fn execute<'a>(&'a self, _arguments: &'a str) -> ToolFuture<'a> {
            Box::pin(async { Err(ToolError::Denied("nope".to_string())) })
        }
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    #[tokio::test]
    async fn dispatches_by_name() {
        let executor = ToolExecutor::new().register(Box::new(EchoTool));
        let outcome = executor.execute(&call("echo", "hello")).await;
        assert_eq!(outcome.status, ToolStatus::Ok);
        assert_eq!(outcome.output, "hello");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_outcome() {
        let executor = ToolExecutor::new().register(Box::new(EchoTool));
        let outcome = executor.execute(&call("nope", "{}")).await;
        assert_eq!(outcome.status, ToolStatus::Error);
        assert!(outcome.output.contains("Unknown tool: nope"));
    }

    #[tokio::test]
    async fn denial_maps_to_denied_status() {
        let executor = ToolExecutor::new().register(Box::new(DenyTool));
        let outcome = executor.execute(&call("deny", "{}")).await;
        assert_eq!(outcome.status, ToolStatus::Denied);
        assert!(outcome.output.contains("Command denied: nope"));
    }

    #[tokio::test]
    async fn output_is_truncated_at_the_byte_cap() {
        let executor = ToolExecutor::new()
            .register(Box::new(EchoTool))
            .max_output_bytes(10);
        let outcome = executor.execute(&call("echo", &"x".repeat(50))).await;
        assert!(outcome.output.starts_with("xxxxxxxxxx\n[truncated: 50 bytes total]"));
    }

    #[tokio::test]
    async fn notifier_fires_before_execution() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let executor = ToolExecutor::new()
            .register(Box::new(EchoTool))
            .notifier(Box::new(move |name, detail| {
                sink.lock().unwrap().push(format!("{name}: {detail}"));
            }));

        executor
            .execute(&call("echo", r#"{"command": "uptime"}"#))
            .await;
        assert_eq!(seen.lock().unwrap().as_slice(), ["echo: uptime"]);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "héllo wörld and then some";
        let truncated = truncate_output(text, 2);
        assert!(truncated.starts_with('h'));
        assert!(truncated.contains("[truncated:"));
    }

    #[test]
    fn short_output_passes_through() {
        assert_eq!(truncate_output("short", 100), "short");
    }

    #[test]
    fn argument_summary_prefers_known_keys() {
        assert_eq!(describe_arguments(r#"{"path": "/etc/hosts"}"#), "/etc/hosts");
        assert_eq!(describe_arguments(r#"{"command": "df -h"}"#), "df -h");
        assert_eq!(describe_arguments("not json"), "not json");
    }
}
