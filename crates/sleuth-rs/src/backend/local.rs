//! Offline backend with deterministic heuristics.
//!
//! No network, no keys. Useful for tests, demos, and air-gapped machines:
//! it keyword-matches the latest user message onto one of the inspection
//! tools and narrates whatever output comes back.

use crate::backend::{Backend, BackendFuture, BackendReply};
use crate::{Message, MessageRole, ToolCall, ToolDef};

/// Keyword → command table for `run_command` suggestions.
const COMMAND_HINTS: &[(&[&str], &str)] = &[
    (&["disk", "space", "full"], "df -h"),
    (&["running", "process", "processes"], "ps aux"),
    (&["memory", "ram"], "free -m"),
    (&["uptime", "load"], "uptime"),
];

#[derive(Debug, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }

    fn reply_for(messages: &[Message], tools: &[ToolDef]) -> BackendReply {
        // After a tool result, narrate it instead of calling another tool.
        if let Some(last) = messages.last()
            && last.role == MessageRole::Tool
        {
            let trimmed = last.content.trim();
            if trimmed.is_empty() {
                return BackendReply::text("The command produced no output.");
            }
            return BackendReply::text(format!("Here is what I found:\n{trimmed}"));
        }

        let Some(user) = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
        else {
            return BackendReply::text("Ask me about this machine and I will take a look.");
        };
        let lowered = user.content.to_lowercase();

        let has_run_command = tools.iter().any(|t| t.name == "run_command");
        if has_run_command {
            for (keywords, command) in COMMAND_HINTS {
                if keywords.iter().any(|k| lowered.contains(k)) {
                    return BackendReply::tool_calls(vec![ToolCall {
                        id: format!("local-{}", messages.len()),
                        name: "run_command".to_string(),
                        arguments: serde_json::json!({ "command": command }).to_string(),
                    }]);
                }
            }
        }

        if tools.iter().any(|t| t.name == "list_files")
            && (lowered.contains("files") || lowered.contains("directory"))
        {
            return BackendReply::tool_calls(vec![ToolCall {
                id: format!("local-{}", messages.len()),
                name: "list_files".to_string(),
                arguments: "{}".to_string(),
            }]);
        }

        BackendReply::text(
            "I can read files, list directories, search with grep, and run \
             read-only commands. Tell me what to look into.",
        )
    }
}

impl Backend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn generate<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDef],
    ) -> BackendFuture<'a, BackendReply> {
        Box::pin(async move { Ok(Self::reply_for(messages, tools)) })
    }

    fn summarize<'a>(&'a self, transcript: &'a str) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let lines = transcript.lines().filter(|l| !l.trim().is_empty()).count();
            let head: String = transcript.chars().take(200).collect();
            Ok(format!(
                "Earlier conversation ({lines} transcript lines), beginning:\n{head}"
            ))
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> Vec<ToolDef> {
        vec![
            ToolDef::new("run_command", "", serde_json::json!({})),
            ToolDef::new("list_files", "", serde_json::json!({})),
        ]
    }

    #[tokio::test]
    async fn disk_questions_map_to_df() {
        let backend = LocalBackend::new();
        let messages = vec![Message::user("why is the disk full?")];
        let reply = backend.generate(&messages, &tools()).await.unwrap();
        assert_eq!(reply.tool_calls.len(), 1);
        assert!(reply.tool_calls[0].arguments.contains("df -h"));
    }

    #[tokio::test]
    async fn no_tools_means_text_reply() {
        let backend = LocalBackend::new();
        let messages = vec![Message::user("why is the disk full?")];
        let reply = backend.generate(&messages, &[]).await.unwrap();
        assert!(reply.text.is_some());
        assert!(reply.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn tool_results_are_narrated() {
        let backend = LocalBackend::new();
        let messages = vec![
            Message::user("check the disk"),
            Message::tool_result("c1", "/dev/sda1  92% /"),
        ];
        let reply = backend.generate(&messages, &tools()).await.unwrap();
        assert!(reply.text.unwrap().contains("/dev/sda1"));
        assert!(reply.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn summarize_never_fails() {
        let backend = LocalBackend::new();
        let summary = backend.summarize("user: hello\n\nassistant: hi").await.unwrap();
        assert!(summary.contains("transcript lines"));
    }
}
