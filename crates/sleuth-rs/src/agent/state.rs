//! Session-scoped working state: hypothesis, actions, tool activity, and
//! the denial counter.
//!
//! The tracker is plain bookkeeping — it never talks to the backend or the
//! tools. The session feeds it events and renders its context block into
//! prompts so the model keeps sight of what it has already tried.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::tools::ToolStatus;

/// Denials after which `run_command` short-circuits for the session.
pub const MAX_DENIALS: usize = 3;

/// How many tool events the context block shows.
const CONTEXT_EVENTS: usize = 5;

/// One recorded freeform action.
#[derive(Serialize, Clone, Debug)]
pub struct ActionRecord {
    pub description: String,
    pub at: DateTime<Utc>,
}

/// One recorded tool invocation.
#[derive(Serialize, Clone, Debug)]
pub struct ToolEvent {
    pub tool: String,
    /// Short human-readable argument summary (a path, a command line).
    pub detail: String,
    pub status: ToolStatus,
    pub at: DateTime<Utc>,
}

/// Context accounting mirrored from the store after every compaction check.
#[derive(Serialize, Clone, Copy, Debug, Default)]
pub struct ContextInfo {
    pub turn_count: usize,
    pub estimated_tokens: usize,
    pub summarized: bool,
}

/// Serializable snapshot of the tracker, for the `/state` REPL command.
#[derive(Serialize, Clone, Debug)]
pub struct StateSnapshot {
    pub hypothesis: Option<String>,
    pub actions: Vec<ActionRecord>,
    pub tool_events: Vec<ToolEvent>,
    pub denial_count: usize,
    pub summary: Option<String>,
    pub context_info: ContextInfo,
}

/// Mutable working state for one session.
#[derive(Debug, Default)]
pub struct StateTracker {
    hypothesis: Option<String>,
    actions: Vec<ActionRecord>,
    tool_events: Vec<ToolEvent>,
    denial_count: usize,
    summary: Option<String>,
    context_info: ContextInfo,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hypothesis(&self) -> Option<&str> {
        self.hypothesis.as_deref()
    }

    pub fn denial_count(&self) -> usize {
        self.denial_count
    }

    pub fn denial_limit_reached(&self) -> bool {
        self.denial_count >= MAX_DENIALS
    }

    pub fn context_info(&self) -> ContextInfo {
        self.context_info
    }

    /// Record a freeform action note for the current turn.
    pub fn record_action(&mut self, description: impl Into<String>) {
        self.actions.push(ActionRecord {
            description: description.into(),
            at: Utc::now(),
        });
    }

    /// Mirror the store's rolling summary after a successful compaction.
    pub fn note_summary(&mut self, summary: impl Into<String>) {
        self.summary = Some(summary.into());
    }

    /// Refresh the mirrored context accounting. Called on every compaction
    /// check, whether or not a compaction happened.
    pub fn set_context_info(&mut self, info: ContextInfo) {
        self.context_info = info;
    }

    /// Record a tool invocation outcome. Denied outcomes also bump the
    /// denial counter, capped at [`MAX_DENIALS`].
    pub fn record_tool_event(
        &mut self,
        tool: impl Into<String>,
        detail: impl Into<String>,
        status: ToolStatus,
    ) {
        if status == ToolStatus::Denied {
            self.denial_count = (self.denial_count + 1).min(MAX_DENIALS);
        }
        self.tool_events.push(ToolEvent {
            tool: tool.into(),
            detail: detail.into(),
            status,
            at: Utc::now(),
        });
    }

    /// Scan a model reply for a `[HYPOTHESIS: ...]` marker and adopt it.
    /// The most recent marker wins; replies without one leave the current
    /// hypothesis alone.
    pub fn note_reply(&mut self, reply: &str) {
        if let Some(hypothesis) = extract_hypothesis(reply) {
            self.hypothesis = Some(hypothesis);
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            hypothesis: self.hypothesis.clone(),
            actions: self.actions.clone(),
            tool_events: self.tool_events.clone(),
            denial_count: self.denial_count,
            summary: self.summary.clone(),
            context_info: self.context_info,
        }
    }

    /// Render the state as a markdown block for prompt injection and for
    /// summarization input.
    pub fn context_block(&self) -> String {
        let mut block = String::from("## Agent State\n");
        match &self.hypothesis {
            Some(h) => block.push_str(&format!("Hypothesis: {h}\n")),
            None => block.push_str("Hypothesis: none yet\n"),
        }
        if self.tool_events.is_empty() {
            block.push_str("Recent tool activity: none\n");
        } else {
            block.push_str("Recent tool activity:\n");
            let start = self.tool_events.len().saturating_sub(CONTEXT_EVENTS);
            for event in &self.tool_events[start..] {
                block.push_str(&format!(
                    "- [{}] {}: {}\n",
                    event.status, event.tool, event.detail
                ));
            }
        }
        block.push_str(&format!("Denied commands this session: {}\n", self.denial_count));
        block
    }
}

/// Pull the payload out of the last `[HYPOTHESIS: ...]` marker in a reply.
pub fn extract_hypothesis(text: &str) -> Option<String> {
    let marker = "[HYPOTHESIS:";
    let start = text.rfind(marker)? + marker.len();
    let rest = text.get(start..)?;
    let end = rest.find(']')?;
    let hypothesis = rest.get(..end)?.trim();
    if hypothesis.is_empty() {
        None
    } else {
        Some(hypothesis.to_string())
    }
}

// ── Tests ──────────────────────────────────────────────────────────
