//! Append-only conversation history with turn/token accounting and a
//! view-producing slicer.
//!
//! The [`ContextStore`] is the single source of truth for the conversation.
//! Backends never read the message list directly — they ask for a
//! [`SliceMode`] view instead. Slicing is pure: it never mutates the store,
//! and two consecutive calls on an unmodified store return equal results.

use crate::{Message, MessageRole, approx_tokens};

/// Header line prefixing the rolling summary when it is rendered into the
/// message list as a system message.
pub const SUMMARY_HEADER: &str = "## Conversation Summary";

/// Read-only view selector for [`ContextStore::slice`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceMode {
    /// Every message as stored.
    Full,
    /// All system messages + the last N countable turns with their
    /// interleaved tool traffic.
    Recent(usize),
    /// Leading system messages, the rolling summary (if any) rendered as a
    /// system message, then the same trailing window as `Recent(N)`.
    SummaryPlusRecent(usize),
}

/// Ordered, append-only sequence of messages plus a rolling summary.
///
/// Owned exclusively by the session; mutated only via [`append`](Self::append)
/// and [`compact`](Self::compact). `turn_count` counts only user messages and
/// plain assistant messages — tool-call and tool-result messages never
/// increment it.
#[derive(Debug, Default)]
pub struct ContextStore {
    messages: Vec<Message>,
    summary: Option<String>,
    turn_count: usize,
    estimated_tokens: usize,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to the tail, updating turn and token accounting.
    ///
    /// Tool and tool-call content counts toward the token estimate (it
    /// occupies real context window) while staying excluded from the turn
    /// count. System messages count toward neither.
    pub fn append(&mut self, message: Message) {
        if message.is_countable_turn() {
            self.turn_count += 1;
        }
        self.estimated_tokens += Self::message_tokens(&message);
        self.messages.push(message);
    }

    /// Number of countable turns currently stored.
    pub fn turn_count(&self) -> usize {
        self.turn_count
    }

    /// Approximate token total for non-system content.
    pub fn estimated_tokens(&self) -> usize {
        self.estimated_tokens
    }

    /// The rolling summary, if a compaction has happened.
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Total number of stored messages (all roles).
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// All stored messages, in order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Return a read-only ordered view of the history.
    ///
    /// Pure and idempotent — never mutates the store. If fewer than N
    /// countable turns exist, all of them are returned.
    pub fn slice(&self, mode: SliceMode) -> Vec<Message> {
        match mode {
            SliceMode::Full => self.messages.clone(),
            SliceMode::Recent(n) => {
                let mut out = self.system_messages(true);
                out.extend(self.recent_window(n));
                out
            }
            SliceMode::SummaryPlusRecent(n) => {
                let mut out = self.system_messages(false);
                if let Some(ref summary) = self.summary {
                    out.push(Message::system(format!("{SUMMARY_HEADER}\n{summary}")));
                }
                out.extend(self.recent_window(n));
                out
            }
        }
    }

    /// Replace everything but the system messages and the last `keep_recent`
    /// countable turns (with their interleaved tool messages intact) with a
    /// summary rendered as a system message.
    ///
    /// Turn and token counters are recomputed from the retained set.
    pub fn compact(&mut self, summary: String, keep_recent: usize) {
        let retained = self.recent_window(keep_recent);
        let mut messages = self.system_messages(false);
        messages.push(Message::system(format!("{SUMMARY_HEADER}\n{summary}")));
        messages.extend(retained);

        self.messages = messages;
        self.summary = Some(summary);
        self.turn_count = self
            .messages
            .iter()
            .filter(|m| m.is_countable_turn())
            .count();
        self.estimated_tokens = self.messages.iter().map(Self::message_tokens).sum();
    }

    /// The non-system messages ahead of the last `keep_recent`-turn window —
    /// the span a compaction would drop. Used as summarization input.
    pub fn compactable_messages(&self, keep_recent: usize) -> Vec<Message> {
        let window = self.recent_window(keep_recent);
        let window_len = window.len();
        let non_system: Vec<&Message> = self
            .messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .collect();
        non_system
            .iter()
            .take(non_system.len().saturating_sub(window_len))
            .map(|m| (*m).clone())
            .collect()
    }

    /// System messages in order. When `include_summary` is false, summary
    /// messages from previous compactions are filtered out so they are never
    /// duplicated alongside the freshly rendered one.
    fn system_messages(&self, include_summary: bool) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| {
                m.role == MessageRole::System
                    && (include_summary || !m.content.starts_with(SUMMARY_HEADER))
            })
            .cloned()
            .collect()
    }

    /// Walk backward collecting messages until `limit` countable turns are
    /// gathered; tool traffic interleaved with those turns rides along.
    fn recent_window(&self, limit: usize) -> Vec<Message> {
        if limit == 0 {
            return Vec::new();
        }
        let mut window = Vec::new();
        let mut turns = 0;
        for msg in self.messages.iter().rev() {
            if msg.role == MessageRole::System {
                continue;
            }
            window.push(msg.clone());
            if msg.is_countable_turn() {
                turns += 1;
                if turns >= limit {
                    break;
                }
            }
        }
        window.reverse();
        window
    }

    fn message_tokens(message: &Message) -> usize {
        if message.role == MessageRole::System {
            return 0;
        }
        let mut tokens = approx_tokens(&message.content);
        if let Some(ref calls) = message.tool_calls {
            tokens += calls.iter().map(|c| approx_tokens(&c.arguments)).sum::<usize>();
        }
        tokens
    }
}

// ── Tests ──────────────────────────────────────────────────────────
