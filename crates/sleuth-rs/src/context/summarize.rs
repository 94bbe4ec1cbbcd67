//! Turn/token-triggered history compaction.
//!
//! When the conversation grows past either threshold, everything ahead of
//! the last few turns is condensed into a rolling summary by the backend.
//! Summarization is fail-soft: if the backend errors, the failure is
//! recorded as a state-tracker action, the store is left untouched, and the
//! conversation continues at full length.

use tracing::{debug, info, warn};

use crate::agent::state::{ContextInfo, StateTracker};
use crate::backend::Backend;
use crate::context::ContextStore;

/// Compaction thresholds and retention.
///
/// Defaults: compact at 20 turns or ~20k estimated tokens, retaining the
/// last 5 turns verbatim.
#[derive(Clone, Copy, Debug)]
pub struct SummarizeConfig {
    pub max_turns: usize,
    pub token_limit: usize,
    pub keep_recent: usize,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            token_limit: 20_000,
            keep_recent: 5,
        }
    }
}

impl SummarizeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_turns(mut self, turns: usize) -> Self {
        self.max_turns = turns;
        self
    }

    pub fn token_limit(mut self, tokens: usize) -> Self {
        self.token_limit = tokens;
        self
    }

    pub fn keep_recent(mut self, turns: usize) -> Self {
        self.keep_recent = turns;
        self
    }

    /// Whether the store has crossed either threshold.
    pub fn should_compact(&self, store: &ContextStore) -> bool {
        store.turn_count() >= self.max_turns || store.estimated_tokens() >= self.token_limit
    }

    /// Retention clamped below the trigger so compaction always drops
    /// at least one turn.
    fn effective_keep_recent(&self) -> usize {
        self.keep_recent.min(self.max_turns.saturating_sub(1))
    }

    /// Compact the store if a threshold has been crossed.
    ///
    /// The tracker's context block is appended to the summarization input so
    /// the working hypothesis and recent tool activity survive into the
    /// summary. Returns whether a compaction happened. On backend failure
    /// the store is left exactly as it was and a failure action is recorded.
    /// The tracker's mirrored context accounting is refreshed on every call.
    pub async fn compact_if_needed(
        &self,
        backend: &dyn Backend,
        store: &mut ContextStore,
        state: &mut StateTracker,
    ) -> bool {
        let compacted = self.try_compact(backend, store, state).await;
        state.set_context_info(ContextInfo {
            turn_count: store.turn_count(),
            estimated_tokens: store.estimated_tokens(),
            summarized: store.summary().is_some(),
        });
        compacted
    }

    async fn try_compact(
        &self,
        backend: &dyn Backend,
        store: &mut ContextStore,
        state: &mut StateTracker,
    ) -> bool {
        if !self.should_compact(store) {
            return false;
        }

        let keep = self.effective_keep_recent();
        let older = store.compactable_messages(keep);
        if older.is_empty() {
            debug!("Compaction triggered but nothing precedes the retained window");
            return false;
        }

        let mut transcript = older
            .iter()
            .map(|m| m.to_chunk())
            .collect::<Vec<_>>()
            .join("\n\n");
        transcript.push_str("\n\n");
        transcript.push_str(&state.context_block());

        info!(
            turns = store.turn_count(),
            tokens = store.estimated_tokens(),
            dropping = older.len(),
            "Compacting conversation history"
        );

        match backend.summarize(&transcript).await {
            Ok(summary) => {
                state.note_summary(summary.clone());
                store.compact(summary, keep);
                debug!(
                    turns = store.turn_count(),
                    tokens = store.estimated_tokens(),
                    "Compaction complete"
                );
                true
            }
            Err(e) => {
                warn!("Summarization failed: {e}. Continuing with full history.");
                state.record_action(format!("summarization failed: {e}"));
                false
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
