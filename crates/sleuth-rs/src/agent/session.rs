//! The turn loop: user input in, assistant reply out, with tool rounds and
//! compaction in between.

use tracing::{debug, info, warn};

use crate::agent::state::StateTracker;
use crate::backend::{Backend, TurnError};
use crate::context::{ContextStore, SliceMode, SummarizeConfig};
use crate::tools::{ToolExecutor, ToolOutcome, ToolStatus};
use crate::{Message, ToolCall};

/// Tool rounds per turn before the session gives up and reports back.
pub const MAX_TOOL_ROUNDS: usize = 10;

/// Reply used when the denial limit ends the tool phase.
const DENIAL_LIMIT_REPLY: &str =
    "Command denial limit reached. Stopping tool execution for this session.";

/// One conversation with one backend and one tool registry.
///
/// A turn runs: append the user message, compact if thresholds are crossed,
/// then alternate backend generation and sequential tool execution until the
/// backend produces a plain text reply (or the round cap trips).
pub struct Session {
    backend: Box<dyn Backend>,
    tools: ToolExecutor,
    store: ContextStore,
    state: StateTracker,
    summarize: SummarizeConfig,
    slice_mode: SliceMode,
}

impl Session {
    pub fn new(backend: Box<dyn Backend>, tools: ToolExecutor) -> Self {
        Self {
            backend,
            tools,
            store: ContextStore::new(),
            state: StateTracker::new(),
            summarize: SummarizeConfig::default(),
            slice_mode: SliceMode::SummaryPlusRecent(20),
        }
    }

    /// Seed the conversation with a system prompt.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.store.append(Message::system(prompt.into()));
        self
    }

    pub fn summarize_config(mut self, config: SummarizeConfig) -> Self {
        self.summarize = config;
        self
    }

    pub fn slice_mode(mut self, mode: SliceMode) -> Self {
        self.slice_mode = mode;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    pub fn state(&self) -> &StateTracker {
        &self.state
    }

    /// Run one full turn. On backend failure the user message stays in the
    /// store; the next turn continues from there.
    pub async fn run_turn(&mut self, input: &str) -> Result<String, TurnError> {
        let head: String = input.chars().take(80).collect();
        self.state.record_action(format!("asked: {head}"));
        self.store.append(Message::user(input));
        self.compact_if_needed().await;

        let definitions = self.tools.definitions();
        for round in 0..MAX_TOOL_ROUNDS {
            let view = self.generation_view();
            let reply = self
                .backend
                .generate(&view, &definitions)
                .await
                .map_err(TurnError::Backend)?;

            if reply.tool_calls.is_empty() {
                let text = reply.text.unwrap_or_default();
                self.state.note_reply(&text);
                return self.finish_turn(text).await;
            }

            debug!(round, calls = reply.tool_calls.len(), "Executing tool batch");
            let calls = reply.tool_calls.clone();
            self.store.append(Message::assistant_tool_calls(
                reply.text.unwrap_or_default(),
                reply.tool_calls,
            ));
            // Strictly in emission order; a failed call still feeds its
            // error output back so the model can adjust.
            for call in &calls {
                let outcome = self.execute_call(call).await;
                self.state
                    .record_tool_event(&call.name, &outcome.detail, outcome.status);
                self.store
                    .append(Message::tool_result(&call.id, outcome.output));
            }

            // Three denials end the tool phase for good: no more tool
            // requests this session, the turn closes with a fixed reply.
            if self.state.denial_limit_reached() {
                info!("Denial limit reached; ending the tool phase");
                return self.finish_turn(DENIAL_LIMIT_REPLY.to_string()).await;
            }
        }

        warn!("Tool round limit reached without a final reply");
        self.finish_turn(
            "Reached the tool-call limit for this turn. Ask again to continue.".to_string(),
        )
        .await
    }

    async fn finish_turn(&mut self, text: String) -> Result<String, TurnError> {
        self.store.append(Message::assistant_text(text.clone()));
        self.compact_if_needed().await;
        Ok(text)
    }

    async fn execute_call(&self, call: &ToolCall) -> ToolOutcome {
        // Past the denial limit no handler runs, whatever the tool.
        if self.state.denial_limit_reached() {
            info!(tool = %call.name, "Tool call short-circuited after repeated denials");
            return ToolOutcome {
                status: ToolStatus::Denied,
                output: "Command denied: tool execution is disabled for this session after \
                         repeated denials"
                    .to_string(),
                detail: "(not executed)".to_string(),
                denied_limit_reached: true,
            };
        }
        self.tools.execute(call).await
    }

    /// Runs when the user message lands and again after the assistant reply,
    /// so a long turn cannot dodge the thresholds.
    async fn compact_if_needed(&mut self) {
        self.summarize
            .compact_if_needed(self.backend.as_ref(), &mut self.store, &mut self.state)
            .await;
    }

    /// The sliced history plus the current agent-state block, which rides as
    /// a trailing system message and is never stored.
    fn generation_view(&self) -> Vec<Message> {
        let mut view = self.store.slice(self.slice_mode);
        view.push(Message::system(self.state.context_block()));
        view
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::backend::{BackendFuture, BackendReply};
    use crate::tools::{ToolError, ToolFuture, ToolHandler};

    struct Scripted {
        replies: Mutex<VecDeque<BackendReply>>,
    }

    impl Scripted {
        fn new(replies: Vec<BackendReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
            }
        }
    }

    impl Backend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn generate<'a>(
            &'a self,
            _messages: &'a [Message],
            _tools: &'a [crate::ToolDef],
        ) -> BackendFuture<'a, BackendReply> {
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| BackendReply::text("done"));
            Box::pin(async move { Ok(reply) })
        }

        fn summarize<'a>(&'a self, _transcript: &'a str) -> BackendFuture<'a, String> {
            Box::pin(async { Ok("condensed history".to_string()) })
        }
    }

    struct Failing;

    impl Backend for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn generate<'a>(
            &'a self,
            _messages: &'a [Message],
            _tools: &'a [crate::ToolDef],
        ) -> BackendFuture<'a, BackendReply> {
            Box::pin(async { Err("connection refused".to_string()) })
        }

        fn summarize<'a>(&'a self, _transcript: &'a str) -> BackendFuture<'a, String> {
            Box::pin(async { Err("connection refused".to_string()) })
        }
    }

    /// run_command stand-in that records whether it was ever invoked.
    struct Tripwire;

    impl ToolHandler for Tripwire {
        fn definition(&self) -> crate::ToolDef {
            crate::ToolDef::new("run_command", "test stand-in", serde_json::json!({}))
        }

        fn execute<'a>(&'a self, _arguments: &'a str) -> ToolFuture<'a> {
            Box::pin(async { Ok("EXECUTED".to_string()) })
        }
    }

    struct AlwaysDeny;

    impl ToolHandler for AlwaysDeny {
        fn definition(&self) -> crate::ToolDef {
            crate::ToolDef::new("run_command", "test stand-in", serde_json::json!({}))
        }

        fn execute<'a>(&'a self, _arguments: &'a str) -> ToolFuture<'a> {
            Box::pin(async { Err(ToolError::Denied("unsafe".to_string())) })
        }
    }

    /// read_file stand-in counting its invocations.
    struct CountingRead(Arc<AtomicUsize>);

    impl ToolHandler for CountingRead {
        fn definition(&self) -> crate::ToolDef {
            crate::ToolDef::new("read_file", "test stand-in", serde_json::json!({}))
        }

        fn execute<'a>(&'a self, _arguments: &'a str) -> ToolFuture<'a> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok("FILE CONTENT".to_string()) })
        }
    }

    fn run_call(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "run_command".into(),
            arguments: r#"{"command": "uptime"}"#.into(),
        }
    }

    fn read_call(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "read_file".into(),
            arguments: r#"{"path": "notes.txt"}"#.into(),
        }
    }

    #[tokio::test]
    async fn plain_text_turn() {
        let backend = Scripted::new(vec![BackendReply::text("hello there")]);
        let mut session = Session::new(Box::new(backend), ToolExecutor::new());
        let reply = session.run_turn("hi").await.unwrap();
        assert_eq!(reply, "hello there");
        assert_eq!(session.store().turn_count(), 2);
    }

    #[tokio::test]
    async fn tool_round_then_reply() {
        let backend = Scripted::new(vec![
            BackendReply::tool_calls(vec![run_call("c1")]),
            BackendReply::text("load is fine"),
        ]);
        let tools = ToolExecutor::new().register(Box::new(Tripwire));
        let mut session = Session::new(Box::new(backend), tools);

        let reply = session.run_turn("check load").await.unwrap();
        assert_eq!(reply, "load is fine");
        let results: Vec<&Message> = session
            .store()
            .messages()
            .iter()
            .filter(|m| m.tool_call_id.is_some())
            .collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "EXECUTED");
    }

    #[tokio::test]
    async fn batch_executes_in_emission_order() {
        let backend = Scripted::new(vec![
            BackendReply::tool_calls(vec![run_call("c1"), run_call("c2"), run_call("c3")]),
            BackendReply::text("done"),
        ]);
        let tools = ToolExecutor::new().register(Box::new(Tripwire));
        let mut session = Session::new(Box::new(backend), tools);
        session.run_turn("go").await.unwrap();

        let ids: Vec<&str> = session
            .store()
            .messages()
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(ids, ["c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn third_denial_ends_the_tool_phase() {
        // Three denied rounds; the queued fourth round must never be
        // requested, the turn closes with the fixed reply instead.
        let backend = Scripted::new(vec![
            BackendReply::tool_calls(vec![run_call("c1")]),
            BackendReply::tool_calls(vec![run_call("c2")]),
            BackendReply::tool_calls(vec![run_call("c3")]),
            BackendReply::tool_calls(vec![run_call("c4")]),
            BackendReply::text("never reached"),
        ]);
        let tools = ToolExecutor::new().register(Box::new(AlwaysDeny));
        let mut session = Session::new(Box::new(backend), tools);

        let reply = session.run_turn("try things").await.unwrap();
        assert!(reply.contains("denial limit"));
        assert_eq!(session.state().denial_count(), 3);
        let requested: Vec<&str> = session
            .store()
            .messages()
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(requested, ["c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn limit_short_circuits_every_tool_not_just_run_command() {
        // Three denials, then the model asks for read_file in the same
        // batch-heavy session; the handler must never run.
        let invocations = Arc::new(AtomicUsize::new(0));
        let backend = Scripted::new(vec![
            BackendReply::tool_calls(vec![run_call("c1"), run_call("c2"), run_call("c3")]),
            BackendReply::tool_calls(vec![read_call("r1")]),
            BackendReply::text("never reached"),
        ]);
        let tools = ToolExecutor::new()
            .register(Box::new(AlwaysDeny))
            .register(Box::new(CountingRead(Arc::clone(&invocations))));
        let mut session = Session::new(Box::new(backend), tools);

        let reply = session.run_turn("dig in").await.unwrap();
        assert!(reply.contains("denial limit"));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        assert!(
            !session
                .store()
                .messages()
                .iter()
                .any(|m| m.content == "FILE CONTENT")
        );
    }

    #[tokio::test]
    async fn mid_batch_limit_skips_the_rest_of_the_batch() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let backend = Scripted::new(vec![BackendReply::tool_calls(vec![
            run_call("c1"),
            run_call("c2"),
            run_call("c3"),
            read_call("r1"),
        ])]);
        let tools = ToolExecutor::new()
            .register(Box::new(AlwaysDeny))
            .register(Box::new(CountingRead(Arc::clone(&invocations))));
        let mut session = Session::new(Box::new(backend), tools);

        session.run_turn("go").await.unwrap();
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        // r1 still gets a tool result so the transcript stays well-formed.
        let last = session
            .store()
            .messages()
            .iter()
            .rev()
            .find(|m| m.tool_call_id.is_some())
            .unwrap();
        assert_eq!(last.tool_call_id.as_deref(), Some("r1"));
        assert!(last.content.contains("disabled for this session"));
    }

    #[tokio::test]
    async fn pre_exhausted_limit_skips_the_handler() {
        let backend = Scripted::new(vec![BackendReply::tool_calls(vec![run_call("c1")])]);
        // Tripwire would return "EXECUTED"; pre-exhausted denials must keep
        // that string out of the store.
        let tools = ToolExecutor::new().register(Box::new(Tripwire));
        let mut session = Session::new(Box::new(backend), tools);
        for _ in 0..3 {
            session
                .state
                .record_tool_event("run_command", "bad", ToolStatus::Denied);
        }

        let reply = session.run_turn("run something").await.unwrap();
        assert!(reply.contains("denial limit"));
        assert!(
            !session
                .store()
                .messages()
                .iter()
                .any(|m| m.content == "EXECUTED")
        );
    }

    #[tokio::test]
    async fn round_cap_produces_fallback_reply() {
        let replies = (0..MAX_TOOL_ROUNDS + 2)
            .map(|i| BackendReply::tool_calls(vec![run_call(&format!("c{i}"))]))
            .collect();
        let tools = ToolExecutor::new().register(Box::new(Tripwire));
        let mut session = Session::new(Box::new(Scripted::new(replies)), tools);

        let reply = session.run_turn("loop forever").await.unwrap();
        assert!(reply.contains("tool-call limit"));
    }

    #[tokio::test]
    async fn backend_failure_keeps_user_message() {
        let mut session = Session::new(Box::new(Failing), ToolExecutor::new());
        let err = session.run_turn("hello?").await.unwrap_err();
        assert!(matches!(err, TurnError::Backend(_)));
        assert_eq!(session.store().turn_count(), 1);
    }

    #[tokio::test]
    async fn hypothesis_markers_are_captured() {
        let backend = Scripted::new(vec![BackendReply::text(
            "Looks bad. [HYPOTHESIS: log rotation stopped]",
        )]);
        let mut session = Session::new(Box::new(backend), ToolExecutor::new());
        session.run_turn("why is /var full?").await.unwrap();
        assert_eq!(
            session.state().hypothesis(),
            Some("log rotation stopped")
        );
    }

    #[tokio::test]
    async fn long_conversation_triggers_compaction() {
        let replies = (0..25).map(|i| BackendReply::text(format!("reply {i}"))).collect();
        let mut session = Session::new(Box::new(Scripted::new(replies)), ToolExecutor::new())
            .system_prompt("you are a host inspector");

        for i in 0..11 {
            session.run_turn(&format!("question {i}")).await.unwrap();
        }

        // 10 turns in the store crosses 20 countable messages, so by the
        // 11th input a compaction has happened.
        assert!(session.store().summary().is_some());
        assert!(session.store().turn_count() < 20);
        assert!(session.state().context_info().summarized);
    }

    #[tokio::test]
    async fn compaction_failure_is_not_fatal() {
        let mut session = Session::new(Box::new(Failing), ToolExecutor::new())
            .summarize_config(SummarizeConfig::new().max_turns(1));
        // Backend fails generation too, but the turn error must come from
        // generate, not from the failed compaction.
        let err = session.run_turn("hi").await.unwrap_err();
        assert_eq!(err, TurnError::Backend("connection refused".to_string()));
    }
}
