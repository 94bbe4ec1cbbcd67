//! HTTP backend for OpenAI-format chat completions endpoints.
//!
//! Works against any server speaking the `/chat/completions` wire format
//! (OpenAI, OpenRouter, llama.cpp server, vLLM). The session hands it a
//! sliced message view; this module only does wire translation and HTTP.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{Backend, BackendFuture, BackendReply};
use crate::{Message, ToolCall, ToolDef};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const HTTP_TIMEOUT_SECS: u64 = 120;

const SUMMARIZE_PROMPT: &str = "Summarize the following conversation transcript. \
    Keep the user's goal, key findings, tool activity, and any working hypothesis. \
    Be concise; plain prose, no preamble.";

/// Chat-completions backend.
pub struct ApiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl ApiBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point at a different endpoint (e.g. a local llama.cpp server).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[Message], tools: &[ToolDef]) -> Result<BackendReply, String> {
        let body = build_request(&self.model, messages, tools);
        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, model = %self.model, messages = messages.len(), "Sending chat request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("HTTP {status}: {body}"));
        }

        let raw: RawResponse = resp
            .json()
            .await
            .map_err(|e| format!("invalid response body: {e}"))?;
        parse_reply(raw)
    }
}

impl Backend for ApiBackend {
    fn name(&self) -> &str {
        "api"
    }

    fn generate<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDef],
    ) -> BackendFuture<'a, BackendReply> {
        Box::pin(async move { self.chat(messages, tools).await })
    }

    fn summarize<'a>(&'a self, transcript: &'a str) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let messages = [
                Message::system(SUMMARIZE_PROMPT),
                Message::user(transcript),
            ];
            let reply = self.chat(&messages, &[]).await?;
            reply
                .text
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| "empty summary response".to_string())
        })
    }
}

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: String,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Serialize)]
struct WireToolCall<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall<'a>,
}

#[derive(Serialize)]
struct WireFunctionCall<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDef,
}

fn build_request<'a>(
    model: &'a str,
    messages: &'a [Message],
    tools: &'a [ToolDef],
) -> WireRequest<'a> {
    let messages = messages
        .iter()
        .map(|m| WireMessage {
            role: m.role.to_string(),
            content: &m.content,
            tool_calls: m.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: &c.id,
                        kind: "function",
                        function: WireFunctionCall {
                            name: &c.name,
                            arguments: &c.arguments,
                        },
                    })
                    .collect()
            }),
            tool_call_id: m.tool_call_id.as_deref(),
        })
        .collect();
    let tools = tools
        .iter()
        .map(|t| WireTool {
            kind: "function",
            function: t,
        })
        .collect();
    WireRequest {
        model,
        messages,
        tools,
    }
}

#[derive(Deserialize)]
struct RawResponse {
    choices: Vec<RawChoice>,
}

#[derive(Deserialize)]
struct RawChoice {
    message: RawMessage,
}

#[derive(Deserialize)]
struct RawMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<RawToolCall>>,
}

#[derive(Deserialize)]
struct RawToolCall {
    id: String,
    function: RawFunctionCall,
}

#[derive(Deserialize)]
struct RawFunctionCall {
    name: String,
    arguments: String,
}

fn parse_reply(raw: RawResponse) -> Result<BackendReply, String> {
    let choice = raw
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| "response contained no choices".to_string())?;
    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| ToolCall {
            id: c.id,
            name: c.function.name,
            arguments: c.function.arguments,
        })
        .collect();
    Ok(BackendReply {
        text: choice.message.content.filter(|c| !c.is_empty()),
        tool_calls,
    })
}

// ── Tests ──────────────────────────────────────────────────────────
