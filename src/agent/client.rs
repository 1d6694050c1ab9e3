//! OpenAI-compatible chat-completions client
//!
//! Local deployments disagree about where the chat endpoint lives, so the
//! client probes a fixed list of path suffixes until one answers and then
//! remembers the winner for the rest of the session. Responses are parsed
//! tolerantly: standard `choices[0].message` first, then a series of
//! well-known fallback keys, with the raw JSON as a last resort.

use std::sync::RwLock;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use reqwest::{header, Client, StatusCode};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::types::{
    ChatCompletionRequest, GenerationOptions, Message, ToolDefinition, Usage,
};
use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::tools::ToolCall;

/// Candidate chat-completions paths, tried in order until one returns 200.
const ENDPOINT_SUFFIXES: [&str; 5] = [
    "/v1/chat/completions",
    "/chat/completions",
    "/api/chat/completions",
    "/v1/completions",
    "/completions",
];

/// A parsed model reply: either final text or a batch of tool calls.
#[derive(Debug, Clone)]
pub struct LlmReply {
    /// Assistant text; empty when tool calls are present
    pub content: String,
    /// Normalized tool calls, in declaration order
    pub tool_calls: Vec<ToolCall>,
    /// Token usage, when the endpoint reports it
    pub usage: Option<Usage>,
}

/// Chat-completions HTTP client
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
    /// Endpoint that answered 200 earlier in this session
    endpoint: RwLock<Option<String>>,
}

impl LlmClient {
    /// Create a new client from configuration.
    pub fn new(config: LlmConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        let key = config.api_key.expose_secret();
        if !key.is_empty() {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(|e| Error::Config(format!("invalid API key format: {}", e)))?,
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(LlmClient {
            client,
            config,
            endpoint: RwLock::new(None),
        })
    }

    /// The configured model identifier.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Create a chat completion without tools.
    pub async fn chat(
        &self,
        messages: Vec<Message>,
        options: GenerationOptions,
        cancel: &CancellationToken,
    ) -> Result<LlmReply> {
        self.chat_with_tools(messages, Vec::new(), options, cancel)
            .await
    }

    /// Create a chat completion, offering the given tools.
    pub async fn chat_with_tools(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        options: GenerationOptions,
        cancel: &CancellationToken,
    ) -> Result<LlmReply> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            tools: if tools.is_empty() { None } else { Some(tools) },
        };

        let body = self.send_with_retry(&request, cancel).await?;
        Ok(parse_reply(&body))
    }

    /// Send with exponential backoff on connection and 5xx failures.
    async fn send_with_retry(
        &self,
        request: &ChatCompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(8),
            multiplier: 2.0,
            ..Default::default()
        };

        let mut last_error = None;
        for attempt in 1..=self.config.max_retries.max(1) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled("LLM call cancelled".into()));
            }

            match self.send_once(request, cancel).await {
                Ok(body) => return Ok(body),
                Err(SendFailure { retryable, error }) => {
                    if !retryable || attempt == self.config.max_retries.max(1) {
                        return Err(error);
                    }
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| Duration::from_secs(8));
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "LLM request failed, retrying: {}",
                        error
                    );
                    last_error = Some(error);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            return Err(Error::Cancelled("LLM call cancelled".into()));
                        }
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::LlmConnection("retries exhausted".into())))
    }

    /// One pass over the candidate endpoints.
    async fn send_once(
        &self,
        request: &ChatCompletionRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<Value, SendFailure> {
        let remembered = self.endpoint.read().expect("endpoint lock poisoned").clone();
        let candidates: Vec<String> = match remembered {
            Some(url) => vec![url],
            None => ENDPOINT_SUFFIXES
                .iter()
                .map(|suffix| format!("{}{}", self.config.base_url.trim_end_matches('/'), suffix))
                .collect(),
        };

        let mut last: Option<SendFailure> = None;
        let mut any_retryable = false;
        for url in &candidates {
            debug!(url = %url, model = %request.model, "sending chat completion");

            let response = tokio::select! {
                r = self.client.post(url).json(request).send() => r,
                _ = cancel.cancelled() => {
                    return Err(SendFailure::fatal(Error::Cancelled("LLM call cancelled".into())));
                }
            };

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response.json::<Value>().await.map_err(|e| {
                            SendFailure::fatal(Error::LlmConnection(format!(
                                "endpoint returned unparseable body: {}",
                                e
                            )))
                        })?;
                        self.remember_endpoint(url);
                        return Ok(body);
                    }

                    let text = response.text().await.unwrap_or_default();
                    let failure = classify_http_failure(status, url, &text);
                    any_retryable |= failure.retryable;
                    // A failing remembered endpoint is forgotten so the next
                    // attempt probes the full list again.
                    self.forget_endpoint(url);
                    last = Some(failure);
                }
                Err(e) => {
                    self.forget_endpoint(url);
                    any_retryable = true;
                    let error = if e.is_timeout() {
                        Error::Timeout(format!(
                            "request to {} exceeded {}s",
                            url,
                            self.config.timeout.as_secs()
                        ))
                    } else {
                        Error::LlmConnection(format!("request to {} failed: {}", url, e))
                    };
                    last = Some(SendFailure {
                        retryable: true,
                        error,
                    });
                }
            }
        }

        // One retryable candidate keeps the whole pass retryable even if a
        // later probe answered 4xx.
        Err(match last {
            Some(mut failure) => {
                failure.retryable = any_retryable;
                failure
            }
            None => SendFailure::fatal(Error::LlmConnection("no endpoint candidates".into())),
        })
    }

    fn remember_endpoint(&self, url: &str) {
        let mut slot = self.endpoint.write().expect("endpoint lock poisoned");
        if slot.as_deref() != Some(url) {
            info!(url = %url, "chat endpoint selected");
            *slot = Some(url.to_string());
        }
    }

    fn forget_endpoint(&self, url: &str) {
        let mut slot = self.endpoint.write().expect("endpoint lock poisoned");
        if slot.as_deref() == Some(url) {
            *slot = None;
        }
    }
}

/// The planning tool generates steps through this narrow handle instead of
/// holding a reference back to the agent.
#[async_trait::async_trait]
impl crate::tools::PlanGenerator for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let reply = self
            .chat(
                vec![Message::user(prompt)],
                GenerationOptions::precise(),
                &CancellationToken::new(),
            )
            .await?;
        Ok(reply.content)
    }
}

struct SendFailure {
    retryable: bool,
    error: Error,
}

impl SendFailure {
    fn fatal(error: Error) -> Self {
        SendFailure {
            retryable: false,
            error,
        }
    }
}

fn classify_http_failure(status: StatusCode, url: &str, body: &str) -> SendFailure {
    let error = Error::LlmConnection(format!(
        "endpoint {} returned {}: {}",
        url,
        status,
        body.chars().take(200).collect::<String>()
    ));
    SendFailure {
        retryable: status.is_server_error(),
        error,
    }
}

/// Parse a completion response into `(content, tool_calls)`.
fn parse_reply(body: &Value) -> LlmReply {
    let usage = body
        .get("usage")
        .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok());

    if let Some(message) = body.pointer("/choices/0/message") {
        if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
            if !calls.is_empty() {
                return LlmReply {
                    content: String::new(),
                    tool_calls: normalize_tool_calls(calls),
                    usage,
                };
            }
        }
        if let Some(content) = message.get("content").and_then(|v| v.as_str()) {
            return LlmReply {
                content: content.to_string(),
                tool_calls: Vec::new(),
                usage,
            };
        }
    }

    // Legacy completions endpoints put text directly on the choice
    if let Some(text) = body.pointer("/choices/0/text").and_then(|v| v.as_str()) {
        return LlmReply {
            content: text.to_string(),
            tool_calls: Vec::new(),
            usage,
        };
    }

    // Non-standard shapes: probe well-known keys in order
    for key in ["text", "content", "output", "response", "generation"] {
        if let Some(text) = body.get(key).and_then(|v| v.as_str()) {
            return LlmReply {
                content: text.to_string(),
                tool_calls: Vec::new(),
                usage,
            };
        }
    }

    warn!("unrecognized completion shape, returning raw JSON");
    LlmReply {
        content: body.to_string(),
        tool_calls: Vec::new(),
        usage,
    }
}

/// Collapse the two wire shapes for tool calls into `ToolCall`.
///
/// Standard endpoints nest under `function`; some return flat
/// `{name, arguments}` objects. Arguments stay as-is (string or object) for
/// the invocation layer to parse. Missing ids are synthesized so tool
/// results can still be matched.
fn normalize_tool_calls(calls: &[Value]) -> Vec<ToolCall> {
    calls
        .iter()
        .enumerate()
        .filter_map(|(i, call)| {
            let (name, arguments) = match call.get("function") {
                Some(function) => (
                    function.get("name").and_then(|v| v.as_str()),
                    function.get("arguments").cloned(),
                ),
                None => (
                    call.get("name").and_then(|v| v.as_str()),
                    call.get("arguments").cloned(),
                ),
            };
            let name = name?;
            let id = call
                .get("id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", i));
            Some(ToolCall {
                id,
                name: name.to_string(),
                arguments: arguments.unwrap_or_else(|| json!({})),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_content_reply() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "hi!"}}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        });
        let reply = parse_reply(&body);
        assert_eq!(reply.content, "hi!");
        assert!(reply.tool_calls.is_empty());
        assert_eq!(reply.usage.unwrap().total_tokens, 7);
    }

    #[test]
    fn tool_calls_win_over_content() {
        let body = json!({
            "choices": [{"message": {
                "content": "thinking...",
                "tool_calls": [{
                    "id": "c1",
                    "type": "function",
                    "function": {"name": "bash", "arguments": "{\"command\": \"ls\"}"}
                }]
            }}]
        });
        let reply = parse_reply(&body);
        assert_eq!(reply.content, "");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "bash");
        assert_eq!(reply.tool_calls[0].id, "c1");
    }

    #[test]
    fn flat_tool_call_shape_is_normalized() {
        let calls = vec![json!({"name": "web_search", "arguments": {"q": "rust"}})];
        let normalized = normalize_tool_calls(&calls);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].name, "web_search");
        assert_eq!(normalized[0].id, "call_0");
        assert_eq!(normalized[0].arguments["q"], "rust");
    }

    #[test]
    fn nameless_tool_calls_are_dropped() {
        let calls = vec![json!({"id": "x", "function": {"arguments": "{}"}})];
        assert!(normalize_tool_calls(&calls).is_empty());
    }

    #[test]
    fn legacy_choice_text_is_parsed() {
        let body = json!({"choices": [{"text": "legacy reply"}]});
        assert_eq!(parse_reply(&body).content, "legacy reply");
    }

    #[test]
    fn fallback_keys_probed_in_order() {
        let body = json!({"response": "late", "output": "early"});
        // "output" precedes "response" in the probe order
        assert_eq!(parse_reply(&body).content, "early");
    }

    #[test]
    fn unknown_shape_returns_raw_json() {
        let body = json!({"weird": true});
        let reply = parse_reply(&body);
        assert!(reply.content.contains("weird"));
    }

    #[test]
    fn suffix_order_is_fixed() {
        assert_eq!(ENDPOINT_SUFFIXES[0], "/v1/chat/completions");
        assert_eq!(ENDPOINT_SUFFIXES[4], "/completions");
    }
}
