//! OpenRouter-compatible implementation of the [`ModelBoundary`].
//!
//! Speaks the chat-completions wire format over `reqwest`: conversation
//! records are lowered to flat wire messages, streaming exchanges read SSE
//! chunk by chunk, and one-shot completions (summarization, classification)
//! go through the non-streaming endpoint with retry for transient failures.

use crate::api::retry::{RetryConfig, retry_api_call};
use crate::api::streaming::{self, SseEvent};
use crate::api::{
    BoundaryFuture, CancelSignal, CompletionRequest, EventCallback, ExchangeRequest,
    ModelBoundary, ModelCapabilities, ProviderEvent,
};
use crate::session::history::{Part, Speaker, TurnRecord};
use crate::{Message, ToolCall, ToolDef};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

// ── Wire request ───────────────────────────────────────────────────

#[derive(Serialize, Debug)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "is_zero_u32")]
    max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDef]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireResponseFormat>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize, Debug)]
struct WireResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

// ── Wire response (non-streaming) ──────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for an OpenRouter-compatible chat completions API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    referer: String,
    title: String,
    retry: RetryConfig,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        Self::with_headers(api_key, "https://github.com/tacryt-socryp/rudder", "rudder")
    }

    /// Create a new client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("rudder/0.3")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            referer: referer.into(),
            title: title.into(),
            retry: RetryConfig::default(),
        })
    }

    /// Enable retries for one-shot completions (summarization, classifier).
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.retry = RetryConfig::with_retries(max_retries);
        self
    }

    fn post(&self, body: &impl Serialize) -> reqwest::RequestBuilder {
        self.client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
    }

    async fn send_completion(&self, request: &CompletionRequest) -> Result<String, String> {
        let messages = vec![
            Message::system(&request.system),
            Message::user(&request.user),
        ];
        let body = WireRequest {
            model: &request.model,
            messages: &messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: None,
            response_format: request.json_output.then_some(WireResponseFormat {
                format_type: "json_object",
            }),
            stream: false,
        };

        let start = Instant::now();
        let resp = self
            .post(&body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;
        debug!(
            "completion response: HTTP {status} in {:.1}s ({} bytes)",
            start.elapsed().as_secs_f64(),
            text.len(),
        );

        if !status.is_success() {
            return Err(format!("OpenRouter API HTTP {status}: {text}"));
        }

        let parsed: RawChatResponse =
            serde_json::from_str(&text).map_err(|e| format!("failed to parse response: {e}"))?;
        if let Some(err) = parsed.error {
            return Err(format!("OpenRouter API error: {}", err.message));
        }
        parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content)
            .ok_or_else(|| "empty completion response".to_string())
    }
}

// ── History lowering ───────────────────────────────────────────────

/// Lower one turn record into wire messages.
///
/// A model record becomes one assistant message (text and tool calls
/// together); a user record becomes one tool message per result followed by
/// a user message for any text.
fn lower_record(record: &TurnRecord, out: &mut Vec<Message>) {
    match record.speaker {
        Speaker::Model => {
            let text = record.text_content();
            let calls: Vec<ToolCall> = record
                .parts
                .iter()
                .filter_map(|p| match p {
                    Part::ToolCall {
                        id,
                        name,
                        arguments,
                    } => Some(ToolCall::new(id, name, arguments)),
                    _ => None,
                })
                .collect();
            if !calls.is_empty() {
                let content = if text.is_empty() { None } else { Some(text) };
                out.push(Message::assistant_tool_calls(content, calls));
            } else if !text.is_empty() {
                out.push(Message::assistant_text(text));
            }
        }
        Speaker::User => {
            for part in &record.parts {
                if let Part::ToolResult {
                    call_id, content, ..
                } = part
                {
                    out.push(Message::tool_result(call_id, content));
                }
            }
            let text = record.text_content();
            if !text.is_empty() {
                out.push(Message::user(text));
            }
        }
    }
}

/// Lower a full exchange request into the wire message list.
fn lower_exchange(request: &ExchangeRequest) -> Vec<Message> {
    let mut messages = Vec::new();
    if !request.system_instruction.is_empty() {
        messages.push(Message::system(&request.system_instruction));
    }
    for record in request.history.records() {
        lower_record(record, &mut messages);
    }
    if !request.new_content.is_empty() {
        lower_record(&TurnRecord::user(request.new_content.clone()), &mut messages);
    }
    messages
}

// ── ModelBoundary impl ─────────────────────────────────────────────

impl ModelBoundary for OpenRouterClient {
    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            summarization: true,
            next_speaker_check: true,
        }
    }

    fn stream_exchange<'a>(
        &'a self,
        request: ExchangeRequest,
        cancel: CancelSignal,
        mut on_event: EventCallback<'a>,
    ) -> BoundaryFuture<'a, Vec<ProviderEvent>> {
        Box::pin(async move {
            let messages = lower_exchange(&request);
            let tools = &request.tools;
            let body = WireRequest {
                model: &request.model,
                messages: &messages,
                max_tokens: request.max_tokens,
                temperature: request.temperature,
                tools: (!tools.is_empty()).then_some(tools.as_slice()),
                response_format: None,
                stream: true,
            };
            debug!(
                "streaming exchange: model={}, {} wire message(s), {} tool def(s)",
                request.model,
                messages.len(),
                tools.len(),
            );

            let mut resp = self
                .post(&body)
                .send()
                .await
                .map_err(|e| format!("streaming request failed: {e}"))?;
            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                return Err(format!("OpenRouter API HTTP {status}: {text}"));
            }

            // Read the SSE stream incrementally so long responses don't hit
            // a single-body timeout. Text deltas are relayed as they arrive;
            // tool-call fragments are assembled after the stream ends.
            let mut sse_events: Vec<SseEvent> = Vec::new();
            let mut provider_events: Vec<ProviderEvent> = Vec::new();
            let mut buffer = String::new();
            let mut done = false;

            while let Some(chunk) = resp
                .chunk()
                .await
                .map_err(|e| format!("failed to read streaming chunk: {e}"))?
            {
                if cancel.is_cancelled() {
                    debug!("stream cancelled; dropping remaining chunks");
                    break;
                }
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline_pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline_pos).collect();
                    let line = line.trim();
                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    if line == "data: [DONE]" {
                        done = true;
                        break;
                    }
                    if let Some(data) = line.strip_prefix("data: ") {
                        let before = sse_events.len();
                        streaming::parse_sse_data(data, &mut sse_events);
                        for event in &sse_events[before..] {
                            if let SseEvent::TextDelta(delta) = event {
                                let relayed = ProviderEvent::TextDelta(delta.clone());
                                on_event(&relayed);
                                provider_events.push(relayed);
                            }
                        }
                    }
                }
                if done {
                    break;
                }
            }

            let cancelled = cancel.is_cancelled();
            for (id, name, arguments) in streaming::assemble_tool_calls(&sse_events) {
                let event = ProviderEvent::ToolCallRequest {
                    id,
                    name,
                    arguments,
                };
                if !cancelled {
                    on_event(&event);
                }
                provider_events.push(event);
            }
            if let Some(usage) = streaming::extract_usage(&sse_events) {
                let event = ProviderEvent::Usage(usage);
                if !cancelled {
                    on_event(&event);
                }
                provider_events.push(event);
            }
            let event = ProviderEvent::Done;
            if !cancelled {
                on_event(&event);
            }
            provider_events.push(event);

            Ok(provider_events)
        })
    }

    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
        cancel: CancelSignal,
    ) -> BoundaryFuture<'a, String> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err("completion cancelled before dispatch".to_string());
            }
            retry_api_call(&self.retry, || self.send_completion(&request)).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::history::History;

    fn exchange_with(history: History, new_content: Vec<Part>) -> ExchangeRequest {
        ExchangeRequest {
            model: "test-model".into(),
            system_instruction: "be helpful".into(),
            tools: Vec::new(),
            history,
            new_content,
            max_tokens: 1024,
            temperature: 0.7,
        }
    }

    #[test]
    fn lowering_flattens_records_to_wire_messages() {
        let mut history = History::new();
        history.push(TurnRecord::user_text("read the file"));
        history.push(TurnRecord::model(vec![
            Part::text("Checking."),
            Part::tool_call("c1", "read_file", r#"{"path":"a.rs"}"#),
        ]));
        history.push(TurnRecord::user(vec![Part::tool_result(
            "c1",
            "read_file",
            "fn main() {}",
        )]));

        let messages = lower_exchange(&exchange_with(history, vec![Part::text("thanks")]));

        // system, user, assistant(+tool_calls), tool, user
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].role, crate::MessageRole::System);
        assert_eq!(messages[2].role, crate::MessageRole::Assistant);
        assert_eq!(messages[2].content.as_deref(), Some("Checking."));
        assert_eq!(messages[2].tool_calls.as_ref().unwrap().len(), 1);
        assert_eq!(messages[3].role, crate::MessageRole::Tool);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(messages[4].content.as_deref(), Some("thanks"));
    }

    #[test]
    fn lowering_skips_empty_records() {
        let history = History::new();
        let messages = lower_exchange(&exchange_with(history, Vec::new()));
        assert_eq!(messages.len(), 1); // system only
    }

    #[test]
    fn wire_request_skips_absent_fields() {
        let messages = vec![Message::user("hi")];
        let body = WireRequest {
            model: "m",
            messages: &messages,
            max_tokens: 100,
            temperature: 0.5,
            tools: None,
            response_format: None,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("response_format").is_none());
        assert!(json.get("stream").is_none());
    }

    #[test]
    fn wire_request_includes_stream_and_format_when_set() {
        let messages = vec![Message::user("hi")];
        let body = WireRequest {
            model: "m",
            messages: &messages,
            max_tokens: 100,
            temperature: 0.0,
            tools: None,
            response_format: Some(WireResponseFormat {
                format_type: "json_object",
            }),
            stream: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["response_format"]["type"], "json_object");
        // temperature 0.0 is omitted rather than sent as a literal zero.
        assert!(json.get("temperature").is_none());
    }
}
