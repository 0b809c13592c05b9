//! Turn orchestration and adaptive context management for LLM chat agents.
//!
//! `rudder` is the engine underneath an interactive command-line agent: it
//! runs one request/response cycle against a generative model while streaming
//! partial results, dispatches the tool calls the model requests, compresses
//! growing conversation history to fit a fixed context budget, enforces a hard
//! token ceiling per session, and decides — per outgoing message — whether to
//! re-inject the instruction set to counteract drift.
//!
//! The core abstraction is the [`ChatSession`](session::orchestrator::ChatSession):
//! one long-lived conversation with an append-only [`History`](session::history::History),
//! driven turn-by-turn through
//! [`run_turn()`](session::orchestrator::ChatSession::run_turn). The model
//! itself is an opaque collaborator behind the
//! [`ModelBoundary`](api::ModelBoundary) trait; a concrete
//! OpenRouter-compatible client is provided in [`api::client`].
//!
//! # Getting started
//!
//! ```ignore
//! use rudder::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let api_key = std::env::var("OPENROUTER_KEY").unwrap();
//!     let boundary = OpenRouterClient::new(api_key)?;
//!
//!     let config = SessionConfig::new(
//!         "anthropic/claude-sonnet-4",
//!         "You are a helpful coding assistant.",
//!     )
//!     .with_session_token_limit(150_000)
//!     .with_max_session_turns(200);
//!
//!     let mut session = ChatSession::new(config);
//!     let outcome = session
//!         .run_turn(
//!             &boundary,
//!             &NullDispatcher,
//!             vec![Part::text("Summarize src/main.rs for me.")],
//!             &LoggingHandler,
//!             CancelSignal::new(),
//!         )
//!         .await?;
//!
//!     println!("{}", outcome.text());
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`session`] | [`ChatSession`](session::orchestrator::ChatSession) turn loop, history, metrics, injection policy, next-speaker check, events, recorder |
//! | [`context`] | [`TokenEstimator`](context::TokenEstimator) and the [`CompressionEngine`](context::CompressionEngine) |
//! | [`api`] | [`ModelBoundary`](api::ModelBoundary) trait, SSE streaming, retry with backoff, OpenRouter-compatible client |
//!
//! # Design principles
//!
//! 1. **One owner for conversation state.** The session owns the history and
//!    its derived metrics; every mutation flows through the orchestrator so
//!    the strict turn-alternation contract of the model API cannot be
//!    violated silently.
//!
//! 2. **Context is the scarcest resource.** Token usage is estimated locally
//!    on every turn — no provider round trip — and compression, ceilings, and
//!    reinforcement injection all key off the same estimate.
//!
//! 3. **Bounded loops over recursion.** Model-initiated continuations run in
//!    an explicit loop with a decrementing budget, so the per-request turn
//!    bound is a single counter anyone can audit.
//!
//! 4. **Observability over magic.** Every decision the engine makes —
//!    compression, injection, continuation, early termination — surfaces as a
//!    [`TurnEvent`](session::events::TurnEvent) in provider emission order.

pub mod api;
pub mod context;
pub mod prelude;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. This is the bridge between strong Rust types
/// and the `serde_json::Value` that the function-calling API expects.
///
/// # Example
///
/// ```
/// use rudder::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct GrepArgs {
///     pattern: String,
///     #[serde(default)]
///     path: Option<String>,
/// }
///
/// let schema = json_schema_for::<GrepArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"pattern".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Wire message types ─────────────────────────────────────────────

/// Role of a message on the provider wire.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the provider-wire conversation format.
///
/// This is the flattened chat-completions shape the concrete client speaks.
/// The engine's own conversation model is [`session::history::TurnRecord`];
/// the client lowers records to wire messages at the boundary.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the API (function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call returned by the model.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}

// ── Usage ──────────────────────────────────────────────────────────

/// Token usage statistics reported by the provider.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content.as_deref(), Some("hello"));

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);

        let assist = Message::assistant_text("reply");
        assert_eq!(assist.role, MessageRole::Assistant);

        let tool = Message::tool_result("call-1", "result");
        assert_eq!(tool.role, MessageRole::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn assistant_tool_calls_carries_both() {
        let msg = Message::assistant_tool_calls(
            Some("Let me check.".into()),
            vec![ToolCall::new("c1", "read_file", r#"{"path":"a.rs"}"#)],
        );
        assert_eq!(msg.content.as_deref(), Some("Let me check."));
        assert_eq!(msg.tool_calls.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn tool_def_serializes_function_type() {
        let def = ToolDef::new("grep", "Search files", serde_json::json!({"type": "object"}));
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "grep");
    }

    #[test]
    fn message_skips_none_fields() {
        let msg = Message::user("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
    }
}
