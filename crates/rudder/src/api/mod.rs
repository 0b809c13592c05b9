//! Model boundary: the opaque seam between the orchestrator and the
//! provider, plus the concrete client that speaks it.
//!
//! The orchestrator never talks HTTP. It hands an [`ExchangeRequest`] to a
//! [`ModelBoundary`] implementor and observes [`ProviderEvent`]s in emission
//! order. Everything provider-specific — transport, SSE parsing, retries —
//! lives behind the trait:
//!
//! - [`client`] — OpenRouter-compatible [`OpenRouterClient`], the default
//!   collaborator.
//! - [`streaming`] — SSE parser producing incremental deltas.
//! - [`retry`] — transient error detection (429, 5xx, network timeouts) with
//!   exponential backoff. Used by the concrete client only; the orchestrator
//!   itself never retries.

pub mod client;
pub mod retry;
pub mod streaming;

// Re-export commonly used items at the module level.
pub use client::OpenRouterClient;
pub use retry::RetryConfig;

use crate::session::history::{History, Part};
use crate::{ToolDef, UsageInfo};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// ── Cancellation ───────────────────────────────────────────────────

/// Cooperative cancellation signal threaded through a turn.
///
/// Cloning shares the underlying flag. Once signalled, the orchestrator
/// initiates no further provider calls and the in-flight exchange stops
/// relaying model-originated events; the turn unwinds with whatever partial
/// state exists. Cancellation is a normal terminal outcome, not an error.
#[derive(Clone, Debug, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Provider events ────────────────────────────────────────────────

/// Events emitted by the model boundary during a streaming exchange,
/// in provider emission order.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// An incremental text content delta.
    TextDelta(String),
    /// A complete tool invocation requested by the model.
    ToolCallRequest {
        id: String,
        name: String,
        arguments: String,
    },
    /// The provider acknowledged receipt of a tool-call result.
    ToolCallAck { id: String },
    /// Token usage information (sent near the end of the stream).
    Usage(UsageInfo),
    /// An error surfaced by the provider mid-stream.
    Error(String),
    /// The stream is complete.
    Done,
}

// ── Capabilities ───────────────────────────────────────────────────

/// Immutable snapshot of what the boundary supports.
///
/// Queried once per turn — the orchestrator never probes capabilities
/// ad hoc mid-stream.
#[derive(Debug, Clone, Copy)]
pub struct ModelCapabilities {
    /// Whether the boundary can run one-shot summarization calls.
    pub summarization: bool,
    /// Whether the boundary can run the next-speaker classifier.
    pub next_speaker_check: bool,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            summarization: true,
            next_speaker_check: true,
        }
    }
}

// ── Requests ───────────────────────────────────────────────────────

/// A streaming exchange request: everything the boundary needs to run one
/// model call against the current conversation.
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    pub model: String,
    pub system_instruction: String,
    pub tools: Vec<ToolDef>,
    pub history: History,
    pub new_content: Vec<Part>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A one-shot completion request (summarization, classification).
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Request JSON-object output from the provider.
    pub json_output: bool,
}

// ── Boundary trait ─────────────────────────────────────────────────

/// Boxed future returned by [`ModelBoundary`] methods.
///
/// Type alias to keep trait signatures and implementations readable.
pub type BoundaryFuture<'a, T> = BoxFuture<'a, Result<T, String>>;

/// Callback invoked for each provider event as it arrives off the wire.
pub type EventCallback<'a> = Box<dyn FnMut(&ProviderEvent) + Send + 'a>;

/// The opaque model/provider boundary.
///
/// Implementors stream one exchange at a time, invoking `on_event` for every
/// event in emission order and returning the full ordered event list when the
/// stream ends. Once `cancel` is signalled, no further network activity may
/// be initiated and the stream should wind down promptly.
pub trait ModelBoundary: Send + Sync {
    /// Immutable capability snapshot for this boundary.
    fn capabilities(&self) -> ModelCapabilities;

    /// Open a streaming exchange.
    fn stream_exchange<'a>(
        &'a self,
        request: ExchangeRequest,
        cancel: CancelSignal,
        on_event: EventCallback<'a>,
    ) -> BoundaryFuture<'a, Vec<ProviderEvent>>;

    /// Run a one-shot completion (used for summarization and the
    /// next-speaker classifier).
    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
        cancel: CancelSignal,
    ) -> BoundaryFuture<'a, String>;
}

// ── Event helpers ──────────────────────────────────────────────────

/// Assemble the complete text from a sequence of provider events.
pub fn collect_text(events: &[ProviderEvent]) -> String {
    let mut text = String::new();
    for event in events {
        if let ProviderEvent::TextDelta(delta) = event {
            text.push_str(delta);
        }
    }
    text
}

/// Collect the tool-call requests from a sequence of provider events.
pub fn collect_tool_calls(events: &[ProviderEvent]) -> Vec<(String, String, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            ProviderEvent::ToolCallRequest {
                id,
                name,
                arguments,
            } => Some((id.clone(), name.clone(), arguments.clone())),
            _ => None,
        })
        .collect()
}

/// Extract usage info from provider events (if present).
pub fn extract_usage(events: &[ProviderEvent]) -> Option<UsageInfo> {
    for event in events.iter().rev() {
        if let ProviderEvent::Usage(usage) = event {
            return Some(usage.clone());
        }
    }
    None
}

/// First error surfaced in the event sequence, if any.
pub fn first_error(events: &[ProviderEvent]) -> Option<&str> {
    events.iter().find_map(|e| match e {
        ProviderEvent::Error(message) => Some(message.as_str()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_signal_shares_state_across_clones() {
        let signal = CancelSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_cancelled());
        signal.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn collect_text_from_deltas() {
        let events = vec![
            ProviderEvent::TextDelta("Hello ".into()),
            ProviderEvent::TextDelta("world!".into()),
            ProviderEvent::Done,
        ];
        assert_eq!(collect_text(&events), "Hello world!");
    }

    #[test]
    fn collect_tool_calls_in_order() {
        let events = vec![
            ProviderEvent::ToolCallRequest {
                id: "c1".into(),
                name: "read_file".into(),
                arguments: "{}".into(),
            },
            ProviderEvent::TextDelta("and".into()),
            ProviderEvent::ToolCallRequest {
                id: "c2".into(),
                name: "grep".into(),
                arguments: "{}".into(),
            },
        ];
        let calls = collect_tool_calls(&events);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "c1");
        assert_eq!(calls[1].1, "grep");
    }

    #[test]
    fn extract_usage_returns_last() {
        let events = vec![
            ProviderEvent::Usage(UsageInfo {
                prompt_tokens: Some(1),
                completion_tokens: Some(1),
                total_tokens: Some(2),
            }),
            ProviderEvent::Usage(UsageInfo {
                prompt_tokens: Some(100),
                completion_tokens: Some(50),
                total_tokens: Some(150),
            }),
        ];
        assert_eq!(extract_usage(&events).unwrap().prompt_tokens, Some(100));
    }

    #[test]
    fn first_error_found() {
        let events = vec![
            ProviderEvent::TextDelta("partial".into()),
            ProviderEvent::Error("stream reset".into()),
        ];
        assert_eq!(first_error(&events), Some("stream reset"));
        assert!(first_error(&[ProviderEvent::Done]).is_none());
    }
}
