//! Events and handlers for the turn orchestrator.
//!
//! The orchestrator communicates with callers through [`TurnEvent`] variants
//! covering the full lifecycle of a turn: streamed deltas, tool round trips,
//! engine decisions (compression, injection, continuation), and the terminal
//! events that are the only way callers learn why a turn stopped early.
//!
//! Events are relayed in provider emission order, and the session's metric
//! counters are updated strictly *before* the corresponding event reaches a
//! handler — a handler inspecting metrics mid-stream never sees an update
//! "from the future".

use crate::UsageInfo;
use crate::session::injection::InjectionFactor;
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted during a turn.
#[derive(Debug)]
pub enum TurnEvent<'a> {
    /// Incremental text from the model.
    TextDelta(&'a str),
    /// The model requested a tool invocation.
    ToolCallRequested {
        id: &'a str,
        name: &'a str,
        arguments: &'a str,
    },
    /// A tool finished and its result was recorded into history.
    ToolResultRecorded {
        call_id: &'a str,
        name: &'a str,
        result: &'a str,
    },
    /// Token usage reported by the provider for one exchange.
    Usage(&'a UsageInfo),
    /// History was compressed and swapped in place.
    ChatCompressed {
        tokens_before: usize,
        tokens_after: usize,
    },
    /// A reinforcement block was prepended to the outgoing request.
    InjectionApplied { factors: &'a [InjectionFactor] },
    /// The model will speak again; a synthetic continuation follows.
    Continuation { budget_remaining: u32 },

    // ── Terminal events ──
    /// The turn completed normally.
    Finished,
    /// The session-level turn ceiling was reached; no model call was made.
    MaxSessionTurnsExceeded { limit: u32 },
    /// The local token estimate exceeded the session ceiling; hard stop.
    SessionTokenLimitExceeded { estimated: usize, limit: usize },
    /// A provider error ended the turn; partial output is retained.
    Error { message: &'a str },
    /// The turn was cancelled; partial output is retained.
    Cancelled,
}

// ── Handler trait ──────────────────────────────────────────────────

/// Observer for turn events.
///
/// Implement this to drive a UI, collect metrics, or log. The default
/// implementation ignores everything.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &TurnEvent<'_>) {
        let _ = event;
    }
}

/// A no-op event handler.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler that logs through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &TurnEvent<'_>) {
        match event {
            TurnEvent::TextDelta(_) => {}
            TurnEvent::ToolCallRequested { name, arguments, .. } => {
                let preview: String = arguments.chars().take(120).collect();
                info!("[tool] {name}({preview})");
            }
            TurnEvent::ToolResultRecorded { name, result, .. } => {
                debug!("[tool] {name} -> {} bytes", result.len());
            }
            TurnEvent::Usage(usage) => {
                debug!(
                    "usage: prompt={}, completion={}",
                    usage.prompt_tokens.unwrap_or(0),
                    usage.completion_tokens.unwrap_or(0),
                );
            }
            TurnEvent::ChatCompressed {
                tokens_before,
                tokens_after,
            } => {
                info!("chat compressed: ~{tokens_before} -> ~{tokens_after} tokens");
            }
            TurnEvent::InjectionApplied { factors } => {
                info!("reinforcement injected: {factors:?}");
            }
            TurnEvent::Continuation { budget_remaining } => {
                debug!("model continues ({budget_remaining} turns left in budget)");
            }
            TurnEvent::Finished => debug!("turn finished"),
            TurnEvent::MaxSessionTurnsExceeded { limit } => {
                warn!("session turn limit reached ({limit})");
            }
            TurnEvent::SessionTokenLimitExceeded { estimated, limit } => {
                warn!("session token limit exceeded: ~{estimated} > {limit}");
            }
            TurnEvent::Error { message } => warn!("provider error: {message}"),
            TurnEvent::Cancelled => info!("turn cancelled"),
        }
    }
}

/// An event handler backed by a closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&TurnEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&TurnEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&TurnEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &TurnEvent<'_>) {
        (self.0)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn noop_handler_accepts_all_events() {
        let handler = NoopHandler;
        handler.on_event(&TurnEvent::Finished);
        handler.on_event(&TurnEvent::TextDelta("hello"));
        handler.on_event(&TurnEvent::SessionTokenLimitExceeded {
            estimated: 1200,
            limit: 1000,
        });
    }

    #[test]
    fn fn_handler_receives_events() {
        let count = std::sync::Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let handler = FnEventHandler::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        handler.on_event(&TurnEvent::Finished);
        handler.on_event(&TurnEvent::Cancelled);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn logging_handler_compiles_for_all_terminals() {
        let handler = LoggingHandler;
        handler.on_event(&TurnEvent::MaxSessionTurnsExceeded { limit: 10 });
        handler.on_event(&TurnEvent::Error { message: "boom" });
        handler.on_event(&TurnEvent::ChatCompressed {
            tokens_before: 100,
            tokens_after: 60,
        });
    }
}
