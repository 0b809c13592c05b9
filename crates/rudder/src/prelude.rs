//! Convenience re-exports for common `rudder` types.
//!
//! Meant to be glob-imported when embedding the engine:
//!
//! ```ignore
//! use rudder::prelude::*;
//! ```
//!
//! This pulls in the types needed for the vast majority of programs: the
//! session and its config, history parts, event handlers, the dispatcher
//! seam, the cancel signal, and the concrete client. Specialized types
//! (compression outcomes, provider events, retry config) are intentionally
//! excluded — import those from their modules directly when needed.

// ── Core wire types ────────────────────────────────────────────────
pub use crate::{Message, ToolCall, ToolDef, UsageInfo, json_schema_for};

// ── Session runtime ────────────────────────────────────────────────
pub use crate::session::{
    ChatSession, EventHandler, FnDispatcher, FnEventHandler, History, LoggingHandler, NoopHandler,
    NullDispatcher, Part, PromptMode, SessionConfig, Speaker, ToolDispatcher, TurnEvent,
    TurnOutcome, TurnRecord, TurnStatus,
};

// ── Context management ─────────────────────────────────────────────
pub use crate::context::TokenEstimator;

// ── Model boundary ─────────────────────────────────────────────────
pub use crate::api::{CancelSignal, ModelBoundary, ModelCapabilities, OpenRouterClient};
