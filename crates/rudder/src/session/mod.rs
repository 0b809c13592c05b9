//! Session runtime: the [`ChatSession`] turn loop and its supporting modules.
//!
//! Everything needed to drive one conversation lives here:
//!
//! - [`orchestrator::ChatSession`] — the turn orchestrator. Start here.
//! - [`config::SessionConfig`] — model, ceilings, budgets, and module toggles.
//! - [`history`] — [`History`](history::History) and the turn-alternation
//!   invariant.
//! - [`metrics`] — conversation-quality signals derived each turn.
//! - [`injection`] — the reinforcement injection policy.
//! - [`speaker`] — the next-speaker classifier behind continuations.
//! - [`dispatch`] — the [`ToolDispatcher`](dispatch::ToolDispatcher) seam.
//! - [`events`] — [`TurnEvent`](events::TurnEvent) and handler implementations.
//! - [`recorder`] — per-session manifest directories.

pub mod config;
pub mod dispatch;
pub mod events;
pub mod history;
pub mod injection;
pub mod metrics;
pub mod orchestrator;
pub mod recorder;
pub mod speaker;

// Re-export commonly used items at the module level.
pub use config::{PromptMode, SessionConfig, Toggle};
pub use dispatch::{FnDispatcher, NullDispatcher, ToolDispatcher};
pub use events::{EventHandler, FnEventHandler, LoggingHandler, NoopHandler, TurnEvent};
pub use history::{History, Part, Speaker, TurnRecord};
pub use metrics::{MetricsTracker, SessionMetrics};
pub use orchestrator::{ChatSession, TurnOutcome, TurnStatus};
pub use recorder::{SessionRecorder, SessionStatus};
