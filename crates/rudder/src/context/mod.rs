//! Context budget management: token estimation and history compression.
//!
//! The context window is the scarcest resource in any LLM agent. Two layers
//! keep usage under control:
//!
//! 1. **[`estimator`]** — [`TokenEstimator`], a pure character-ratio estimate
//!    used as the local gate for every budget decision. No provider calls.
//!
//! 2. **[`compression`]** — the [`CompressionEngine`]: when the estimate
//!    crosses the trigger threshold, the older portion of the history is
//!    summarized into a fixed five-section digest and the most recent tail
//!    is kept verbatim. Failures set a sticky flag so the session does not
//!    burn a summarization call on every subsequent turn.
//!
//! Both are driven automatically by the
//! [`ChatSession`](crate::session::orchestrator::ChatSession) loop.

pub mod compression;
pub mod estimator;

// Re-export commonly used items at the module level.
pub use compression::{
    CompressionConfig, CompressionEngine, CompressionOutcome, ContextDigest, FailReason,
    SkipReason,
};
pub use estimator::{DEFAULT_CHARS_PER_TOKEN, TokenEstimator};
