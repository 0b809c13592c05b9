//! Local token estimation: a pure, deterministic character-ratio estimate
//! with no provider round trip.
//!
//! The estimate is a cheap early-warning gate for compression triggers and
//! the session token ceiling — it is allowed to diverge from the provider's
//! authoritative count. What it must guarantee: non-negative, monotonic
//! (appending content never decreases the estimate), and fast enough to run
//! on every turn.

use crate::session::history::{History, Part};

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Fixed per-record overhead in characters, covering role tags and message
/// framing the provider adds around each turn.
const RECORD_OVERHEAD_CHARS: usize = 8;

/// Character-ratio token estimator.
///
/// The ratio is calibration-friendly: pass a measured chars-per-token value
/// from historical usage data, or `None` for the default.
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    chars_per_token: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TokenEstimator {
    /// Create an estimator with a calibrated chars-per-token ratio.
    /// Pass `None` to use [`DEFAULT_CHARS_PER_TOKEN`].
    pub fn new(calibrated_cpt: Option<f64>) -> Self {
        let cpt = calibrated_cpt.unwrap_or(DEFAULT_CHARS_PER_TOKEN);
        Self {
            // Ratios below 1.0 would make the estimate exceed the character
            // count, which no tokenizer does.
            chars_per_token: cpt.max(1.0),
        }
    }

    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }

    fn tokens_for_chars(&self, chars: usize) -> usize {
        (chars as f64 / self.chars_per_token) as usize
    }

    /// Estimate tokens for a plain text string.
    pub fn estimate_text(&self, text: &str) -> usize {
        self.tokens_for_chars(text.len())
    }

    /// Estimate tokens for a list of content parts.
    pub fn estimate_parts(&self, parts: &[Part]) -> usize {
        let chars: usize = parts.iter().map(Part::char_len).sum();
        self.tokens_for_chars(chars + RECORD_OVERHEAD_CHARS)
    }

    /// Estimate tokens for an entire history.
    pub fn estimate_history(&self, history: &History) -> usize {
        let chars: usize = history
            .records()
            .iter()
            .map(|r| r.char_len() + RECORD_OVERHEAD_CHARS)
            .sum();
        self.tokens_for_chars(chars)
    }

    /// Estimate tokens for a fully assembled outgoing request: system
    /// instruction, current history, and the new content about to be sent.
    pub fn estimate_request(&self, system_instruction: &str, history: &History, new_content: &[Part]) -> usize {
        self.estimate_text(system_instruction)
            + self.estimate_history(history)
            + self.estimate_parts(new_content)
    }
}
