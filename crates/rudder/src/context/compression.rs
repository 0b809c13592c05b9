//! History compression: replacing the older portion of the conversation with
//! a fixed-structure digest to reclaim context budget.
//!
//! The engine decides whether to compress (threshold + sticky-failure gate),
//! performs one summarization call over the head of the history, validates
//! the resulting digest, and builds the replacement history: the digest as a
//! context turn pair followed by the most recent tail kept verbatim. The
//! caller swaps the session history only on a `Compressed` outcome — the
//! engine never mutates the history it is given.
//!
//! Failures are recoverable: the turn proceeds with uncompressed history and
//! a session-scoped sticky flag suppresses automatic re-attempts every
//! subsequent turn (token/latency waste). A forced compression — an explicit
//! user action — clears the flag and is attempted exactly once.

use crate::api::{CancelSignal, CompletionRequest, ModelBoundary};
use crate::context::estimator::TokenEstimator;
use crate::session::history::{History, Part, Speaker, TurnRecord};
use tracing::{debug, info, warn};

/// The prompt used for digest generation. The five section headers are
/// load-bearing: the response is rejected unless all of them are present.
const DIGEST_PROMPT: &str = "\
You are compressing an agent conversation into a dense context digest that \
will replace the older portion of the history. Produce exactly these five \
sections, each starting with its markdown header:

## Overall goal
## Key knowledge
## File-system state
## Recent actions
## Current plan

Rules:
- Only include facts explicitly stated in the transcript. Do not infer or extrapolate.
- Preserve file paths, function names, and error messages verbatim.
- Be concise. Every token must earn its place.
- The digest must stand alone: a reader with no access to the original \
  transcript must be able to continue the task from it.";

/// Acknowledgement text paired with the digest in the rebuilt history, so
/// the replacement still alternates user/model.
const DIGEST_ACK: &str =
    "I've reviewed the context summary and will continue from where I left off.";

// ── Configuration ──────────────────────────────────────────────────

/// Compression tuning. The fractions are calibration defaults, not
/// contracts — expose them to tests and deployment configuration.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Fraction of the context window at which automatic compression
    /// triggers.
    pub trigger_fraction: f64,
    /// Most-recent fraction of the history kept verbatim.
    pub tail_fraction: f64,
    /// Maximum tokens for the digest response.
    pub max_digest_tokens: u32,
    /// Model for summarization calls (cheaper than the main model).
    /// `None` uses the main model.
    pub model: Option<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            trigger_fraction: 0.70,
            tail_fraction: 0.30,
            max_digest_tokens: 2048,
            model: None,
        }
    }
}

// ── Outcome ────────────────────────────────────────────────────────

/// Why a compression attempt was skipped without a summarization call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Token estimate below the trigger threshold (non-forced only).
    BelowThreshold,
    /// A prior failure set the sticky flag (non-forced only).
    StickyFailure,
    /// Not enough history to split into head and tail.
    HistoryTooShort,
    /// The cancel signal fired before the summarization call.
    Cancelled,
}

/// Why a compression attempt failed after a summarization call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailReason {
    /// The summarizer returned empty or structurally invalid output.
    EmptySummary,
    /// The rebuilt history did not shrink the token estimate.
    InflatedTokenCount,
    /// The summarization call itself errored.
    Summarizer(String),
}

/// Tagged result of [`CompressionEngine::maybe_compress`].
#[derive(Debug)]
pub enum CompressionOutcome {
    /// Compression succeeded; the caller should swap in `history`.
    Compressed {
        history: History,
        tokens_before: usize,
        tokens_after: usize,
    },
    Skipped(SkipReason),
    Failed(FailReason),
}

// ── Digest ─────────────────────────────────────────────────────────

/// The five named sections of a context digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextDigest {
    pub overall_goal: String,
    pub key_knowledge: String,
    pub file_system_state: String,
    pub recent_actions: String,
    pub current_plan: String,
}

const SECTION_HEADERS: [&str; 5] = [
    "## Overall goal",
    "## Key knowledge",
    "## File-system state",
    "## Recent actions",
    "## Current plan",
];

impl ContextDigest {
    /// Parse summarizer output into the five named sections.
    ///
    /// Returns `None` when any header is missing or every section body is
    /// empty — both count as an empty summary.
    pub fn parse(text: &str) -> Option<Self> {
        let mut positions = Vec::with_capacity(SECTION_HEADERS.len());
        for header in SECTION_HEADERS {
            positions.push(text.find(header)?);
        }
        // Headers must appear in order; out-of-order output is malformed.
        if positions.windows(2).any(|w| w[1] <= w[0]) {
            return None;
        }

        let mut sections = Vec::with_capacity(SECTION_HEADERS.len());
        for (i, (header, start)) in SECTION_HEADERS.iter().zip(&positions).enumerate() {
            let body_start = start + header.len();
            let body_end = positions.get(i + 1).copied().unwrap_or(text.len());
            sections.push(text.get(body_start..body_end)?.trim().to_string());
        }

        if sections.iter().all(|s| s.is_empty()) {
            return None;
        }

        let mut it = sections.into_iter();
        Some(Self {
            overall_goal: it.next()?,
            key_knowledge: it.next()?,
            file_system_state: it.next()?,
            recent_actions: it.next()?,
            current_plan: it.next()?,
        })
    }

    /// Render the digest back to its canonical sectioned form.
    pub fn render(&self) -> String {
        format!(
            "{}\n{}\n\n{}\n{}\n\n{}\n{}\n\n{}\n{}\n\n{}\n{}",
            SECTION_HEADERS[0],
            self.overall_goal,
            SECTION_HEADERS[1],
            self.key_knowledge,
            SECTION_HEADERS[2],
            self.file_system_state,
            SECTION_HEADERS[3],
            self.recent_actions,
            SECTION_HEADERS[4],
            self.current_plan,
        )
    }
}

// ── Engine ─────────────────────────────────────────────────────────

/// Decides whether and how to compress, owns the sticky failure flag.
#[derive(Debug)]
pub struct CompressionEngine {
    config: CompressionConfig,
    estimator: TokenEstimator,
    context_window_tokens: usize,
    sticky_failed: bool,
}

impl CompressionEngine {
    pub fn new(
        config: CompressionConfig,
        estimator: TokenEstimator,
        context_window_tokens: usize,
    ) -> Self {
        Self {
            config,
            estimator,
            context_window_tokens,
            sticky_failed: false,
        }
    }

    /// Whether a prior failure is currently suppressing automatic attempts.
    pub fn sticky_failed(&self) -> bool {
        self.sticky_failed
    }

    /// Clear all engine state for a new session.
    pub fn reset(&mut self) {
        self.sticky_failed = false;
    }

    /// Token estimate at which automatic compression triggers.
    pub fn trigger_tokens(&self) -> usize {
        (self.context_window_tokens as f64 * self.config.trigger_fraction) as usize
    }

    /// Decide whether to compress and, if so, perform the summarization call
    /// and build the replacement history.
    pub async fn maybe_compress(
        &mut self,
        history: &History,
        forced: bool,
        main_model: &str,
        boundary: &dyn ModelBoundary,
        cancel: &CancelSignal,
    ) -> CompressionOutcome {
        if forced {
            // An explicit user action clears the sticky flag regardless of
            // how this attempt ends.
            self.sticky_failed = false;
        } else if self.sticky_failed {
            debug!("compression suppressed by sticky failure flag");
            return CompressionOutcome::Skipped(SkipReason::StickyFailure);
        }

        let tokens_before = self.estimator.estimate_history(history);
        if !forced && tokens_before < self.trigger_tokens() {
            return CompressionOutcome::Skipped(SkipReason::BelowThreshold);
        }

        let Some(split) = split_index(history, self.config.tail_fraction) else {
            return CompressionOutcome::Skipped(SkipReason::HistoryTooShort);
        };

        if cancel.is_cancelled() {
            return CompressionOutcome::Skipped(SkipReason::Cancelled);
        }

        let head = &history.records()[..split];
        let tail = &history.records()[split..];
        debug!(
            "compressing: {} head record(s), {} tail record(s), ~{} tokens",
            head.len(),
            tail.len(),
            tokens_before,
        );

        let request = CompletionRequest {
            model: self
                .config
                .model
                .clone()
                .unwrap_or_else(|| main_model.to_string()),
            system: DIGEST_PROMPT.to_string(),
            user: transcript(head),
            max_tokens: self.config.max_digest_tokens,
            temperature: 0.3,
            json_output: false,
        };

        let response = match boundary.complete(request, cancel.clone()).await {
            Ok(text) => text,
            Err(e) => {
                warn!("summarization call failed: {e}");
                return self.fail(forced, FailReason::Summarizer(e));
            }
        };

        let Some(digest) = ContextDigest::parse(&response) else {
            warn!("summarizer output empty or unparseable ({} bytes)", response.len());
            return self.fail(forced, FailReason::EmptySummary);
        };

        let mut records = Vec::with_capacity(tail.len() + 2);
        records.push(TurnRecord::user_text(format!(
            "<context_summary>\n{}\n</context_summary>",
            digest.render()
        )));
        records.push(TurnRecord::model_text(DIGEST_ACK));
        records.extend(tail.iter().cloned());
        let new_history = History::from_records(records);

        let tokens_after = self.estimator.estimate_history(&new_history);
        if tokens_after >= tokens_before {
            warn!(
                "compression inflated the estimate: {tokens_before} -> {tokens_after}; \
                 keeping original history"
            );
            return self.fail(forced, FailReason::InflatedTokenCount);
        }

        self.sticky_failed = false;
        info!("history compressed: ~{tokens_before} -> ~{tokens_after} tokens");
        CompressionOutcome::Compressed {
            history: new_history,
            tokens_before,
            tokens_after,
        }
    }

    fn fail(&mut self, forced: bool, reason: FailReason) -> CompressionOutcome {
        // Only automatic failures arm the sticky flag; a forced attempt has
        // already cleared it and leaves it clear.
        if !forced {
            self.sticky_failed = true;
        }
        CompressionOutcome::Failed(reason)
    }
}

/// Index at which the verbatim tail begins.
///
/// The tail is the most recent `tail_fraction` of records, widened backward
/// so it never begins with a tool-result-only user record — that would
/// orphan the model turn holding the matching tool calls on the other side
/// of the cut. Returns `None` when no non-empty head remains.
fn split_index(history: &History, tail_fraction: f64) -> Option<usize> {
    let len = history.len();
    if len < 2 {
        return None;
    }
    let tail_len = ((len as f64 * tail_fraction).ceil() as usize).max(1);
    let mut split = len.saturating_sub(tail_len);

    while split > 0 && history.records()[split].is_tool_result_only() {
        split -= 1;
    }

    if split == 0 { None } else { Some(split) }
}

/// Render head records as a role-labelled transcript for the summarizer.
fn transcript(records: &[TurnRecord]) -> String {
    let mut out = String::new();
    for record in records {
        let role = match record.speaker {
            Speaker::User => "user",
            Speaker::Model => "model",
        };
        for part in &record.parts {
            match part {
                Part::Text(t) => {
                    out.push_str(&format!("[{role}]: {t}\n\n"));
                }
                Part::ToolCall {
                    name, arguments, ..
                } => {
                    out.push_str(&format!("[{role}] tool call: {name}({arguments})\n\n"));
                }
                Part::ToolResult { name, content, .. } => {
                    out.push_str(&format!("[{role}] tool result from {name}: {content}\n\n"));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::history::Part;
    use crate::test_support::ScriptedBoundary;

    fn sample_digest() -> String {
        "## Overall goal\nShip the parser.\n\
         ## Key knowledge\nLexer is table-driven.\n\
         ## File-system state\nsrc/lex.rs modified.\n\
         ## Recent actions\nRan the test suite.\n\
         ## Current plan\nFix the last failing case."
            .to_string()
    }

    fn long_history(records: usize) -> History {
        let mut history = History::new();
        for i in 0..records {
            if i % 2 == 0 {
                history.push(TurnRecord::user_text(format!("question {i}: {}", "x".repeat(400))));
            } else {
                history.push(TurnRecord::model_text(format!("answer {i}: {}", "y".repeat(400))));
            }
        }
        history
    }

    fn engine() -> CompressionEngine {
        // Small window so the default history exceeds the trigger.
        CompressionEngine::new(CompressionConfig::default(), TokenEstimator::default(), 1_000)
    }

    #[test]
    fn digest_parse_roundtrip() {
        let digest = ContextDigest::parse(&sample_digest()).unwrap();
        assert_eq!(digest.overall_goal, "Ship the parser.");
        assert_eq!(digest.current_plan, "Fix the last failing case.");

        let rendered = digest.render();
        let reparsed = ContextDigest::parse(&rendered).unwrap();
        assert_eq!(digest, reparsed);
    }

    #[test]
    fn digest_parse_rejects_missing_section() {
        let partial = "## Overall goal\ngoal\n## Key knowledge\nfacts";
        assert!(ContextDigest::parse(partial).is_none());
        assert!(ContextDigest::parse("").is_none());
        assert!(ContextDigest::parse("free-form prose with no headers").is_none());
    }

    #[test]
    fn digest_parse_rejects_all_empty_sections() {
        let hollow = SECTION_HEADERS.join("\n");
        assert!(ContextDigest::parse(&hollow).is_none());
    }

    #[test]
    fn split_never_starts_tail_with_tool_results() {
        let mut history = History::new();
        history.push(TurnRecord::user_text("start"));
        history.push(TurnRecord::model_text("working"));
        history.push(TurnRecord::user_text("continue"));
        history.push(TurnRecord::model(vec![Part::tool_call("c1", "grep", "{}")]));
        history.push(TurnRecord::user(vec![Part::tool_result("c1", "grep", "hit")]));
        history.push(TurnRecord::model_text("done"));

        // tail_fraction 0.3 → naive split at 4, which is the tool-result
        // record; the split must widen backward past it.
        let split = split_index(&history, 0.3).unwrap();
        assert_eq!(split, 3);
        assert!(!history.records()[split].is_tool_result_only());
    }

    #[test]
    fn split_requires_enough_history() {
        let mut history = History::new();
        history.push(TurnRecord::user_text("only one"));
        assert!(split_index(&history, 0.3).is_none());
    }

    #[tokio::test]
    async fn below_threshold_skips_without_call() {
        let boundary = ScriptedBoundary::new();
        let mut engine = CompressionEngine::new(
            CompressionConfig::default(),
            TokenEstimator::default(),
            200_000,
        );
        let history = long_history(4);

        let outcome = engine
            .maybe_compress(&history, false, "main-model", &boundary, &CancelSignal::new())
            .await;
        assert!(matches!(
            outcome,
            CompressionOutcome::Skipped(SkipReason::BelowThreshold)
        ));
        assert_eq!(boundary.completion_calls(), 0);
    }

    #[tokio::test]
    async fn successful_compression_shrinks_estimate() {
        let boundary = ScriptedBoundary::new().with_completion(Ok(sample_digest()));
        let mut engine = engine();
        let history = long_history(10);

        let outcome = engine
            .maybe_compress(&history, false, "main-model", &boundary, &CancelSignal::new())
            .await;
        match outcome {
            CompressionOutcome::Compressed {
                history: new_history,
                tokens_before,
                tokens_after,
            } => {
                assert!(tokens_after < tokens_before);
                assert!(new_history.len() < 10);
                // Digest pair + verbatim tail.
                assert!(new_history.records()[0]
                    .text_content()
                    .contains("<context_summary>"));
                assert_eq!(new_history.records()[1].text_content(), DIGEST_ACK);
            }
            other => panic!("expected Compressed, got {other:?}"),
        }
        assert!(!engine.sticky_failed());
    }

    #[tokio::test]
    async fn empty_summary_fails_and_history_unchanged() {
        let boundary = ScriptedBoundary::new().with_completion(Ok(String::new()));
        let mut engine = engine();
        let history = long_history(10);
        let before = history.len();

        let outcome = engine
            .maybe_compress(&history, false, "main-model", &boundary, &CancelSignal::new())
            .await;
        assert!(matches!(
            outcome,
            CompressionOutcome::Failed(FailReason::EmptySummary)
        ));
        assert_eq!(history.len(), before);
        assert!(engine.sticky_failed());
    }

    #[tokio::test]
    async fn sticky_flag_suppresses_second_automatic_attempt() {
        let boundary = ScriptedBoundary::new()
            .with_completion(Ok(String::new()))
            .with_completion(Ok(sample_digest()));
        let mut engine = engine();
        let history = long_history(10);

        let first = engine
            .maybe_compress(&history, false, "main-model", &boundary, &CancelSignal::new())
            .await;
        assert!(matches!(first, CompressionOutcome::Failed(_)));
        assert_eq!(boundary.completion_calls(), 1);

        // Second non-forced attempt on unchanged history: no new call.
        let second = engine
            .maybe_compress(&history, false, "main-model", &boundary, &CancelSignal::new())
            .await;
        assert!(matches!(
            second,
            CompressionOutcome::Skipped(SkipReason::StickyFailure)
        ));
        assert_eq!(boundary.completion_calls(), 1);
    }

    #[tokio::test]
    async fn forced_attempt_runs_exactly_once_and_clears_flag() {
        let boundary = ScriptedBoundary::new()
            .with_completion(Ok(String::new()))
            .with_completion(Ok(sample_digest()));
        let mut engine = engine();
        let history = long_history(10);

        // Arm the sticky flag with an automatic failure.
        engine
            .maybe_compress(&history, false, "main-model", &boundary, &CancelSignal::new())
            .await;
        assert!(engine.sticky_failed());

        // Forced: exactly one summarization call, flag cleared on success.
        let outcome = engine
            .maybe_compress(&history, true, "main-model", &boundary, &CancelSignal::new())
            .await;
        assert!(matches!(outcome, CompressionOutcome::Compressed { .. }));
        assert_eq!(boundary.completion_calls(), 2);
        assert!(!engine.sticky_failed());
    }

    #[tokio::test]
    async fn forced_failure_leaves_flag_clear() {
        let boundary = ScriptedBoundary::new().with_completion(Ok(String::new()));
        let mut engine = engine();
        let history = long_history(10);

        let outcome = engine
            .maybe_compress(&history, true, "main-model", &boundary, &CancelSignal::new())
            .await;
        assert!(matches!(
            outcome,
            CompressionOutcome::Failed(FailReason::EmptySummary)
        ));
        assert!(!engine.sticky_failed());
    }

    #[tokio::test]
    async fn inflated_digest_fails() {
        // Digest larger than the whole history.
        let bloated = format!(
            "## Overall goal\n{}\n## Key knowledge\nk\n## File-system state\nf\n\
             ## Recent actions\nr\n## Current plan\np",
            "verbose ".repeat(5_000)
        );
        let boundary = ScriptedBoundary::new().with_completion(Ok(bloated));
        let mut engine = engine();
        let history = long_history(10);

        let outcome = engine
            .maybe_compress(&history, false, "main-model", &boundary, &CancelSignal::new())
            .await;
        assert!(matches!(
            outcome,
            CompressionOutcome::Failed(FailReason::InflatedTokenCount)
        ));
    }

    #[tokio::test]
    async fn cancelled_before_call_skips() {
        let boundary = ScriptedBoundary::new().with_completion(Ok(sample_digest()));
        let mut engine = engine();
        let history = long_history(10);
        let cancel = CancelSignal::new();
        cancel.cancel();

        let outcome = engine
            .maybe_compress(&history, false, "main-model", &boundary, &cancel)
            .await;
        assert!(matches!(
            outcome,
            CompressionOutcome::Skipped(SkipReason::Cancelled)
        ));
        assert_eq!(boundary.completion_calls(), 0);
    }
}
