//! Conversation-quality signals derived from the history each turn.
//!
//! The tracker maintains one [`SessionMetrics`] aggregate per session:
//! derived signals (model-turn streaks, complexity, hallucination indicators)
//! recomputed from the history snapshot on every outgoing turn, plus counters
//! (tool usage, errors, delegations) fed by the orchestrator as stream events
//! are observed — those events are transient and not always persisted
//! verbatim, so they cannot be re-derived by re-scanning history.
//!
//! Scoring is table-driven: the complexity keyword set and the
//! hallucination-indicator rules are data, not branching logic, so the rule
//! set can be extended or tuned without touching control flow.

use crate::session::history::{History, Part, Speaker};
use tracing::debug;

// ── Configuration ──────────────────────────────────────────────────

/// Weights and tables for metric derivation. All values are tunable
/// defaults, not contracts.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Terms whose presence in recent text raises the complexity score.
    pub complexity_keywords: Vec<String>,
    /// Score added per keyword occurrence.
    pub keyword_weight: u32,
    /// Score added per tool invocation recorded since the last reset.
    pub tool_weight: u32,
    /// Score added per delegation recorded since the last reset.
    pub delegation_weight: u32,
    /// Characters of recent text per complexity point for the base term.
    pub length_divisor: usize,
    /// Cap on the recent-text length term.
    pub length_cap: u32,
    /// Cap on the total complexity score.
    pub total_cap: u32,
    /// Number of trailing records scanned for keywords and indicators.
    pub recent_window: usize,
    /// Tool names that count as delegation to a sub-agent.
    pub delegation_tools: Vec<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            complexity_keywords: [
                "architecture",
                "refactor",
                "optimize",
                "security",
                "scalability",
                "concurrency",
                "migration",
                "performance",
                "distributed",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            keyword_weight: 5,
            tool_weight: 2,
            delegation_weight: 3,
            length_divisor: 80,
            length_cap: 50,
            total_cap: 100,
            recent_window: 6,
            delegation_tools: vec!["delegate_task".into(), "spawn_subagent".into()],
        }
    }
}

// ── Hallucination indicators ───────────────────────────────────────

/// A detected hallucination-indicator family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorTag {
    /// Speculative language with no verification tool call in the window.
    UnverifiedClaim,
    /// Structured-config discussion with no preceding validation step.
    ConfigWithoutValidation,
    /// Error-trace discussion with no preceding diagnostic step.
    ErrorWithoutDiagnosis,
}

/// Stable presentation order for indicator tags.
pub const INDICATOR_ORDER: [IndicatorTag; 3] = [
    IndicatorTag::UnverifiedClaim,
    IndicatorTag::ConfigWithoutValidation,
    IndicatorTag::ErrorWithoutDiagnosis,
];

/// One pattern-family rule: text triggers plus the tool-name substrings
/// that clear the indicator when seen in the same window.
struct IndicatorRule {
    tag: IndicatorTag,
    text_triggers: &'static [&'static str],
    clearing_tools: &'static [&'static str],
}

/// The fixed rule table scanned against the recent window. Lowercase
/// substring matching on both sides.
const INDICATOR_RULES: [IndicatorRule; 3] = [
    IndicatorRule {
        tag: IndicatorTag::UnverifiedClaim,
        text_triggers: &[
            "probably",
            "i assume",
            "i believe",
            "should work",
            "most likely",
            "i think it",
        ],
        clearing_tools: &["read", "grep", "search", "test", "run", "list"],
    },
    IndicatorRule {
        tag: IndicatorTag::ConfigWithoutValidation,
        text_triggers: &["json config", "yaml", "toml", ".json file", "config file"],
        clearing_tools: &["valid", "lint", "check", "read"],
    },
    IndicatorRule {
        tag: IndicatorTag::ErrorWithoutDiagnosis,
        text_triggers: &[
            "stack trace",
            "traceback",
            "panicked at",
            "segfault",
            "exception was thrown",
        ],
        clearing_tools: &["log", "debug", "diagnos", "read", "grep"],
    },
];

// ── Aggregate ──────────────────────────────────────────────────────

/// Mutable, single-owner aggregate of conversation-quality signals.
///
/// Reset at session start, updated once per outgoing turn, and cleared
/// wholesale when the history is replaced (compression or session reset).
#[derive(Debug, Clone, Default)]
pub struct SessionMetrics {
    /// Outgoing turns observed this session.
    pub turn_count: u32,
    /// Turn index at which the last reinforcement injection happened.
    pub last_injection_turn: u32,
    /// Turn index baseline for the fallback injection factor. Advanced only
    /// when the fallback factor itself fires.
    pub last_fallback_turn: u32,
    /// Trailing model turns since the last user turn with non-tool-result
    /// content.
    pub consecutive_model_turns: u32,
    /// Tool invocations recorded since the last window reset.
    pub tool_usage_count: u32,
    /// Sub-agent delegations recorded since the last window reset.
    pub delegation_count: u32,
    /// Error events recorded since the last window reset.
    pub error_count: u32,
    /// Capped complexity score (0–100).
    pub complexity_score: u32,
    /// Distinct hallucination indicators detected in the current window.
    pub hallucination_indicators: Vec<IndicatorTag>,
}

impl SessionMetrics {
    /// Turns elapsed since the last injection (floor cooldown input).
    pub fn turns_since_last_injection(&self) -> u32 {
        self.turn_count.saturating_sub(self.last_injection_turn)
    }

    /// Turns elapsed since the fallback baseline (fallback factor input).
    pub fn turns_since_fallback(&self) -> u32 {
        self.turn_count.saturating_sub(self.last_fallback_turn)
    }
}

// ── Tracker ────────────────────────────────────────────────────────

/// Owner of the [`SessionMetrics`] aggregate.
#[derive(Debug, Default)]
pub struct MetricsTracker {
    config: MetricsConfig,
    metrics: SessionMetrics,
}

impl MetricsTracker {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            metrics: SessionMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Whether the given tool name counts as a delegation.
    pub fn is_delegation_tool(&self, name: &str) -> bool {
        self.config.delegation_tools.iter().any(|t| t == name)
    }

    /// Recompute derived signals from the current history snapshot.
    ///
    /// Called once per outgoing turn, before the request is assembled.
    pub fn update(&mut self, history: &History) -> &SessionMetrics {
        self.metrics.turn_count += 1;
        self.metrics.consecutive_model_turns = count_consecutive_model_turns(history);
        self.metrics.complexity_score = self.score_complexity(history);
        self.scan_indicators(history);
        debug!(
            "metrics updated: turn={}, streak={}, complexity={}, indicators={}",
            self.metrics.turn_count,
            self.metrics.consecutive_model_turns,
            self.metrics.complexity_score,
            self.metrics.hallucination_indicators.len(),
        );
        &self.metrics
    }

    /// Record a tool invocation observed on the stream. Must be called
    /// before the event is relayed upward.
    pub fn record_tool_usage(&mut self) {
        self.metrics.tool_usage_count += 1;
    }

    /// Record an error event observed on the stream. Must be called before
    /// the event is relayed upward.
    pub fn record_error_encounter(&mut self) {
        self.metrics.error_count += 1;
    }

    /// Record a delegation to a sub-agent.
    pub fn record_delegation(&mut self) {
        self.metrics.delegation_count += 1;
    }

    /// Record that a reinforcement injection happened this turn.
    ///
    /// Resets the per-window counters that feed the injection factors, but
    /// leaves the fallback baseline untouched unless the fallback factor
    /// itself fired.
    pub fn record_injection(&mut self, fallback_fired: bool) {
        self.metrics.last_injection_turn = self.metrics.turn_count;
        self.metrics.error_count = 0;
        self.metrics.tool_usage_count = 0;
        self.metrics.delegation_count = 0;
        self.metrics.hallucination_indicators.clear();
        if fallback_fired {
            self.metrics.last_fallback_turn = self.metrics.turn_count;
        }
    }

    /// Clear the whole aggregate. Called at session start and whenever the
    /// history is replaced wholesale.
    pub fn reset(&mut self) {
        self.metrics = SessionMetrics::default();
    }

    // ── Derivation ────────────────────────────────────────────────

    fn score_complexity(&self, history: &History) -> u32 {
        let window = recent_records(history, self.config.recent_window);

        let recent_chars: usize = window.iter().map(|r| r.text_content().len()).sum();
        let length_term =
            ((recent_chars / self.config.length_divisor.max(1)) as u32).min(self.config.length_cap);

        let text: String = window
            .iter()
            .map(|r| r.text_content().to_lowercase())
            .collect::<Vec<_>>()
            .join("\n");
        let keyword_term: u32 = self
            .config
            .complexity_keywords
            .iter()
            .map(|kw| text.matches(kw.as_str()).count() as u32 * self.config.keyword_weight)
            .sum();

        let activity_term = self.metrics.tool_usage_count * self.config.tool_weight
            + self.metrics.delegation_count * self.config.delegation_weight;

        (length_term + keyword_term + activity_term).min(self.config.total_cap)
    }

    fn scan_indicators(&mut self, history: &History) {
        let window = recent_records(history, self.config.recent_window);

        let text: String = window
            .iter()
            .map(|r| r.text_content().to_lowercase())
            .collect::<Vec<_>>()
            .join("\n");

        let tool_names: Vec<String> = window
            .iter()
            .flat_map(|r| r.parts.iter())
            .filter_map(|p| match p {
                Part::ToolCall { name, .. } => Some(name.to_lowercase()),
                Part::ToolResult { name, .. } => Some(name.to_lowercase()),
                Part::Text(_) => None,
            })
            .collect();

        for rule in &INDICATOR_RULES {
            let triggered = rule.text_triggers.iter().any(|t| text.contains(t));
            if !triggered {
                continue;
            }
            let cleared = tool_names
                .iter()
                .any(|name| rule.clearing_tools.iter().any(|c| name.contains(c)));
            if cleared {
                continue;
            }
            if !self.metrics.hallucination_indicators.contains(&rule.tag) {
                self.metrics.hallucination_indicators.push(rule.tag);
            }
        }
    }
}

/// Trailing model turns since the last user turn with non-tool-result
/// content. Tool-result-only user turns do not break the streak.
fn count_consecutive_model_turns(history: &History) -> u32 {
    let mut streak = 0;
    for record in history.records().iter().rev() {
        match record.speaker {
            Speaker::Model => streak += 1,
            Speaker::User if record.is_tool_result_only() => {}
            Speaker::User => break,
        }
    }
    streak
}

fn recent_records(history: &History, window: usize) -> &[crate::session::history::TurnRecord] {
    let records = history.records();
    let start = records.len().saturating_sub(window);
    &records[start..]
}
