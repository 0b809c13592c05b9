//! Reinforcement injection policy: when to prepend the instruction set to an
//! outgoing request to counteract drift.
//!
//! The decision is the logical OR of six independent factors, each with its
//! own threshold, gated by a hard cooldown floor that takes precedence over
//! everything — injection costs tokens, so it can never fire twice within
//! the floor regardless of what the factors say.

use crate::session::metrics::{INDICATOR_ORDER, IndicatorTag, SessionMetrics};

// ── Configuration ──────────────────────────────────────────────────

/// Thresholds for the injection factors. Tunable defaults, not contracts.
#[derive(Debug, Clone)]
pub struct InjectionConfig {
    /// Hard floor: never inject within this many turns of the last
    /// injection. Takes precedence over all factors.
    pub min_turns_between: u32,
    /// Factor 1: consecutive model turns.
    pub model_streak_threshold: u32,
    /// Factor 2: complexity score.
    pub complexity_threshold: u32,
    /// Factor 3: errors encountered since the last window reset.
    pub error_threshold: u32,
    /// Factor 5: tool invocations since the last window reset.
    pub tool_usage_threshold: u32,
    /// Factor 6: turns since the fallback baseline (safety net).
    pub fallback_turns: u32,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            min_turns_between: 5,
            model_streak_threshold: 4,
            complexity_threshold: 50,
            error_threshold: 2,
            tool_usage_threshold: 8,
            fallback_turns: 25,
        }
    }
}

// ── Decision ───────────────────────────────────────────────────────

/// Which factor triggered an injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionFactor {
    ModelTurnStreak,
    Complexity,
    Errors,
    HallucinationIndicators,
    ToolUsage,
    Fallback,
}

/// Outcome of evaluating the policy for one outgoing turn.
#[derive(Debug, Clone, Default)]
pub struct InjectionDecision {
    /// Whether to prepend the reinforcement block.
    pub inject: bool,
    /// Whether the fallback factor was among the triggers. Controls whether
    /// the fallback baseline resets in
    /// [`record_injection`](crate::session::metrics::MetricsTracker::record_injection).
    pub fallback_fired: bool,
    /// Every factor that crossed its threshold, in declaration order.
    pub factors: Vec<InjectionFactor>,
}

// ── Policy ─────────────────────────────────────────────────────────

/// Pure decision function over [`SessionMetrics`] plus cooldown state.
#[derive(Debug, Clone, Default)]
pub struct InjectionPolicy {
    config: InjectionConfig,
}

impl InjectionPolicy {
    pub fn new(config: InjectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InjectionConfig {
        &self.config
    }

    /// Evaluate all six factors against the current metrics.
    ///
    /// The cooldown floor suppresses injection entirely; factors are still
    /// not reported in that case, since nothing will act on them.
    pub fn evaluate(&self, metrics: &SessionMetrics) -> InjectionDecision {
        if metrics.turns_since_last_injection() < self.config.min_turns_between {
            return InjectionDecision::default();
        }

        let mut factors = Vec::new();
        if metrics.consecutive_model_turns >= self.config.model_streak_threshold {
            factors.push(InjectionFactor::ModelTurnStreak);
        }
        if metrics.complexity_score >= self.config.complexity_threshold {
            factors.push(InjectionFactor::Complexity);
        }
        if metrics.error_count >= self.config.error_threshold {
            factors.push(InjectionFactor::Errors);
        }
        if !metrics.hallucination_indicators.is_empty() {
            factors.push(InjectionFactor::HallucinationIndicators);
        }
        if metrics.tool_usage_count >= self.config.tool_usage_threshold {
            factors.push(InjectionFactor::ToolUsage);
        }
        if metrics.turns_since_fallback() >= self.config.fallback_turns {
            factors.push(InjectionFactor::Fallback);
        }

        InjectionDecision {
            inject: !factors.is_empty(),
            fallback_fired: factors.contains(&InjectionFactor::Fallback),
            factors,
        }
    }

    /// Build the targeted reminder for the indicators currently present.
    ///
    /// One fixed remediation sentence per tag, concatenated in stable order,
    /// de-duplicated. `None` when no indicators are present.
    pub fn targeted_reminder(&self, metrics: &SessionMetrics) -> Option<String> {
        if metrics.hallucination_indicators.is_empty() {
            return None;
        }
        let sentences: Vec<&str> = INDICATOR_ORDER
            .iter()
            .filter(|tag| metrics.hallucination_indicators.contains(tag))
            .map(|tag| remediation_sentence(*tag))
            .collect();
        Some(sentences.join(" "))
    }
}

/// Fixed remediation text per indicator family.
fn remediation_sentence(tag: IndicatorTag) -> &'static str {
    match tag {
        IndicatorTag::UnverifiedClaim => {
            "Verify claims with a tool call before asserting them — do not speculate \
             about file contents or behavior you have not observed."
        }
        IndicatorTag::ConfigWithoutValidation => {
            "Validate structured configuration files before relying on their contents."
        }
        IndicatorTag::ErrorWithoutDiagnosis => {
            "Inspect logs or diagnostics before explaining an error trace."
        }
    }
}
