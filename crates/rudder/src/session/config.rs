//! Configuration for a [`ChatSession`](super::orchestrator::ChatSession).
//!
//! Compression, injection, continuation, and session recording are all
//! **enabled by default** with tunable defaults. Disable a module explicitly
//! through its [`Toggle`] rather than by omitting a builder call.

use crate::context::compression::CompressionConfig;
use crate::session::injection::InjectionConfig;
use crate::session::metrics::MetricsConfig;
use std::path::PathBuf;

// ── Generic toggle ────────────────────────────────────────────────

/// Generic enabled/disabled wrapper for module configurations.
///
/// Captures the common `{ enabled: bool, config: T }` pattern. When
/// `enabled` is `false`, the module is skipped regardless of the inner
/// config values.
#[derive(Debug, Clone)]
pub struct Toggle<T: Default> {
    /// Whether this module is active.
    pub enabled: bool,
    /// Module-specific configuration.
    pub config: T,
}

impl<T: Default> Toggle<T> {
    /// Create a disabled instance with default inner config.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            config: T::default(),
        }
    }
}

impl<T: Default> Default for Toggle<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            config: T::default(),
        }
    }
}

// ── Module-specific type aliases ──────────────────────────────────

/// Compression module configuration.
pub type SessionCompressionConfig = Toggle<CompressionConfig>;
/// Injection policy configuration.
pub type SessionInjectionConfig = Toggle<InjectionConfig>;
/// Next-speaker continuation configuration.
pub type SessionContinuationConfig = Toggle<ContinuationConfig>;

// ── Continuation config ───────────────────────────────────────────

/// Configuration for model-initiated continuations.
#[derive(Debug, Clone)]
pub struct ContinuationConfig {
    /// Synthetic user text sent when the classifier says the model should
    /// speak again. Never exposed as anything but this literal content.
    pub continue_prompt: String,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            continue_prompt: "Please continue.".to_string(),
        }
    }
}

// ── Recorder config ───────────────────────────────────────────────

/// Configuration for per-session manifest recording.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Whether session recording is enabled.
    pub enabled: bool,
    /// Root directory for session directories.
    pub sessions_dir: PathBuf,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sessions_dir: PathBuf::from(".rudder/sessions"),
        }
    }
}

impl RecorderConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

// ── Prompt mode ───────────────────────────────────────────────────

/// How much of the instruction set a reinforcement block restates.
///
/// An explicit session field, passed to every call site that needs it —
/// never a process-global toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptMode {
    /// Restate the full system instruction.
    #[default]
    Full,
    /// Restate only a short drift warning plus any targeted reminder.
    Concise,
}

// ── Session config ────────────────────────────────────────────────

/// Global ceiling on the per-request turn budget. [`SessionConfig::max_turns_per_request`]
/// is clamped to this before each request.
pub const MAX_TURN_BUDGET: u32 = 100;

/// Configuration for a chat session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Model identifier (e.g. `"anthropic/claude-sonnet-4"`).
    pub model: String,
    /// System instruction bound to the session.
    pub system_instruction: String,
    /// Maximum tokens per model response.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Context window size in tokens (compression trigger base).
    pub context_window_tokens: usize,
    /// Hard session token ceiling. `0` means unlimited: no check performed.
    pub session_token_limit: usize,
    /// Maximum turns for the whole session. `0` means unlimited.
    pub max_session_turns: u32,
    /// Recursion budget per top-level request, clamped to [`MAX_TURN_BUDGET`].
    pub max_turns_per_request: u32,
    /// Calibrated chars-per-token ratio. `None` uses the default.
    pub chars_per_token: Option<f64>,
    /// Reinforcement block verbosity.
    pub prompt_mode: PromptMode,
    /// Compression module. Enabled by default.
    pub compression: SessionCompressionConfig,
    /// Injection policy. Enabled by default.
    pub injection: SessionInjectionConfig,
    /// Next-speaker continuations. Enabled by default.
    pub continuation: SessionContinuationConfig,
    /// Metric weights and rule tables.
    pub metrics: MetricsConfig,
    /// Session manifest recording.
    pub recorder: RecorderConfig,
}

impl SessionConfig {
    /// Create a config with a model and system instruction; everything else
    /// defaults.
    pub fn new(model: impl Into<String>, system_instruction: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_instruction: system_instruction.into(),
            ..Default::default()
        }
    }

    // ── Builder methods ───────────────────────────────────────────

    /// Set the hard session token ceiling. Pass `0` for unlimited.
    pub fn with_session_token_limit(mut self, limit: usize) -> Self {
        self.session_token_limit = limit;
        self
    }

    /// Set the maximum turns for the whole session. Pass `0` for unlimited.
    pub fn with_max_session_turns(mut self, max: u32) -> Self {
        self.max_session_turns = max;
        self
    }

    /// Set the per-request turn budget (clamped to [`MAX_TURN_BUDGET`]).
    pub fn with_max_turns_per_request(mut self, max: u32) -> Self {
        self.max_turns_per_request = max;
        self
    }

    /// Set the maximum tokens per model response.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the context window size in tokens.
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window_tokens = tokens;
        self
    }

    /// Set a calibrated chars-per-token ratio.
    pub fn with_chars_per_token(mut self, ratio: f64) -> Self {
        self.chars_per_token = Some(ratio);
        self
    }

    /// Set the reinforcement block verbosity.
    pub fn with_prompt_mode(mut self, mode: PromptMode) -> Self {
        self.prompt_mode = mode;
        self
    }

    /// The effective per-request budget after clamping.
    pub fn clamped_turn_budget(&self) -> u32 {
        self.max_turns_per_request.min(MAX_TURN_BUDGET)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "z-ai/glm-5".to_string(),
            system_instruction: String::new(),
            max_tokens: 4096,
            temperature: 0.7,
            context_window_tokens: 200_000,
            session_token_limit: 0,
            max_session_turns: 0,
            max_turns_per_request: MAX_TURN_BUDGET,
            chars_per_token: None,
            prompt_mode: PromptMode::default(),
            compression: SessionCompressionConfig::default(),
            injection: SessionInjectionConfig::default(),
            continuation: SessionContinuationConfig::default(),
            metrics: MetricsConfig::default(),
            recorder: RecorderConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_enables_all_modules() {
        let config = SessionConfig::default();
        assert!(config.compression.enabled);
        assert!(config.injection.enabled);
        assert!(config.continuation.enabled);
        assert!(config.recorder.enabled);
        assert_eq!(config.session_token_limit, 0);
        assert_eq!(config.max_session_turns, 0);
    }

    #[test]
    fn builder_methods_set_fields() {
        let config = SessionConfig::new("test-model", "Be helpful.")
            .with_session_token_limit(1000)
            .with_max_session_turns(40)
            .with_max_turns_per_request(8)
            .with_temperature(0.2)
            .with_prompt_mode(PromptMode::Concise);

        assert_eq!(config.model, "test-model");
        assert_eq!(config.system_instruction, "Be helpful.");
        assert_eq!(config.session_token_limit, 1000);
        assert_eq!(config.max_session_turns, 40);
        assert_eq!(config.clamped_turn_budget(), 8);
        assert_eq!(config.prompt_mode, PromptMode::Concise);
    }

    #[test]
    fn turn_budget_clamped_to_global_max() {
        let config = SessionConfig::default().with_max_turns_per_request(10_000);
        assert_eq!(config.clamped_turn_budget(), MAX_TURN_BUDGET);
    }

    #[test]
    fn toggles_disable_modules() {
        let config = SessionConfig {
            compression: SessionCompressionConfig::disabled(),
            injection: SessionInjectionConfig::disabled(),
            continuation: SessionContinuationConfig::disabled(),
            recorder: RecorderConfig::disabled(),
            ..Default::default()
        };
        assert!(!config.compression.enabled);
        assert!(!config.injection.enabled);
        assert!(!config.continuation.enabled);
        assert!(!config.recorder.enabled);
    }
}
