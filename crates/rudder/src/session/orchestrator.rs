//! The turn orchestrator: one chat session, driven one request at a time.
//!
//! [`ChatSession`] owns the conversation history and every piece of state
//! derived from it — metrics, injection cooldowns, the compression engine's
//! sticky flag. [`run_turn()`](ChatSession::run_turn) executes one top-level
//! user request as an explicit loop:
//!
//! ```text
//! (per round)
//!   cancellation / budget / session-turn gates
//!   -> non-forced compression pre-check
//!   -> session token ceiling check
//!   -> metrics update + injection decision (initial round only)
//!   -> streaming exchange
//!   -> tool dispatch (loops back into streaming)
//!   -> next-speaker check (may loop back with a synthetic continuation)
//! ```
//!
//! Continuations and tool rounds run through the same loop with a
//! decrementing budget — never through recursion — so the per-request turn
//! bound is a single observable counter. A shared [`CancelSignal`] is
//! checked at every state boundary: cancellation is a normal terminal
//! outcome that returns whatever partial turn exists.

use crate::api::{
    CancelSignal, ExchangeRequest, ModelBoundary, ProviderEvent, collect_text, collect_tool_calls,
    extract_usage, first_error,
};
use crate::context::compression::{CompressionEngine, CompressionOutcome};
use crate::context::estimator::TokenEstimator;
use crate::session::config::{PromptMode, SessionConfig};
use crate::session::dispatch::ToolDispatcher;
use crate::session::events::{EventHandler, TurnEvent};
use crate::session::history::{History, Part, Speaker, TurnRecord};
use crate::session::injection::InjectionPolicy;
use crate::session::metrics::{MetricsTracker, SessionMetrics};
use crate::session::recorder::{SessionRecorder, SessionStatus};
use crate::session::speaker::NextSpeakerChecker;
use tracing::{debug, info, warn};

// ── Outcome ────────────────────────────────────────────────────────

/// Why a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    /// Normal completion.
    Completed,
    /// The cancel signal fired; partial output retained.
    Cancelled,
    /// A provider error ended the turn; partial output retained.
    Error(String),
    /// The session-level turn ceiling was reached before or during the turn.
    MaxSessionTurnsExceeded,
    /// The token estimate exceeded the session ceiling; no model call made
    /// for the offending round.
    SessionTokenLimitExceeded { estimated: usize, limit: usize },
    /// The per-request turn budget ran out.
    BudgetExhausted,
}

/// The result of one top-level request.
#[derive(Debug)]
pub struct TurnOutcome {
    /// Model output accumulated across all rounds of the turn.
    pub parts: Vec<Part>,
    /// Terminal status.
    pub status: TurnStatus,
    /// Streaming rounds used (tool rounds and continuations included).
    pub rounds_used: u32,
    /// Cumulative prompt tokens reported by the provider.
    pub total_prompt_tokens: u32,
    /// Cumulative completion tokens reported by the provider.
    pub total_completion_tokens: u32,
}

impl TurnOutcome {
    /// Concatenated text parts of the turn.
    pub fn text(&self) -> String {
        let texts: Vec<&str> = self
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        texts.join("\n\n")
    }
}

/// What kind of round the loop is about to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundKind {
    /// The user-initiated round that opened the turn.
    Initial,
    /// Feeding tool results back after a tool-call round.
    ToolResponse,
    /// A model-initiated "please continue" round.
    Continuation,
}

// ── ChatSession ────────────────────────────────────────────────────

/// One conversation: history, derived metrics, and the engines that manage
/// them.
///
/// A session is single-owner by contract — concurrent `run_turn` calls are
/// not supported, and a reentrancy guard turns accidental nesting (e.g. a
/// tool implementation calling back into the session) into an error instead
/// of corrupted history.
pub struct ChatSession {
    config: SessionConfig,
    history: History,
    estimator: TokenEstimator,
    tracker: MetricsTracker,
    policy: InjectionPolicy,
    compressor: CompressionEngine,
    speaker_checker: NextSpeakerChecker,
    recorder: Option<SessionRecorder>,
    /// Streaming rounds consumed across the whole session.
    session_turns: u32,
    /// Reentrancy guard: set for the duration of `run_turn`.
    in_turn: bool,
}

impl ChatSession {
    pub fn new(config: SessionConfig) -> Self {
        let estimator = TokenEstimator::new(config.chars_per_token);
        let compressor = CompressionEngine::new(
            config.compression.config.clone(),
            estimator.clone(),
            config.context_window_tokens,
        );
        let recorder = init_recorder(&config);
        Self {
            estimator,
            tracker: MetricsTracker::new(config.metrics.clone()),
            policy: InjectionPolicy::new(config.injection.config.clone()),
            compressor,
            speaker_checker: NextSpeakerChecker::new(),
            recorder,
            history: History::new(),
            session_turns: 0,
            in_turn: false,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn metrics(&self) -> &SessionMetrics {
        self.tracker.metrics()
    }

    /// Streaming rounds consumed so far this session.
    pub fn session_turns(&self) -> u32 {
        self.session_turns
    }

    /// Reset to a fresh session: empty history, cleared metrics and sticky
    /// flags, a new recorder directory.
    pub fn reset(&mut self) {
        self.history.replace(Vec::new());
        self.tracker.reset();
        self.compressor.reset();
        self.session_turns = 0;
        if let Some(recorder) = self.recorder.as_mut()
            && let Err(e) = recorder.finish(SessionStatus::Completed)
        {
            warn!("failed to finalize session manifest: {e}");
        }
        self.recorder = init_recorder(&self.config);
        info!("session reset");
    }

    /// Mark the session finished in the manifest.
    pub fn finish(&mut self, status: SessionStatus) {
        if let Some(recorder) = self.recorder.as_mut()
            && let Err(e) = recorder.finish(status)
        {
            warn!("failed to finalize session manifest: {e}");
        }
    }

    /// Force a compression attempt (explicit user action). Swaps the history
    /// on success. Exactly one summarization call is made.
    pub async fn force_compress(
        &mut self,
        boundary: &dyn ModelBoundary,
        cancel: CancelSignal,
    ) -> CompressionOutcome {
        let outcome = self
            .compressor
            .maybe_compress(&self.history, true, &self.config.model, boundary, &cancel)
            .await;
        if let CompressionOutcome::Compressed {
            history,
            tokens_before,
            tokens_after,
        } = outcome
        {
            self.history.replace(history.records().to_vec());
            self.tracker.reset();
            return CompressionOutcome::Compressed {
                history: self.history.clone(),
                tokens_before,
                tokens_after,
            };
        }
        outcome
    }

    /// Run one top-level request: send `content`, dispatch any tool calls,
    /// and continue until the model is done speaking or a limit is hit.
    ///
    /// Returns `Err` only for caller mistakes (reentrant invocation). Every
    /// provider-side condition — errors, limits, cancellation — is reported
    /// through [`TurnStatus`] with partial output retained.
    pub async fn run_turn(
        &mut self,
        boundary: &dyn ModelBoundary,
        dispatcher: &dyn ToolDispatcher,
        content: Vec<Part>,
        handler: &dyn EventHandler,
        cancel: CancelSignal,
    ) -> Result<TurnOutcome, String> {
        if self.in_turn {
            return Err(
                "reentrant run_turn call: a tool or handler invoked the session mid-turn"
                    .to_string(),
            );
        }
        self.in_turn = true;
        let outcome = self
            .run_turn_inner(boundary, dispatcher, content, handler, cancel)
            .await;
        self.in_turn = false;

        if let Some(recorder) = self.recorder.as_mut()
            && let Err(e) = recorder.record_turn(
                &outcome.preview,
                outcome.outcome.total_prompt_tokens,
                outcome.outcome.total_completion_tokens,
            )
        {
            warn!("failed to record turn in session manifest: {e}");
        }
        Ok(outcome.outcome)
    }

    async fn run_turn_inner(
        &mut self,
        boundary: &dyn ModelBoundary,
        dispatcher: &dyn ToolDispatcher,
        content: Vec<Part>,
        handler: &dyn EventHandler,
        cancel: CancelSignal,
    ) -> RecordedOutcome {
        let capabilities = boundary.capabilities();
        let tools = dispatcher.definitions();

        let preview: String = content
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ");

        let mut budget = self.config.clamped_turn_budget();
        let mut pending_content = content;
        let mut round_kind = RoundKind::Initial;

        let mut parts: Vec<Part> = Vec::new();
        let mut rounds_used = 0u32;
        let mut total_prompt_tokens = 0u32;
        let mut total_completion_tokens = 0u32;

        let status = loop {
            // ── Gates ──
            if cancel.is_cancelled() {
                handler.on_event(&TurnEvent::Cancelled);
                break TurnStatus::Cancelled;
            }
            if budget == 0 {
                warn!("turn budget exhausted after {rounds_used} round(s)");
                break TurnStatus::BudgetExhausted;
            }
            if self.config.max_session_turns > 0
                && self.session_turns >= self.config.max_session_turns
            {
                handler.on_event(&TurnEvent::MaxSessionTurnsExceeded {
                    limit: self.config.max_session_turns,
                });
                break TurnStatus::MaxSessionTurnsExceeded;
            }

            // ── Compression pre-check ──
            if self.config.compression.enabled && capabilities.summarization {
                match self
                    .compressor
                    .maybe_compress(&self.history, false, &self.config.model, boundary, &cancel)
                    .await
                {
                    CompressionOutcome::Compressed {
                        history,
                        tokens_before,
                        tokens_after,
                    } => {
                        // Swap in place and rebind the session to the new
                        // history; the old metrics described evidence that no
                        // longer exists verbatim.
                        self.history.replace(history.records().to_vec());
                        self.tracker.reset();
                        handler.on_event(&TurnEvent::ChatCompressed {
                            tokens_before,
                            tokens_after,
                        });
                    }
                    CompressionOutcome::Skipped(_) => {}
                    CompressionOutcome::Failed(reason) => {
                        warn!("compression failed ({reason:?}); continuing uncompressed");
                    }
                }
            }

            // ── Session token ceiling ──
            if self.config.session_token_limit > 0 {
                let estimated = self.estimator.estimate_text(&self.config.system_instruction)
                    + self.estimator.estimate_history(&self.history);
                if estimated > self.config.session_token_limit {
                    handler.on_event(&TurnEvent::SessionTokenLimitExceeded {
                        estimated,
                        limit: self.config.session_token_limit,
                    });
                    break TurnStatus::SessionTokenLimitExceeded {
                        estimated,
                        limit: self.config.session_token_limit,
                    };
                }
            }

            // ── Metrics + injection ──
            self.tracker.update(&self.history);
            let mut outgoing = std::mem::take(&mut pending_content);
            if round_kind == RoundKind::Initial && self.config.injection.enabled {
                let decision = self.policy.evaluate(self.tracker.metrics());
                if decision.inject {
                    let block = reinforcement_block(
                        self.config.prompt_mode,
                        &self.config.system_instruction,
                        self.policy.targeted_reminder(self.tracker.metrics()),
                    );
                    outgoing.insert(0, Part::Text(block));
                    self.tracker.record_injection(decision.fallback_fired);
                    handler.on_event(&TurnEvent::InjectionApplied {
                        factors: &decision.factors,
                    });
                }
            }

            // ── Streaming exchange ──
            let request = ExchangeRequest {
                model: self.config.model.clone(),
                system_instruction: self.config.system_instruction.clone(),
                tools: tools.clone(),
                history: self.history.clone(),
                new_content: outgoing.clone(),
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            };
            self.history.push(TurnRecord::user(outgoing));
            self.session_turns += 1;
            budget -= 1;
            rounds_used += 1;
            debug!(
                "round {rounds_used} ({round_kind:?}): {} record(s) in history, budget {budget}",
                self.history.len(),
            );

            let stream_result = {
                let tracker = &mut self.tracker;
                let relay_cancel = cancel.clone();
                boundary
                    .stream_exchange(
                        request,
                        cancel.clone(),
                        Box::new(move |event| {
                            // Counters update strictly before the event is
                            // relayed, so handlers never observe a metric
                            // update "from the future".
                            match event {
                                ProviderEvent::ToolCallRequest { .. } => {
                                    tracker.record_tool_usage();
                                }
                                ProviderEvent::Error(_) => tracker.record_error_encounter(),
                                _ => {}
                            }
                            if relay_cancel.is_cancelled() {
                                return;
                            }
                            match event {
                                ProviderEvent::TextDelta(delta) => {
                                    handler.on_event(&TurnEvent::TextDelta(delta));
                                }
                                ProviderEvent::ToolCallRequest {
                                    id,
                                    name,
                                    arguments,
                                } => {
                                    handler.on_event(&TurnEvent::ToolCallRequested {
                                        id,
                                        name,
                                        arguments,
                                    });
                                }
                                ProviderEvent::Usage(usage) => {
                                    handler.on_event(&TurnEvent::Usage(usage));
                                }
                                ProviderEvent::Error(message) => {
                                    handler.on_event(&TurnEvent::Error { message });
                                }
                                ProviderEvent::ToolCallAck { .. } | ProviderEvent::Done => {}
                            }
                        }),
                    )
                    .await
            };

            let events = match stream_result {
                Ok(events) => events,
                Err(message) => {
                    // Transport-level failure: surfaced verbatim, no retry
                    // here — retry policy belongs to the boundary.
                    self.tracker.record_error_encounter();
                    handler.on_event(&TurnEvent::Error { message: &message });
                    break TurnStatus::Error(message);
                }
            };

            // ── Assemble the model turn ──
            let text = collect_text(&events);
            let calls = collect_tool_calls(&events);
            if let Some(usage) = extract_usage(&events) {
                total_prompt_tokens += usage.prompt_tokens.unwrap_or(0);
                total_completion_tokens += usage.completion_tokens.unwrap_or(0);
            }
            let error_message = first_error(&events).map(str::to_string);

            let mut model_parts = Vec::new();
            if !text.is_empty() {
                model_parts.push(Part::Text(text));
            }
            for (id, name, arguments) in &calls {
                model_parts.push(Part::tool_call(id, name, arguments));
            }
            if !model_parts.is_empty() {
                self.history.push(TurnRecord::model(model_parts.clone()));
                parts.extend(model_parts);
            }

            if let Some(message) = error_message {
                // The error event was already relayed in stream order.
                self.seal_pending_tool_calls("[Tool call aborted: provider stream error.]");
                break TurnStatus::Error(message);
            }

            if cancel.is_cancelled() {
                self.seal_pending_tool_calls("[Tool call cancelled before completion.]");
                handler.on_event(&TurnEvent::Cancelled);
                break TurnStatus::Cancelled;
            }

            // ── Tool dispatch ──
            if !calls.is_empty() {
                let mut results = Vec::with_capacity(calls.len());
                let mut cancelled_mid_dispatch = false;
                for (id, name, arguments) in &calls {
                    let result = if cancel.is_cancelled() {
                        cancelled_mid_dispatch = true;
                        "[Tool call cancelled before completion.]".to_string()
                    } else {
                        dispatcher.dispatch(name, arguments).await
                    };
                    if self.tracker.is_delegation_tool(name) {
                        self.tracker.record_delegation();
                    }
                    handler.on_event(&TurnEvent::ToolResultRecorded {
                        call_id: id,
                        name,
                        result: &result,
                    });
                    results.push(Part::tool_result(id, name, result));
                }
                if cancelled_mid_dispatch || cancel.is_cancelled() {
                    self.history.push(TurnRecord::user(results));
                    handler.on_event(&TurnEvent::Cancelled);
                    break TurnStatus::Cancelled;
                }
                pending_content = results;
                round_kind = RoundKind::ToolResponse;
                continue;
            }

            // ── Next-speaker check ──
            if self.config.continuation.enabled && capabilities.next_speaker_check && budget > 0 {
                let verdict = self
                    .speaker_checker
                    .check(&self.history, &self.config.model, boundary, &cancel)
                    .await;
                if verdict == Some(Speaker::Model) {
                    pending_content = vec![Part::text(
                        self.config.continuation.config.continue_prompt.clone(),
                    )];
                    round_kind = RoundKind::Continuation;
                    handler.on_event(&TurnEvent::Continuation {
                        budget_remaining: budget,
                    });
                    continue;
                }
            }

            handler.on_event(&TurnEvent::Finished);
            break TurnStatus::Completed;
        };

        // Whatever ended the turn, never leave a dangling tool-call pair for
        // the next request to trip over.
        self.seal_pending_tool_calls("[Tool call result not delivered: turn ended early.]");

        RecordedOutcome {
            preview,
            outcome: TurnOutcome {
                parts,
                status,
                rounds_used,
                total_prompt_tokens,
                total_completion_tokens,
            },
        }
    }

    /// Answer any unanswered tool calls on the last model record with a
    /// synthetic note, so the history never carries a dangling tool-call
    /// pair into the next request.
    fn seal_pending_tool_calls(&mut self, note: &str) {
        let Some(last) = self.history.last() else {
            return;
        };
        if last.speaker != Speaker::Model {
            return;
        }
        let pending: Vec<(String, String)> = last
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolCall { id, name, .. } => Some((id.clone(), name.clone())),
                _ => None,
            })
            .collect();
        if pending.is_empty() {
            return;
        }
        let results = pending
            .into_iter()
            .map(|(id, name)| Part::tool_result(id, name, note))
            .collect();
        self.history.push(TurnRecord::user(results));
    }
}

/// A turn outcome plus the preview text captured for the session manifest.
struct RecordedOutcome {
    preview: String,
    outcome: TurnOutcome,
}

fn init_recorder(config: &SessionConfig) -> Option<SessionRecorder> {
    if !config.recorder.enabled {
        return None;
    }
    match SessionRecorder::new(&config.recorder.sessions_dir, &config.model) {
        Ok(recorder) => Some(recorder),
        Err(e) => {
            warn!("failed to initialize session recorder: {e}. Continuing without recording.");
            None
        }
    }
}

/// Assemble the reinforcement block prepended on injection.
fn reinforcement_block(
    mode: PromptMode,
    system_instruction: &str,
    targeted: Option<String>,
) -> String {
    let mut block = match mode {
        PromptMode::Full => format!(
            "[System reminder: re-read your core instructions and continue the task.]\n\n\
             {system_instruction}"
        ),
        PromptMode::Concise => "[System reminder: stay on task and follow your core instructions.]"
            .to_string(),
    };
    if let Some(reminder) = targeted {
        block.push_str("\n\n[Reminder: ");
        block.push_str(&reminder);
        block.push(']');
    }
    block
}
