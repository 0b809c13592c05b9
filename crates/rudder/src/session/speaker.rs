//! Next-speaker check: should the model keep talking?
//!
//! After a turn ends with no pending tool calls, an auxiliary classifier
//! decides whether the model's last message was a completed thought or a
//! stated intent to continue. The classifier runs as a one-shot JSON
//! completion through the model boundary; its output is validated against a
//! generated JSON Schema before being trusted. Anything unparseable or
//! invalid means "user speaks next" — the safe default is to stop.

use crate::api::{CancelSignal, CompletionRequest, ModelBoundary};
use crate::json_schema_for;
use crate::session::history::{History, Speaker};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, warn};

const CLASSIFIER_PROMPT: &str = "\
You decide who should speak next in an agent conversation. Analyze the \
model's most recent message:

- If it states an immediate next action it will take itself (\"Next, I \
  will...\", \"Now let me...\"), the model should speak next.
- If it asks the user a question or requests input, the user should speak next.
- If it is a completed answer or summary, the user should speak next.

Respond with JSON only: \
{\"reasoning\": \"<one sentence>\", \"next_speaker\": \"user\" | \"model\"}";

/// Number of trailing records included in the classifier transcript.
const CLASSIFIER_WINDOW: usize = 4;

/// Maximum tokens for the classifier response.
const CLASSIFIER_MAX_TOKENS: u32 = 256;

/// Classifier verdict shape. Doubles as the validation schema source.
#[derive(Debug, Deserialize, JsonSchema)]
struct NextSpeakerVerdict {
    #[allow(dead_code)]
    reasoning: String,
    next_speaker: String,
}

/// The next-speaker classifier.
#[derive(Debug)]
pub struct NextSpeakerChecker {
    schema: serde_json::Value,
}

impl Default for NextSpeakerChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl NextSpeakerChecker {
    pub fn new() -> Self {
        Self {
            schema: json_schema_for::<NextSpeakerVerdict>(),
        }
    }

    /// Ask the classifier who should speak next.
    ///
    /// Returns `None` when the check is not applicable (empty history, last
    /// speaker is the user, cancellation) or the classifier output fails
    /// validation — callers treat `None` the same as `Some(Speaker::User)`.
    pub async fn check(
        &self,
        history: &History,
        model: &str,
        boundary: &dyn ModelBoundary,
        cancel: &CancelSignal,
    ) -> Option<Speaker> {
        let last = history.last()?;
        if last.speaker != Speaker::Model || cancel.is_cancelled() {
            return None;
        }
        // Nothing to classify if the model produced no text.
        if last.text_content().is_empty() {
            return None;
        }

        let request = CompletionRequest {
            model: model.to_string(),
            system: CLASSIFIER_PROMPT.to_string(),
            user: classifier_transcript(history),
            max_tokens: CLASSIFIER_MAX_TOKENS,
            temperature: 0.0,
            json_output: true,
        };

        let response = match boundary.complete(request, cancel.clone()).await {
            Ok(text) => text,
            Err(e) => {
                warn!("next-speaker check failed: {e}");
                return None;
            }
        };

        self.parse_verdict(&response)
    }

    /// Parse and validate a classifier response.
    fn parse_verdict(&self, response: &str) -> Option<Speaker> {
        let value: serde_json::Value = match serde_json::from_str(response.trim()) {
            Ok(v) => v,
            Err(e) => {
                warn!("next-speaker verdict is not JSON: {e}");
                return None;
            }
        };

        // Structural validation against the generated schema.
        if let Ok(validator) = jsonschema::validator_for(&self.schema)
            && !validator.is_valid(&value)
        {
            warn!("next-speaker verdict failed schema validation");
            return None;
        }

        let verdict: NextSpeakerVerdict = serde_json::from_value(value).ok()?;
        match verdict.next_speaker.as_str() {
            "model" => {
                debug!("next-speaker check: model continues");
                Some(Speaker::Model)
            }
            "user" => Some(Speaker::User),
            other => {
                warn!("next-speaker verdict carries unknown speaker '{other}'");
                None
            }
        }
    }
}

/// Render the trailing window of the history for the classifier.
fn classifier_transcript(history: &History) -> String {
    let records = history.records();
    let start = records.len().saturating_sub(CLASSIFIER_WINDOW);
    let mut out = String::new();
    for record in &records[start..] {
        let role = match record.speaker {
            Speaker::User => "user",
            Speaker::Model => "model",
        };
        let text = record.text_content();
        if !text.is_empty() {
            out.push_str(&format!("[{role}]: {text}\n\n"));
        }
    }
    out
}
