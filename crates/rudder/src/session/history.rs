//! Conversation history: role-tagged turn records and the append-only
//! [`History`] sequence that owns them.
//!
//! The model API enforces strict turn alternation: a model turn carrying
//! tool-call requests must be answered by a user turn carrying exactly the
//! matching tool-call results before anything else may be appended. That
//! contract is enforced here, at the single append point, so no caller can
//! corrupt the sequence silently. A violation is a programming error in
//! request construction and panics rather than reordering history.

use serde::{Deserialize, Serialize};

// ── Content parts ──────────────────────────────────────────────────

/// One content part inside a turn record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Part {
    /// Plain text authored by the user or generated by the model.
    Text(String),
    /// A tool invocation requested by the model.
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    /// The result of a tool invocation, fed back as user-role content.
    ToolResult {
        call_id: String,
        name: String,
        content: String,
    },
}

impl Part {
    pub fn text(content: impl Into<String>) -> Self {
        Part::Text(content.into())
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Part::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Part::ToolResult {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    /// Total character length of the part's payload. Used by the token
    /// estimator, which must count every field the provider will see.
    pub fn char_len(&self) -> usize {
        match self {
            Part::Text(t) => t.len(),
            Part::ToolCall {
                id,
                name,
                arguments,
            } => id.len() + name.len() + arguments.len(),
            Part::ToolResult {
                call_id,
                name,
                content,
            } => call_id.len() + name.len() + content.len(),
        }
    }
}

// ── Turn records ───────────────────────────────────────────────────

/// Who authored a turn record.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Model,
}

/// One role-tagged message: an ordered list of content parts.
///
/// Immutable once appended to a [`History`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TurnRecord {
    pub speaker: Speaker,
    pub parts: Vec<Part>,
}

impl TurnRecord {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            speaker: Speaker::User,
            parts,
        }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            speaker: Speaker::Model,
            parts,
        }
    }

    pub fn user_text(content: impl Into<String>) -> Self {
        Self::user(vec![Part::text(content)])
    }

    pub fn model_text(content: impl Into<String>) -> Self {
        Self::model(vec![Part::text(content)])
    }

    /// IDs of tool calls in this record that the next record must answer.
    pub fn tool_call_ids(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolCall { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// IDs of tool results carried by this record.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolResult { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whether every part of this record is a tool result.
    pub fn is_tool_result_only(&self) -> bool {
        !self.parts.is_empty()
            && self
                .parts
                .iter()
                .all(|p| matches!(p, Part::ToolResult { .. }))
    }

    /// Whether this record carries any content that is not a tool result.
    pub fn has_non_tool_result_content(&self) -> bool {
        self.parts
            .iter()
            .any(|p| !matches!(p, Part::ToolResult { .. }))
    }

    /// Concatenated text parts of this record.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let Part::Text(t) = part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(t);
            }
        }
        out
    }

    /// Total character length across all parts.
    pub fn char_len(&self) -> usize {
        self.parts.iter().map(Part::char_len).sum()
    }
}

// ── History ────────────────────────────────────────────────────────

/// Ordered, append-only sequence of turn records for one chat session.
///
/// Owned by the session for the session's lifetime. Replaced wholesale only
/// by compression or a session reset — both of which also clear the derived
/// session metrics, since the evidence they summarized is gone.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct History {
    records: Vec<TurnRecord>,
}

impl History {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn from_records(records: Vec<TurnRecord>) -> Self {
        let mut history = Self::new();
        for record in records {
            history.push(record);
        }
        history
    }

    /// Append a record, enforcing the turn-alternation invariant.
    ///
    /// # Panics
    ///
    /// Panics if the last record is a model turn with unanswered tool-call
    /// requests and `record` is not a user turn carrying exactly the matching
    /// tool-call results. This indicates a bug in request construction, not a
    /// recoverable runtime condition.
    pub fn push(&mut self, record: TurnRecord) {
        if let Some(last) = self.records.last() {
            let pending = if last.speaker == Speaker::Model {
                last.tool_call_ids()
            } else {
                Vec::new()
            };
            if !pending.is_empty() {
                assert!(
                    record.speaker == Speaker::User,
                    "turn-alternation violation: model turn has unanswered tool calls \
                     {pending:?}, but the next record is model-authored"
                );
                assert!(
                    record.is_tool_result_only(),
                    "turn-alternation violation: model turn has unanswered tool calls \
                     {pending:?}, but the next record carries non-tool-result content"
                );
                let mut answered: Vec<&str> = record.tool_result_ids();
                answered.sort_unstable();
                let mut expected = pending.clone();
                expected.sort_unstable();
                assert!(
                    answered == expected,
                    "turn-alternation violation: tool results {answered:?} do not match \
                     pending tool calls {expected:?}"
                );
            }
        }
        self.records.push(record);
    }

    /// Replace the entire sequence (compression swap / session reset).
    pub fn replace(&mut self, records: Vec<TurnRecord>) {
        self.records = records;
    }

    pub fn records(&self) -> &[TurnRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&TurnRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Tool-call IDs of the last record that are still unanswered.
    ///
    /// Non-empty only when the last record is model-authored and carries
    /// tool-call requests.
    pub fn pending_tool_call_ids(&self) -> Vec<&str> {
        match self.records.last() {
            Some(last) if last.speaker == Speaker::Model => last.tool_call_ids(),
            _ => Vec::new(),
        }
    }

    /// Total character length across all records.
    pub fn char_len(&self) -> usize {
        self.records.iter().map(TurnRecord::char_len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_alternating_turns() {
        let mut history = History::new();
        history.push(TurnRecord::user_text("hello"));
        history.push(TurnRecord::model_text("hi there"));
        history.push(TurnRecord::user_text("how are you"));
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn tool_call_answered_by_matching_result() {
        let mut history = History::new();
        history.push(TurnRecord::user_text("read a file"));
        history.push(TurnRecord::model(vec![Part::tool_call(
            "c1",
            "read_file",
            r#"{"path":"a.rs"}"#,
        )]));
        assert_eq!(history.pending_tool_call_ids(), vec!["c1"]);

        history.push(TurnRecord::user(vec![Part::tool_result(
            "c1",
            "read_file",
            "fn main() {}",
        )]));
        assert!(history.pending_tool_call_ids().is_empty());
    }

    #[test]
    #[should_panic(expected = "turn-alternation violation")]
    fn text_after_pending_tool_call_panics() {
        let mut history = History::new();
        history.push(TurnRecord::user_text("read a file"));
        history.push(TurnRecord::model(vec![Part::tool_call(
            "c1",
            "read_file",
            "{}",
        )]));
        history.push(TurnRecord::user_text("never mind"));
    }

    #[test]
    #[should_panic(expected = "turn-alternation violation")]
    fn mismatched_result_ids_panic() {
        let mut history = History::new();
        history.push(TurnRecord::model(vec![Part::tool_call(
            "c1",
            "read_file",
            "{}",
        )]));
        history.push(TurnRecord::user(vec![Part::tool_result(
            "c2",
            "read_file",
            "output",
        )]));
    }

    #[test]
    fn multiple_tool_calls_all_answered() {
        let mut history = History::new();
        history.push(TurnRecord::model(vec![
            Part::tool_call("c1", "read_file", "{}"),
            Part::tool_call("c2", "grep", "{}"),
        ]));
        // Answering in reverse order is fine — matching is by ID set.
        history.push(TurnRecord::user(vec![
            Part::tool_result("c2", "grep", "no matches"),
            Part::tool_result("c1", "read_file", "contents"),
        ]));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn tool_result_only_classification() {
        let pure = TurnRecord::user(vec![Part::tool_result("c1", "grep", "out")]);
        assert!(pure.is_tool_result_only());
        assert!(!pure.has_non_tool_result_content());

        let mixed = TurnRecord::user(vec![
            Part::tool_result("c1", "grep", "out"),
            Part::text("also this"),
        ]);
        assert!(!mixed.is_tool_result_only());
        assert!(mixed.has_non_tool_result_content());
    }

    #[test]
    fn replace_swaps_wholesale() {
        let mut history = History::new();
        history.push(TurnRecord::user_text("one"));
        history.push(TurnRecord::model_text("two"));

        history.replace(vec![TurnRecord::user_text("digest")]);
        assert_eq!(history.len(), 1);
        assert_eq!(history.records()[0].text_content(), "digest");
    }

    #[test]
    fn char_len_counts_all_parts() {
        let record = TurnRecord::model(vec![
            Part::text("abc"),
            Part::tool_call("id", "name", "args"),
        ]);
        assert_eq!(record.char_len(), 3 + 2 + 4 + 4);
    }
}
