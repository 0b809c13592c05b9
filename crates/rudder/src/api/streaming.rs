//! Server-Sent Events (SSE) parsing for the chat completions wire format.
//!
//! The concrete client reads the response body chunk by chunk, feeds each
//! complete `data:` line through [`parse_sse_data`], and assembles tool-call
//! argument fragments into complete calls once the stream ends. Text deltas
//! are surfaced immediately so the UI can render as tokens arrive.

use crate::UsageInfo;
use serde::Deserialize;
use tracing::{trace, warn};

/// A single low-level event parsed from the SSE stream.
#[derive(Debug, Clone)]
pub enum SseEvent {
    /// An incremental text content delta.
    TextDelta(String),
    /// A tool call chunk (accumulated until the stream completes).
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: String,
    },
    /// Token usage information (sent in the final chunk).
    Usage(UsageInfo),
    /// The stream is complete.
    Done,
}

/// Raw SSE data chunk from the provider.
#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Deserialize, Debug)]
struct StreamToolCallDelta {
    index: Option<usize>,
    id: Option<String>,
    function: Option<StreamFunctionDelta>,
}

#[derive(Deserialize, Debug)]
struct StreamFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// Parse a single SSE `data:` payload into events.
pub fn parse_sse_data(data: &str, events: &mut Vec<SseEvent>) {
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            if let Some(usage) = chunk.usage {
                events.push(SseEvent::Usage(usage));
            }
            if let Some(choices) = chunk.choices {
                for choice in choices {
                    if let Some(delta) = choice.delta {
                        if let Some(content) = delta.content
                            && !content.is_empty()
                        {
                            events.push(SseEvent::TextDelta(content));
                        }
                        if let Some(tool_calls) = delta.tool_calls {
                            for tc in tool_calls {
                                let func = tc.function.unwrap_or(StreamFunctionDelta {
                                    name: None,
                                    arguments: None,
                                });
                                events.push(SseEvent::ToolCallDelta {
                                    index: tc.index.unwrap_or(0),
                                    id: tc.id,
                                    name: func.name,
                                    arguments_delta: func.arguments.unwrap_or_default(),
                                });
                            }
                        }
                    }
                    if choice.finish_reason.is_some() {
                        trace!("stream finish_reason: {:?}", choice.finish_reason);
                    }
                }
            }
        }
        Err(e) => {
            warn!("failed to parse SSE chunk: {e} — data: {data}");
        }
    }
}

/// An assembled tool call: `(id, name, arguments)`.
pub type AssembledCall = (String, String, String);

/// Assemble complete tool calls from accumulated deltas.
///
/// Fragments are grouped by stream index; IDs and names come from the first
/// fragment that carries them, argument strings are concatenated in order.
pub fn assemble_tool_calls(events: &[SseEvent]) -> Vec<AssembledCall> {
    let mut by_index: Vec<(usize, String, String, String)> = Vec::new();

    for event in events {
        if let SseEvent::ToolCallDelta {
            index,
            id,
            name,
            arguments_delta,
        } = event
        {
            let pos = match by_index.iter().position(|(i, ..)| i == index) {
                Some(pos) => pos,
                None => {
                    by_index.push((*index, String::new(), String::new(), String::new()));
                    by_index.len() - 1
                }
            };
            let entry = &mut by_index[pos];
            if let Some(id) = id
                && entry.1.is_empty()
            {
                entry.1 = id.clone();
            }
            if let Some(name) = name
                && entry.2.is_empty()
            {
                entry.2 = name.clone();
            }
            entry.3.push_str(arguments_delta);
        }
    }

    by_index.sort_by_key(|(i, ..)| *i);
    by_index
        .into_iter()
        .map(|(_, id, name, arguments)| (id, name, arguments))
        .collect()
}

/// Concatenate text deltas from a stream.
pub fn collect_text(events: &[SseEvent]) -> String {
    let mut text = String::new();
    for event in events {
        if let SseEvent::TextDelta(delta) = event {
            text.push_str(delta);
        }
    }
    text
}

/// Extract usage info from stream events (if present).
pub fn extract_usage(events: &[SseEvent]) -> Option<UsageInfo> {
    for event in events.iter().rev() {
        if let SseEvent::Usage(usage) = event {
            return Some(usage.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_text_delta_chunk() {
        let mut events = Vec::new();
        parse_sse_data(
            r#"{"choices":[{"delta":{"content":"Hello"}}]}"#,
            &mut events,
        );
        assert!(matches!(&events[0], SseEvent::TextDelta(t) if t == "Hello"));
    }

    #[test]
    fn parse_usage_chunk() {
        let mut events = Vec::new();
        parse_sse_data(
            r#"{"usage":{"prompt_tokens":100,"completion_tokens":50,"total_tokens":150}}"#,
            &mut events,
        );
        assert!(matches!(&events[0], SseEvent::Usage(u) if u.prompt_tokens == Some(100)));
    }

    #[test]
    fn malformed_chunk_is_skipped() {
        let mut events = Vec::new();
        parse_sse_data("not json at all", &mut events);
        assert!(events.is_empty());
    }

    #[test]
    fn assemble_fragments_into_one_call() {
        let events = vec![
            SseEvent::ToolCallDelta {
                index: 0,
                id: Some("call_1".into()),
                name: Some("read_file".into()),
                arguments_delta: r#"{"pa"#.into(),
            },
            SseEvent::ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments_delta: r#"th":"test.rs"}"#.into(),
            },
            SseEvent::Done,
        ];

        let calls = assemble_tool_calls(&events);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "call_1");
        assert_eq!(calls[0].1, "read_file");
        assert_eq!(calls[0].2, r#"{"path":"test.rs"}"#);
    }

    #[test]
    fn assemble_keeps_multiple_calls_in_index_order() {
        let events = vec![
            SseEvent::ToolCallDelta {
                index: 1,
                id: Some("call_2".into()),
                name: Some("grep".into()),
                arguments_delta: r#"{"pattern":"foo"}"#.into(),
            },
            SseEvent::ToolCallDelta {
                index: 0,
                id: Some("call_1".into()),
                name: Some("read_file".into()),
                arguments_delta: r#"{"path":"a.rs"}"#.into(),
            },
        ];

        let calls = assemble_tool_calls(&events);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, "read_file");
        assert_eq!(calls[1].1, "grep");
    }

    #[test]
    fn collect_text_concatenates() {
        let events = vec![
            SseEvent::TextDelta("Hello ".into()),
            SseEvent::TextDelta("world".into()),
            SseEvent::Done,
        ];
        assert_eq!(collect_text(&events), "Hello world");
    }

    #[test]
    fn extract_usage_finds_final_chunk() {
        let events = vec![
            SseEvent::TextDelta("hi".into()),
            SseEvent::Usage(UsageInfo {
                prompt_tokens: Some(7),
                completion_tokens: Some(3),
                total_tokens: Some(10),
            }),
            SseEvent::Done,
        ];
        assert_eq!(extract_usage(&events).unwrap().total_tokens, Some(10));
        assert!(extract_usage(&[SseEvent::Done]).is_none());
    }
}
