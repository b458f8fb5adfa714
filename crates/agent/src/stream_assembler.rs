//! Streaming response assembler.
//!
//! Folds a fragment stream into one finished assistant turn. Text deltas
//! are concatenated and forwarded to the streaming handler as they arrive.
//! Tool-call deltas are keyed by their position and each of id, name and
//! arguments is concatenated in arrival order, so a provider may split any
//! field across as many fragments as it likes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hizen_core::error::ProviderError;
use hizen_core::message::ToolCallPart;
use hizen_core::provider::{FragmentReceiver, StreamFragment, Usage};
use serde::Serialize;
use tracing::{debug, trace};

use crate::handler::{ErrorSink, StreamingHandler, deliver_partial};

/// One finished assistant turn.
#[derive(Debug, Clone)]
pub struct AssembledTurn {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    /// Ordered by position
    pub tool_calls: Vec<ToolCallPart>,
    pub completion: Completion,
}

/// Non-streaming view of the response, for tracing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub id: String,
    /// Unix seconds
    pub created: i64,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Empty when the stream never reported a finish reason
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: CompletionMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionMessage {
    pub role: &'static str,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallPart>,
}

/// A tool call being pieced together.
#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl From<PartialToolCall> for ToolCallPart {
    fn from(call: PartialToolCall) -> Self {
        ToolCallPart {
            id: call.id,
            tool_name: call.name,
            arguments: call.arguments,
        }
    }
}

#[derive(Default)]
struct Accumulator {
    id: Option<String>,
    created: i64,
    model: String,
    usage: Option<Usage>,
    finish_reason: Option<String>,
    text: String,
    calls: BTreeMap<u32, PartialToolCall>,
}

impl Accumulator {
    /// Returns the text delta, if any, for forwarding.
    fn absorb<'f>(&mut self, fragment: &'f StreamFragment) -> Option<&'f str> {
        if self.id.is_none() && !fragment.id.is_empty() {
            self.id = Some(fragment.id.clone());
            self.created = fragment.created;
            self.model = fragment.model.clone();
        }
        if self.usage.is_none() {
            self.usage = fragment.usage;
        }

        let choice = fragment.choice()?;
        if let Some(reason) = &choice.finish_reason {
            self.finish_reason = Some(reason.clone());
        }

        for delta in choice.delta.tool_calls.iter().flatten() {
            let call = self.calls.entry(delta.index).or_default();
            if let Some(id) = &delta.id {
                call.id.push_str(id);
            }
            if let Some(function) = &delta.function {
                if let Some(name) = &function.name {
                    call.name.push_str(name);
                }
                if let Some(arguments) = &function.arguments {
                    call.arguments.push_str(arguments);
                }
            }
        }

        let content = choice.delta.content.as_deref().filter(|c| !c.is_empty())?;
        self.text.push_str(content);
        Some(content)
    }

    fn finish(self) -> AssembledTurn {
        let id = self
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let timestamp = DateTime::from_timestamp(self.created, 0)
            .filter(|_| self.created > 0)
            .unwrap_or_else(Utc::now);
        let tool_calls: Vec<ToolCallPart> = self.calls.into_values().map(Into::into).collect();

        let choices = self
            .finish_reason
            .map(|finish_reason| CompletionChoice {
                index: 0,
                message: CompletionMessage {
                    role: "assistant",
                    content: self.text.clone(),
                    tool_calls: tool_calls.clone(),
                },
                finish_reason,
            })
            .into_iter()
            .collect();

        let completion = Completion {
            id: id.clone(),
            created: timestamp.timestamp(),
            model: self.model,
            usage: self.usage,
            choices,
        };

        AssembledTurn {
            id,
            timestamp,
            text: self.text,
            tool_calls,
            completion,
        }
    }
}

/// Consume `stream` to the end and assemble the turn.
///
/// Fragments are awaited one at a time. A stream error aborts assembly
/// with no partial result.
pub async fn assemble(
    stream: &mut FragmentReceiver,
    observer: Option<&dyn StreamingHandler>,
    errors: &ErrorSink,
) -> Result<AssembledTurn, ProviderError> {
    let mut acc = Accumulator::default();
    let mut fragments = 0usize;

    while let Some(fragment) = stream.recv().await {
        let fragment = fragment?;
        fragments += 1;
        trace!(fragment = fragments, "Stream fragment");

        if let Some(delta) = acc.absorb(&fragment) {
            let id = acc.id.as_deref().unwrap_or_default();
            deliver_partial(observer, errors, id, delta).await;
        }
    }

    let turn = acc.finish();
    debug!(
        turn_id = %turn.id,
        fragments,
        text_len = turn.text.len(),
        tool_calls = turn.tool_calls.len(),
        "Assembled assistant turn"
    );
    Ok(turn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Recorder, fragment_stream, text_fragment, tool_fragment};
    use hizen_core::provider::{FragmentChoice, FragmentDelta};

    async fn run(fragments: Vec<Result<StreamFragment, ProviderError>>) -> Result<AssembledTurn, ProviderError> {
        let mut rx = fragment_stream(fragments);
        assemble(&mut rx, None, &ErrorSink::default()).await
    }

    fn finish(reason: &str) -> StreamFragment {
        StreamFragment {
            id: "resp-1".into(),
            created: 1_700_000_000,
            choices: vec![FragmentChoice {
                delta: FragmentDelta::default(),
                finish_reason: Some(reason.into()),
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn concatenates_text_deltas() {
        let turn = run(vec![
            Ok(text_fragment("resp-1", "Hel")),
            Ok(text_fragment("resp-1", "lo")),
            Ok(finish("stop")),
        ])
        .await
        .unwrap();

        assert_eq!(turn.id, "resp-1");
        assert_eq!(turn.text, "Hello");
        assert!(turn.tool_calls.is_empty());
        assert_eq!(turn.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(turn.completion.choices[0].finish_reason, "stop");
        assert_eq!(turn.completion.choices[0].message.content, "Hello");
    }

    #[tokio::test]
    async fn first_id_wins() {
        let turn = run(vec![
            Ok(text_fragment("first", "a")),
            Ok(text_fragment("second", "b")),
        ])
        .await
        .unwrap();
        assert_eq!(turn.id, "first");
        assert!(turn.completion.choices.is_empty());
    }

    #[tokio::test]
    async fn reassembles_arbitrarily_split_fields() {
        // id, name and arguments split unevenly, down to single characters
        let turn = run(vec![
            Ok(tool_fragment(0, Some("call_"), Some("read-"), None)),
            Ok(tool_fragment(0, Some("a"), None, Some("{"))),
            Ok(tool_fragment(0, Some("b"), Some("question"), Some("\""))),
            Ok(tool_fragment(0, None, None, Some("k\":"))),
            Ok(tool_fragment(0, None, None, Some("1"))),
            Ok(tool_fragment(0, None, None, Some("}"))),
            Ok(finish("tool_calls")),
        ])
        .await
        .unwrap();

        assert_eq!(
            turn.tool_calls,
            vec![ToolCallPart {
                id: "call_ab".into(),
                tool_name: "read-question".into(),
                arguments: r#"{"k":1}"#.into(),
            }]
        );
    }

    #[tokio::test]
    async fn interleaved_positions_stay_independent() {
        let turn = run(vec![
            Ok(tool_fragment(1, Some("call_b"), Some("generate-"), Some("{\"x\""))),
            Ok(tool_fragment(0, Some("call_a"), Some("read-question"), None)),
            Ok(tool_fragment(1, None, Some("exam-question"), None)),
            Ok(tool_fragment(0, None, None, Some("{}"))),
            Ok(tool_fragment(1, None, None, Some(":2}"))),
        ])
        .await
        .unwrap();

        assert_eq!(turn.tool_calls.len(), 2);
        assert_eq!(turn.tool_calls[0].id, "call_a");
        assert_eq!(turn.tool_calls[0].tool_name, "read-question");
        assert_eq!(turn.tool_calls[0].arguments, "{}");
        assert_eq!(turn.tool_calls[1].id, "call_b");
        assert_eq!(turn.tool_calls[1].tool_name, "generate-exam-question");
        assert_eq!(turn.tool_calls[1].arguments, r#"{"x":2}"#);
    }

    #[tokio::test]
    async fn stream_error_yields_no_partial_turn() {
        let result = run(vec![
            Ok(text_fragment("resp-1", "partial")),
            Err(ProviderError::StreamInterrupted("reset".into())),
        ])
        .await;
        assert!(matches!(result, Err(ProviderError::StreamInterrupted(_))));

        let result = run(vec![Err(ProviderError::Network("down".into()))]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn usage_after_finish_reason_is_kept() {
        let mut usage_only = finish("stop");
        usage_only.choices.clear();
        usage_only.usage = Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 2,
            total_tokens: 12,
        });

        let turn = run(vec![
            Ok(text_fragment("resp-1", "ok")),
            Ok(finish("stop")),
            Ok(usage_only),
        ])
        .await
        .unwrap();

        assert_eq!(turn.completion.usage.map(|u| u.total_tokens), Some(12));
        assert_eq!(turn.text, "ok");
    }

    #[tokio::test]
    async fn forwards_each_delta_with_turn_id() {
        let recorder = Recorder::new();
        let mut rx = fragment_stream(vec![
            Ok(text_fragment("resp-9", "a")),
            Ok(text_fragment("resp-9", "")),
            Ok(text_fragment("other", "b")),
        ]);

        let observer: &dyn StreamingHandler = recorder.as_ref();
        assemble(&mut rx, Some(observer), &ErrorSink::default())
            .await
            .unwrap();

        assert_eq!(
            recorder.partials(),
            vec![("resp-9".to_string(), "a".to_string()), ("resp-9".to_string(), "b".to_string())]
        );
    }

    #[tokio::test]
    async fn failing_observer_is_reported_not_raised() {
        let observer = Recorder::failing();
        let errors = Recorder::new();
        let mut rx = fragment_stream(vec![
            Ok(text_fragment("resp-1", "par")),
            Ok(text_fragment("resp-1", "tial")),
            Ok(finish("stop")),
        ]);

        let handler: &dyn StreamingHandler = observer.as_ref();
        let turn = assemble(&mut rx, Some(handler), &ErrorSink::new(Some(errors.clone())))
            .await
            .unwrap();

        assert_eq!(turn.text, "partial");
        assert_eq!(
            errors.errors(),
            vec![
                "[ERROR] sending streaming message resp-1: handler unavailable".to_string(),
                "[ERROR] sending streaming message resp-1: handler unavailable".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn empty_stream_gets_generated_id() {
        let turn = run(vec![]).await.unwrap();
        assert!(!turn.id.is_empty());
        assert!(turn.text.is_empty());
    }
}
