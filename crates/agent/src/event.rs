//! Lifecycle events and the bus that delivers them.
//!
//! Operations that take time are bracketed by a "pre" and a "post" event
//! sharing one id, so a tracer can pair them. Emission is awaited inline:
//! for one logical task, events reach the handler in operation order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hizen_core::message::ToolCallPart;
use hizen_core::provider::BackoffStrategy;
use hizen_tools::{ToolInput, ToolKind, ToolOutput};
use serde::{Serialize, Serializer};
use tracing::trace;

use crate::handler::{ErrorSink, EventHandler};
use crate::stream_assembler::Completion;

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl LifecycleEvent {
    /// A fresh event with its own correlation id.
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Reuse the id of the matching "pre" event.
    pub fn paired_with(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventKind {
    PreProcessing,

    PostProcessing {
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    PreLlmGeneration {
        provider: String,
        model: String,
        message_count: usize,
        #[serde(serialize_with = "serialize_backoff")]
        backoff: Arc<dyn BackoffStrategy>,
    },

    PostLlmGeneration {
        completion: Completion,
        start_timestamp: DateTime<Utc>,
        end_timestamp: DateTime<Utc>,
        #[serde(serialize_with = "serialize_backoff")]
        backoff: Arc<dyn BackoffStrategy>,
    },

    InvalidToolName {
        tool_call: ToolCallPart,
    },

    InvalidToolJsonArguments {
        tool_call: ToolCallPart,
        error: String,
    },

    PreToolCall {
        tool_name: ToolKind,
        input: serde_json::Value,
    },

    PostToolCall(PostToolCallState),
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PreProcessing => "pre-processing",
            Self::PostProcessing { .. } => "post-processing",
            Self::PreLlmGeneration { .. } => "pre-llm-generation",
            Self::PostLlmGeneration { .. } => "post-llm-generation",
            Self::InvalidToolName { .. } => "invalid-tool-name",
            Self::InvalidToolJsonArguments { .. } => "invalid-tool-json-arguments",
            Self::PreToolCall { .. } => "pre-tool-call",
            Self::PostToolCall(_) => "post-tool-call",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum PostToolCallState {
    Success {
        tool_name: ToolKind,
        input: ToolInput,
        output: ToolOutput,
        output_string: String,
    },

    Failure {
        tool_name: ToolKind,
        input: serde_json::Value,
        error: String,
    },

    InvalidInputArguments {
        tool_name: ToolKind,
        input: serde_json::Value,
        error: String,
    },
}

impl PostToolCallState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
            Self::InvalidInputArguments { .. } => "invalid-input-arguments",
        }
    }
}

fn serialize_backoff<S: Serializer>(
    backoff: &Arc<dyn BackoffStrategy>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Summary<'a> {
        name: &'a str,
        max_retries: u32,
    }

    Summary {
        name: backoff.name(),
        max_retries: backoff.max_retries(),
    }
    .serialize(serializer)
}

/// Wraps the event handler. Never fails; handler errors go to the error sink.
#[derive(Clone, Default)]
pub struct EventBus {
    handler: Option<Arc<dyn EventHandler>>,
    errors: ErrorSink,
}

impl EventBus {
    pub fn new(handler: Option<Arc<dyn EventHandler>>, errors: ErrorSink) -> Self {
        Self { handler, errors }
    }

    /// Emit a new event and return its id.
    pub async fn emit(&self, kind: EventKind) -> String {
        self.publish(LifecycleEvent::new(kind)).await
    }

    /// Emit the "post" half of a pair.
    pub async fn emit_paired(&self, kind: EventKind, pair_id: &str) -> String {
        self.publish(LifecycleEvent::new(kind).paired_with(pair_id)).await
    }

    pub async fn publish(&self, event: LifecycleEvent) -> String {
        trace!(event = event.kind.name(), id = %event.id, "Lifecycle event");

        if let Some(handler) = &self.handler
            && let Err(e) = handler.on_event(&event).await
        {
            let context = match &event.kind {
                EventKind::PostToolCall(state) => {
                    format!("emitting {} event of post-tool-call", state.name())
                }
                kind => format!("emitting event {}", kind.name()),
            };
            self.errors.report(context, e).await;
        }

        event.id
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handler", &self.handler.is_some())
            .field("errors", &self.errors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Recorder;
    use async_trait::async_trait;
    use hizen_core::memory::QuestionMemory;
    use hizen_providers::ExponentialBackoff;
    use hizen_tools::ReadQuestionInput;

    struct Refusing;

    #[async_trait]
    impl EventHandler for Refusing {
        async fn on_event(&self, _event: &LifecycleEvent) -> anyhow::Result<()> {
            anyhow::bail!("queue full")
        }
    }

    fn question() -> QuestionMemory {
        QuestionMemory {
            question_prompt: "p".into(),
            question_selections: None,
            answer: "a".into(),
            solution: "s".into(),
        }
    }

    #[test]
    fn serializes_with_kebab_case_type() {
        let event = LifecycleEvent::new(EventKind::PostProcessing { error: None });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "post-processing");
        assert!(json.get("error").is_none());
        assert_eq!(json["id"], event.id.as_str());
    }

    #[test]
    fn post_tool_call_nests_state_discriminator() {
        let event = LifecycleEvent::new(EventKind::PostToolCall(PostToolCallState::Success {
            tool_name: ToolKind::ReadQuestion,
            input: ToolInput::ReadQuestion(ReadQuestionInput {}),
            output: ToolOutput::ReadQuestion(question()),
            output_string: "rendered".into(),
        }));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "post-tool-call");
        assert_eq!(json["state"], "success");
        assert_eq!(json["tool_name"], "read-question");
        assert_eq!(json["output"]["questionPrompt"], "p");
    }

    #[test]
    fn backoff_serializes_as_summary() {
        let event = LifecycleEvent::new(EventKind::PreLlmGeneration {
            provider: "openai".into(),
            model: "o4-mini".into(),
            message_count: 2,
            backoff: Arc::new(ExponentialBackoff::default()),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "pre-llm-generation");
        assert_eq!(json["backoff"]["name"], "exponential");
        assert_eq!(json["backoff"]["max_retries"], 5);
    }

    #[tokio::test]
    async fn paired_emission_reuses_id() {
        let recorder = Recorder::new();
        let bus = EventBus::new(Some(recorder.clone()), ErrorSink::default());

        let id = bus.emit(EventKind::PreProcessing).await;
        let post_id = bus.emit_paired(EventKind::PostProcessing { error: None }, &id).await;

        assert_eq!(id, post_id);
        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind.name(), "pre-processing");
        assert_eq!(events[1].id, id);
    }

    #[tokio::test]
    async fn handler_failure_is_reported_with_event_type() {
        let recorder = Recorder::new();
        let bus = EventBus::new(Some(Arc::new(Refusing)), ErrorSink::new(Some(recorder.clone())));

        bus.emit(EventKind::PreProcessing).await;
        bus.emit(EventKind::PostToolCall(PostToolCallState::Failure {
            tool_name: ToolKind::ReadQuestion,
            input: serde_json::json!({}),
            error: "boom".into(),
        }))
        .await;

        assert_eq!(
            recorder.errors(),
            vec![
                "[ERROR] emitting event pre-processing: queue full",
                "[ERROR] emitting failure event of post-tool-call: queue full",
            ]
        );
    }

    #[tokio::test]
    async fn no_handler_still_returns_ids() {
        let bus = EventBus::default();
        let a = bus.emit(EventKind::PreProcessing).await;
        let b = bus.emit(EventKind::PreProcessing).await;
        assert_ne!(a, b);
    }
}
