//! Completion provider contract — the abstraction over streaming LLM backends.
//!
//! The driver never talks to a vendor directly. It hands a
//! [`CompletionRequest`] to a [`CompletionProvider`] and consumes the
//! resulting [`StreamFragment`]s one at a time. Request construction,
//! retries and transport all live behind this trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// Model selection and sampling options for a completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// The model to use (e.g., "o4-mini", "gpt-4o")
    pub model: String,

    /// Request medium reasoning effort from reasoning models
    #[serde(default)]
    pub thinking_enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            thinking_enabled: false,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,

    pub description: String,

    /// JSON Schema describing the tool's parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// One streaming completion call.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: ModelConfig,

    /// Full conversation, developer prompt first
    pub messages: Vec<Message>,

    /// Tool catalog offered to the model
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One unit of a streamed response.
///
/// Field names follow the OpenAI chat-completions chunk so that SSE payloads
/// deserialize straight into this type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamFragment {
    #[serde(default)]
    pub id: String,

    /// Creation time, unix seconds
    #[serde(default)]
    pub created: i64,

    #[serde(default)]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    #[serde(default)]
    pub choices: Vec<FragmentChoice>,
}

impl StreamFragment {
    /// The first (and for chat streams, only) choice.
    pub fn choice(&self) -> Option<&FragmentChoice> {
        self.choices.first()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FragmentChoice {
    #[serde(default)]
    pub delta: FragmentDelta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FragmentDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// A partial tool call; every field but `index` may be missing or cut short.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Position of the call within the turn
    pub index: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// The receiving half of a fragment stream. Ends when the sender is dropped.
pub type FragmentReceiver = tokio::sync::mpsc::Receiver<Result<StreamFragment, ProviderError>>;

/// Retry/backoff policy applied by a provider to the initial request.
pub trait BackoffStrategy: Send + Sync + std::fmt::Debug {
    /// Short identifier used in logs and lifecycle events.
    fn name(&self) -> &str;

    /// Retries allowed after the first attempt.
    fn max_retries(&self) -> u32;

    /// Delay before retry number `attempt` (1-based) after `error`, or
    /// `None` to give up and surface the error.
    fn delay_for(&self, attempt: u32, error: &ProviderError) -> Option<Duration>;
}

/// Observes a completion call just before its first attempt goes out.
pub trait PreCallHook: Send + Sync {
    fn before_first_attempt(
        &self,
        provider: &str,
        request: &CompletionRequest,
        backoff: &Arc<dyn BackoffStrategy>,
    );
}

/// The streaming completion provider contract.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai").
    fn name(&self) -> &str;

    /// Start a streaming completion.
    ///
    /// Implementations call `hook` exactly once, before the first attempt,
    /// and apply `backoff` to failures of the initial request. Errors that
    /// occur after streaming began are delivered through the receiver.
    async fn start_stream(
        &self,
        request: CompletionRequest,
        backoff: Arc<dyn BackoffStrategy>,
        hook: Option<&dyn PreCallHook>,
    ) -> Result<FragmentReceiver, ProviderError>;
}
