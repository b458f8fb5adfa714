//! Tool trait — the abstraction over agent capabilities.
//!
//! A tool is a stateless descriptor with typed input and output. The
//! registry that exposes tools to the model lives in `hizen-tools`, as a
//! closed set over the concrete tool types.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ToolError;
use crate::memory::MemoryProvider;
use crate::provider::{CompletionProvider, ModelConfig, ToolDefinition};

/// The model backend a tool may call into.
#[derive(Clone)]
pub struct Vendor {
    pub provider: Arc<dyn CompletionProvider>,
    pub model: ModelConfig,
}

impl std::fmt::Debug for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vendor")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish()
    }
}

/// What a tool can see while it runs.
#[derive(Clone)]
pub struct ToolContext {
    pub memory: Arc<dyn MemoryProvider>,
    pub vendor: Vendor,
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Validated arguments.
    type Input: DeserializeOwned + Serialize + Send + Sync;

    /// Structured result, rendered to text for the model by `trigger`.
    type Output: Serialize + Send;

    /// The unique name of this tool (e.g., "read-question").
    fn name(&self) -> &'static str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// Usage guidance appended to the system prompt.
    fn prompt_fragment(&self) -> &str;

    /// JSON Schema describing this tool's parameters, if it takes any.
    fn parameters_schema(&self) -> Option<serde_json::Value>;

    /// Run the tool, returning the structured output and its text rendering.
    async fn trigger(
        &self,
        ctx: &ToolContext,
        input: &Self::Input,
    ) -> Result<(Self::Output, String), ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Check parsed JSON arguments against a tool's input type.
///
/// A mismatch is reported as [`ToolError::InvalidInput`], the one failure
/// kind the dispatcher treats as a schema-validation error.
pub fn validate_input<T: DeserializeOwned>(arguments: serde_json::Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidInput(e.to_string()))
}
