//! Built-in tools for the Hizen tutoring agent.
//!
//! The tool set is closed: [`RegisteredTool`] enumerates every tool the
//! agent can call, and [`ToolInput`] / [`ToolOutput`] carry each tool's own
//! typed records into lifecycle events. The dispatcher matches on the tag
//! instead of going through a trait object.

pub mod generate_question;
pub mod read_question;

use std::collections::BTreeMap;
use std::sync::Arc;

use hizen_core::error::ToolError;
use hizen_core::memory::QuestionMemory;
use hizen_core::provider::{BackoffStrategy, ToolDefinition};
use hizen_core::tool::{Tool, ToolContext, validate_input};
use serde::Serialize;

pub use generate_question::{GenerateExamQuestionTool, GenerateQuestionInput, QuestionType};
pub use read_question::{ReadQuestionInput, ReadQuestionTool};

/// Tag for each registered tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    ReadQuestion,
    GenerateExamQuestion,
}

impl ToolKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadQuestion => read_question::NAME,
            Self::GenerateExamQuestion => generate_question::NAME,
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Validated arguments of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolInput {
    ReadQuestion(ReadQuestionInput),
    GenerateExamQuestion(GenerateQuestionInput),
}

/// Structured result of a successful tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    ReadQuestion(QuestionMemory),
    GenerateExamQuestion(QuestionMemory),
}

/// Everything a successful call produced.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub input: ToolInput,
    pub output: ToolOutput,
    /// Text handed back to the model
    pub rendered: String,
}

pub enum RegisteredTool {
    ReadQuestion(ReadQuestionTool),
    GenerateExamQuestion(GenerateExamQuestionTool),
}

impl RegisteredTool {
    pub fn kind(&self) -> ToolKind {
        match self {
            Self::ReadQuestion(_) => ToolKind::ReadQuestion,
            Self::GenerateExamQuestion(_) => ToolKind::GenerateExamQuestion,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn definition(&self) -> ToolDefinition {
        match self {
            Self::ReadQuestion(tool) => tool.to_definition(),
            Self::GenerateExamQuestion(tool) => tool.to_definition(),
        }
    }

    pub fn prompt_fragment(&self) -> &str {
        match self {
            Self::ReadQuestion(tool) => tool.prompt_fragment(),
            Self::GenerateExamQuestion(tool) => tool.prompt_fragment(),
        }
    }

    /// Validate `arguments` against the tool's input type, then run it.
    ///
    /// Validation failures come back as [`ToolError::InvalidInput`].
    pub async fn trigger(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Value,
    ) -> Result<ToolInvocation, ToolError> {
        match self {
            Self::ReadQuestion(tool) => {
                invoke(tool, ctx, arguments, ToolInput::ReadQuestion, ToolOutput::ReadQuestion).await
            }
            Self::GenerateExamQuestion(tool) => {
                invoke(
                    tool,
                    ctx,
                    arguments,
                    ToolInput::GenerateExamQuestion,
                    ToolOutput::GenerateExamQuestion,
                )
                .await
            }
        }
    }
}

async fn invoke<T: Tool>(
    tool: &T,
    ctx: &ToolContext,
    arguments: serde_json::Value,
    wrap_input: fn(T::Input) -> ToolInput,
    wrap_output: fn(T::Output) -> ToolOutput,
) -> Result<ToolInvocation, ToolError> {
    let input: T::Input = validate_input(arguments)?;
    let (output, rendered) = tool.trigger(ctx, &input).await?;
    Ok(ToolInvocation {
        input: wrap_input(input),
        output: wrap_output(output),
        rendered,
    })
}

/// Name-keyed table of the tools offered to the model.
///
/// Built once and shared read-only by every session.
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new(tools: impl IntoIterator<Item = RegisteredTool>) -> Self {
        Self {
            tools: tools.into_iter().map(|tool| (tool.name(), tool)).collect(),
        }
    }

    /// Every built-in tool. Generation calls retry with `backoff` and give up
    /// after `max_attempts` unparseable replies.
    pub fn builtin(max_attempts: u32, backoff: Arc<dyn BackoffStrategy>) -> Self {
        Self::new([
            RegisteredTool::ReadQuestion(ReadQuestionTool),
            RegisteredTool::GenerateExamQuestion(
                GenerateExamQuestionTool::new(max_attempts).with_backoff(backoff),
            ),
        ])
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Tool catalog for a completion request, ordered by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(RegisteredTool::definition).collect()
    }

    /// Usage guidance for the system prompt, ordered by name.
    pub fn prompt_fragments(&self) -> Vec<&str> {
        self.tools.values().map(RegisteredTool::prompt_fragment).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tools.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}
