//! Read question tool — shows the model the question the student is on.

use async_trait::async_trait;
use hizen_core::error::ToolError;
use hizen_core::memory::QuestionMemory;
use hizen_core::tool::{Tool, ToolContext};
use serde::{Deserialize, Serialize};

pub const NAME: &str = "read-question";

/// Takes no arguments. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadQuestionInput {}

pub struct ReadQuestionTool;

#[async_trait]
impl Tool for ReadQuestionTool {
    type Input = ReadQuestionInput;
    type Output = QuestionMemory;

    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &str {
        "Read the exam question the student is currently working on, including \
         its selections (for objective questions), the answer and the solution."
    }

    fn prompt_fragment(&self) -> &str {
        "Use `read-question` whenever the student refers to \"this question\" or \
         asks for a hint, an explanation or the answer. Never guess the question."
    }

    fn parameters_schema(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "type": "object",
            "properties": {}
        }))
    }

    async fn trigger(
        &self,
        ctx: &ToolContext,
        _input: &ReadQuestionInput,
    ) -> Result<(QuestionMemory, String), ToolError> {
        let question = ctx
            .memory
            .read_memory()
            .await
            .map_err(|source| ToolError::Memory {
                tool_name: NAME.into(),
                source,
            })?;

        let rendered = render_question(&question);
        Ok((question, rendered))
    }
}

/// Plain-text rendering shared by every tool that returns a question.
pub(crate) fn render_question(question: &QuestionMemory) -> String {
    let mut out = format!("Question:\n{}\n", question.question_prompt);

    if let Some(selections) = &question.question_selections {
        out.push_str("\nSelections:\n");
        for (i, selection) in selections.iter().enumerate() {
            out.push_str(&format!("{}. {selection}\n", i + 1));
        }
    }

    out.push_str(&format!("\nAnswer:\n{}\n", question.answer));
    out.push_str(&format!("\nSolution:\n{}", question.solution));
    out
}
