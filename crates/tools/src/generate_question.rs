//! Exam question generation tool — asks the model for a new (or revised)
//! question and parses it out of tagged text.
//!
//! The model answers in free text with `<question_prompt>`, `<answer>`,
//! `<solution>` and, for objective questions, `<question_selections_1>`
//! through `<question_selections_5>` tags. When a reply does not parse, the
//! reply and the parse failure are fed back as a follow-up turn so the model
//! can correct itself, up to `max_attempts` calls in total.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use hizen_core::error::{ProviderError, ToolError};
use hizen_core::memory::{QuestionMemory, SELECTION_COUNT};
use hizen_core::message::Message;
use hizen_core::provider::{BackoffStrategy, CompletionProvider, CompletionRequest};
use hizen_core::tool::{Tool, ToolContext};
use hizen_providers::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::read_question::render_question;

pub const NAME: &str = "generate-exam-question";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Subjective,
    Objective,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subjective => "subjective",
            Self::Objective => "objective",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateQuestionInput {
    pub question_type: QuestionType,

    pub textbook_concept: String,

    pub good_question_example: String,

    /// Revision instructions or a summary of the chat so far. When present
    /// the model revises instead of starting from scratch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

pub struct GenerateExamQuestionTool {
    max_attempts: u32,
    backoff: Arc<dyn BackoffStrategy>,
}

impl GenerateExamQuestionTool {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Arc::new(ExponentialBackoff::default()),
        }
    }

    /// Retry policy for each generation call.
    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffStrategy>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for GenerateExamQuestionTool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

#[async_trait]
impl Tool for GenerateExamQuestionTool {
    type Input = GenerateQuestionInput;
    type Output = QuestionMemory;

    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &str {
        "Generate a new exam question that tests a textbook concept, or revise \
         an existing question according to the given context."
    }

    fn prompt_fragment(&self) -> &str {
        "Use `generate-exam-question` when the student asks for a similar, \
         easier or harder practice question. Pass the concept being tested, the \
         current question as the example, and any special requests as context."
    }

    fn parameters_schema(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "type": "object",
            "properties": {
                "question_type": {
                    "type": "string",
                    "enum": ["subjective", "objective"],
                    "description": "Short-answer (subjective) or five-choice (objective)"
                },
                "textbook_concept": {
                    "type": "string",
                    "description": "The textbook concept the question must test"
                },
                "good_question_example": {
                    "type": "string",
                    "description": "A well-formed question to use as a reference"
                },
                "context": {
                    "type": "string",
                    "description": "Special requests, a chat summary, or an existing question to revise"
                }
            },
            "required": ["question_type", "textbook_concept", "good_question_example"]
        }))
    }

    async fn trigger(
        &self,
        ctx: &ToolContext,
        input: &GenerateQuestionInput,
    ) -> Result<(QuestionMemory, String), ToolError> {
        let mut messages = vec![Message::user_text(render_prompt(input))];
        let mut last_failure = String::new();

        for attempt in 1..=self.max_attempts {
            let request = CompletionRequest {
                model: ctx.vendor.model.clone(),
                messages: messages.clone(),
                tools: Vec::new(),
            };

            let text = collect_text(ctx.vendor.provider.as_ref(), request, self.backoff.clone())
                .await
                .map_err(|source| ToolError::Provider {
                    tool_name: NAME.into(),
                    source,
                })?;

            match parse_question(input.question_type, &text) {
                Ok(question) => {
                    debug!(attempt, question_type = input.question_type.as_str(), "Generated exam question");
                    let rendered = render_question(&question);
                    return Ok((question, rendered));
                }
                Err(failure) => {
                    warn!(attempt, max_attempts = self.max_attempts, %failure, "Generated question did not parse");
                    messages.push(Message::assistant(
                        uuid::Uuid::new_v4().to_string(),
                        Utc::now(),
                        text,
                        Vec::new(),
                    ));
                    messages.push(Message::user_text(failure.clone()));
                    last_failure = failure;
                }
            }
        }

        Err(ToolError::ExecutionFailed {
            tool_name: NAME.into(),
            reason: format!(
                "no valid question after {} attempts: {last_failure}",
                self.max_attempts
            ),
        })
    }
}

/// Drain a completion stream, keeping only the text.
async fn collect_text(
    provider: &dyn CompletionProvider,
    request: CompletionRequest,
    backoff: Arc<dyn BackoffStrategy>,
) -> Result<String, ProviderError> {
    let mut rx = provider.start_stream(request, backoff, None).await?;
    let mut text = String::new();

    while let Some(fragment) = rx.recv().await {
        let fragment = fragment?;
        if let Some(content) = fragment.choice().and_then(|c| c.delta.content.as_deref()) {
            text.push_str(content);
        }
    }

    Ok(text)
}

fn render_prompt(input: &GenerateQuestionInput) -> String {
    let task = match &input.context {
        Some(_) => {
            "Revise the existing question according to the context below. Do not \
             write a brand new question; the context takes precedence over the \
             other inputs."
        }
        None => {
            "Write a completely new exam question that directly tests the textbook \
             concept, in the style of the example."
        }
    };

    let format = match input.question_type {
        QuestionType::Subjective => {
            "The question must require a short answer of a few words or one \
             sentence.\n\nReply with exactly these tags:\n\
             <question_prompt>...</question_prompt>\n\
             <answer>...</answer>\n\
             <solution>...</solution>"
        }
        QuestionType::Objective => {
            "The question must have exactly five selections with a single correct \
             one.\n\nReply with exactly these tags:\n\
             <question_prompt>...</question_prompt>\n\
             <question_selections_1>...</question_selections_1>\n\
             <question_selections_2>...</question_selections_2>\n\
             <question_selections_3>...</question_selections_3>\n\
             <question_selections_4>...</question_selections_4>\n\
             <question_selections_5>...</question_selections_5>\n\
             <answer>the number (1-5) of the correct selection</answer>\n\
             <solution>...</solution>"
        }
    };

    let mut prompt = format!(
        "You are an expert at writing exam questions for students.\n\n{task}\n\n\
         Textbook concept:\n```\n{}\n```\n\n\
         Example of a good question:\n```\n{}\n```\n\n\
         Question type: {}\n",
        input.textbook_concept,
        input.good_question_example,
        input.question_type.as_str(),
    );

    if let Some(context) = &input.context {
        prompt.push_str(&format!("\nContext:\n```\n{context}\n```\n"));
    }

    prompt.push('\n');
    prompt.push_str(format);
    prompt
}

/// Parse a tagged reply. The error is phrased as feedback for the model.
pub fn parse_question(question_type: QuestionType, text: &str) -> Result<QuestionMemory, String> {
    let question_prompt = require_tag(text, "question_prompt", "a question prompt")?;

    let question_selections = match question_type {
        QuestionType::Subjective => None,
        QuestionType::Objective => {
            let mut selections: [String; SELECTION_COUNT] = Default::default();
            for (i, slot) in selections.iter_mut().enumerate() {
                let tag = format!("question_selections_{}", i + 1);
                *slot = require_tag(text, &tag, "a question selection")?.to_string();
            }
            Some(selections)
        }
    };

    let answer = require_tag(text, "answer", "an answer")?;
    let answer = match question_type {
        QuestionType::Subjective => answer.to_string(),
        QuestionType::Objective => parse_selection_number(answer)
            .ok_or_else(|| {
                "failed to parse the output; your response should contain a valid \
                 selection number (1-5) within <answer> tags"
                    .to_string()
            })?
            .to_string(),
    };

    let solution = require_tag(text, "solution", "a solution")?;

    Ok(QuestionMemory {
        question_prompt: question_prompt.to_string(),
        question_selections,
        answer,
        solution: solution.to_string(),
    })
}

fn require_tag<'a>(text: &'a str, tag: &str, what: &str) -> Result<&'a str, String> {
    extract_tag(text, tag).ok_or_else(|| {
        format!("failed to parse the output; your response should contain {what} within <{tag}> tags")
    })
}

/// Trimmed contents of the first `<tag>...</tag>` pair.
fn extract_tag<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = start + text[start..].find(&close)?;
    Some(text[start..end].trim())
}

/// Leading integer of `answer`, if it names one of the selections.
fn parse_selection_number(answer: &str) -> Option<usize> {
    let digits: String = answer.chars().take_while(|c| c.is_ascii_digit()).collect();
    let number: usize = digits.parse().ok()?;
    (1..=SELECTION_COUNT).contains(&number).then_some(number)
}
