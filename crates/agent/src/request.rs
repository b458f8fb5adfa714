//! Completion request construction.

use hizen_core::message::{Conversation, Message};
use hizen_core::provider::{CompletionRequest, ModelConfig};
use hizen_tools::ToolRegistry;

pub const BASE_PROMPT: &str = "You are Hizen, a patient tutor helping a student work \
through exam questions. Guide the student toward the answer with hints and short \
explanations before revealing it, and keep replies concise. Answer in the language \
the student writes in.";

/// The system prompt: the override if one is configured, otherwise the
/// base prompt followed by each tool's usage guidance.
pub fn developer_prompt(system_prompt_override: Option<&str>, registry: &ToolRegistry) -> String {
    if let Some(prompt) = system_prompt_override {
        return prompt.to_string();
    }

    let fragments = registry.prompt_fragments();
    if fragments.is_empty() {
        return BASE_PROMPT.to_string();
    }

    let mut prompt = String::from(BASE_PROMPT);
    prompt.push_str("\n\n## Tools\n");
    for fragment in fragments {
        prompt.push_str("\n- ");
        prompt.push_str(fragment);
    }
    prompt
}

/// Developer prompt first, then the conversation as it stands.
pub fn build_request(
    model: &ModelConfig,
    prompt: &str,
    conversation: &Conversation,
    registry: &ToolRegistry,
) -> CompletionRequest {
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(Message::developer(prompt));
    messages.extend(conversation.messages.iter().cloned());

    CompletionRequest {
        model: model.clone(),
        messages,
        tools: registry.definitions(),
    }
}
