//! Message and Conversation domain types.
//!
//! Messages are immutable once built: the driver only ever appends new
//! messages to a conversation, it never edits one in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions from the application (system prompt)
    Developer,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Developer => "developer",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool invocation requested by the model.
///
/// `arguments` is the raw JSON text exactly as the model produced it; it is
/// only parsed when the call is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub id: String,
    pub tool_name: String,
    pub arguments: String,
}

/// One piece of a message's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { url: String },
    ToolCall(ToolCallPart),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// When the message was produced
    pub timestamp: DateTime<Utc>,

    /// Ordered content parts
    pub contents: Vec<ContentPart>,

    /// For tool messages, the tool call this result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// For tool messages, the name of the tool that produced the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    /// Create a user message: one text part (possibly empty) followed by one
    /// image part per URL, in input order.
    pub fn user<S: AsRef<str>>(text: impl Into<String>, image_urls: &[S]) -> Self {
        let mut contents = Vec::with_capacity(1 + image_urls.len());
        contents.push(ContentPart::text(text));
        contents.extend(image_urls.iter().map(|url| ContentPart::Image {
            url: url.as_ref().to_string(),
        }));

        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            timestamp: Utc::now(),
            contents,
            tool_call_id: None,
            tool_name: None,
        }
    }

    /// Create a text-only user message.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user::<&str>(text, &[])
    }

    /// Create a developer (system prompt) message.
    pub fn developer(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Developer,
            timestamp: Utc::now(),
            contents: vec![ContentPart::text(text)],
            tool_call_id: None,
            tool_name: None,
        }
    }

    /// Create an assistant message from an assembled turn: the text part
    /// first, then the tool calls in the order the model requested them.
    pub fn assistant(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        text: impl Into<String>,
        tool_calls: Vec<ToolCallPart>,
    ) -> Self {
        let mut contents = Vec::with_capacity(1 + tool_calls.len());
        contents.push(ContentPart::text(text));
        contents.extend(tool_calls.into_iter().map(ContentPart::ToolCall));

        Self {
            id: id.into(),
            role: Role::Assistant,
            timestamp,
            contents,
            tool_call_id: None,
            tool_name: None,
        }
    }

    /// Create a tool result message answering `call`.
    pub fn tool_result(
        call: &ToolCallPart,
        result: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: call.id.clone(),
            role: Role::Tool,
            timestamp,
            contents: vec![ContentPart::text(result)],
            tool_call_id: Some(call.id.clone()),
            tool_name: Some(call.tool_name.clone()),
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.contents
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool calls carried by this message, in request order.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.contents.iter().filter_map(|part| match part {
            ContentPart::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    /// Image URLs carried by this message, in input order.
    pub fn image_urls(&self) -> impl Iterator<Item = &str> {
        self.contents.iter().filter_map(|part| match part {
            ContentPart::Image { url } => Some(url.as_str()),
            _ => None,
        })
    }
}

/// A conversation is an ordered, append-only sequence of messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Session this conversation belongs to
    pub session_id: String,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation for a session.
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Restore a conversation from previously persisted messages.
    pub fn from_messages(session_id: impl Into<String>, messages: Vec<Message>) -> Self {
        let mut conv = Self::new(session_id);
        conv.messages = messages;
        conv
    }

    /// Append a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Append several messages, keeping their order.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.updated_at = Utc::now();
        self.messages.extend(messages);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages with the given role, in conversation order.
    pub fn by_role(&self, role: Role) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.role == role)
    }
}
