//! OpenAI-compatible streaming completion provider.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM and any endpoint exposing a
//! streaming `/v1/chat/completions`.
//!
//! The provider is deliberately thin: it builds the request body, retries
//! the initial request according to the caller's backoff strategy, and then
//! forwards every SSE chunk as a raw [`StreamFragment`]. Reassembling
//! partial tool calls is the agent's job, not the transport's.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use hizen_core::error::ProviderError;
use hizen_core::message::{ContentPart, Message, Role};
use hizen_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        // No overall timeout: a stream may legitimately run for minutes.
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Build from application config.
    pub fn from_config(config: &hizen_config::AppConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("no API key configured".into()))?;
        Ok(Self::new("openai", &config.base_url, api_key))
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages.iter().map(ApiMessage::from_message).collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function",
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    /// Build the streaming chat-completions request body.
    fn build_body(request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model.model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if request.model.thinking_enabled {
            body["reasoning_effort"] = serde_json::json!("medium");
        }

        if let Some(temperature) = request.model.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        if let Some(max_tokens) = request.model.max_tokens {
            body["max_completion_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    /// Send the request once and classify the HTTP outcome.
    async fn send_once(&self, body: &serde_json::Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start_stream(
        &self,
        request: CompletionRequest,
        backoff: Arc<dyn BackoffStrategy>,
        hook: Option<&dyn PreCallHook>,
    ) -> Result<FragmentReceiver, ProviderError> {
        if let Some(hook) = hook {
            hook.before_first_attempt(&self.name, &request, &backoff);
        }

        let body = Self::build_body(&request);
        debug!(
            provider = %self.name,
            model = %request.model.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let mut retry = 0;
        let response = loop {
            match self.send_once(&body).await {
                Ok(response) => break response,
                Err(e) => {
                    retry += 1;
                    match backoff.delay_for(retry, &e) {
                        Some(delay) => {
                            warn!(
                                provider = %self.name,
                                error = %e,
                                retry,
                                delay_ms = delay.as_millis() as u64,
                                strategy = backoff.name(),
                                "Completion request failed, backing off"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(e),
                    }
                }
            }
        };

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream and forward each chunk as it arrives
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = SseBuffer::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for event in buffer.push(&bytes) {
                    match event {
                        SseEvent::Done => return,
                        SseEvent::Data(data) => match parse_payload(&data) {
                            SsePayload::Fragment(fragment) => {
                                if tx.send(Ok(fragment)).await.is_err() {
                                    return; // receiver dropped
                                }
                            }
                            SsePayload::Error(e) => {
                                warn!(provider = %provider_name, error = %e, "Provider reported an error mid-stream");
                                let _ = tx.send(Err(e)).await;
                                return;
                            }
                            SsePayload::Unparseable(e) => {
                                trace!(
                                    provider = %provider_name,
                                    data = %data,
                                    error = %e,
                                    "Ignoring unparseable SSE chunk"
                                );
                            }
                        },
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// One meaningful SSE line.
#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Data(String),
    Done,
}

/// Splits an SSE byte stream into `data:` payloads, across chunk boundaries.
#[derive(Debug, Default)]
struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    /// Lines are decoded only once complete, so a multi-byte character
    /// split across network chunks survives intact.
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(line_end) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            // Skip blank separators and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if data == "[DONE]" {
                    events.push(SseEvent::Done);
                } else if !data.is_empty() {
                    events.push(SseEvent::Data(data.to_string()));
                }
            }
        }

        events
    }
}

/// What one `data:` payload carried.
#[derive(Debug)]
enum SsePayload {
    Fragment(StreamFragment),
    Error(ProviderError),
    Unparseable(serde_json::Error),
}

/// `{"error": ...}` sent in place of a chunk once the stream is open.
#[derive(Debug, Deserialize)]
struct StreamErrorEnvelope {
    error: serde_json::Value,
}

/// Every fragment field has a default, so error payloads must be caught
/// before they deserialize into an empty fragment.
fn parse_payload(data: &str) -> SsePayload {
    if let Ok(envelope) = serde_json::from_str::<StreamErrorEnvelope>(data)
        && !envelope.error.is_null()
    {
        let message = match &envelope.error {
            serde_json::Value::String(message) => message.clone(),
            error => error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        };
        return SsePayload::Error(ProviderError::StreamInterrupted(format!(
            "provider error: {message}"
        )));
    }

    match serde_json::from_str::<StreamFragment>(data) {
        Ok(fragment) => SsePayload::Fragment(fragment),
        Err(e) => SsePayload::Unparseable(e),
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Vec<ApiContentPart>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn from_message(message: &Message) -> Self {
        match message.role {
            Role::Developer | Role::Tool => Self {
                role: message.role.as_str(),
                content: Some(text_parts(message)),
                tool_calls: None,
                tool_call_id: message.tool_call_id.clone(),
            },
            Role::User => Self {
                role: "user",
                content: Some(
                    message
                        .contents
                        .iter()
                        .filter_map(|part| match part {
                            ContentPart::Text { text } => Some(ApiContentPart::Text { text: text.clone() }),
                            ContentPart::Image { url } => Some(ApiContentPart::ImageUrl {
                                image_url: ApiImageUrl {
                                    url: url.clone(),
                                    detail: "auto",
                                },
                            }),
                            ContentPart::ToolCall(_) => None,
                        })
                        .collect(),
                ),
                tool_calls: None,
                tool_call_id: None,
            },
            Role::Assistant => {
                let tool_calls: Vec<ApiToolCall> = message
                    .tool_calls()
                    .map(|tc| ApiToolCall {
                        id: tc.id.clone(),
                        r#type: "function",
                        function: ApiFunction {
                            name: tc.tool_name.clone(),
                            arguments: tc.arguments.clone(),
                        },
                    })
                    .collect();

                // Vendors reject empty text alongside tool calls
                let content_is_empty = !tool_calls.is_empty()
                    && message
                        .contents
                        .iter()
                        .all(|part| !matches!(part, ContentPart::Text { text } if !text.is_empty()));

                Self {
                    role: "assistant",
                    content: (!content_is_empty).then(|| text_parts(message)),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                }
            }
        }
    }
}

fn text_parts(message: &Message) -> Vec<ApiContentPart> {
    message
        .contents
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(ApiContentPart::Text { text: text.clone() }),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentPart {
    Text { text: String },
    ImageUrl { image_url: ApiImageUrl },
}

#[derive(Debug, Serialize)]
struct ApiImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    r#type: &'static str,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: &'static str,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}
