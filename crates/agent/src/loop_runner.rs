//! The turn loop.
//!
//! [`ChatAgent`] is built once per process and holds what every session
//! shares: the vendor, the tool registry and the settings. Each session gets
//! its own [`ChatDriver`] carrying that session's handlers.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use hizen_config::AppConfig;
use hizen_core::error::ProviderError;
use hizen_core::memory::MemoryProvider;
use hizen_core::message::{Conversation, Message, ToolCallPart};
use hizen_core::provider::{BackoffStrategy, CompletionRequest, PreCallHook};
use hizen_core::tool::{ToolContext, Vendor};
use hizen_providers::{ExponentialBackoff, OpenAiCompatProvider};
use hizen_tools::ToolRegistry;
use tracing::{debug, info, warn};

use crate::dispatcher::ToolDispatcher;
use crate::event::{EventBus, EventKind, LifecycleEvent};
use crate::handler::{
    ErrorHandler, ErrorSink, EventHandler, MessageHandler, StreamingHandler, deliver_message,
};
use crate::request::{build_request, developer_prompt};
use crate::stream_assembler::{AssembledTurn, assemble};

/// Default round cap, one round being one completion call.
pub const DEFAULT_MAX_ROUNDS: u32 = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    /// `None` lets the model decide when to stop
    pub max_rounds: Option<u32>,

    pub system_prompt_override: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_rounds: Some(DEFAULT_MAX_ROUNDS),
            system_prompt_override: None,
        }
    }
}

impl From<&hizen_config::AgentConfig> for AgentSettings {
    fn from(config: &hizen_config::AgentConfig) -> Self {
        Self {
            max_rounds: config.round_limit(),
            system_prompt_override: config.system_prompt_override.clone(),
        }
    }
}

/// How `send` ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStatus {
    /// The model answered without calling tools.
    Done,
    /// A completion call failed; the failed turn added nothing.
    Failed { error: String },
    /// The round cap was hit while the model was still calling tools.
    RoundLimitReached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// Completion calls made
    pub rounds: u32,
    /// The final assistant text, when the loop ended with `Done`
    pub final_text: Option<String>,
    pub status: SendStatus,
}

impl SendOutcome {
    pub fn is_done(&self) -> bool {
        self.status == SendStatus::Done
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    Idle,
    AwaitingCompletion,
    HasAssistantTurn,
    DispatchingTools,
    Done,
    Failed,
}

struct StateTracker {
    session_id: String,
    state: TurnState,
}

impl StateTracker {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            state: TurnState::Idle,
        }
    }

    fn advance(&mut self, next: TurnState) {
        debug!(session_id = %self.session_id, from = ?self.state, to = ?next, "Turn state");
        self.state = next;
    }
}

/// Process-wide factory for session drivers.
pub struct ChatAgent {
    vendor: Vendor,
    registry: Arc<ToolRegistry>,
    settings: AgentSettings,
    backoff: Arc<dyn BackoffStrategy>,
}

impl ChatAgent {
    pub fn new(vendor: Vendor, registry: Arc<ToolRegistry>, settings: AgentSettings) -> Self {
        Self {
            vendor,
            registry,
            settings,
            backoff: Arc::new(ExponentialBackoff::default()),
        }
    }

    /// Build the whole stack from the application config.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let provider = OpenAiCompatProvider::from_config(config)?;
        let backoff: Arc<dyn BackoffStrategy> =
            Arc::new(ExponentialBackoff::from_config(&config.backoff));
        let registry = ToolRegistry::builtin(config.question_generation.max_attempts, backoff.clone());

        let vendor = Vendor {
            provider: Arc::new(provider),
            model: config.model_config(),
        };

        Ok(Self::new(vendor, Arc::new(registry), AgentSettings::from(&config.agent)).with_backoff(backoff))
    }

    /// Default retry policy handed to new drivers.
    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffStrategy>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn driver(&self, session_id: impl Into<String>) -> ChatDriver {
        ChatDriver {
            session_id: session_id.into(),
            vendor: self.vendor.clone(),
            registry: self.registry.clone(),
            settings: self.settings.clone(),
            backoff: self.backoff.clone(),
            errors: ErrorSink::default(),
            event_handler: None,
            message_handler: None,
            streaming_handler: None,
        }
    }
}

/// Runs the turn loop for one session. Turns never overlap: `send` takes
/// the conversation mutably.
pub struct ChatDriver {
    session_id: String,
    vendor: Vendor,
    registry: Arc<ToolRegistry>,
    settings: AgentSettings,
    backoff: Arc<dyn BackoffStrategy>,
    errors: ErrorSink,
    event_handler: Option<Arc<dyn EventHandler>>,
    message_handler: Option<Arc<dyn MessageHandler>>,
    streaming_handler: Option<Arc<dyn StreamingHandler>>,
}

impl ChatDriver {
    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.errors = ErrorSink::new(Some(handler));
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn with_message_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.message_handler = Some(handler);
        self
    }

    pub fn with_streaming_handler(mut self, handler: Arc<dyn StreamingHandler>) -> Self {
        self.streaming_handler = Some(handler);
        self
    }

    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffStrategy>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn events(&self) -> EventBus {
        EventBus::new(self.event_handler.clone(), self.errors.clone())
    }

    async fn deliver(&self, message: &Message) {
        deliver_message(self.message_handler.as_deref(), &self.errors, message).await;
    }

    /// Append a user message and run rounds until the model stops calling
    /// tools, a completion call fails, or the round cap is hit.
    ///
    /// Failures are reported through the handlers and the returned outcome;
    /// this never returns an error.
    pub async fn send<S: AsRef<str>>(
        &self,
        memory: Arc<dyn MemoryProvider>,
        conversation: &mut Conversation,
        text: &str,
        image_urls: &[S],
    ) -> SendOutcome {
        let mut state = StateTracker::new(&self.session_id);
        let events = self.events();
        let ctx = ToolContext {
            memory,
            vendor: self.vendor.clone(),
        };
        let dispatcher = ToolDispatcher::new(&self.registry, &events);

        let user = Message::user(text, image_urls);
        self.deliver(&user).await;
        conversation.push(user);

        info!(
            session_id = %self.session_id,
            messages = conversation.len(),
            "Processing user message"
        );

        let mut rounds = 0u32;
        loop {
            if let Some(limit) = self.settings.max_rounds
                && rounds >= limit
            {
                warn!(session_id = %self.session_id, rounds, "Round limit reached; stopping");
                return SendOutcome {
                    rounds,
                    final_text: None,
                    status: SendStatus::RoundLimitReached,
                };
            }
            rounds += 1;

            state.advance(TurnState::AwaitingCompletion);
            let pre_id = events.emit(EventKind::PreProcessing).await;

            let turn = match self.complete(conversation, &events).await {
                Ok(turn) => turn,
                Err(e) => {
                    state.advance(TurnState::Failed);
                    let error = e.to_string();
                    events
                        .emit_paired(
                            EventKind::PostProcessing {
                                error: Some(error.clone()),
                            },
                            &pre_id,
                        )
                        .await;
                    self.errors.report("calling the LLM", &error).await;
                    return SendOutcome {
                        rounds,
                        final_text: None,
                        status: SendStatus::Failed { error },
                    };
                }
            };

            state.advance(TurnState::HasAssistantTurn);
            events
                .emit_paired(EventKind::PostProcessing { error: None }, &pre_id)
                .await;

            let final_text = turn.text.clone();
            let tool_calls: Vec<ToolCallPart> = turn.tool_calls.clone();
            let assistant = Message::assistant(turn.id, turn.timestamp, turn.text, turn.tool_calls);
            self.deliver(&assistant).await;

            if tool_calls.is_empty() {
                state.advance(TurnState::Done);
                conversation.push(assistant);
                info!(session_id = %self.session_id, rounds, "Turn complete");
                return SendOutcome {
                    rounds,
                    final_text: Some(final_text),
                    status: SendStatus::Done,
                };
            }

            state.advance(TurnState::DispatchingTools);
            debug!(session_id = %self.session_id, tool_count = tool_calls.len(), "Dispatching tool calls");
            let results = dispatcher.dispatch_all(&ctx, &tool_calls).await;
            for message in &results {
                self.deliver(message).await;
            }

            conversation.push(assistant);
            conversation.extend(results);
        }
    }

    /// One streaming completion call, bracketed by llm-generation events
    /// when the provider reached its first attempt.
    async fn complete(
        &self,
        conversation: &Conversation,
        events: &EventBus,
    ) -> Result<AssembledTurn, ProviderError> {
        let prompt = developer_prompt(self.settings.system_prompt_override.as_deref(), &self.registry);
        let request = build_request(&self.vendor.model, &prompt, conversation, &self.registry);

        let hook = GenerationHook::default();
        let mut stream = self
            .vendor
            .provider
            .start_stream(request, self.backoff.clone(), Some(&hook))
            .await?;

        let generation = hook.take();
        let pre_id = match &generation {
            Some(g) => Some(
                events
                    .publish(
                        LifecycleEvent::new(EventKind::PreLlmGeneration {
                            provider: g.provider.clone(),
                            model: g.model.clone(),
                            message_count: g.message_count,
                            backoff: g.backoff.clone(),
                        })
                        .at(g.started_at),
                    )
                    .await,
            ),
            None => None,
        };

        let turn = assemble(&mut stream, self.streaming_handler.as_deref(), &self.errors).await?;

        if let (Some(pre_id), Some(g)) = (pre_id, generation) {
            events
                .emit_paired(
                    EventKind::PostLlmGeneration {
                        completion: turn.completion.clone(),
                        start_timestamp: g.started_at,
                        end_timestamp: Utc::now(),
                        backoff: g.backoff,
                    },
                    &pre_id,
                )
                .await;
        }

        Ok(turn)
    }
}

struct Generation {
    provider: String,
    model: String,
    message_count: usize,
    backoff: Arc<dyn BackoffStrategy>,
    started_at: DateTime<Utc>,
}

/// Captures the provider's first attempt so the events can be emitted
/// from async context afterwards.
#[derive(Default)]
struct GenerationHook {
    captured: Mutex<Option<Generation>>,
}

impl GenerationHook {
    fn take(&self) -> Option<Generation> {
        self.captured.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl PreCallHook for GenerationHook {
    fn before_first_attempt(
        &self,
        provider: &str,
        request: &CompletionRequest,
        backoff: &Arc<dyn BackoffStrategy>,
    ) {
        if let Ok(mut slot) = self.captured.lock() {
            *slot = Some(Generation {
                provider: provider.to_string(),
                model: request.model.model.clone(),
                message_count: request.messages.len(),
                backoff: backoff.clone(),
                started_at: Utc::now(),
            });
        }
    }
}
