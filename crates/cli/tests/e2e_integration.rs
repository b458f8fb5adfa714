//! End-to-end tests for the Hizen tutoring agent.
//!
//! These drive the full pipeline: config-built settings, the closed tool
//! registry, session memory, the turn loop and every handler, against a
//! scripted streaming provider.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hizen_agent::{
    AgentSettings, ChatAgent, ErrorHandler, ErrorReport, EventHandler, EventKind, LifecycleEvent,
    MessageHandler, PostToolCallState, SendStatus, StreamingHandler,
};
use hizen_config::AppConfig;
use hizen_core::error::ProviderError;
use hizen_core::memory::{MemoryProvider, QuestionMemory};
use hizen_core::message::{Conversation, Message, Role};
use hizen_core::provider::{
    BackoffStrategy, CompletionProvider, CompletionRequest, FragmentChoice, FragmentDelta,
    FragmentReceiver, FunctionDelta, ModelConfig, PreCallHook, StreamFragment, ToolCallDelta, Usage,
};
use hizen_core::tool::Vendor;
use hizen_memory::{FileMemory, SessionMemory};
use hizen_providers::ExponentialBackoff;
use hizen_tools::ToolRegistry;

const NO_IMAGES: &[&str] = &[];

// ── Scripted Provider ───────────────────────────────────────────────────

type Script = Vec<Result<StreamFragment, ProviderError>>;

/// Streams scripted fragment sequences, one per call, in order.
#[derive(Clone, Default)]
struct ScriptedProvider {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedProvider {
    fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            requests: Arc::default(),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, n: usize) -> CompletionRequest {
        self.requests.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn start_stream(
        &self,
        request: CompletionRequest,
        backoff: Arc<dyn BackoffStrategy>,
        hook: Option<&dyn PreCallHook>,
    ) -> Result<FragmentReceiver, ProviderError> {
        if let Some(hook) = hook {
            hook.before_first_attempt(self.name(), &request, &backoff);
        }
        self.requests.lock().unwrap().push(request);

        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_else(|| {
            panic!("ScriptedProvider exhausted after {} calls", self.calls())
        });

        // Deliver from a task so the assembler really waits on each fragment
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        tokio::spawn(async move {
            for fragment in script {
                if tx.send(fragment).await.is_err() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        });
        Ok(rx)
    }
}

fn fragment(id: &str, delta: FragmentDelta, finish_reason: Option<&str>) -> StreamFragment {
    StreamFragment {
        id: id.into(),
        created: 1_700_000_000,
        model: "e2e-model".into(),
        usage: None,
        choices: vec![FragmentChoice {
            delta,
            finish_reason: finish_reason.map(Into::into),
        }],
    }
}

/// A text reply split into the given chunks, then finish and usage.
fn text_reply(id: &str, chunks: &[&str]) -> Script {
    let mut script: Script = chunks
        .iter()
        .map(|chunk| {
            Ok(fragment(
                id,
                FragmentDelta {
                    content: Some(chunk.to_string()),
                    tool_calls: None,
                },
                None,
            ))
        })
        .collect();
    script.push(Ok(fragment(id, FragmentDelta::default(), Some("stop"))));
    script.push(Ok(StreamFragment {
        id: id.into(),
        usage: Some(Usage {
            prompt_tokens: 20,
            completion_tokens: 5,
            total_tokens: 25,
        }),
        ..Default::default()
    }));
    script
}

/// One tool call at `index` whose arguments arrive in `argument_chunks`.
fn tool_call_fragments(
    id: &str,
    index: u32,
    call_id: &str,
    name: &str,
    argument_chunks: &[&str],
) -> Script {
    let mut script = vec![Ok(fragment(
        id,
        FragmentDelta {
            content: None,
            tool_calls: Some(vec![ToolCallDelta {
                index,
                id: Some(call_id.into()),
                function: Some(FunctionDelta {
                    name: Some(name.into()),
                    arguments: None,
                }),
            }]),
        },
        None,
    ))];
    for chunk in argument_chunks {
        script.push(Ok(fragment(
            id,
            FragmentDelta {
                content: None,
                tool_calls: Some(vec![ToolCallDelta {
                    index,
                    id: None,
                    function: Some(FunctionDelta {
                        name: None,
                        arguments: Some(chunk.to_string()),
                    }),
                }]),
            },
            None,
        )));
    }
    script
}

fn finish(id: &str, reason: &str) -> Result<StreamFragment, ProviderError> {
    Ok(fragment(id, FragmentDelta::default(), Some(reason)))
}

// ── Recording Handler ──────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    errors: Mutex<Vec<String>>,
    events: Mutex<Vec<LifecycleEvent>>,
    messages: Mutex<Vec<Message>>,
    partials: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ErrorHandler for Recorder {
    async fn on_error(&self, report: &ErrorReport) -> anyhow::Result<()> {
        self.errors.lock().unwrap().push(report.to_string());
        Ok(())
    }
}

#[async_trait]
impl EventHandler for Recorder {
    async fn on_event(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        // Every event must serialize for downstream tracers
        serde_json::to_string(event)?;
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for Recorder {
    async fn on_message(&self, message: &Message) -> anyhow::Result<()> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[async_trait]
impl StreamingHandler for Recorder {
    async fn on_partial(&self, _id: &str, _role: Role, partial: &str) -> anyhow::Result<()> {
        self.partials.lock().unwrap().push(partial.to_string());
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn build_agent(provider: &ScriptedProvider, settings: AgentSettings) -> ChatAgent {
    let backoff: Arc<dyn BackoffStrategy> = Arc::new(ExponentialBackoff::none());
    let vendor = Vendor {
        provider: Arc::new(provider.clone()),
        model: ModelConfig::new("e2e-model"),
    };
    ChatAgent::new(vendor, Arc::new(ToolRegistry::builtin(3, backoff.clone())), settings)
        .with_backoff(backoff)
}

fn objective_question() -> QuestionMemory {
    QuestionMemory {
        question_prompt: "Which planet is closest to the sun?".into(),
        question_selections: Some([
            "Venus".into(),
            "Mercury".into(),
            "Earth".into(),
            "Mars".into(),
            "Jupiter".into(),
        ]),
        answer: "2".into(),
        solution: "Mercury orbits at about 0.39 AU.".into(),
    }
}

fn assert_events_paired(events: &[LifecycleEvent]) {
    for (i, event) in events.iter().enumerate() {
        let pre_name = match &event.kind {
            EventKind::PostToolCall(_) => "pre-tool-call",
            EventKind::PostProcessing { .. } => "pre-processing",
            EventKind::PostLlmGeneration { .. } => "pre-llm-generation",
            _ => continue,
        };
        assert!(
            events[..i]
                .iter()
                .any(|e| e.id == event.id && e.kind.name() == pre_name),
            "{} event {} has no earlier {pre_name}",
            event.kind.name(),
            event.id
        );
    }
}

// ── Scenarios ───────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_hello_single_round() {
    let provider = ScriptedProvider::new(vec![text_reply("resp-1", &["Hello", "! Ready to ", "practice?"])]);
    let agent = build_agent(&provider, AgentSettings::default());
    let recorder = Arc::new(Recorder::default());
    let driver = agent
        .driver("e2e")
        .with_error_handler(recorder.clone())
        .with_event_handler(recorder.clone())
        .with_message_handler(recorder.clone())
        .with_streaming_handler(recorder.clone());

    let mut conversation = Conversation::new("e2e");
    let outcome = driver
        .send(Arc::new(SessionMemory::new()), &mut conversation, "hello", NO_IMAGES)
        .await;

    assert_eq!(outcome.status, SendStatus::Done);
    assert_eq!(outcome.rounds, 1);
    assert_eq!(outcome.final_text.as_deref(), Some("Hello! Ready to practice?"));

    assert_eq!(conversation.len(), 2);
    let user = &conversation.messages[0];
    assert_eq!(user.role, Role::User);
    assert_eq!(user.contents.len(), 1);
    let assistant = &conversation.messages[1];
    assert_eq!(assistant.text(), "Hello! Ready to practice?");
    assert_eq!(assistant.tool_calls().count(), 0);

    assert_eq!(*recorder.partials.lock().unwrap(), vec!["Hello", "! Ready to ", "practice?"]);
    assert_eq!(recorder.messages.lock().unwrap().len(), 2);
    assert!(recorder.errors.lock().unwrap().is_empty());

    let events = recorder.events();
    assert_events_paired(&events);
    match &events[2].kind {
        EventKind::PostLlmGeneration {
            completion,
            start_timestamp,
            end_timestamp,
            ..
        } => {
            assert_eq!(completion.id, "resp-1");
            assert_eq!(completion.usage.map(|u| u.total_tokens), Some(25));
            assert!(start_timestamp <= end_timestamp);
            assert_eq!(completion.choices[0].finish_reason, "stop");
        }
        other => panic!("Expected post-llm-generation, got {other:?}"),
    }
}

#[tokio::test]
async fn e2e_read_question_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("question.json");
    std::fs::write(&path, serde_json::to_string(&objective_question()).unwrap()).unwrap();

    let mut first = tool_call_fragments("resp-1", 0, "call_1", "read-question", &["{", "}"]);
    first.push(finish("resp-1", "tool_calls"));
    let provider = ScriptedProvider::new(vec![
        first,
        text_reply("resp-2", &["Think about which planet has the smallest orbit."]),
    ]);
    let agent = build_agent(&provider, AgentSettings::default());
    let recorder = Arc::new(Recorder::default());
    let driver = agent
        .driver("e2e")
        .with_event_handler(recorder.clone())
        .with_message_handler(recorder.clone());

    let memory: Arc<dyn MemoryProvider> = Arc::new(FileMemory::new(&path));
    let mut conversation = Conversation::new("e2e");
    let outcome = driver
        .send(memory, &mut conversation, "Can I get a hint?", NO_IMAGES)
        .await;

    assert!(outcome.is_done());
    assert_eq!(provider.calls(), 2);

    let roles: Vec<Role> = conversation.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);

    let tool_message = &conversation.messages[2];
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
    assert!(tool_message.text().contains("2. Mercury"));

    // The model sees the tool result on its second call
    let second = provider.request(1);
    assert_eq!(second.messages[0].role, Role::Developer);
    assert_eq!(second.messages.last().unwrap().text(), tool_message.text());

    let events = recorder.events();
    assert_events_paired(&events);
    let success = events.iter().any(|e| {
        matches!(e.kind, EventKind::PostToolCall(PostToolCallState::Success { .. }))
    });
    assert!(success);
}

#[tokio::test]
async fn e2e_generate_question_through_nested_completion() {
    let arguments = serde_json::json!({
        "question_type": "subjective",
        "textbook_concept": "Newton's second law",
        "good_question_example": "What force is needed to accelerate 2 kg at 3 m/s^2?"
    })
    .to_string();
    let (head, tail) = arguments.split_at(arguments.len() / 2);

    let mut first = tool_call_fragments("resp-1", 0, "call_gen", "generate-exam-question", &[head, tail]);
    first.push(finish("resp-1", "tool_calls"));

    let provider = ScriptedProvider::new(vec![
        first,
        // The tool's own completion call: first reply is malformed
        text_reply("gen-1", &["Here is a question without tags."]),
        text_reply(
            "gen-2",
            &[
                "<question_prompt>A 4 kg cart accelerates at 2 m/s^2. What net force acts on it?</question_prompt>",
                "<answer>8 N</answer><solution>F = ma = 4 x 2 = 8 N.</solution>",
            ],
        ),
        text_reply("resp-2", &["Here's a new practice question for you."]),
    ]);
    let agent = build_agent(&provider, AgentSettings::default());
    let recorder = Arc::new(Recorder::default());
    let driver = agent.driver("e2e").with_event_handler(recorder.clone());

    let mut conversation = Conversation::new("e2e");
    let outcome = driver
        .send(
            Arc::new(SessionMemory::new()),
            &mut conversation,
            "Give me a similar question",
            NO_IMAGES,
        )
        .await;

    assert!(outcome.is_done());
    assert_eq!(provider.calls(), 4);

    // The retry carried the malformed reply and the parse failure
    let retry = provider.request(2);
    assert_eq!(retry.messages.len(), 3);
    assert!(retry.messages[2].text().contains("<question_prompt>"));
    assert!(retry.tools.is_empty());

    let tool_message = &conversation.messages[2];
    assert!(tool_message.text().contains("What net force acts on it?"));
    assert!(tool_message.text().contains("Answer:\n8 N"));
    assert_events_paired(&recorder.events());
}

#[tokio::test]
async fn e2e_parallel_tool_calls_keep_order() {
    let memory = SessionMemory::with_question(objective_question());

    let mut first = tool_call_fragments("resp-1", 0, "call_a", "read-question", &["{}"]);
    first.extend(tool_call_fragments("resp-1", 1, "call_b", "no-such-tool", &["{}"]));
    first.extend(tool_call_fragments("resp-1", 2, "call_c", "read-question", &["{oops"]));
    first.push(finish("resp-1", "tool_calls"));

    let provider = ScriptedProvider::new(vec![first, text_reply("resp-2", &["Done."])]);
    let agent = build_agent(&provider, AgentSettings::default());
    let recorder = Arc::new(Recorder::default());
    let driver = agent.driver("e2e").with_event_handler(recorder.clone());

    let mut conversation = Conversation::new("e2e");
    let outcome = driver
        .send(Arc::new(memory), &mut conversation, "go", NO_IMAGES)
        .await;
    assert!(outcome.is_done());

    let tool_messages: Vec<&Message> = conversation.by_role(Role::Tool).collect();
    let ids: Vec<&str> = tool_messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["call_a", "call_b", "call_c"]);
    assert!(tool_messages[0].text().starts_with("Question:"));
    assert_eq!(tool_messages[1].text(), "[FAILURE] Unknown tool name: no-such-tool");
    assert!(tool_messages[2].text().starts_with("[FAILURE] Unable to parse arguments: "));

    let types: Vec<&str> = recorder.events().iter().map(|e| e.kind.name()).collect();
    assert_eq!(types.iter().filter(|t| **t == "invalid-tool-name").count(), 1);
    assert_eq!(types.iter().filter(|t| **t == "invalid-tool-json-arguments").count(), 1);
}

#[tokio::test]
async fn e2e_settings_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
model = "gpt-4o-mini"

[agent]
max_rounds = 1
system_prompt_override = "You are a terse tutor."
"#,
    )
    .unwrap();
    let config = AppConfig::load_from(&path).unwrap();

    let mut looping = tool_call_fragments("resp-1", 0, "call_1", "read-question", &["{}"]);
    looping.push(finish("resp-1", "tool_calls"));
    let provider = ScriptedProvider::new(vec![looping]);
    let agent = build_agent(&provider, AgentSettings::from(&config.agent));

    let mut conversation = Conversation::new("e2e");
    let outcome = agent
        .driver("e2e")
        .send(
            Arc::new(SessionMemory::with_question(objective_question())),
            &mut conversation,
            "hint?",
            NO_IMAGES,
        )
        .await;

    assert_eq!(outcome.status, SendStatus::RoundLimitReached);
    assert_eq!(provider.calls(), 1);
    assert_eq!(provider.request(0).messages[0].text(), "You are a terse tutor.");
}
