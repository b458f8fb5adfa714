//! `hizen chat` — Single-message or interactive tutoring session.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use hizen_agent::{
    ChatAgent, ChatDriver, ErrorHandler, ErrorReport, EventHandler, EventKind, LifecycleEvent,
    SendOutcome, SendStatus, StreamingHandler,
};
use hizen_config::AppConfig;
use hizen_core::memory::MemoryProvider;
use hizen_core::message::{Conversation, Role};
use hizen_memory::{FileMemory, SessionMemory};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// Prints partial text as it streams and errors to stderr; traces events.
struct Console;

#[async_trait]
impl StreamingHandler for Console {
    async fn on_partial(&self, _id: &str, _role: Role, partial: &str) -> anyhow::Result<()> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(partial.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}

#[async_trait]
impl ErrorHandler for Console {
    async fn on_error(&self, report: &ErrorReport) -> anyhow::Result<()> {
        eprintln!();
        eprintln!("  {report}");
        Ok(())
    }
}

#[async_trait]
impl EventHandler for Console {
    async fn on_event(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        match &event.kind {
            EventKind::PreToolCall { tool_name, .. } => {
                info!(id = %event.id, tool = %tool_name, "Calling tool");
            }
            EventKind::PostToolCall(state) => {
                info!(id = %event.id, state = state.name(), "Tool finished");
            }
            kind => debug!(id = %event.id, event = kind.name(), "Lifecycle event"),
        }
        debug!(payload = %serde_json::to_string(event)?, "Event payload");
        Ok(())
    }
}

pub async fn run(
    message: Option<String>,
    images: Vec<String>,
    memory_file: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Fail early with setup instructions when no key is configured
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    HIZEN_API_KEY   = 'sk-...'");
        eprintln!("    OPENAI_API_KEY  = 'sk-...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let memory: Arc<dyn MemoryProvider> = match &memory_file {
        Some(path) => Arc::new(FileMemory::new(path)),
        None => Arc::new(SessionMemory::new()),
    };

    let agent = ChatAgent::from_config(&config)?;
    let session_id = format!("cli-{}", std::process::id());
    let console = Arc::new(Console);
    let driver = agent
        .driver(session_id.clone())
        .with_error_handler(console.clone())
        .with_event_handler(console.clone())
        .with_streaming_handler(console);
    let mut conversation = Conversation::new(session_id);

    if let Some(msg) = message {
        // Single message mode
        let outcome = turn(&driver, memory, &mut conversation, &msg, &images).await;
        if !outcome.is_done() {
            return Err(format!("Turn did not complete: {:?}", outcome.status).into());
        }
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  Hizen tutor — interactive mode");
    println!();
    println!("  Model:     {}", config.model);
    println!("  Tools:     {}", agent.registry().names().collect::<Vec<_>>().join(", "));
    match &memory_file {
        Some(path) => println!("  Question:  {}", path.display()),
        None => println!("  Question:  none (pass --memory FILE)"),
    }
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending_images = images;

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        let images = std::mem::take(&mut pending_images);
        turn(&driver, memory.clone(), &mut conversation, line, &images).await;
        println!();
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

async fn turn(
    driver: &ChatDriver,
    memory: Arc<dyn MemoryProvider>,
    conversation: &mut Conversation,
    text: &str,
    images: &[String],
) -> SendOutcome {
    println!();
    print!("  Hizen > ");
    let _ = std::io::stdout().flush();

    let outcome = driver.send(memory, conversation, text, images).await;
    println!();

    match &outcome.status {
        SendStatus::Done => {}
        SendStatus::Failed { .. } => {
            eprintln!("  The tutor could not answer this time. Try again.");
        }
        SendStatus::RoundLimitReached => {
            eprintln!(
                "  Stopped after {} rounds of tool calls. Please provide further guidance.",
                outcome.rounds
            );
        }
    }
    outcome
}
