//! # Hizen Core
//!
//! Domain types, traits, and error definitions for the Hizen tutoring agent.
//! This crate defines the domain model that every other crate implements
//! against: messages, the streaming completion contract, the tool contract
//! and session memory.
//!
//! Every collaborator the driver consumes is a trait here, so concrete
//! providers, memories and tools can be swapped or mocked freely.

pub mod error;
pub mod memory;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, MemoryError, ProviderError, Result, ToolError};
pub use memory::{MemoryProvider, QuestionMemory};
pub use message::{ContentPart, Conversation, Message, Role, ToolCallPart};
pub use provider::{
    BackoffStrategy, CompletionProvider, CompletionRequest, FragmentReceiver, ModelConfig,
    PreCallHook, StreamFragment, ToolDefinition, Usage,
};
pub use tool::{Tool, ToolContext, Vendor};
