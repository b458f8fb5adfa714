//! The conversational turn loop of the Hizen tutoring agent.
//!
//! One call to [`ChatDriver::send`] runs a user message to completion:
//!
//! 1. **Append** the user message (text plus optional image URLs)
//! 2. **Stream** a completion and assemble the fragments into one turn
//! 3. **If tool calls**: dispatch them concurrently, append the results in
//!    request order, loop back to step 2
//! 4. **Otherwise**: the assistant text is the answer
//!
//! Every step is reported to caller-supplied handlers: lifecycle events,
//! finished messages, partial text and errors. Handler failures never break
//! the loop.

pub mod dispatcher;
pub mod event;
pub mod handler;
pub mod loop_runner;
pub mod request;
pub mod stream_assembler;

pub use dispatcher::ToolDispatcher;
pub use event::{EventBus, EventKind, LifecycleEvent, PostToolCallState};
pub use handler::{
    ErrorHandler, ErrorReport, ErrorSink, EventHandler, MessageHandler, StreamingHandler,
};
pub use loop_runner::{AgentSettings, ChatAgent, ChatDriver, SendOutcome, SendStatus};
pub use stream_assembler::{AssembledTurn, Completion, assemble};
