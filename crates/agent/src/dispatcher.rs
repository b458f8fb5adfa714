//! Tool dispatcher.
//!
//! Every outcome of a tool call becomes a string for the model. Unknown
//! tools, malformed arguments and tool errors are rendered as `[FAILURE]`
//! results so the model can react on its next round; nothing here aborts
//! the turn.

use chrono::Utc;
use futures::future::join_all;
use hizen_core::error::ToolError;
use hizen_core::message::{Message, ToolCallPart};
use hizen_core::tool::ToolContext;
use hizen_tools::ToolRegistry;
use tracing::{debug, warn};

use crate::event::{EventBus, EventKind, PostToolCallState};

pub struct ToolDispatcher<'a> {
    registry: &'a ToolRegistry,
    events: &'a EventBus,
}

impl<'a> ToolDispatcher<'a> {
    pub fn new(registry: &'a ToolRegistry, events: &'a EventBus) -> Self {
        Self { registry, events }
    }

    /// Run one tool call and render its result.
    pub async fn dispatch(&self, ctx: &ToolContext, call: &ToolCallPart) -> String {
        let Some(tool) = self.registry.get(&call.tool_name) else {
            warn!(tool = %call.tool_name, call_id = %call.id, "Model requested an unknown tool");
            self.events
                .emit(EventKind::InvalidToolName {
                    tool_call: call.clone(),
                })
                .await;
            return format!("[FAILURE] Unknown tool name: {}", call.tool_name);
        };

        let arguments = match serde_json::from_str::<serde_json::Value>(&call.arguments) {
            Ok(arguments) => arguments,
            Err(e) => {
                warn!(tool = %call.tool_name, call_id = %call.id, error = %e, "Tool arguments are not JSON");
                self.events
                    .emit(EventKind::InvalidToolJsonArguments {
                        tool_call: call.clone(),
                        error: e.to_string(),
                    })
                    .await;
                return format!("[FAILURE] Unable to parse arguments: {e}");
            }
        };

        let tool_name = tool.kind();
        let pre_id = self
            .events
            .emit(EventKind::PreToolCall {
                tool_name,
                input: arguments.clone(),
            })
            .await;

        let started = std::time::Instant::now();
        let result = tool.trigger(ctx, arguments.clone()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (state, rendered) = match result {
            Ok(invocation) => {
                debug!(tool = %tool_name, call_id = %call.id, duration_ms, "Tool call succeeded");
                let rendered = invocation.rendered.clone();
                let state = PostToolCallState::Success {
                    tool_name,
                    input: invocation.input,
                    output: invocation.output,
                    output_string: invocation.rendered,
                };
                (state, rendered)
            }
            Err(ToolError::InvalidInput(error)) => {
                warn!(tool = %tool_name, call_id = %call.id, %error, "Tool arguments failed validation");
                let rendered = format!("[FAILURE] Invalid arguments: {error}");
                let state = PostToolCallState::InvalidInputArguments {
                    tool_name,
                    input: arguments,
                    error,
                };
                (state, rendered)
            }
            Err(e) => {
                warn!(tool = %tool_name, call_id = %call.id, duration_ms, error = %e, "Tool call failed");
                let rendered = format!("[FAILURE] {e}");
                let state = PostToolCallState::Failure {
                    tool_name,
                    input: arguments,
                    error: e.to_string(),
                };
                (state, rendered)
            }
        };

        self.events
            .emit_paired(EventKind::PostToolCall(state), &pre_id)
            .await;
        rendered
    }

    /// Run all calls of one turn concurrently.
    ///
    /// Results come back in request order, one tool message per call,
    /// each stamped when its own call finished.
    pub async fn dispatch_all(&self, ctx: &ToolContext, calls: &[ToolCallPart]) -> Vec<Message> {
        join_all(calls.iter().map(|call| async move {
            let result = self.dispatch(ctx, call).await;
            Message::tool_result(call, result, Utc::now())
        }))
        .await
    }
}
