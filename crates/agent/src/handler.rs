//! Caller-supplied handlers.
//!
//! A driver reports to four optional capabilities: errors, lifecycle
//! events, finished messages and partial (streaming) text. Every call is
//! wrapped so a failing handler is reported to the error handler instead of
//! breaking the turn loop. A failing error handler is only logged.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hizen_core::message::{Message, Role};
use tracing::{debug, warn};

use crate::event::LifecycleEvent;

/// What went wrong, and while doing what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub context: String,
    pub detail: String,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ERROR] {}: {}", self.context, self.detail)
    }
}

#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn on_error(&self, report: &ErrorReport) -> anyhow::Result<()>;
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, event: &LifecycleEvent) -> anyhow::Result<()>;
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, message: &Message) -> anyhow::Result<()>;
}

#[async_trait]
pub trait StreamingHandler: Send + Sync {
    /// `partial` is the newest text delta of message `id`, not the running total.
    async fn on_partial(&self, id: &str, role: Role, partial: &str) -> anyhow::Result<()>;
}

/// The last line of defense: never fails, never propagates.
#[derive(Clone, Default)]
pub struct ErrorSink {
    handler: Option<Arc<dyn ErrorHandler>>,
}

impl ErrorSink {
    pub fn new(handler: Option<Arc<dyn ErrorHandler>>) -> Self {
        Self { handler }
    }

    pub async fn report(&self, context: impl Into<String>, detail: impl fmt::Display) {
        let report = ErrorReport {
            context: context.into(),
            detail: detail.to_string(),
        };
        warn!(context = %report.context, detail = %report.detail, "Agent error");

        if let Some(handler) = &self.handler
            && let Err(e) = handler.on_error(&report).await
        {
            debug!(error = %e, "Error handler failed; dropping report");
        }
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink")
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Deliver a finished message, reporting handler failures.
pub(crate) async fn deliver_message(
    handler: Option<&dyn MessageHandler>,
    errors: &ErrorSink,
    message: &Message,
) {
    let Some(handler) = handler else {
        return;
    };
    if let Err(e) = handler.on_message(message).await {
        errors.report(format!("sending message {}", message.id), e).await;
    }
}

/// Deliver a text delta, reporting handler failures.
pub(crate) async fn deliver_partial(
    handler: Option<&dyn StreamingHandler>,
    errors: &ErrorSink,
    id: &str,
    partial: &str,
) {
    let Some(handler) = handler else {
        return;
    };
    if let Err(e) = handler.on_partial(id, Role::Assistant, partial).await {
        errors.report(format!("sending streaming message {id}"), e).await;
    }
}
