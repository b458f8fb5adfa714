//! Session memory — the mutable, session-scoped state a tool may read.
//!
//! For the tutoring agent this is the question the student is currently
//! working on. The driver never writes it; the owning layer does.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// Number of selections in an objective (multiple-choice) question.
pub const SELECTION_COUNT: usize = 5;

/// The question currently attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionMemory {
    pub question_prompt: String,

    /// Present only for objective questions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_selections: Option<[String; SELECTION_COUNT]>,

    pub answer: String,

    pub solution: String,
}

impl QuestionMemory {
    pub fn is_objective(&self) -> bool {
        self.question_selections.is_some()
    }
}

/// Read access to session memory.
///
/// Tools dispatched concurrently share one provider, so implementations
/// must tolerate concurrent reads.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    async fn read_memory(&self) -> Result<QuestionMemory, MemoryError>;
}
