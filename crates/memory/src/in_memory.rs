//! In-memory session memory — owned by the layer that hosts a session.

use async_trait::async_trait;
use hizen_core::error::MemoryError;
use hizen_core::memory::{MemoryProvider, QuestionMemory};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Holds the question currently attached to a session.
///
/// Cloning shares the underlying slot, so the owning layer can keep a
/// handle for updates while the driver reads through another.
#[derive(Clone, Default)]
pub struct SessionMemory {
    question: Arc<RwLock<Option<QuestionMemory>>>,
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_question(question: QuestionMemory) -> Self {
        Self {
            question: Arc::new(RwLock::new(Some(question))),
        }
    }

    /// Attach a new question, returning the previous one.
    pub async fn replace(&self, question: QuestionMemory) -> Option<QuestionMemory> {
        self.question.write().await.replace(question)
    }

    /// Detach the current question.
    pub async fn clear(&self) -> Option<QuestionMemory> {
        self.question.write().await.take()
    }

    pub async fn snapshot(&self) -> Option<QuestionMemory> {
        self.question.read().await.clone()
    }
}

#[async_trait]
impl MemoryProvider for SessionMemory {
    async fn read_memory(&self) -> Result<QuestionMemory, MemoryError> {
        self.question.read().await.clone().ok_or(MemoryError::Empty)
    }
}
