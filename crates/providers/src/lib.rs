//! Completion provider implementations for Hizen.
//!
//! All providers implement `hizen_core::CompletionProvider`. The default
//! retry policy for the initial request is [`ExponentialBackoff`].

pub mod backoff;
pub mod openai_compat;

pub use backoff::ExponentialBackoff;
pub use openai_compat::OpenAiCompatProvider;
