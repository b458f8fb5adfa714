//! Session memory implementations for Hizen.

pub mod file_backend;
pub mod in_memory;

pub use file_backend::FileMemory;
pub use in_memory::SessionMemory;
