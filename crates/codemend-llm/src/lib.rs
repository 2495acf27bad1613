//! LLM provider abstraction and backend implementations.

pub mod any;
pub mod claude;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod provider;
pub(crate) mod retry;

pub use error::LlmError;
pub use provider::LlmProvider;
