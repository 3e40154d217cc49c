//! LLM Backend abstraction layer.
//!
//! - OpenAI-compatible (Secret AI, vLLM, Ollama)
//! - Mock backend for testing and offline runs

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockBackend;
pub use openai::OpenAiBackend;
pub use traits::{
    CompletionRequest, CompletionResponse, FinishReason, LlmBackend, LlmError, Message,
    MessageRole, Usage,
};
