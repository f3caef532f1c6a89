//! LLM provider adapters.
//!
//! The core consumes one capability interface ([`LlmProvider`]): a
//! non-streaming `chat` and a streaming `chat_stream` over the
//! provider-agnostic message/tool types. The bundled adapter speaks the
//! OpenAI chat-completions wire format (Moonshot/Kimi, OpenAI, vLLM, ...).

mod openai_compat;
mod registry;
mod sse;
mod traits;
mod util;

pub use openai_compat::OpenAiCompatProvider;
pub use registry::ProviderRegistry;
pub use traits::{ChatRequest, ChatResponse, LlmProvider};
