//! LLM transport and prompt composition.

mod client;
mod prompts;

pub use client::{
    ConverseRequest, HttpLlmTransport, LlmClient, LlmError, LlmTransport, Message,
};
pub use prompts::{
    compose, InferenceParams, PromptBundle, PromptInput, PromptVariant, RotationContext,
    MAX_PROMPT_TEXT_CHARS,
};
