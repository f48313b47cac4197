//! Field inference through a chat-completion service.

pub mod client;
pub mod prompts;
pub mod resolver;

pub use client::{ChatCompletion, GroqClient, InferenceError, API_KEY_VAR};
pub use resolver::FieldResolver;
