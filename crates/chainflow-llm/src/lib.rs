//! Text-generation client for chainflow.
//!
//! Provides the `ProviderAdapter` trait, `DynProvider` wrapper, middleware
//! chain, pricing catalog, and `LlmClient` for routing requests by provider.
//! The bundled adapter speaks the OpenAI chat-completions protocol, including
//! server-sent-event streaming.

mod client;
mod openai;
mod provider;
mod types;

pub use client::*;
pub use openai::OpenAiAdapter;
pub use provider::*;
pub use types::*;
