//! LLM provider implementations for procura.
//!
//! All providers implement the `procura_core::Provider` trait.
//! The router builds the chat and embedding providers from configuration.

pub mod fallback;
pub mod openai_compat;
pub mod router;

pub use fallback::FallbackProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderSet, build_from_config};
