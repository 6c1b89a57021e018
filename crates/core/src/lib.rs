//! # procura core
//!
//! Domain types, traits, and error definitions for the procura conversation
//! engine. This crate has **no transport dependencies**: it defines the model
//! that the provider, graph, and engine crates implement against.
//!
//! ## Seams
//!
//! - [`Provider`] is the LLM boundary (chat completion, streaming, embeddings).
//! - [`GraphStore`] is the knowledge-graph boundary (read-only query execution,
//!   per-tier vector search, identifier lookup, reference documents).
//!
//! Everything else here is plain data that flows between them.

pub mod error;
pub mod evidence;
pub mod graph;
pub mod intent;
pub mod message;
pub mod provider;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use error::{Error, GraphError, ProviderError, Result};
pub use evidence::{EvidenceItem, EvidenceKind, Origin, Score, Tier};
pub use graph::{
    EvidenceFilters, GraphStore, Identifier, ReferenceChapter, ReferenceDocument, Row,
    VectorSearch,
};
pub use intent::{Focus, Intent, IntentSlots};
pub use message::{Message, Role, Turn};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
