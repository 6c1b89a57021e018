//! Evidence retrieval: identifier detection and the hybrid assembler.

pub mod assembler;
pub mod identifiers;

pub use assembler::{HybridRetriever, RetrievalOutcome, merge};
