//! Conversation memory: history compaction into a running summary.

pub mod compactor;

pub use compactor::{CompactionOutcome, MemoryCompactor};
