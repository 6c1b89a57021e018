//! Context assembly for answer prompts.
//!
//! - [`budget`]: selects evidence under the retrieval ceiling
//! - [`render`]: turns evidence and history into messages
//! - [`token`]: message-level token estimates

pub mod budget;
pub mod render;
pub mod token;

pub use budget::{BudgetAllocator, ContextBudget};
pub use render::{PromptParts, build_messages, render_evidence};
pub use token::{estimate_message_tokens, estimate_messages_tokens};
