//! The conversation engine.
//!
//! Each user turn runs a small state machine:
//!
//! 1. **Route**: classify the question (greeting, follow-up reuse or model)
//! 2. **Answer** in one of the answering states:
//!    - `QUERY_QA` plans a read-only graph query, validates it, executes it
//!      and presents the rows
//!    - `RETRIEVAL_QA` gathers evidence with the hybrid retriever, fits it
//!      into the context budget and streams a grounded answer
//!    - `DOCUMENT_PLAN` / `DOCUMENT_GENERATE` collect draft parameters
//!      across turns, then write the document chapter by chapter
//!    - `SIMPLE_CHAT` answers from history alone
//! 3. **Finalize**: commit history, compact memory, suggest follow-ups
//!
//! Fallbacks between states are bounded by [`state::MAX_HOPS`].

pub mod classifier;
pub mod context;
pub mod draft;
pub mod followups;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod parse;
pub mod query;
pub mod retrieval;
pub mod session;
pub mod state;
pub mod turn;

#[cfg(test)]
mod test_helpers;

pub use classifier::{Classification, IntentClassifier};
pub use context::{BudgetAllocator, ContextBudget};
pub use draft::{Draft, DraftPlan};
pub use llm::{Embedder, Llm, Sampling};
pub use memory::{CompactionOutcome, MemoryCompactor};
pub use orchestrator::Engine;
pub use query::{PlanOutcome, QueryPlan, QueryPlanner, Verdict};
pub use retrieval::{HybridRetriever, RetrievalOutcome};
pub use session::SessionRegistry;
pub use state::{ConversationState, State, StickyFacts};
pub use turn::{CancelToken, EventSink, TokenAccounting, TurnError, TurnEvent, TurnOutcome, TurnResult};
