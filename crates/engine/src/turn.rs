//! Turn-level types: streamed events, cancellation, errors and the result
//! handed to the presentation layer.

use procura_core::{EvidenceFilters, EvidenceItem, GraphError, Intent, ProviderError, Row};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::draft::Draft;
use crate::state::State;

/// Events emitted while a turn runs.
///
/// - `state`         — the state machine entered a state
/// - `chunk`         — partial answer text
/// - `evidence`      — evidence selected for the answer prompt
/// - `clarification` — the draft planner needs one more parameter
/// - `done`          — the turn committed
/// - `error`         — a soft failure was reported
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    State { state: State },

    Chunk { content: String },

    Evidence { count: usize, tokens: usize, truncated: bool },

    Clarification { question: String },

    Done { intent: Intent, tokens_sent: usize, evidence: usize },

    Error { message: String },
}

impl TurnEvent {
    /// Event name for SSE-style transports.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::State { .. } => "state",
            Self::Chunk { .. } => "chunk",
            Self::Evidence { .. } => "evidence",
            Self::Clarification { .. } => "clarification",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// Optional event sink. Sending never fails the turn.
#[derive(Clone, Default)]
pub struct EventSink(Option<mpsc::Sender<TurnEvent>>);

impl EventSink {
    pub fn new(tx: mpsc::Sender<TurnEvent>) -> Self {
        Self(Some(tx))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub async fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event).await;
        }
    }
}

/// Cooperative cancellation for one turn.
///
/// Clones share the flag. `cancel()` wakes every task waiting on
/// [`CancelToken::cancelled`].
#[derive(Clone)]
pub struct CancelToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // Sender gone without cancelling: never resolves.
                std::future::pending::<()>().await;
            }
        }
    }

    /// `Err(Cancelled)` once cancelled.
    pub fn check(&self) -> Result<(), TurnError> {
        if self.is_cancelled() {
            Err(TurnError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Hard failures of a turn. Everything recoverable becomes a [`TurnOutcome`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum TurnError {
    #[error("Turn cancelled")]
    Cancelled,

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Nothing to answer: {0}")]
    Empty(String),
}

/// How the turn ended, from the user's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnOutcome {
    Answered,
    Clarification,
    DraftGenerated,
    /// The query never validated within the repair budget. Nothing executed.
    PlanningFailed { reason: String },
    /// A database or model call failed after its retry.
    ExecutionFailed { reason: String },
    /// Every retrieval strategy failed.
    RetrievalFailed,
    /// Retrieval and the analytics fallback both came back empty.
    NoResults,
    /// The hop bound stopped routing; the best-effort chat answer was used.
    RoutingLoopExceeded,
}

impl TurnOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::PlanningFailed { .. }
                | Self::ExecutionFailed { .. }
                | Self::RetrievalFailed
                | Self::RoutingLoopExceeded
        )
    }
}

/// Estimated token accounting for the answer call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenAccounting {
    /// Estimated prompt tokens sent with the final answer call.
    pub sent: usize,
    /// Tokens of evidence admitted by the budget.
    pub evidence: usize,
    /// Retrieval ceiling in force.
    pub ceiling: usize,
    /// Model context window.
    pub model_max: usize,
}

/// Everything the presentation layer needs from one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResult {
    pub answer: String,
    pub intent: Intent,
    pub outcome: TurnOutcome,
    /// Evidence actually placed in the prompt (post-budget).
    pub evidence: Vec<EvidenceItem>,
    /// Whether the budget skipped any evidence.
    pub truncated: bool,
    pub tokens: TokenAccounting,
    #[serde(default, skip_serializing_if = "EvidenceFilters::is_empty")]
    pub filters: EvidenceFilters,
    /// Executed query, for analytics turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<Draft>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    /// States visited, in order.
    pub trace: Vec<State>,
}
