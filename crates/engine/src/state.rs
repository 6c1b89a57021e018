//! Conversation state and the routing state machine.
//!
//! Transitions are a pure function of (state, signal, guard). The guard
//! holds the per-turn hop counter and enforces the two loop bounds at the
//! transition layer:
//!
//! - `RETRIEVAL_QA → QUERY_QA` on an empty retrieval, at most once per turn;
//! - `SIMPLE_CHAT → ROUTE` on an "unknown" answer, at most once per turn,
//!   so `ROUTE` is visited at most twice.

use procura_core::{Intent, Turn};
use serde::{Deserialize, Serialize};

use crate::draft::DraftPlan;

/// Hard cap on fallback hops within one turn.
pub const MAX_HOPS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Route,
    QueryQa,
    RetrievalQa,
    DocumentPlan,
    DocumentGenerate,
    SimpleChat,
    Greeting,
    Finalize,
}

impl State {
    /// Entry state for a classified intent.
    pub fn for_intent(intent: Intent) -> Self {
        match intent {
            Intent::GenerateDocument => State::DocumentPlan,
            Intent::QueryQa => State::QueryQa,
            Intent::RetrievalQa => State::RetrievalQa,
            Intent::SimpleChat => State::SimpleChat,
            Intent::Greeting => State::Greeting,
        }
    }

    /// The intent an answering state serves, if any.
    pub fn intent(self) -> Option<Intent> {
        match self {
            State::QueryQa => Some(Intent::QueryQa),
            State::RetrievalQa => Some(Intent::RetrievalQa),
            State::DocumentPlan | State::DocumentGenerate => Some(Intent::GenerateDocument),
            State::SimpleChat => Some(Intent::SimpleChat),
            State::Greeting => Some(Intent::Greeting),
            State::Route | State::Finalize => None,
        }
    }
}

/// What a state reports when it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Classified(Intent),
    EvidenceFound,
    EvidenceEmpty,
    /// A state produced its final answer (or a reported soft failure).
    Answered,
    /// Simple chat could not answer from the conversation alone.
    Unknown,
    PlanReady,
    NeedsClarification,
}

/// The result of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Next(State),
    /// A fallback was refused because the hop bound was reached.
    LoopExceeded,
}

/// Per-turn routing bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct HopGuard {
    hops: u32,
    route_visits: u32,
    query_fallback_used: bool,
}

impl HopGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hops(&self) -> u32 {
        self.hops
    }

    pub fn route_visits(&self) -> u32 {
        self.route_visits
    }

    /// Record entry into a state.
    pub fn enter(&mut self, state: State) {
        if state == State::Route {
            self.route_visits += 1;
        }
    }

    /// Decide the next state.
    pub fn transition(&mut self, from: State, signal: Signal) -> Transition {
        use State::*;
        match (from, signal) {
            (Route, Signal::Classified(intent)) => Transition::Next(State::for_intent(intent)),

            (RetrievalQa, Signal::EvidenceEmpty) => {
                if !self.query_fallback_used && self.hops < MAX_HOPS {
                    self.query_fallback_used = true;
                    self.hops += 1;
                    Transition::Next(QueryQa)
                } else {
                    Transition::LoopExceeded
                }
            }
            (RetrievalQa, _) => Transition::Next(Finalize),

            (QueryQa, _) => Transition::Next(Finalize),

            (DocumentPlan, Signal::PlanReady) => Transition::Next(DocumentGenerate),
            (DocumentPlan, _) => Transition::Next(Finalize),
            (DocumentGenerate, _) => Transition::Next(Finalize),

            (SimpleChat, Signal::Unknown) => {
                if self.route_visits < 2 && self.hops <= 1 && self.hops < MAX_HOPS {
                    self.hops += 1;
                    Transition::Next(Route)
                } else {
                    Transition::LoopExceeded
                }
            }
            (SimpleChat, _) => Transition::Next(Finalize),

            (Greeting, _) => Transition::Next(Finalize),

            // Route without a classification, or anything after Finalize.
            (Route, _) | (Finalize, _) => Transition::Next(Finalize),
        }
    }
}

/// Facts carried from the last evidence-backed answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StickyFacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub case_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    /// The state that answered the last turn. Drives follow-up reuse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_state: Option<State>,
}

impl StickyFacts {
    pub fn is_empty(&self) -> bool {
        self.contract_id.is_none() && self.case_files.is_empty() && self.tax_id.is_none()
    }
}

/// Everything one session remembers between turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: String,
    pub turns: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub sticky: StickyFacts,
    /// Fallback hops taken in the current turn. Reset at turn start.
    #[serde(default)]
    pub hops: u32,
    /// A document request waiting for parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<DraftPlan>,
}

impl ConversationState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    /// The last `n` turns, oldest first.
    pub fn tail(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }
}
