//! History compaction.
//!
//! When the stored turns exceed `max_history_turns`, everything but the last
//! `tail_window` turns is folded into the running summary by one model call.
//! If that call fails the old turns are simply dropped; the turn is never
//! blocked on compaction.

use procura_config::MemoryConfig;
use procura_core::token::clip;
use procura_core::{Message, Turn};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::llm::{Llm, Sampling};
use crate::state::ConversationState;

const SUMMARY_SYSTEM: &str = "Resumes conversaciones sobre contratación pública. \
     Conserva los hechos y entidades nombradas: expedientes, importes, empresas, NIF, \
     requisitos y decisiones del usuario. No inventes nada. Responde solo con el resumen.";

/// Per-turn clip inside the summary prompt.
const TURN_CLIP_CHARS: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionOutcome {
    NotNeeded,
    /// Old turns replaced by a summary.
    Summarized { dropped: usize },
    /// The summary call failed; old turns were dropped without one.
    Truncated { dropped: usize },
}

pub struct MemoryCompactor {
    llm: Llm,
    max_turns: usize,
    tail_window: usize,
    summary_max_tokens: u32,
}

impl MemoryCompactor {
    pub fn new(llm: Llm, config: &MemoryConfig) -> Self {
        Self {
            llm,
            max_turns: config.max_history_turns,
            tail_window: config.tail_window.min(config.max_history_turns.saturating_sub(1)),
            summary_max_tokens: config.summary_max_tokens,
        }
    }

    pub fn needs_compaction(&self, state: &ConversationState) -> bool {
        state.turns.len() > self.max_turns
    }

    fn prompt(previous: Option<&str>, old: &[Turn]) -> String {
        let mut prompt = String::new();
        if let Some(summary) = previous.filter(|s| !s.trim().is_empty()) {
            prompt.push_str(&format!("Resumen previo:\n{summary}\n\n"));
        }
        prompt.push_str("Conversación a resumir:\n");
        for turn in old {
            prompt.push_str(&format!(
                "{}: {}\n",
                turn.role.transcript_label(),
                clip(&turn.text, TURN_CLIP_CHARS)
            ));
        }
        prompt.push_str("\nEscribe un único resumen que integre el resumen previo y la conversación.");
        prompt
    }

    /// Compact `state` in place if it is over the limit.
    pub async fn compact(&self, state: &mut ConversationState) -> CompactionOutcome {
        if !self.needs_compaction(state) {
            return CompactionOutcome::NotNeeded;
        }

        let split = state.turns.len() - self.tail_window;
        let old: Vec<Turn> = state.turns.drain(..split).collect();
        let dropped = old.len();
        debug!(dropped, kept = state.turns.len(), "Compacting history");

        let messages = vec![
            Message::system(SUMMARY_SYSTEM),
            Message::user(Self::prompt(state.summary.as_deref(), &old)),
        ];
        match self
            .llm
            .complete(messages, Sampling::new(0.2).max_tokens(self.summary_max_tokens))
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => {
                let summary = summary.trim().to_string();
                info!(dropped, chars = summary.len(), "History summarized");
                state.summary = Some(summary);
                CompactionOutcome::Summarized { dropped }
            }
            Ok(_) => {
                warn!(dropped, "Summary came back empty, dropping old turns");
                CompactionOutcome::Truncated { dropped }
            }
            Err(e) => {
                warn!(error = %e, dropped, "Summary failed, dropping old turns");
                CompactionOutcome::Truncated { dropped }
            }
        }
    }
}
