//! Context budget allocator.
//!
//! Greedy best-effort packing in merge order: an item is admitted when the
//! running total plus the item plus the answer reserve stays within the
//! ceiling. An item that does not fit is skipped whole and later, smaller
//! items are still tried. Same input, same selection.
//!
//! The ceiling is the evidence allowance plus the reserve, lowered when the
//! rest of the prompt (system, summary, history, question) leaves less room
//! in the model window.

use procura_config::ContextConfig;
use procura_core::EvidenceItem;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The evidence selected for one answer prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBudget {
    pub ceiling: usize,
    pub reserve: usize,
    pub selected: Vec<EvidenceItem>,
    /// Ids of items that did not fit.
    pub skipped: Vec<String>,
    pub truncated: bool,
}

impl ContextBudget {
    /// Estimated tokens of the selected items.
    pub fn used_tokens(&self) -> usize {
        self.selected.iter().map(|i| i.tokens).sum()
    }

    /// Tokens still free under the ceiling after the reserve.
    pub fn remaining(&self) -> usize {
        self.ceiling
            .saturating_sub(self.reserve)
            .saturating_sub(self.used_tokens())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BudgetAllocator {
    ceiling: usize,
    reserve: usize,
    model_max: usize,
}

impl BudgetAllocator {
    pub fn new(ceiling: usize, reserve: usize) -> Self {
        Self {
            ceiling,
            reserve,
            model_max: usize::MAX,
        }
    }

    /// Evidence gets `retrieval_max_tokens`; the reserve comes on top.
    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            ceiling: config
                .retrieval_max_tokens
                .saturating_add(config.reserve_for_answer_tokens),
            reserve: config.reserve_for_answer_tokens,
            model_max: config.model_max_tokens,
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn reserve(&self) -> usize {
        self.reserve
    }

    /// The allocator for one prompt whose non-evidence part costs `overhead`.
    pub fn for_prompt(&self, overhead: usize) -> Self {
        Self {
            ceiling: self.ceiling.min(self.model_max.saturating_sub(overhead)),
            ..*self
        }
    }

    pub fn allocate(&self, ranked: &[EvidenceItem]) -> ContextBudget {
        let mut running = 0usize;
        let mut selected = Vec::new();
        let mut skipped = Vec::new();

        for item in ranked {
            if running + item.tokens + self.reserve <= self.ceiling {
                running += item.tokens;
                selected.push(item.clone());
            } else {
                skipped.push(item.id.clone());
            }
        }

        debug!(
            admitted = selected.len(),
            skipped = skipped.len(),
            tokens = running,
            ceiling = self.ceiling,
            reserve = self.reserve,
            "Context budget allocated"
        );

        ContextBudget {
            ceiling: self.ceiling,
            reserve: self.reserve,
            truncated: !skipped.is_empty(),
            selected,
            skipped,
        }
    }
}
