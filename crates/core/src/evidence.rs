//! Evidence items produced by retrieval.
//!
//! An [`EvidenceItem`] is immutable once built: its text is clipped to the
//! tier's display size at construction and its token estimate is computed
//! from that clipped text, so the budget allocator and the prompt renderer
//! agree on what an item costs.

use crate::token::{clip, estimate_tokens};
use serde::{Deserialize, Serialize};

/// Evidence tiers, declared in merge priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Contract,
    Chapter,
    Excerpt,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Contract, Tier::Chapter, Tier::Excerpt];

    /// Maximum characters of source text kept per item.
    pub fn clip_chars(self) -> usize {
        match self {
            Tier::Contract => 1000,
            Tier::Chapter => 900,
            Tier::Excerpt => 700,
        }
    }

    /// Name of the vector index backing this tier.
    pub fn vector_index(self) -> &'static str {
        match self {
            Tier::Contract => "contrato_rag_embedding",
            Tier::Chapter => "capitulo_embedding",
            Tier::Excerpt => "extracto_embedding",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Contract => "contract",
            Tier::Chapter => "chapter",
            Tier::Excerpt => "excerpt",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relevance score, always within `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f32", into = "f32")]
pub struct Score(f32);

impl Score {
    pub const EXACT: Score = Score(1.0);

    /// Clamp into `[0, 1]`; NaN becomes 0.
    pub fn new(raw: f32) -> Self {
        if raw.is_nan() {
            return Score(0.0);
        }
        Score(raw.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

impl From<f32> for Score {
    fn from(raw: f32) -> Self {
        Score::new(raw)
    }
}

impl From<Score> for f32 {
    fn from(score: Score) -> Self {
        score.0
    }
}

/// How an item was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Direct identifier lookup.
    Exact,
    /// Vector similarity.
    Similarity,
}

/// Tier-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum EvidenceKind {
    Contract {
        case_file: String,
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        awardee: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        awardee_tax_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        awarded_amount: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        link: Option<String>,
    },
    Chapter {
        contract_id: String,
        case_file: String,
        heading: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        doc_type: Option<String>,
    },
    Excerpt {
        contract_id: String,
        case_file: String,
        excerpt_type: String,
    },
}

impl EvidenceKind {
    pub fn tier(&self) -> Tier {
        match self {
            EvidenceKind::Contract { .. } => Tier::Contract,
            EvidenceKind::Chapter { .. } => Tier::Chapter,
            EvidenceKind::Excerpt { .. } => Tier::Excerpt,
        }
    }
}

/// One piece of retrieved evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: String,
    pub kind: EvidenceKind,
    pub score: Score,
    pub tokens: usize,
    pub text: String,
    pub origin: Origin,
}

impl EvidenceItem {
    /// Build a similarity item. Text is clipped to the tier size.
    pub fn new(id: impl Into<String>, kind: EvidenceKind, score: f32, text: &str) -> Self {
        let text = clip(text, kind.tier().clip_chars());
        Self {
            id: id.into(),
            tokens: estimate_tokens(&text),
            kind,
            score: Score::new(score),
            text,
            origin: Origin::Similarity,
        }
    }

    /// Mark as an exact identifier match (score fixed at 1.0).
    pub fn into_exact(mut self) -> Self {
        self.origin = Origin::Exact;
        self.score = Score::EXACT;
        self
    }

    pub fn tier(&self) -> Tier {
        self.kind.tier()
    }

    pub fn is_exact(&self) -> bool {
        self.origin == Origin::Exact
    }

    /// The contract this item belongs to.
    pub fn contract_id(&self) -> &str {
        match &self.kind {
            EvidenceKind::Contract { .. } => &self.id,
            EvidenceKind::Chapter { contract_id, .. } | EvidenceKind::Excerpt { contract_id, .. } => {
                contract_id
            }
        }
    }

    pub fn case_file(&self) -> &str {
        match &self.kind {
            EvidenceKind::Contract { case_file, .. }
            | EvidenceKind::Chapter { case_file, .. }
            | EvidenceKind::Excerpt { case_file, .. } => case_file,
        }
    }

    /// Short human label used in prompts and listings.
    pub fn label(&self) -> String {
        match &self.kind {
            EvidenceKind::Contract { case_file, title, .. } => {
                format!("{case_file} · {title}")
            }
            EvidenceKind::Chapter { case_file, heading, .. } => format!("{case_file} · {heading}"),
            EvidenceKind::Excerpt { case_file, excerpt_type, .. } => {
                format!("{case_file} · {excerpt_type}")
            }
        }
    }
}
