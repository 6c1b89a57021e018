//! Hybrid retrieval assembler.
//!
//! Three strategies run concurrently and are joined before merging:
//!
//! 1. **Similarity**: one query embedding, searched against each tier with
//!    its own top-K.
//! 2. **Exact**: identifiers recognised in the question (or supplied by the
//!    classifier) are looked up directly and ranked above everything else.
//! 3. **Filtered**: when excerpt-type or document-type filters are active,
//!    the excerpt tier is searched with them instead of unfiltered.
//!
//! A strategy that has nothing to do is skipped. A strategy whose calls
//! all fail contributes nothing; only when every strategy that ran failed
//! is the retrieval reported as failed.

use futures::future::join_all;
use procura_config::RetrievalConfig;
use procura_core::{
    EvidenceFilters, EvidenceItem, GraphStore, Identifier, IntentSlots, Tier, VectorSearch,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::identifiers;
use crate::llm::Embedder;
use crate::state::StickyFacts;

/// What one strategy produced.
#[derive(Debug)]
enum Strategy {
    Skipped,
    Found(Vec<EvidenceItem>),
    Failed(String),
}

impl Strategy {
    fn items(self) -> Vec<EvidenceItem> {
        match self {
            Strategy::Found(items) => items,
            Strategy::Skipped | Strategy::Failed(_) => Vec::new(),
        }
    }

    fn ran(&self) -> bool {
        !matches!(self, Strategy::Skipped)
    }

    fn failed(&self) -> bool {
        matches!(self, Strategy::Failed(_))
    }
}

/// Merged, ranked evidence for one question.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub items: Vec<EvidenceItem>,
    pub filters: EvidenceFilters,
    pub identifiers: Vec<Identifier>,
    /// Every strategy that ran failed.
    pub failed: bool,
}

impl RetrievalOutcome {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub struct HybridRetriever {
    graph: Arc<dyn GraphStore>,
    embedder: Embedder,
    caps: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(graph: Arc<dyn GraphStore>, embedder: Embedder, caps: RetrievalConfig) -> Self {
        Self {
            graph,
            embedder,
            caps,
        }
    }

    fn k_for(&self, tier: Tier) -> usize {
        match tier {
            Tier::Contract => self.caps.k_contracts,
            Tier::Chapter => self.caps.k_chapters,
            Tier::Excerpt => self.caps.k_excerpts,
        }
    }

    /// Identifiers from the classifier slots and the question text.
    fn collect_identifiers(question: &str, slots: &IntentSlots) -> Vec<Identifier> {
        let mut ids: Vec<Identifier> = slots
            .case_files
            .iter()
            .map(|c| Identifier::CaseFile(c.clone()))
            .collect();
        if let Some(tax_id) = &slots.tax_id {
            ids.push(Identifier::TaxId(tax_id.to_ascii_uppercase()));
        }
        for id in identifiers::detect(question) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    fn filters_for(
        slots: &IntentSlots,
        ids: &[Identifier],
        sticky: &StickyFacts,
    ) -> EvidenceFilters {
        let mut case_files: Vec<String> = ids
            .iter()
            .filter_map(|id| match id {
                Identifier::CaseFile(c) => Some(c.clone()),
                Identifier::TaxId(_) => None,
            })
            .collect();

        // A follow-up with no identifiers of its own stays on the last contracts.
        if case_files.is_empty() && ids.is_empty() && slots.is_followup {
            case_files = sticky.case_files.clone();
        }

        EvidenceFilters {
            excerpt_types: slots.excerpt_types.clone(),
            doc_type: slots.doc_type.clone(),
            case_files,
        }
    }

    /// Run all strategies and merge.
    pub async fn retrieve(
        &self,
        question: &str,
        slots: &IntentSlots,
        sticky: &StickyFacts,
    ) -> RetrievalOutcome {
        let query_text = slots.rewritten_query.as_deref().unwrap_or(question);
        let ids = Self::collect_identifiers(question, slots);
        let filters = Self::filters_for(slots, &ids, sticky);

        let ((similarity, filtered), exact) = tokio::join!(
            self.semantic(query_text, &filters),
            self.exact(&ids)
        );

        let failed = [&similarity, &filtered, &exact]
            .iter()
            .filter(|s| s.ran())
            .all(|s| s.failed());
        let ran_any = [&similarity, &filtered, &exact].iter().any(|s| s.ran());

        let mut similar = similarity.items();
        similar.extend(filtered.items());
        let items = merge(exact.items(), similar);

        info!(
            items = items.len(),
            identifiers = ids.len(),
            failed = ran_any && failed,
            "Hybrid retrieval complete"
        );

        RetrievalOutcome {
            items,
            filters,
            identifiers: ids,
            failed: ran_any && failed,
        }
    }

    /// Strategies 1 and 3 share the embedding, computed once.
    async fn semantic(&self, text: &str, filters: &EvidenceFilters) -> (Strategy, Strategy) {
        let embedding = match self.embedder.embed(text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Embedding failed; similarity strategies contribute nothing");
                let reason = e.to_string();
                let filtered = if filters.excerpt_types.is_empty() && filters.doc_type.is_none() {
                    Strategy::Skipped
                } else {
                    Strategy::Failed(reason.clone())
                };
                return (Strategy::Failed(reason), filtered);
            }
        };

        let narrow = !filters.excerpt_types.is_empty() || filters.doc_type.is_some();
        let base = EvidenceFilters {
            excerpt_types: Vec::new(),
            doc_type: None,
            case_files: filters.case_files.clone(),
        };

        let mut tiers = vec![Tier::Contract, Tier::Chapter];
        if !narrow {
            tiers.push(Tier::Excerpt);
        }
        let similarity = self.search_tiers(text, &embedding, &tiers, &base);

        let filtered = async {
            if narrow {
                self.search_tiers(text, &embedding, &[Tier::Excerpt], filters).await
            } else {
                Strategy::Skipped
            }
        };

        tokio::join!(similarity, filtered)
    }

    async fn search_tiers(
        &self,
        text: &str,
        embedding: &[f32],
        tiers: &[Tier],
        filters: &EvidenceFilters,
    ) -> Strategy {
        let searches: Vec<VectorSearch> = tiers
            .iter()
            .map(|&tier| VectorSearch {
                query_text: text.to_string(),
                embedding: embedding.to_vec(),
                tier,
                k: self.k_for(tier),
                filters: filters.clone(),
            })
            .collect();

        let results = join_all(searches.iter().map(|s| self.graph.vector_search(s))).await;

        let mut items = Vec::new();
        let mut errors = Vec::new();
        for (search, result) in searches.iter().zip(results) {
            match result {
                Ok(found) => {
                    debug!(tier = %search.tier, hits = found.len(), "Tier search");
                    items.extend(found);
                }
                Err(e) => {
                    warn!(tier = %search.tier, error = %e, "Tier search failed");
                    errors.push(e.to_string());
                }
            }
        }

        if errors.len() == searches.len() && !searches.is_empty() {
            Strategy::Failed(errors.join("; "))
        } else {
            Strategy::Found(items)
        }
    }

    async fn exact(&self, ids: &[Identifier]) -> Strategy {
        if ids.is_empty() {
            return Strategy::Skipped;
        }
        let results = join_all(ids.iter().map(|id| self.graph.lookup(id))).await;

        let mut items = Vec::new();
        let mut errors = 0;
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(found) => items.extend(found.into_iter().map(EvidenceItem::into_exact)),
                Err(e) => {
                    warn!(identifier = %id.value(), error = %e, "Identifier lookup failed");
                    errors += 1;
                }
            }
        }

        if errors == ids.len() {
            Strategy::Failed(format!("{errors} lookups failed"))
        } else {
            Strategy::Found(items)
        }
    }
}

/// Exact matches first, then similarity matches; within each group tiers go
/// contract → chapter → excerpt, then score descending, then id ascending.
/// An id seen as an exact match is dropped from the similarity group.
pub fn merge(exact: Vec<EvidenceItem>, similar: Vec<EvidenceItem>) -> Vec<EvidenceItem> {
    fn rank(items: &mut [EvidenceItem]) {
        items.sort_by(|a, b| {
            a.tier()
                .cmp(&b.tier())
                .then_with(|| {
                    b.score
                        .value()
                        .partial_cmp(&a.score.value())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    let mut seen: HashSet<(Tier, String)> = HashSet::new();

    let mut head: Vec<EvidenceItem> = exact
        .into_iter()
        .filter(|item| seen.insert((item.tier(), item.id.clone())))
        .collect();
    rank(&mut head);

    let mut tail: Vec<EvidenceItem> = similar
        .into_iter()
        .filter(|item| seen.insert((item.tier(), item.id.clone())))
        .collect();
    rank(&mut tail);

    head.extend(tail);
    head
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::StaticEmbedder;
    use async_trait::async_trait;
    use procura_core::{EvidenceKind, GraphError, ReferenceDocument, Row};
    use procura_graph::InMemoryGraph;

    fn contract(id: &str, case_file: &str, score: f32) -> EvidenceItem {
        EvidenceItem::new(
            id,
            EvidenceKind::Contract {
                case_file: case_file.into(),
                title: format!("Contrato {id}"),
                awardee: None,
                awardee_tax_id: Some("B12345678".into()),
                awarded_amount: None,
                link: None,
            },
            score,
            "texto del contrato",
        )
    }

    fn chapter(id: &str, score: f32) -> EvidenceItem {
        EvidenceItem::new(
            id,
            EvidenceKind::Chapter {
                contract_id: "c-1".into(),
                case_file: "24seA1".into(),
                heading: "Objeto".into(),
                doc_type: Some("PPT".into()),
            },
            score,
            "capítulo",
        )
    }

    fn excerpt(id: &str, kind: &str, case_file: &str) -> EvidenceItem {
        EvidenceItem::new(
            id,
            EvidenceKind::Excerpt {
                contract_id: "c-1".into(),
                case_file: case_file.into(),
                excerpt_type: kind.into(),
            },
            0.0,
            "extracto",
        )
    }

    fn retriever(graph: Arc<dyn GraphStore>) -> HybridRetriever {
        let embedder = Embedder::new(Arc::new(StaticEmbedder::new(vec![1.0, 0.0])), "e", 2, 4000);
        HybridRetriever::new(graph, embedder, RetrievalConfig::default())
    }

    struct BrokenGraph;

    #[async_trait]
    impl GraphStore for BrokenGraph {
        fn name(&self) -> &str {
            "broken"
        }
        async fn execute(
            &self,
            _query: &str,
            _params: &serde_json::Map<String, serde_json::Value>,
        ) -> Result<Vec<Row>, GraphError> {
            Err(GraphError::Connection("down".into()))
        }
        async fn vector_search(&self, _s: &VectorSearch) -> Result<Vec<EvidenceItem>, GraphError> {
            Err(GraphError::Connection("down".into()))
        }
        async fn lookup(&self, _id: &Identifier) -> Result<Vec<EvidenceItem>, GraphError> {
            Err(GraphError::Timeout(30))
        }
        async fn reference_document(
            &self,
            _e: &[f32],
            _c: Option<&str>,
        ) -> Result<Option<ReferenceDocument>, GraphError> {
            Err(GraphError::Connection("down".into()))
        }
    }

    #[test]
    fn merge_orders_exact_then_tiers_then_score() {
        let exact = vec![contract("c-9", "24seA9", 0.1).into_exact()];
        let similar = vec![
            chapter("ch-2", 0.5),
            contract("c-2", "24seA2", 0.4),
            contract("c-1", "24seA1", 0.9),
            chapter("ch-1", 0.5),
            contract("c-9", "24seA9", 0.99),
        ];
        let merged = merge(exact, similar);
        let ids: Vec<&str> = merged.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c-9", "c-1", "c-2", "ch-1", "ch-2"]);
        assert!(merged[0].is_exact());
        assert_eq!(merged[0].score.value(), 1.0);
    }

    #[test]
    fn merge_is_deterministic() {
        let build = || vec![chapter("b", 0.5), chapter("a", 0.5), contract("z", "x", 0.2)];
        assert_eq!(merge(vec![], build()), merge(vec![], build()));
    }

    #[tokio::test]
    async fn exact_match_ranks_first() {
        let graph = InMemoryGraph::new();
        graph.add_evidence(contract("c-1", "24seA1", 0.0), vec![1.0, 0.0]).await;
        graph.add_evidence(contract("c-2", "24seA2", 0.0), vec![0.9, 0.1]).await;

        let r = retriever(Arc::new(graph));
        let out = r
            .retrieve("¿Quién ganó el 24seA2?", &IntentSlots::default(), &StickyFacts::default())
            .await;

        assert!(!out.failed);
        assert_eq!(out.items[0].id, "c-2");
        assert!(out.items[0].is_exact());
        assert_eq!(out.identifiers, vec![Identifier::CaseFile("24seA2".into())]);
        assert_eq!(out.filters.case_files, vec!["24seA2".to_string()]);
    }

    #[tokio::test]
    async fn excerpt_type_filter_narrows_excerpts() {
        let graph = InMemoryGraph::new();
        graph.add_evidence(excerpt("x-1", "normativa", "24seA1"), vec![1.0, 0.0]).await;
        graph.add_evidence(excerpt("x-2", "solvencia_tecnica", "24seA1"), vec![1.0, 0.0]).await;

        let slots = IntentSlots {
            excerpt_types: vec!["solvencia_tecnica".into()],
            ..Default::default()
        };
        let out = retriever(Arc::new(graph))
            .retrieve("requisitos de solvencia", &slots, &StickyFacts::default())
            .await;
        let ids: Vec<&str> = out.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["x-2"]);
    }

    #[tokio::test]
    async fn followup_uses_sticky_case_files() {
        let graph = InMemoryGraph::new();
        graph.add_evidence(excerpt("x-1", "normativa", "24seA1"), vec![1.0, 0.0]).await;
        graph.add_evidence(excerpt("x-2", "normativa", "24seB7"), vec![1.0, 0.0]).await;

        let slots = IntentSlots {
            is_followup: true,
            ..Default::default()
        };
        let sticky = StickyFacts {
            case_files: vec!["24seB7".into()],
            ..Default::default()
        };
        let out = retriever(Arc::new(graph)).retrieve("y la normativa?", &slots, &sticky).await;
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].id, "x-2");
    }

    #[tokio::test]
    async fn empty_graph_is_empty_not_failed() {
        let out = retriever(Arc::new(InMemoryGraph::new()))
            .retrieve("vehículos eléctricos", &IntentSlots::default(), &StickyFacts::default())
            .await;
        assert!(out.is_empty());
        assert!(!out.failed);
    }

    #[tokio::test]
    async fn all_strategies_failing_is_reported() {
        let out = retriever(Arc::new(BrokenGraph))
            .retrieve("contratos de B12345678", &IntentSlots::default(), &StickyFacts::default())
            .await;
        assert!(out.is_empty());
        assert!(out.failed);
    }
}
