//! In-memory graph store — fixtures for tests and offline demos.
//!
//! Holds evidence items with their embeddings, reference documents, and
//! scripted query results. Queries are matched by substring against the
//! registered scripts; every executed query is recorded.

use async_trait::async_trait;
use procura_core::error::GraphError;
use procura_core::evidence::{EvidenceItem, EvidenceKind, Tier};
use procura_core::graph::*;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::similarity::cosine_similarity;

struct Fixture {
    item: EvidenceItem,
    embedding: Vec<f32>,
}

struct ScriptedQuery {
    needle: String,
    result: Result<Vec<Row>, GraphError>,
}

#[derive(Default)]
struct Inner {
    evidence: Vec<Fixture>,
    references: Vec<(ReferenceDocument, Vec<f32>)>,
    scripts: Vec<ScriptedQuery>,
    executed: Vec<String>,
}

/// A `GraphStore` that keeps everything in memory.
#[derive(Clone, Default)]
pub struct InMemoryGraph {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an evidence item searchable by `embedding`.
    pub async fn add_evidence(&self, item: EvidenceItem, embedding: Vec<f32>) {
        self.inner
            .write()
            .await
            .evidence
            .push(Fixture { item, embedding });
    }

    /// Add a reference document reachable by similarity to `embedding`.
    pub async fn add_reference(&self, document: ReferenceDocument, embedding: Vec<f32>) {
        self.inner
            .write()
            .await
            .references
            .push((document, embedding));
    }

    /// Queries containing `needle` return `rows`. First registered match wins.
    pub async fn on_query(&self, needle: impl Into<String>, rows: Vec<Row>) {
        self.inner.write().await.scripts.push(ScriptedQuery {
            needle: needle.into(),
            result: Ok(rows),
        });
    }

    /// Queries containing `needle` fail with `error`.
    pub async fn fail_query(&self, needle: impl Into<String>, error: GraphError) {
        self.inner.write().await.scripts.push(ScriptedQuery {
            needle: needle.into(),
            result: Err(error),
        });
    }

    /// Every query passed to `execute`, in order.
    pub async fn executed(&self) -> Vec<String> {
        self.inner.read().await.executed.clone()
    }

    fn passes(item: &EvidenceItem, filters: &EvidenceFilters) -> bool {
        if !filters.case_files.is_empty()
            && !filters.case_files.iter().any(|c| c == item.case_file())
        {
            return false;
        }
        match &item.kind {
            EvidenceKind::Contract { .. } => true,
            EvidenceKind::Chapter { doc_type, .. } => match &filters.doc_type {
                Some(wanted) => doc_type.as_deref() == Some(wanted.as_str()),
                None => true,
            },
            EvidenceKind::Excerpt { excerpt_type, .. } => {
                filters.excerpt_types.is_empty() || filters.excerpt_types.contains(excerpt_type)
            }
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn execute(&self, query: &str, _params: &Map<String, Value>) -> Result<Vec<Row>, GraphError> {
        let mut inner = self.inner.write().await;
        inner.executed.push(query.to_string());
        inner
            .scripts
            .iter()
            .find(|s| query.contains(&s.needle))
            .map(|s| s.result.clone())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn vector_search(&self, search: &VectorSearch) -> Result<Vec<EvidenceItem>, GraphError> {
        let inner = self.inner.read().await;
        let mut scored: Vec<EvidenceItem> = inner
            .evidence
            .iter()
            .filter(|f| f.item.tier() == search.tier && Self::passes(&f.item, &search.filters))
            .map(|f| {
                let mut item = f.item.clone();
                item.score = procura_core::Score::new(cosine_similarity(&f.embedding, &search.embedding));
                item
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .value()
                .partial_cmp(&a.score.value())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(search.k);
        Ok(scored)
    }

    async fn lookup(&self, identifier: &Identifier) -> Result<Vec<EvidenceItem>, GraphError> {
        let inner = self.inner.read().await;
        let wanted = identifier.value();
        Ok(inner
            .evidence
            .iter()
            .filter(|f| f.item.tier() == Tier::Contract)
            .filter(|f| match (&f.item.kind, identifier) {
                (EvidenceKind::Contract { case_file, .. }, Identifier::CaseFile(_)) => {
                    f.item.id == wanted || case_file.contains(wanted)
                }
                (EvidenceKind::Contract { awardee_tax_id, .. }, Identifier::TaxId(_)) => {
                    awardee_tax_id.as_deref() == Some(wanted)
                }
                _ => false,
            })
            .map(|f| f.item.clone())
            .collect())
    }

    async fn reference_document(
        &self,
        embedding: &[f32],
        contract: Option<&str>,
    ) -> Result<Option<ReferenceDocument>, GraphError> {
        let inner = self.inner.read().await;
        if let Some(cid) = contract {
            return Ok(inner
                .references
                .iter()
                .find(|(doc, _)| doc.contract_id == cid || doc.case_file == cid)
                .map(|(doc, _)| doc.clone()));
        }

        Ok(inner
            .references
            .iter()
            .map(|(doc, emb)| (cosine_similarity(emb, embedding), doc))
            .filter(|(sim, _)| *sim > 0.0)
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, doc)| doc.clone()))
    }
}
