//! GraphStore trait — the knowledge-graph boundary.
//!
//! The store exposes four read operations: run a (pre-validated) query,
//! search one evidence tier by vector similarity, look up a structured
//! identifier, and fetch a reference document with its chapter structure.
//!
//! Implementations: Neo4j over HTTP, in-memory fixtures (for testing).

use crate::error::GraphError;
use crate::evidence::{EvidenceItem, Tier};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One result row: column name to scalar/string value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A structured identifier recognised in user text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Identifier {
    /// Procurement case file number (expediente), e.g. `24seA12` or `2024/OBR_PUB/7`.
    CaseFile(String),
    /// Company tax id (NIF/CIF), e.g. `B12345678`.
    TaxId(String),
}

impl Identifier {
    pub fn value(&self) -> &str {
        match self {
            Identifier::CaseFile(v) | Identifier::TaxId(v) => v,
        }
    }
}

/// Optional filters narrowing a tier search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceFilters {
    /// Excerpt types to keep (empty = all). Ignored by other tiers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excerpt_types: Vec<String>,
    /// Document type the chapter/excerpt must come from (`PPT`, `PCAP`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    /// Restrict to these case files (empty = no restriction).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub case_files: Vec<String>,
}

impl EvidenceFilters {
    pub fn is_empty(&self) -> bool {
        self.excerpt_types.is_empty() && self.doc_type.is_none() && self.case_files.is_empty()
    }
}

/// A similarity search against one tier.
#[derive(Debug, Clone)]
pub struct VectorSearch {
    pub query_text: String,
    pub embedding: Vec<f32>,
    pub tier: Tier,
    pub k: usize,
    pub filters: EvidenceFilters,
}

/// A chapter of a reference document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceChapter {
    pub heading: String,
    pub order: i64,
    pub text: String,
}

/// A prior contract's technical document, used as a drafting skeleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDocument {
    pub contract_id: String,
    pub case_file: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub chapters: Vec<ReferenceChapter>,
}

/// The core GraphStore trait.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// The backend name (e.g., "neo4j", "in_memory").
    fn name(&self) -> &str;

    /// Execute a read-only query. Callers validate before calling.
    async fn execute(
        &self,
        query: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<Vec<Row>, GraphError>;

    /// Ranked similarity search over one tier, best first.
    async fn vector_search(
        &self,
        search: &VectorSearch,
    ) -> std::result::Result<Vec<EvidenceItem>, GraphError>;

    /// Direct lookup of an identifier. Returned items are not yet marked exact.
    async fn lookup(
        &self,
        identifier: &Identifier,
    ) -> std::result::Result<Vec<EvidenceItem>, GraphError>;

    /// The nearest prior contract that has a technical document, with its
    /// chapters ordered. `contract` pins a specific contract or case file.
    async fn reference_document(
        &self,
        embedding: &[f32],
        contract: Option<&str>,
    ) -> std::result::Result<Option<ReferenceDocument>, GraphError>;

    /// Health check — can we reach the store?
    async fn health_check(&self) -> std::result::Result<bool, GraphError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_serialization() {
        let id = Identifier::TaxId("B12345678".into());
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.contains("tax_id"));
        assert!(json.contains("B12345678"));
        assert_eq!(id.value(), "B12345678");
    }

    #[test]
    fn empty_filters() {
        assert!(EvidenceFilters::default().is_empty());
        let f = EvidenceFilters {
            excerpt_types: vec!["solvencia_tecnica".into()],
            ..Default::default()
        };
        assert!(!f.is_empty());
    }
}
