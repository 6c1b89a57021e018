//! Neo4j store over the HTTP transactional endpoint.
//!
//! Every call is a single auto-commit transaction:
//! `POST {url}/db/{database}/tx/commit` with one statement and its
//! parameters. Neo4j reports statement failures inside a 200 response
//! (`errors[]`), so both the status and the body are checked. Requests are
//! sent with `access-mode: READ`, so the server refuses writes as well.

use async_trait::async_trait;
use procura_config::{GraphConfig, RetrievalConfig};
use procura_core::error::GraphError;
use procura_core::evidence::{EvidenceItem, EvidenceKind, Tier};
use procura_core::graph::*;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cypher;

const ACCESS_MODE_HEADER: &str = "access-mode";
const READ_ACCESS: &str = "READ";

/// A `GraphStore` backed by a Neo4j server.
pub struct Neo4jHttpStore {
    endpoint: String,
    user: String,
    password: Option<String>,
    timeout_secs: u64,
    lookup_limit: usize,
    tax_id_limit: usize,
    client: reqwest::Client,
}

impl Neo4jHttpStore {
    pub fn new(
        url: impl Into<String>,
        database: &str,
        user: impl Into<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        let url = url.into();
        Self {
            endpoint: format!("{}/db/{}/tx/commit", url.trim_end_matches('/'), database),
            user: user.into(),
            password,
            timeout_secs: timeout.as_secs(),
            lookup_limit: 5,
            tax_id_limit: 20,
            client,
        }
    }

    /// Build from the `graph` and `retrieval` config sections.
    pub fn from_config(graph: &GraphConfig, retrieval: &RetrievalConfig) -> Self {
        Self::new(
            &graph.url,
            &graph.database,
            &graph.user,
            graph.password.clone(),
            Duration::from_secs(graph.timeout_secs),
        )
        .with_limits(retrieval.lookup_limit, retrieval.tax_id_limit)
    }

    /// Row caps for case-file and tax-id lookups.
    pub fn with_limits(mut self, lookup_limit: usize, tax_id_limit: usize) -> Self {
        self.lookup_limit = lookup_limit;
        self.tax_id_limit = tax_id_limit;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(&self.endpoint)
            .basic_auth(&self.user, self.password.as_deref())
            .header("Accept", "application/json")
            .header(ACCESS_MODE_HEADER, READ_ACCESS)
            .json(body)
    }

    /// Run one statement and return its rows keyed by column name.
    async fn run(&self, statement: &str, parameters: Value) -> Result<Vec<Row>, GraphError> {
        let body = json!({
            "statements": [{ "statement": statement, "parameters": parameters }]
        });

        debug!(endpoint = %self.endpoint, chars = statement.len(), "Neo4j statement");

        let response = self
            .request(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GraphError::Timeout(self.timeout_secs)
                } else {
                    GraphError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(GraphError::Connection(format!(
                "authentication failed ({status})"
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GraphError::Connection(format!("HTTP {status}: {text}")));
        }

        let payload: TxResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                GraphError::Timeout(self.timeout_secs)
            } else {
                GraphError::Decode(e.to_string())
            }
        })?;

        payload.into_rows()
    }

    fn row_to_contract(row: &Row, score: f32) -> Option<EvidenceItem> {
        let id = str_field(row, "contract_id")?;
        let case_file = str_field(row, "expediente").unwrap_or_default();
        let title = str_field(row, "titulo").unwrap_or_default();
        let awardee = str_field(row, "adjudicataria_nombre");
        let awardee_tax_id = str_field(row, "adjudicataria_nif");
        let awarded_amount = row.get("importe_adjudicado").and_then(Value::as_f64);
        let link = str_field(row, "link_contrato");

        let mut text = format!("{title}\n");
        if let Some(summary) = str_field(row, "abstract") {
            text.push_str(&summary);
            text.push('\n');
        }
        if let Some(cpv) = str_field(row, "cpv_principal") {
            text.push_str(&format!("CPV: {cpv}\n"));
        }
        if let Some(name) = &awardee {
            text.push_str(&format!("Adjudicataria: {name}"));
            if let Some(nif) = &awardee_tax_id {
                text.push_str(&format!(" ({nif})"));
            }
            text.push('\n');
        }
        if let Some(amount) = awarded_amount {
            text.push_str(&format!("Importe adjudicado: {amount:.2}\n"));
        }

        Some(EvidenceItem::new(
            id,
            EvidenceKind::Contract {
                case_file,
                title,
                awardee,
                awardee_tax_id,
                awarded_amount,
                link,
            },
            score,
            &text,
        ))
    }

    fn row_to_evidence(tier: Tier, row: &Row) -> Option<EvidenceItem> {
        let score = row.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
        match tier {
            Tier::Contract => Self::row_to_contract(row, score),
            Tier::Chapter => Some(EvidenceItem::new(
                str_field(row, "cap_id")?,
                EvidenceKind::Chapter {
                    contract_id: str_field(row, "contract_id").unwrap_or_default(),
                    case_file: str_field(row, "expediente").unwrap_or_default(),
                    heading: str_field(row, "heading").unwrap_or_default(),
                    doc_type: str_field(row, "tipo_doc"),
                },
                score,
                &str_field(row, "texto").unwrap_or_default(),
            )),
            Tier::Excerpt => Some(EvidenceItem::new(
                str_field(row, "extracto_id")?,
                EvidenceKind::Excerpt {
                    contract_id: str_field(row, "contract_id").unwrap_or_default(),
                    case_file: str_field(row, "expediente").unwrap_or_default(),
                    excerpt_type: str_field(row, "tipo").unwrap_or_default(),
                },
                score,
                &str_field(row, "texto").unwrap_or_default(),
            )),
        }
    }

    fn search_parameters(search: &VectorSearch) -> Value {
        let filters = &search.filters;
        let filtered = !filters.case_files.is_empty()
            || (search.tier == Tier::Excerpt && !filters.excerpt_types.is_empty())
            || (search.tier != Tier::Contract && filters.doc_type.is_some());

        let case_files = if filters.case_files.is_empty() {
            Value::Null
        } else {
            json!(filters.case_files)
        };
        let types = if filters.excerpt_types.is_empty() {
            Value::Null
        } else {
            json!(filters.excerpt_types)
        };

        json!({
            "k": search.k,
            "k_query": cypher::k_query(search.k, filtered),
            "embedding": search.embedding,
            "expedientes": case_files,
            "doc_tipo": filters.doc_type,
            "tipos": types,
        })
    }
}

fn str_field(row: &Row, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl GraphStore for Neo4jHttpStore {
    fn name(&self) -> &str {
        "neo4j"
    }

    async fn execute(&self, query: &str, params: &Map<String, Value>) -> Result<Vec<Row>, GraphError> {
        let rows = self.run(query, Value::Object(params.clone())).await?;
        info!(rows = rows.len(), "Neo4j query executed");
        Ok(rows)
    }

    async fn vector_search(&self, search: &VectorSearch) -> Result<Vec<EvidenceItem>, GraphError> {
        if search.embedding.is_empty() || search.k == 0 {
            return Ok(Vec::new());
        }
        let rows = self
            .run(&cypher::search_for(search.tier), Self::search_parameters(search))
            .await?;
        let items: Vec<EvidenceItem> = rows
            .iter()
            .filter_map(|row| Self::row_to_evidence(search.tier, row))
            .collect();
        debug!(tier = %search.tier, hits = items.len(), "Vector search");
        Ok(items)
    }

    async fn lookup(&self, identifier: &Identifier) -> Result<Vec<EvidenceItem>, GraphError> {
        let (statement, limit) = match identifier {
            Identifier::CaseFile(_) => (cypher::lookup_case_file(), self.lookup_limit),
            Identifier::TaxId(_) => (cypher::lookup_tax_id(), self.tax_id_limit),
        };
        let rows = self
            .run(&statement, json!({ "q": identifier.value(), "limit": limit }))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| Self::row_to_contract(row, 1.0))
            .collect())
    }

    async fn reference_document(
        &self,
        embedding: &[f32],
        contract: Option<&str>,
    ) -> Result<Option<ReferenceDocument>, GraphError> {
        let cid = match contract {
            Some(cid) => cid.to_string(),
            None => {
                if embedding.is_empty() {
                    return Ok(None);
                }
                let rows = self
                    .run(
                        &cypher::nearest_reference(),
                        json!({ "k_query": 50, "embedding": embedding }),
                    )
                    .await?;
                match rows.first().and_then(|r| str_field(r, "contract_id")) {
                    Some(cid) => cid,
                    None => return Ok(None),
                }
            }
        };

        let rows = self
            .run(cypher::REFERENCE_CHAPTERS, json!({ "cid": cid }))
            .await?;
        let Some(first) = rows.first() else {
            return Ok(None);
        };

        let chapters = rows
            .iter()
            .filter_map(|row| {
                let heading = str_field(row, "heading")?;
                Some(ReferenceChapter {
                    heading,
                    order: row.get("orden").and_then(Value::as_i64).unwrap_or(0),
                    text: str_field(row, "texto").unwrap_or_default(),
                })
            })
            .collect();

        Ok(Some(ReferenceDocument {
            contract_id: str_field(first, "contract_id").unwrap_or(cid),
            case_file: str_field(first, "expediente").unwrap_or_default(),
            title: str_field(first, "titulo").unwrap_or_default(),
            link: str_field(first, "link_contrato"),
            chapters,
        }))
    }

    async fn health_check(&self) -> Result<bool, GraphError> {
        Ok(!self.run(cypher::PING, json!({})).await?.is_empty())
    }
}

// --- HTTP API types ---

#[derive(Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Deserialize)]
struct TxResult {
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Deserialize)]
struct TxRow {
    row: Vec<Value>,
}

#[derive(Deserialize)]
struct TxError {
    code: String,
    message: String,
}

impl TxResponse {
    fn into_rows(self) -> Result<Vec<Row>, GraphError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(GraphError::Query {
                code: err.code,
                message: err.message,
            });
        }
        let Some(result) = self.results.into_iter().next() else {
            return Ok(Vec::new());
        };
        Ok(result
            .data
            .into_iter()
            .map(|data| {
                result
                    .columns
                    .iter()
                    .cloned()
                    .zip(data.row)
                    .collect::<Row>()
            })
            .collect())
    }
}
