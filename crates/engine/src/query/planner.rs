//! Natural-language to graph-query planning with bounded repair.
//!
//! One model call proposes `{"cypher", "params"}`. The query is normalized
//! and validated; a rejection reason, or a statement error reported by the
//! database, is fed back into the next proposal. Only a `Safe` plan ever
//! reaches [`GraphStore::execute`].

use procura_config::QueryConfig;
use procura_core::{GraphError, GraphStore, Message, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::schema::{PLAN_SHAPE, PLANNER_SYSTEM, planner_prompt};
use super::validator::{Verdict, normalize, validate};
use crate::llm::{Llm, Sampling};
use crate::parse::parse_with_repair;
use crate::turn::{CancelToken, TurnError};

/// A candidate query and its verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub query: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    pub verdict: Verdict,
    /// Repair attempts spent before this plan was produced.
    pub repairs: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Executed { plan: QueryPlan, rows: Vec<Row> },
    /// No plan validated within the repair budget. Nothing was executed.
    PlanningFailed { plan: Option<QueryPlan>, reason: String },
    /// The model or the database failed after its retry.
    ExecutionFailed { plan: Option<QueryPlan>, reason: String },
}

#[derive(Debug, Deserialize)]
struct ProposedPlan {
    #[serde(default, alias = "query")]
    cypher: String,
    #[serde(default)]
    params: Value,
}

/// Column keys with `.` replaced, so `e.nombre` becomes `e_nombre`.
pub fn clean_keys(rows: Vec<Row>) -> Vec<Row> {
    rows.into_iter()
        .map(|row| row.into_iter().map(|(k, v)| (k.replace('.', "_"), v)).collect())
        .collect()
}

pub struct QueryPlanner {
    llm: Llm,
    graph: Arc<dyn GraphStore>,
    config: QueryConfig,
}

impl QueryPlanner {
    pub fn new(llm: Llm, graph: Arc<dyn GraphStore>, config: QueryConfig) -> Self {
        Self { llm, graph, config }
    }

    async fn propose(&self, question: &str, hint: Option<&str>) -> Result<Result<ProposedPlan, String>, TurnError> {
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let messages = vec![
            Message::system(PLANNER_SYSTEM),
            Message::user(planner_prompt(question, &today, hint)),
        ];
        let raw = self
            .llm
            .complete(messages, Sampling::new(0.0).max_tokens(650))
            .await?;
        Ok(parse_with_repair::<ProposedPlan>(&self.llm, &raw, PLAN_SHAPE).await)
    }

    /// Run a validated plan. Connection failures and timeouts get one retry.
    async fn execute(&self, plan: &QueryPlan, cancel: &CancelToken) -> Result<Vec<Row>, TurnError> {
        let mut retried = false;
        loop {
            cancel.check()?;
            let result = tokio::select! {
                r = self.graph.execute(&plan.query, &plan.params) => r,
                _ = cancel.cancelled() => return Err(TurnError::Cancelled),
            };
            match result {
                Ok(rows) => return Ok(rows),
                Err(e) if !e.is_statement_error() && !retried => {
                    warn!(error = %e, "Query execution failed, retrying once");
                    retried = true;
                }
                Err(e) => return Err(TurnError::Graph(e)),
            }
        }
    }

    /// Plan, validate, repair and execute. `Err` only on cancellation.
    pub async fn plan_and_execute(
        &self,
        question: &str,
        cancel: &CancelToken,
    ) -> Result<PlanOutcome, TurnError> {
        let mut repairs = 0u32;
        let mut hint: Option<String> = None;
        let mut last: Option<QueryPlan> = None;

        loop {
            cancel.check()?;
            let proposed = match self.propose(question, hint.as_deref()).await {
                Ok(p) => p,
                Err(TurnError::Cancelled) => return Err(TurnError::Cancelled),
                Err(e) => {
                    warn!(error = %e, "Query planning call failed");
                    return Ok(PlanOutcome::ExecutionFailed { plan: last, reason: e.to_string() });
                }
            };

            let plan = match proposed {
                Ok(p) => {
                    let query = normalize(&p.cypher, self.config.default_limit);
                    let verdict = validate(&query);
                    let params = match p.params {
                        Value::Object(map) => map,
                        _ => Map::new(),
                    };
                    QueryPlan { query, params, verdict, repairs }
                }
                Err(reason) => QueryPlan {
                    query: String::new(),
                    params: Map::new(),
                    verdict: Verdict::SyntaxError(format!("reply was not a JSON plan: {reason}")),
                    repairs,
                },
            };

            let reason = match plan.verdict.reason() {
                None => match self.execute(&plan, cancel).await {
                    Ok(rows) => {
                        info!(rows = rows.len(), repairs, "Query executed");
                        return Ok(PlanOutcome::Executed { rows: clean_keys(rows), plan });
                    }
                    Err(TurnError::Graph(e)) if e.is_statement_error() => statement_reason(&e),
                    Err(TurnError::Graph(e)) => {
                        return Ok(PlanOutcome::ExecutionFailed {
                            plan: Some(plan),
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                },
                Some(reason) => {
                    warn!(verdict = %plan.verdict, query = %plan.query, "Query plan rejected");
                    reason.to_string()
                }
            };

            if repairs >= self.config.max_repairs {
                warn!(repairs, reason = %reason, "Repair budget exhausted");
                return Ok(if plan.verdict.is_safe() {
                    PlanOutcome::ExecutionFailed { plan: Some(plan), reason }
                } else {
                    PlanOutcome::PlanningFailed { plan: Some(plan), reason }
                });
            }
            repairs += 1;
            debug!(repairs, "Requesting corrected query");
            hint = Some(reason);
            last = Some(plan);
        }
    }
}

fn statement_reason(error: &GraphError) -> String {
    match error {
        GraphError::Query { code, message } => format!("{code}: {message}"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::SequentialMockProvider;
    use procura_graph::in_memory::InMemoryGraph;
    use serde_json::json;

    const TOP: &str = r#"{"cypher": "MATCH (e:EmpresaRAG)-[r:ADJUDICATARIA_RAG]->(c:ContratoRAG) RETURN e.nombre AS empresa, count(DISTINCT c) AS contratos ORDER BY contratos DESC LIMIT 10", "params": {}}"#;
    const DELETE: &str = r#"{"cypher": "MATCH (c:ContratoRAG) DETACH DELETE c RETURN count(c)", "params": {}}"#;

    fn row(v: Value) -> Row {
        serde_json::from_value(v).unwrap()
    }

    fn planner(mock: Arc<SequentialMockProvider>, graph: InMemoryGraph) -> QueryPlanner {
        QueryPlanner::new(Llm::new(mock, "m"), Arc::new(graph), QueryConfig::default())
    }

    #[tokio::test]
    async fn safe_plan_is_executed() {
        let graph = InMemoryGraph::new();
        graph
            .on_query("EmpresaRAG", vec![row(json!({"empresa": "Techfriendly SL", "contratos": 12}))])
            .await;
        let mock = Arc::new(SequentialMockProvider::texts(&[TOP]));
        let outcome = planner(mock.clone(), graph.clone())
            .plan_and_execute("Top 10 empresas por número de contratos", &CancelToken::new())
            .await
            .unwrap();

        let PlanOutcome::Executed { plan, rows } = outcome else { panic!("not executed") };
        assert_eq!(plan.verdict, Verdict::Safe);
        assert_eq!(plan.repairs, 0);
        assert_eq!(rows.len(), 1);
        assert_eq!(graph.executed().await.len(), 1);
        assert_eq!(mock.requests()[0].temperature, 0.0);
    }

    #[tokio::test]
    async fn unsafe_plan_is_repaired_before_execution() {
        let graph = InMemoryGraph::new();
        let mock = Arc::new(SequentialMockProvider::texts(&[DELETE, TOP]));
        let outcome = planner(mock.clone(), graph.clone())
            .plan_and_execute("Top 10 empresas", &CancelToken::new())
            .await
            .unwrap();

        let PlanOutcome::Executed { plan, .. } = outcome else { panic!("not executed") };
        assert_eq!(plan.repairs, 1);
        let executed = graph.executed().await;
        assert_eq!(executed.len(), 1);
        assert!(!executed[0].contains("DELETE"));
        assert!(mock.requests()[1].messages[1].content.contains("Error previo a corregir"));
    }

    #[tokio::test]
    async fn repair_budget_is_bounded() {
        let graph = InMemoryGraph::new();
        let mock = Arc::new(SequentialMockProvider::texts(&[DELETE, DELETE, DELETE]));
        let outcome = planner(mock.clone(), graph.clone())
            .plan_and_execute("Borra todo", &CancelToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, PlanOutcome::PlanningFailed { .. }));
        assert_eq!(mock.call_count(), 3);
        assert!(graph.executed().await.is_empty());
    }

    #[tokio::test]
    async fn statement_errors_consume_repairs() {
        let graph = InMemoryGraph::new();
        graph
            .fail_query(
                "RETRUN",
                GraphError::Query {
                    code: "Neo.ClientError.Statement.SyntaxError".into(),
                    message: "Invalid input 'RETRUN'".into(),
                },
            )
            .await;
        graph.on_query("EmpresaRAG", vec![row(json!({"empresa": "Acme"}))]).await;
        let broken = r#"{"cypher": "MATCH (c:ContratoRAG) WITH c RETURN c.titulo, 'RETRUN' AS x", "params": {}}"#;
        let mock = Arc::new(SequentialMockProvider::texts(&[broken, TOP]));
        let outcome = planner(mock.clone(), graph.clone())
            .plan_and_execute("Top empresas", &CancelToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, PlanOutcome::Executed { .. }));
        assert_eq!(graph.executed().await.len(), 2);
        assert!(mock.requests()[1].messages[1].content.contains("SyntaxError"));
    }

    #[tokio::test]
    async fn connection_errors_retry_once_then_fail() {
        let graph = InMemoryGraph::new();
        graph
            .fail_query("EmpresaRAG", GraphError::Connection("refused".into()))
            .await;
        let mock = Arc::new(SequentialMockProvider::texts(&[TOP]));
        let outcome = planner(mock, graph.clone())
            .plan_and_execute("Top empresas", &CancelToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, PlanOutcome::ExecutionFailed { plan: Some(_), .. }));
        assert_eq!(graph.executed().await.len(), 2);
    }

    #[tokio::test]
    async fn non_json_reply_counts_as_rejection() {
        let graph = InMemoryGraph::new();
        let mock = Arc::new(SequentialMockProvider::texts(&["No sé hacer eso", TOP]));
        let outcome = planner(mock, graph)
            .plan_and_execute("Top empresas", &CancelToken::new())
            .await
            .unwrap();
        let PlanOutcome::Executed { plan, .. } = outcome else { panic!("not executed") };
        assert_eq!(plan.repairs, 1);
    }

    #[tokio::test]
    async fn cancelled_before_planning() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mock = Arc::new(SequentialMockProvider::texts(&[]));
        let result = planner(mock, InMemoryGraph::new()).plan_and_execute("q", &cancel).await;
        assert!(matches!(result, Err(TurnError::Cancelled)));
    }

    #[test]
    fn keys_are_cleaned() {
        let rows = clean_keys(vec![row(json!({"e.nombre": "Acme", "total": 3}))]);
        assert!(rows[0].contains_key("e_nombre"));
        assert!(rows[0].contains_key("total"));
    }
}
