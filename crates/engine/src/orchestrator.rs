//! The turn orchestrator.
//!
//! One call to [`Engine::run_turn`] drives the routing state machine from
//! `ROUTE` to `FINALIZE`, streaming events as it goes. The turn works on a
//! copy of the conversation and commits it back only once the turn
//! completes, so a cancelled turn leaves the conversation untouched.

use std::sync::Arc;

use procura_config::AppConfig;
use procura_core::{GraphStore, Intent, IntentSlots, Turn};
use procura_providers::ProviderSet;
use tracing::{debug, info, warn};

use crate::classifier::{GREETING_ANSWER, IntentClassifier, Source};
use crate::context::{BudgetAllocator, PromptParts, build_messages, estimate_messages_tokens, render_evidence};
use crate::draft::{DraftGenerator, DraftPlan, ReadyDraft};
use crate::followups::FollowupSuggester;
use crate::llm::{Embedder, Llm, Sampling};
use crate::memory::MemoryCompactor;
use crate::query::{PlanOutcome, QueryPlanner, present_rows};
use crate::retrieval::HybridRetriever;
use crate::state::{ConversationState, HopGuard, Signal, State, StickyFacts, Transition};
use crate::turn::{CancelToken, EventSink, TokenAccounting, TurnError, TurnEvent, TurnOutcome, TurnResult};

// ── Prompts ──────────────────────────────────────────────────────────────

const RETRIEVAL_SYSTEM: &str = "Eres un asistente experto en contratación pública. \
     Responde en español usando únicamente el contexto proporcionado. \
     Cita los expedientes de los que sale cada dato. \
     Si el contexto no contiene la respuesta, dilo claramente sin inventar.";

const CHAT_SYSTEM: &str = "Eres un asistente de contratación pública. \
     Responde en español a partir de la conversación previa y su resumen. \
     Si la respuesta necesita datos que no aparecen en el historial, responde exactamente: \
     «No se dispone de información en el historial para responder.»";

/// Phrases with which the chat model admits it cannot answer from history.
const UNKNOWN_PHRASES: [&str; 5] = [
    "no se dispone de información",
    "no aparece en el historial",
    "no tengo datos sobre",
    "no he encontrado",
    "desconozco",
];

const REROUTE_PREFIX: &str = "busca en base de datos: ";

// ── Soft-failure answers ─────────────────────────────────────────────────

const PLANNING_FAILED_ANSWER: &str = "No he podido construir una consulta segura para esta pregunta. \
     Prueba a reformularla indicando el dato concreto que buscas.";
const EXECUTION_FAILED_ANSWER: &str =
    "La consulta a la base de datos ha fallado. Inténtalo de nuevo en unos minutos.";
const RETRIEVAL_FAILED_ANSWER: &str =
    "No he podido consultar los documentos en este momento. Inténtalo de nuevo en unos minutos.";
const NO_RESULTS_ANSWER: &str =
    "No he encontrado información sobre esto en los contratos disponibles.";
const MODEL_FAILED_ANSWER: &str =
    "Ahora mismo no puedo generar una respuesta. Inténtalo de nuevo en unos minutos.";
const DRAFT_FAILED_ANSWER: &str = "No he podido generar el borrador del pliego.";

/// Sticky case files remembered from one answer.
const STICKY_CASE_FILES: usize = 5;

pub(crate) fn is_unknown_answer(answer: &str) -> bool {
    let lower = answer.to_lowercase();
    UNKNOWN_PHRASES.iter().any(|p| lower.contains(p))
}

/// Split a turn error into "stop the turn" and "report softly".
fn recoverable<T>(result: Result<T, TurnError>) -> Result<Result<T, String>, TurnError> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(TurnError::Cancelled) => Err(TurnError::Cancelled),
        Err(e) => Ok(Err(e.to_string())),
    }
}

// ── Per-turn scratch ─────────────────────────────────────────────────────

/// What one turn accumulates on its way to `FINALIZE`.
struct TurnWork {
    /// The user's words, stored in history.
    original: String,
    /// The question the current state works on (rewritten on reroute).
    question: String,
    intent: Intent,
    slots: IntentSlots,
    guard: HopGuard,
    trace: Vec<State>,
    answer: String,
    /// The answer already reached the client as chunks.
    streamed: bool,
    outcome: TurnOutcome,
    budget: Option<crate::context::ContextBudget>,
    tokens_sent: usize,
    filters: procura_core::EvidenceFilters,
    query: Option<String>,
    rows: Option<Vec<procura_core::Row>>,
    clarification: Option<String>,
    ready: Option<ReadyDraft>,
    draft: Option<crate::draft::Draft>,
    sticky: Option<StickyFacts>,
}

impl TurnWork {
    fn new(question: &str) -> Self {
        Self {
            original: question.to_string(),
            question: question.to_string(),
            intent: Intent::SimpleChat,
            slots: IntentSlots::default(),
            guard: HopGuard::new(),
            trace: Vec::new(),
            answer: String::new(),
            streamed: false,
            outcome: TurnOutcome::Answered,
            budget: None,
            tokens_sent: 0,
            filters: Default::default(),
            query: None,
            rows: None,
            clarification: None,
            ready: None,
            draft: None,
            sticky: None,
        }
    }

    fn fail(&mut self, answer: &str, outcome: TurnOutcome) {
        self.answer = answer.to_string();
        self.streamed = false;
        self.outcome = outcome;
    }

    /// The question planner and retrieval should see.
    fn effective_question(&self) -> String {
        self.slots
            .rewritten_query
            .clone()
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| self.question.clone())
    }

    /// The last state that produced an answer.
    fn answering_state(&self) -> Option<State> {
        self.trace
            .iter()
            .rev()
            .copied()
            .find(|s| !matches!(s, State::Route | State::Finalize))
    }
}

// ── Engine ───────────────────────────────────────────────────────────────

/// Chat and embedding clients plus every component a turn needs.
pub struct Engine {
    config: AppConfig,
    /// Answer model.
    chat: Llm,
    classifier: IntentClassifier,
    planner: QueryPlanner,
    retriever: HybridRetriever,
    allocator: BudgetAllocator,
    compactor: MemoryCompactor,
    drafts: DraftGenerator,
    followups: FollowupSuggester,
}

impl Engine {
    pub fn new(providers: ProviderSet, graph: Arc<dyn GraphStore>, config: AppConfig) -> Self {
        let chat = Llm::new(providers.chat, providers.model);
        let embedder = Embedder::new(
            providers.embedding,
            providers.embedding_model,
            providers.dimensions,
            config.embedding.max_input_chars,
        );

        Self {
            classifier: IntentClassifier::new(chat.clone(), config.memory.followup_reuse_max_chars),
            planner: QueryPlanner::new(chat.clone(), graph.clone(), config.query.clone()),
            retriever: HybridRetriever::new(graph.clone(), embedder.clone(), config.retrieval.clone()),
            allocator: BudgetAllocator::from_config(&config.context),
            compactor: MemoryCompactor::new(chat.clone(), &config.memory),
            drafts: DraftGenerator::new(
                chat.clone(),
                embedder,
                graph,
                config.draft.clone(),
                (config.llm.frequency_penalty, config.llm.presence_penalty),
            ),
            followups: FollowupSuggester::new(chat.clone(), config.followups.clone()),
            chat,
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run one user turn against `state`.
    ///
    /// Only cancellation and an empty question are errors; everything else
    /// ends in a [`TurnOutcome`]. `state` is replaced only when the turn
    /// completes.
    pub async fn run_turn(
        &self,
        state: &mut ConversationState,
        question: &str,
        events: EventSink,
        cancel: &CancelToken,
    ) -> Result<TurnResult, TurnError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(TurnError::Empty("empty question".into()));
        }
        cancel.check()?;

        let mut work = state.clone();
        work.hops = 0;
        let mut turn = TurnWork::new(question);
        info!(session = %work.session_id, chars = question.len(), "Turn started");

        let mut current = State::Route;
        loop {
            turn.guard.enter(current);
            turn.trace.push(current);
            events.emit(TurnEvent::State { state: current }).await;
            if current == State::Finalize {
                break;
            }

            let signal = match current {
                State::Route => self.route(&mut work, &mut turn).await,
                State::QueryQa => self.query_qa(&mut turn, cancel).await?,
                State::RetrievalQa => self.retrieval_qa(&work, &mut turn, &events, cancel).await?,
                State::DocumentPlan => self.document_plan(&mut work, &mut turn, &events).await,
                State::DocumentGenerate => self.document_generate(&mut turn, &events, cancel).await?,
                State::SimpleChat => self.simple_chat(&work, &mut turn, cancel).await?,
                State::Greeting => {
                    turn.answer = GREETING_ANSWER.to_string();
                    Signal::Answered
                }
                State::Finalize => Signal::Answered,
            };
            cancel.check()?;

            current = match turn.guard.transition(current, signal) {
                Transition::Next(State::Route) => {
                    turn.question = format!("{REROUTE_PREFIX}{}", turn.original);
                    debug!(hops = turn.guard.hops(), "Chat could not answer, rerouting");
                    State::Route
                }
                Transition::Next(next) => next,
                Transition::LoopExceeded => {
                    self.loop_exceeded(current, &mut turn);
                    State::Finalize
                }
            };
            work.hops = turn.guard.hops();
        }

        self.finalize(state, work, turn, &events, cancel).await
    }

    fn loop_exceeded(&self, from: State, turn: &mut TurnWork) {
        warn!(state = ?from, hops = turn.guard.hops(), "Routing stopped at hop bound");
        match from {
            State::RetrievalQa => turn.fail(NO_RESULTS_ANSWER, TurnOutcome::NoResults),
            _ => {
                // Keep the best-effort chat answer.
                if turn.answer.trim().is_empty() {
                    turn.answer = NO_RESULTS_ANSWER.to_string();
                }
                turn.outcome = TurnOutcome::RoutingLoopExceeded;
            }
        }
    }

    // ── States ──────────────────────────────────────────────────────────

    async fn route(&self, work: &mut ConversationState, turn: &mut TurnWork) -> Signal {
        let classification = self
            .classifier
            .classify(&turn.question, &work.turns, &work.sticky)
            .await;
        info!(
            intent = %classification.intent,
            source = ?classification.source,
            "Intent classified"
        );

        // A reply to a pending draft question continues the draft unless the
        // classifier recognised another intent.
        let draft_pending = turn.guard.route_visits() == 1 && work.draft.as_ref().is_some_and(|d| d.asked.is_some());
        let undecided = classification.source == Source::Default;
        if draft_pending && (classification.intent == Intent::GenerateDocument || undecided) {
            debug!("Reply continues the pending draft");
            turn.intent = Intent::GenerateDocument;
            turn.slots = classification.slots;
            return Signal::Classified(Intent::GenerateDocument);
        }

        if classification.intent != Intent::GenerateDocument && work.draft.take().is_some() {
            debug!("Pending draft abandoned");
        }
        turn.intent = classification.intent;
        turn.slots = classification.slots;
        Signal::Classified(classification.intent)
    }

    async fn query_qa(&self, turn: &mut TurnWork, cancel: &CancelToken) -> Result<Signal, TurnError> {
        let question = turn.effective_question();
        match self.planner.plan_and_execute(&question, cancel).await? {
            PlanOutcome::Executed { plan, rows } => {
                turn.query = Some(plan.query);
                let answer = present_rows(&self.chat, &self.config.query, &question, &rows, cancel).await?;
                turn.answer = answer;
                turn.streamed = false;
                turn.outcome = if rows.is_empty() {
                    TurnOutcome::NoResults
                } else {
                    TurnOutcome::Answered
                };
                turn.rows = Some(rows);
            }
            PlanOutcome::PlanningFailed { reason, .. } => {
                turn.fail(PLANNING_FAILED_ANSWER, TurnOutcome::PlanningFailed { reason });
            }
            PlanOutcome::ExecutionFailed { plan, reason } => {
                turn.query = plan.map(|p| p.query);
                turn.fail(EXECUTION_FAILED_ANSWER, TurnOutcome::ExecutionFailed { reason });
            }
        }
        Ok(Signal::Answered)
    }

    async fn retrieval_qa(
        &self,
        work: &ConversationState,
        turn: &mut TurnWork,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<Signal, TurnError> {
        let question = turn.effective_question();
        let outcome = tokio::select! {
            outcome = self.retriever.retrieve(&question, &turn.slots, &work.sticky) => outcome,
            _ = cancel.cancelled() => return Err(TurnError::Cancelled),
        };
        turn.filters = outcome.filters.clone();

        if outcome.failed {
            turn.fail(RETRIEVAL_FAILED_ANSWER, TurnOutcome::RetrievalFailed);
            return Ok(Signal::Answered);
        }
        if outcome.is_empty() {
            return Ok(Signal::EvidenceEmpty);
        }

        let mut parts = PromptParts {
            system: RETRIEVAL_SYSTEM,
            summary: work.summary.as_deref(),
            history: work.tail(self.config.memory.tail_window),
            context: None,
            question: &turn.question,
        };
        let overhead = estimate_messages_tokens(&build_messages(&parts));
        let budget = self.allocator.for_prompt(overhead).allocate(&outcome.items);
        events
            .emit(TurnEvent::Evidence {
                count: budget.selected.len(),
                tokens: budget.used_tokens(),
                truncated: budget.truncated,
            })
            .await;

        if budget.selected.is_empty() {
            warn!(
                candidates = outcome.items.len(),
                overhead,
                ceiling = budget.ceiling,
                "No evidence fits the context budget"
            );
            turn.fail(NO_RESULTS_ANSWER, TurnOutcome::NoResults);
            turn.budget = Some(budget);
            return Ok(Signal::Answered);
        }

        let context = render_evidence(&budget.selected);
        parts.context = Some(&context);
        let messages = build_messages(&parts);
        turn.tokens_sent = estimate_messages_tokens(&messages);
        debug!(
            evidence = budget.selected.len(),
            tokens = turn.tokens_sent,
            "Answer prompt assembled"
        );

        let reserve = u32::try_from(self.config.context.reserve_for_answer_tokens).unwrap_or(u32::MAX);
        let sampling = Sampling::new(0.2).max_tokens(reserve);
        match recoverable(self.chat.stream(messages, sampling, events, cancel).await)? {
            Ok(answer) if !answer.trim().is_empty() => {
                turn.answer = answer;
                turn.streamed = true;
                turn.outcome = TurnOutcome::Answered;
            }
            Ok(_) => turn.fail(NO_RESULTS_ANSWER, TurnOutcome::NoResults),
            Err(reason) => {
                warn!(error = %reason, "Answer call failed");
                turn.fail(MODEL_FAILED_ANSWER, TurnOutcome::ExecutionFailed { reason });
            }
        }

        turn.sticky = Some(sticky_from(&budget.selected, &turn.slots, &work.sticky));
        turn.budget = Some(budget);
        Ok(Signal::EvidenceFound)
    }

    async fn document_plan(
        &self,
        work: &mut ConversationState,
        turn: &mut TurnWork,
        events: &EventSink,
    ) -> Signal {
        let mut plan = work
            .draft
            .take()
            .unwrap_or_else(|| DraftPlan::new(turn.original.clone()));
        plan.absorb(&turn.slots, &turn.original);

        match plan.into_ready() {
            Ok(ready) => {
                info!(subject = ready.subject(), "Draft parameters complete");
                turn.ready = Some(ready);
                Signal::PlanReady
            }
            Err(mut plan) => {
                let question = plan.next_question().unwrap_or(crate::draft::DraftParam::Subject.question());
                events
                    .emit(TurnEvent::Clarification { question: question.to_string() })
                    .await;
                turn.clarification = Some(question.to_string());
                turn.answer = question.to_string();
                turn.outcome = TurnOutcome::Clarification;
                work.draft = Some(plan);
                Signal::NeedsClarification
            }
        }
    }

    async fn document_generate(
        &self,
        turn: &mut TurnWork,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<Signal, TurnError> {
        let Some(ready) = turn.ready.take() else {
            turn.fail(DRAFT_FAILED_ANSWER, TurnOutcome::ExecutionFailed {
                reason: "draft parameters missing".into(),
            });
            return Ok(Signal::Answered);
        };

        let reference = tokio::select! {
            reference = self.drafts.reference(&ready) => reference,
            _ = cancel.cancelled() => return Err(TurnError::Cancelled),
        };
        match recoverable(self.drafts.generate(&ready, reference.as_ref(), events, cancel).await)? {
            Ok(draft) => {
                turn.answer = draft.markdown.clone();
                turn.streamed = true;
                turn.outcome = TurnOutcome::DraftGenerated;
                turn.draft = Some(draft);
            }
            Err(reason) => {
                warn!(error = %reason, "Draft generation failed");
                turn.fail(DRAFT_FAILED_ANSWER, TurnOutcome::ExecutionFailed { reason });
            }
        }
        Ok(Signal::Answered)
    }

    /// Chat answers are not streamed: an unknown answer may be replaced by
    /// a rerouted one.
    async fn simple_chat(
        &self,
        work: &ConversationState,
        turn: &mut TurnWork,
        cancel: &CancelToken,
    ) -> Result<Signal, TurnError> {
        let messages = build_messages(&PromptParts {
            system: CHAT_SYSTEM,
            summary: work.summary.as_deref(),
            history: work.tail(self.config.memory.tail_window),
            context: None,
            question: &turn.original,
        });
        turn.tokens_sent = estimate_messages_tokens(&messages);

        let reply = tokio::select! {
            reply = self.chat.complete(messages, Sampling::new(0.3)) => reply,
            _ = cancel.cancelled() => return Err(TurnError::Cancelled),
        };
        match reply {
            Ok(answer) => {
                let unknown = answer.trim().is_empty() || is_unknown_answer(&answer);
                turn.answer = answer;
                turn.streamed = false;
                turn.outcome = TurnOutcome::Answered;
                Ok(if unknown { Signal::Unknown } else { Signal::Answered })
            }
            Err(e) => {
                warn!(error = %e, "Chat call failed");
                turn.fail(MODEL_FAILED_ANSWER, TurnOutcome::ExecutionFailed { reason: e.to_string() });
                Ok(Signal::Answered)
            }
        }
    }

    // ── Commit ──────────────────────────────────────────────────────────

    async fn finalize(
        &self,
        state: &mut ConversationState,
        mut work: ConversationState,
        mut turn: TurnWork,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<TurnResult, TurnError> {
        if !turn.streamed && !turn.answer.is_empty() {
            events
                .emit(TurnEvent::Chunk { content: turn.answer.clone() })
                .await;
        }
        if turn.outcome.is_failure() {
            events
                .emit(TurnEvent::Error { message: turn.answer.clone() })
                .await;
        }

        let evidence = turn.budget.as_ref().map(|b| b.selected.clone()).unwrap_or_default();
        let backed = !evidence.is_empty() || turn.rows.as_ref().is_some_and(|r| !r.is_empty());
        let suggestions = if backed && turn.outcome == TurnOutcome::Answered {
            tokio::select! {
                s = self.followups.suggest(&turn.original, &turn.answer) => s,
                _ = cancel.cancelled() => return Err(TurnError::Cancelled),
            }
        } else {
            Vec::new()
        };
        cancel.check()?;

        // Commit.
        let remembered = match &turn.draft {
            Some(draft) => format!(
                "Borrador generado: {} ({} capítulos)",
                draft.metadata.title, draft.metadata.chapter_count
            ),
            None => turn.answer.clone(),
        };
        work.turns.push(Turn::user(turn.original.clone()));
        work.turns.push(Turn::assistant(remembered));
        if let Some(sticky) = turn.sticky.take() {
            work.sticky = sticky;
        }
        if let Some(last) = turn.answering_state().filter(|s| *s != State::Greeting) {
            work.sticky.last_state = Some(last);
        }
        let compaction = self.compactor.compact(&mut work).await;
        debug!(?compaction, turns = work.turns.len(), "History committed");
        *state = work;

        let (evidence_tokens, truncated) = turn
            .budget
            .as_ref()
            .map(|b| (b.used_tokens(), b.truncated))
            .unwrap_or((0, false));
        events
            .emit(TurnEvent::Done {
                intent: turn.intent,
                tokens_sent: turn.tokens_sent,
                evidence: evidence.len(),
            })
            .await;
        info!(
            intent = %turn.intent,
            outcome = ?turn.outcome,
            hops = state.hops,
            evidence = evidence.len(),
            "Turn complete"
        );

        Ok(TurnResult {
            answer: turn.answer,
            intent: turn.intent,
            outcome: turn.outcome,
            evidence,
            truncated,
            tokens: TokenAccounting {
                sent: turn.tokens_sent,
                evidence: evidence_tokens,
                ceiling: turn.budget.as_ref().map_or(self.allocator.ceiling(), |b| b.ceiling),
                model_max: self.config.context.model_max_tokens,
            },
            filters: turn.filters,
            query: turn.query,
            rows: turn.rows,
            clarification: turn.clarification,
            draft: turn.draft,
            suggestions,
            trace: turn.trace,
        })
    }
}

/// Facts remembered from the evidence an answer used.
fn sticky_from(
    selected: &[procura_core::EvidenceItem],
    slots: &IntentSlots,
    previous: &StickyFacts,
) -> StickyFacts {
    let mut case_files: Vec<String> = Vec::new();
    for item in selected {
        let case_file = item.case_file();
        if !case_file.is_empty() && !case_files.iter().any(|c| c == case_file) {
            case_files.push(case_file.to_string());
        }
    }
    case_files.truncate(STICKY_CASE_FILES);

    StickyFacts {
        contract_id: selected.first().map(|i| i.contract_id().to_string()),
        case_files,
        tax_id: slots.tax_id.clone().or_else(|| previous.tax_id.clone()),
        last_state: previous.last_state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SequentialMockProvider, StaticEmbedder, make_text_response};
    use procura_core::{EvidenceItem, EvidenceKind, ProviderError};
    use procura_graph::InMemoryGraph;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn engine(mock: &Arc<SequentialMockProvider>, graph: Arc<InMemoryGraph>) -> Engine {
        let providers = ProviderSet {
            chat: mock.clone(),
            embedding: Arc::new(StaticEmbedder::new(vec![1.0, 0.0, 0.0])),
            model: "chat".into(),
            embedding_model: "embed".into(),
            dimensions: 3,
        };
        Engine::new(providers, graph, AppConfig::default())
    }

    fn chapter(id: &str, case_file: &str, text: &str) -> EvidenceItem {
        EvidenceItem::new(
            id,
            EvidenceKind::Chapter {
                contract_id: format!("c-{case_file}"),
                case_file: case_file.into(),
                heading: "Solvencia".into(),
                doc_type: None,
            },
            0.9,
            text,
        )
    }

    fn classified(intent: &str) -> String {
        format!(r#"{{"intent": "{intent}"}}"#)
    }

    async fn collect(mut rx: mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn empty_question_is_an_error() {
        let mock = Arc::new(SequentialMockProvider::texts(&[]));
        let engine = engine(&mock, Arc::new(InMemoryGraph::new()));
        let mut state = ConversationState::new("s");
        let err = engine
            .run_turn(&mut state, "   ", EventSink::none(), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Empty(_)));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn greeting_makes_no_model_call() {
        let mock = Arc::new(SequentialMockProvider::texts(&[]));
        let engine = engine(&mock, Arc::new(InMemoryGraph::new()));
        let mut state = ConversationState::new("s");
        let result = engine
            .run_turn(&mut state, "¡Hola!", EventSink::none(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(result.intent, Intent::Greeting);
        assert_eq!(result.answer, GREETING_ANSWER);
        assert_eq!(result.trace, vec![State::Route, State::Greeting, State::Finalize]);
        assert_eq!(state.turns.len(), 2);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn retrieval_answer_streams_with_evidence() {
        let graph = Arc::new(InMemoryGraph::new());
        graph
            .add_evidence(chapter("ch1", "24seA1", "Solvencia económica: volumen anual de 100.000 €."), vec![1.0, 0.0, 0.0])
            .await;
        let answer = "La solvencia exigida en el 24seA1 es un volumen anual de 100.000 €. ".repeat(4);
        let mock = Arc::new(SequentialMockProvider::texts(&[
            &classified("RETRIEVAL_QA"),
            answer.trim(),
            r#"["Buscar contratos similares"]"#,
        ]));
        let engine = engine(&mock, graph);
        let mut state = ConversationState::new("s");
        let (tx, rx) = mpsc::channel(64);

        let result = engine
            .run_turn(&mut state, "¿Qué solvencia pide el pliego?", EventSink::new(tx), &CancelToken::new())
            .await
            .unwrap();
        let events = collect(rx).await;

        assert_eq!(result.outcome, TurnOutcome::Answered);
        assert_eq!(result.evidence.len(), 1);
        assert!(result.tokens.sent > 0);
        assert_eq!(result.suggestions, vec!["Buscar contratos similares"]);
        assert!(events.iter().any(|e| matches!(e, TurnEvent::Evidence { count: 1, .. })));
        assert!(matches!(events.last(), Some(TurnEvent::Done { .. })));
        assert_eq!(state.sticky.case_files, vec!["24seA1"]);
        assert_eq!(state.sticky.last_state, Some(State::RetrievalQa));

        let prompt = &mock.requests()[1].messages;
        assert!(prompt.iter().any(|m| m.content.contains("volumen anual")));
    }

    #[tokio::test]
    async fn empty_retrieval_falls_back_to_query_once() {
        let graph = Arc::new(InMemoryGraph::new());
        graph
            .on_query("count(", vec![json!({"total": 12}).as_object().unwrap().clone()])
            .await;
        let plan = r#"{"query": "MATCH (c:Contrato) RETURN count(c) AS total", "params": {}}"#;
        let mock = Arc::new(SequentialMockProvider::texts(&[
            &classified("RETRIEVAL_QA"),
            plan,
            "Hay 12 contratos registrados en total.",
            "[]",
        ]));
        let engine = engine(&mock, graph.clone());
        let mut state = ConversationState::new("s");

        let result = engine
            .run_turn(&mut state, "¿Cuántos contratos hay?", EventSink::none(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(
            result.trace,
            vec![State::Route, State::RetrievalQa, State::QueryQa, State::Finalize]
        );
        assert_eq!(result.outcome, TurnOutcome::Answered);
        assert!(result.answer.contains("12"));
        assert_eq!(graph.executed().await.len(), 1);
        assert!(state.hops <= crate::state::MAX_HOPS);
    }

    #[tokio::test]
    async fn unknown_chat_reroutes_then_stops_at_bound() {
        let mock = Arc::new(SequentialMockProvider::texts(&[
            &classified("SIMPLE_CHAT"),
            "No se dispone de información en el historial para responder.",
            &classified("SIMPLE_CHAT"),
            "Desconozco ese dato.",
        ]));
        let engine = engine(&mock, Arc::new(InMemoryGraph::new()));
        let mut state = ConversationState::new("s");

        let result = engine
            .run_turn(&mut state, "¿Y el importe?", EventSink::none(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(result.outcome, TurnOutcome::RoutingLoopExceeded);
        assert_eq!(result.answer, "Desconozco ese dato.");
        assert_eq!(state.hops, 1);
        let reclassify = &mock.requests()[2].messages;
        assert!(reclassify.iter().any(|m| m.content.contains("busca en base de datos: ¿Y el importe?")));
    }

    #[tokio::test]
    async fn draft_asks_then_generates() {
        let graph = Arc::new(InMemoryGraph::new());
        let mock = Arc::new(SequentialMockProvider::texts(&[
            r#"{"intent": "GENERATE_DOCUMENT", "objeto": "compra de un vehículo"}"#,
        ]));
        let engine1 = engine(&mock, graph.clone());
        let mut state = ConversationState::new("s");

        let first = engine1
            .run_turn(&mut state, "Genera un pliego para la compra de un vehículo", EventSink::none(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(first.outcome, TurnOutcome::Clarification);
        assert!(first.clarification.as_deref().unwrap().contains("ámbito técnico"));
        assert!(state.draft.is_some());

        let reply = r#"{"intent": "GENERATE_DOCUMENT"}"#;
        let mut script = vec![reply];
        script.extend(vec!["Texto del capítulo."; crate::draft::generator::DEFAULT_CHAPTERS.len()]);
        let mock2 = Arc::new(SequentialMockProvider::texts(&script));
        let engine2 = engine(&mock2, graph);
        let second = engine2
            .run_turn(&mut state, "vehículos", EventSink::none(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(second.outcome, TurnOutcome::DraftGenerated);
        let draft = second.draft.unwrap();
        assert!(draft.metadata.title.contains("compra de un vehículo"));
        assert!(state.draft.is_none());
        assert!(state.turns[3].text.starts_with("Borrador generado"));
    }

    async fn pending_draft(graph: &Arc<InMemoryGraph>) -> ConversationState {
        let mock = Arc::new(SequentialMockProvider::texts(&[
            r#"{"intent": "GENERATE_DOCUMENT", "objeto": "compra de un vehículo"}"#,
        ]));
        let mut state = ConversationState::new("s");
        engine(&mock, graph.clone())
            .run_turn(&mut state, "Genera un pliego para la compra de un vehículo", EventSink::none(), &CancelToken::new())
            .await
            .unwrap();
        assert!(state.draft.as_ref().is_some_and(|d| d.asked.is_some()));
        state
    }

    #[tokio::test]
    async fn unrelated_question_abandons_pending_draft() {
        let graph = Arc::new(InMemoryGraph::new());
        let mut state = pending_draft(&graph).await;
        graph
            .on_query("count(", vec![json!({"contratos": 3}).as_object().unwrap().clone()])
            .await;
        let plan = r#"{"query": "MATCH (e:EmpresaRAG)-[r:ADJUDICATARIA_RAG]->(c:ContratoRAG) WHERE e.nombre = 'Acme SL' RETURN count(c) AS contratos", "params": {}}"#;
        let mock = Arc::new(SequentialMockProvider::texts(&[
            &classified("QUERY_QA"),
            plan,
            "Acme SL obtuvo 3 contratos en 2024.",
            "[]",
        ]));

        let result = engine(&mock, graph.clone())
            .run_turn(&mut state, "¿Cuántos contratos adjudicó Acme SL en 2024?", EventSink::none(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(result.intent, Intent::QueryQa);
        assert_eq!(result.outcome, TurnOutcome::Answered);
        assert_eq!(result.trace, vec![State::Route, State::QueryQa, State::Finalize]);
        assert!(result.draft.is_none());
        assert!(state.draft.is_none());
        assert_eq!(graph.executed().await.len(), 1);
    }

    #[tokio::test]
    async fn undecided_reply_still_answers_pending_draft() {
        let graph = Arc::new(InMemoryGraph::new());
        let mut state = pending_draft(&graph).await;
        let mut script = vec!["no es json"];
        script.extend(vec!["Texto del capítulo."; crate::draft::generator::DEFAULT_CHAPTERS.len()]);
        let mock = Arc::new(SequentialMockProvider::texts(&script));

        let result = engine(&mock, graph)
            .run_turn(&mut state, "vehículos", EventSink::none(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(result.intent, Intent::GenerateDocument);
        assert_eq!(result.outcome, TurnOutcome::DraftGenerated);
        assert!(state.draft.is_none());
    }

    #[tokio::test]
    async fn evidence_that_never_fits_ends_without_an_answer_call() {
        let graph = Arc::new(InMemoryGraph::new());
        graph
            .add_evidence(chapter("ch1", "24seA1", &"Solvencia técnica acreditada. ".repeat(40)), vec![1.0, 0.0, 0.0])
            .await;
        let mock = Arc::new(SequentialMockProvider::texts(&[&classified("RETRIEVAL_QA")]));
        let providers = ProviderSet {
            chat: mock.clone(),
            embedding: Arc::new(StaticEmbedder::new(vec![1.0, 0.0, 0.0])),
            model: "chat".into(),
            embedding_model: "embed".into(),
            dimensions: 3,
        };
        let mut config = AppConfig::default();
        config.context.retrieval_max_tokens = 50;
        let engine = Engine::new(providers, graph, config);
        let mut state = ConversationState::new("s");

        let result = engine
            .run_turn(&mut state, "¿Qué solvencia pide el pliego?", EventSink::none(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(result.outcome, TurnOutcome::NoResults);
        assert_eq!(result.answer, NO_RESULTS_ANSWER);
        assert!(result.evidence.is_empty());
        assert!(result.truncated);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_turn_leaves_state_untouched() {
        let mock = Arc::new(SequentialMockProvider::texts(&[]));
        let engine = engine(&mock, Arc::new(InMemoryGraph::new()));
        let mut state = ConversationState::new("s");
        state.turns.push(Turn::user("antes"));

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = engine
            .run_turn(&mut state, "¿Cuántos contratos hay?", EventSink::none(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Cancelled));
        assert_eq!(state.turns.len(), 1);
        assert_eq!(state.turns[0].text, "antes");
        assert!(state.sticky.last_state.is_none());
    }

    #[tokio::test]
    async fn chat_provider_failure_is_soft() {
        let mock = Arc::new(SequentialMockProvider::new(vec![
            Ok(make_text_response(&classified("SIMPLE_CHAT"))),
            Err(ProviderError::Network("down".into())),
        ]));
        let engine = engine(&mock, Arc::new(InMemoryGraph::new()));
        let mut state = ConversationState::new("s");

        let result = engine
            .run_turn(&mut state, "Resume lo anterior", EventSink::none(), &CancelToken::new())
            .await
            .unwrap();
        assert!(matches!(result.outcome, TurnOutcome::ExecutionFailed { .. }));
        assert_eq!(result.answer, MODEL_FAILED_ANSWER);
        assert_eq!(state.turns.len(), 2);
    }

    #[test]
    fn unknown_phrases_are_case_insensitive() {
        assert!(is_unknown_answer("NO HE ENCONTRADO nada"));
        assert!(!is_unknown_answer("El importe fue 1.000 €"));
    }
}
