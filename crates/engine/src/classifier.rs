//! Intent classification.
//!
//! Greetings and short follow-ups are settled by fixed patterns without a
//! model call. Everything else goes to one model call whose JSON reply is
//! parsed leniently; an unusable reply falls back to `SIMPLE_CHAT`.

use procura_core::token::clip;
use procura_core::{Focus, Intent, IntentSlots, Message, Role, Turn};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::llm::{Llm, Sampling};
use crate::parse::parse_with_repair;
use crate::retrieval::identifiers;
use crate::state::{State, StickyFacts};

/// Excerpt types the graph knows about. Anything else is dropped.
pub const KNOWN_EXCERPT_TYPES: [&str; 8] = [
    "normativa",
    "garantia_definitiva",
    "garantia_otros_tipos",
    "solvencia_tecnica",
    "solvencia_economica",
    "criterios_ambientales",
    "clausulas_sociales",
    "clausulas_igualdad_genero",
];

pub const GREETING_ANSWER: &str = "¡Hola! Soy el asistente de contratación pública. Puedo \
     responder preguntas sobre contratos, empresas adjudicatarias y pliegos, calcular \
     estadísticas sobre adjudicaciones o redactar un borrador de pliego técnico. ¿En qué te ayudo?";

const HISTORY_TURNS: usize = 4;
const HISTORY_CLIP_CHARS: usize = 300;

static GREETING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*[¡¿]*\s*(hola|gracias|adios|adiós|buenas|buenos\s+d[ií]as|buenas\s+tardes|buenas\s+noches|hey|hello|hi|qu[eé]\s+tal)\s*[!.?,¡¿]*\s*$",
    )
    .expect("greeting regex")
});

static FOLLOWUP_HINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*[¿¡]?\s*(y|adem[aá]s|tambi[eé]n|otra\s+cosa)\s").expect("follow-up hint regex")
});

static PREV_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:^|[\s¿¡,(])(ese|este|esa|esta|dicho|anterior|previo|[uú]ltimo|primer|primero|segundo|tercer)\s+(contrato|expediente|pliego|texto|caso|opci[oó]n|tabla|empresa)\b|\b(contrato|expediente|pliego|tabla)\s+(anterior|previo)\b",
    )
    .expect("previous reference regex")
});

pub fn is_greeting(question: &str) -> bool {
    GREETING_RE.is_match(question)
}

/// Continuation markers or references back to a previous item.
pub fn refers_back(question: &str) -> bool {
    FOLLOWUP_HINT_RE.is_match(question) || PREV_REF_RE.is_match(question)
}

/// How a classification was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Greeting,
    /// The previous turn's intent was reused for a follow-up.
    Reused,
    Model,
    /// The model call or its reply was unusable.
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub slots: IntentSlots,
    pub source: Source,
}

#[derive(Debug, Default, Deserialize)]
struct RawClassification {
    #[serde(default)]
    intent: Option<String>,
    #[serde(default, alias = "doc_tipo")]
    doc_type: Option<String>,
    #[serde(default, alias = "extracto_tipos")]
    excerpt_types: Option<Value>,
    #[serde(default)]
    focus: Option<String>,
    #[serde(default, alias = "empresa_query", alias = "empresa")]
    company: Option<String>,
    #[serde(default, alias = "empresa_nif", alias = "nif")]
    tax_id: Option<String>,
    #[serde(default, alias = "expediente")]
    case_file: Option<String>,
    #[serde(default)]
    is_followup: Option<bool>,
    #[serde(default)]
    rewritten_query: Option<String>,
    #[serde(default, alias = "objeto")]
    subject: Option<String>,
    #[serde(default, alias = "ambito_tecnico")]
    technical_domain: Option<String>,
    #[serde(default, alias = "contrato_referencia")]
    reference_contract: Option<String>,
}

const CLASSIFICATION_SHAPE: &str = r#"{"intent": "QUERY_QA|RETRIEVAL_QA|GENERATE_DOCUMENT|SIMPLE_CHAT|GREETING", "doc_type": null, "excerpt_types": [], "focus": "CONTRACT", "company": null, "tax_id": null, "case_file": null, "is_followup": false, "rewritten_query": null, "subject": null, "technical_domain": null, "reference_contract": null}"#;

fn text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

fn excerpt_types(value: Option<Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_str)
        .map(|t| t.trim().to_lowercase())
        .filter(|t| KNOWN_EXCERPT_TYPES.contains(&t.as_str()))
        .collect()
}

/// Identifiers found by pattern in the question.
fn regex_slots(question: &str) -> IntentSlots {
    IntentSlots {
        case_files: identifiers::case_files(question),
        tax_id: identifiers::tax_id(question),
        ..Default::default()
    }
}

impl RawClassification {
    fn into_slots(self, question: &str) -> IntentSlots {
        let mut slots = regex_slots(question);
        if let Some(case_file) = text(self.case_file)
            && !slots.case_files.contains(&case_file)
        {
            slots.case_files.push(case_file);
        }
        if slots.tax_id.is_none() {
            slots.tax_id = self.tax_id.as_deref().and_then(identifiers::tax_id);
        }
        slots.doc_type = text(self.doc_type)
            .map(|d| d.to_ascii_uppercase())
            .filter(|d| d == "PPT" || d == "PCAP");
        slots.excerpt_types = excerpt_types(self.excerpt_types);
        slots.focus = self.focus.as_deref().map(Focus::from_label).unwrap_or_default();
        slots.company = text(self.company);
        slots.is_followup = self.is_followup.unwrap_or(false);
        slots.rewritten_query = text(self.rewritten_query);
        slots.subject = text(self.subject);
        slots.technical_domain = text(self.technical_domain);
        slots.reference_contract = text(self.reference_contract);
        slots
    }
}

pub struct IntentClassifier {
    llm: Llm,
    followup_reuse_max_chars: usize,
}

impl IntentClassifier {
    pub fn new(llm: Llm, followup_reuse_max_chars: usize) -> Self {
        Self {
            llm,
            followup_reuse_max_chars,
        }
    }

    /// Reuse the previous answering intent for a short question that points back.
    fn reuse(&self, question: &str, history: &[Turn], sticky: &StickyFacts) -> Option<Classification> {
        let intent = sticky.last_state?.intent()?;
        if !matches!(intent, Intent::QueryQa | Intent::RetrievalQa) {
            return None;
        }
        if question.chars().count() > self.followup_reuse_max_chars || !refers_back(question) {
            return None;
        }
        let previous = history
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.text.as_str())?;

        let mut slots = regex_slots(question);
        slots.is_followup = true;
        slots.rewritten_query = Some(format!("{previous} {question}"));
        Some(Classification {
            intent,
            slots,
            source: Source::Reused,
        })
    }

    fn prompt(question: &str, history: &[Turn], sticky: &StickyFacts) -> String {
        let start = history.len().saturating_sub(HISTORY_TURNS);
        let mut transcript = String::new();
        for turn in &history[start..] {
            transcript.push_str(&format!(
                "{}: {}\n",
                turn.role.transcript_label(),
                clip(&turn.text, HISTORY_CLIP_CHARS)
            ));
        }
        if let Some(intent) = sticky.last_state.and_then(State::intent) {
            transcript.push_str(&format!("\n(Intención anterior: {intent})\n"));
        }
        if transcript.is_empty() {
            transcript.push_str("(Sin historial previo)\n");
        }

        format!(
            "Clasifica la última pregunta del usuario de un asistente de contratación pública.\n\n\
             Intenciones:\n\
             - QUERY_QA: estadísticas, rankings, recuentos o sumas sobre contratos y empresas \
             (\"top 10 empresas\", \"cuánto ha facturado\").\n\
             - RETRIEVAL_QA: preguntas sobre el contenido de contratos, pliegos o cláusulas \
             (\"qué solvencia técnica pide el 24seA1\").\n\
             - GENERATE_DOCUMENT: redactar un pliego de prescripciones técnicas.\n\
             - SIMPLE_CHAT: conversación general o preguntas sobre lo ya dicho.\n\
             - GREETING: saludos y agradecimientos.\n\n\
             Tipos de extracto válidos: {types}\n\
             doc_type: PPT o PCAP si la pregunta se refiere a uno de ellos.\n\
             Para GENERATE_DOCUMENT rellena subject (objeto del contrato), technical_domain \
             (ámbito técnico) y reference_contract si se mencionan. Si el asistente acaba de \
             pedir un dato del pliego y el usuario lo aporta, la intención es GENERATE_DOCUMENT.\n\
             Si la pregunta depende de la conversación, marca is_followup y escribe en \
             rewritten_query la pregunta completa y autónoma.\n\n\
             Historial:\n{transcript}\n\
             Pregunta: {question}\n\n\
             Responde con este JSON: {CLASSIFICATION_SHAPE}",
            types = KNOWN_EXCERPT_TYPES.join(", "),
        )
    }

    /// Classify `question`. Never fails: unusable replies default to chat.
    pub async fn classify(&self, question: &str, history: &[Turn], sticky: &StickyFacts) -> Classification {
        if is_greeting(question) {
            return Classification {
                intent: Intent::Greeting,
                slots: IntentSlots {
                    focus: Focus::General,
                    ..Default::default()
                },
                source: Source::Greeting,
            };
        }
        if let Some(reused) = self.reuse(question, history, sticky) {
            debug!(intent = %reused.intent, "Follow-up reuses previous intent");
            return reused;
        }

        let default = || Classification {
            intent: Intent::SimpleChat,
            slots: regex_slots(question),
            source: Source::Default,
        };

        let messages = vec![
            Message::system("Devuelve SOLO JSON válido."),
            Message::user(Self::prompt(question, history, sticky)),
        ];
        let raw = match self.llm.complete(messages, Sampling::new(0.0).max_tokens(300)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Intent classification call failed, defaulting to chat");
                return default();
            }
        };
        let parsed: RawClassification = match parse_with_repair(&self.llm, &raw, CLASSIFICATION_SHAPE).await {
            Ok(parsed) => parsed,
            Err(reason) => {
                warn!(reason = %reason, "Unusable classification, defaulting to chat");
                return default();
            }
        };

        let label = parsed.intent.clone().unwrap_or_default();
        let Some(intent) = Intent::from_label(&label) else {
            warn!(label = %label, "Unknown intent label, defaulting to chat");
            return Classification {
                slots: parsed.into_slots(question),
                ..default()
            };
        };
        Classification {
            intent,
            slots: parsed.into_slots(question),
            source: Source::Model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::SequentialMockProvider;
    use procura_core::ProviderError;
    use std::sync::Arc;

    fn classifier(mock: &Arc<SequentialMockProvider>) -> IntentClassifier {
        IntentClassifier::new(Llm::new(mock.clone(), "m"), 160)
    }

    fn answered(state: State) -> StickyFacts {
        StickyFacts {
            last_state: Some(state),
            ..Default::default()
        }
    }

    #[test]
    fn greetings() {
        for q in ["hola", "Hola!", "buenos días", "Buenas tardes.", "gracias", "¿qué tal?", "hey"] {
            assert!(is_greeting(q), "{q}");
        }
        assert!(!is_greeting("hola, ¿quién ganó el 24seA1?"));
    }

    #[test]
    fn back_references() {
        assert!(refers_back("y en 2023?"));
        assert!(refers_back("¿Además qué garantía pide?"));
        assert!(refers_back("¿Qué plazo tiene ese contrato?"));
        assert!(refers_back("el expediente anterior"));
        assert!(!refers_back("Top 10 empresas por importe"));
        assert!(!refers_back("yogures"));
    }

    #[tokio::test]
    async fn greeting_skips_the_model() {
        let mock = Arc::new(SequentialMockProvider::texts(&[]));
        let c = classifier(&mock).classify("Hola", &[], &StickyFacts::default()).await;
        assert_eq!(c.intent, Intent::Greeting);
        assert_eq!(c.source, Source::Greeting);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn model_label_and_slots() {
        let reply = r#"{"intent": "CYPHER_QA", "focus": "EMPRESA", "empresa_nif": "b12345678",
                        "extracto_tipos": ["solvencia_tecnica", "inventado"], "doc_tipo": "ppt"}"#;
        let mock = Arc::new(SequentialMockProvider::texts(&[reply]));
        let c = classifier(&mock)
            .classify("¿Cuánto ha facturado la empresa?", &[], &StickyFacts::default())
            .await;
        assert_eq!(c.intent, Intent::QueryQa);
        assert_eq!(c.source, Source::Model);
        assert_eq!(c.slots.focus, Focus::Company);
        assert_eq!(c.slots.tax_id.as_deref(), Some("B12345678"));
        assert_eq!(c.slots.excerpt_types, vec!["solvencia_tecnica"]);
        assert_eq!(c.slots.doc_type.as_deref(), Some("PPT"));

        let request = &mock.requests()[0];
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.max_tokens, Some(300));
    }

    #[tokio::test]
    async fn regex_identifiers_are_merged() {
        let mock = Arc::new(SequentialMockProvider::texts(&[r#"{"intent": "RAG_QA"}"#]));
        let c = classifier(&mock)
            .classify("¿Qué solvencia pide el 24seA12?", &[], &StickyFacts::default())
            .await;
        assert_eq!(c.intent, Intent::RetrievalQa);
        assert_eq!(c.slots.case_files, vec!["24seA12"]);
    }

    #[tokio::test]
    async fn unusable_replies_default_to_chat() {
        let mock = Arc::new(SequentialMockProvider::texts(&["no lo sé", r#"{"intent": "DANCE"}"#]));
        let c = classifier(&mock).classify("cuéntame algo", &[], &StickyFacts::default()).await;
        assert_eq!(c.intent, Intent::SimpleChat);
        assert_eq!(c.source, Source::Default);

        let c = classifier(&mock).classify("cuéntame algo", &[], &StickyFacts::default()).await;
        assert_eq!(c.intent, Intent::SimpleChat);

        let failing = Arc::new(SequentialMockProvider::new(vec![Err(ProviderError::Timeout("x".into()))]));
        let c = classifier(&failing).classify("cuéntame algo", &[], &StickyFacts::default()).await;
        assert_eq!(c.source, Source::Default);
    }

    #[tokio::test]
    async fn short_followup_reuses_previous_intent() {
        let mock = Arc::new(SequentialMockProvider::texts(&[]));
        let history = vec![
            Turn::user("Top 10 empresas por importe en 2024"),
            Turn::assistant("| empresa | importe |"),
        ];
        let c = classifier(&mock)
            .classify("y en 2023?", &history, &answered(State::QueryQa))
            .await;
        assert_eq!(c.intent, Intent::QueryQa);
        assert_eq!(c.source, Source::Reused);
        assert!(c.slots.is_followup);
        assert_eq!(
            c.slots.rewritten_query.as_deref(),
            Some("Top 10 empresas por importe en 2024 y en 2023?")
        );
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn long_or_unrelated_questions_are_classified() {
        let mock = Arc::new(SequentialMockProvider::texts(&[r#"{"intent": "QUERY_QA"}"#, r#"{"intent": "SIMPLE_CHAT"}"#]));
        let history = vec![Turn::user("Top 10 empresas"), Turn::assistant("...")];
        let long = format!("y además {}", "x".repeat(200));
        let c = classifier(&mock).classify(&long, &history, &answered(State::QueryQa)).await;
        assert_eq!(c.source, Source::Model);

        let c = classifier(&mock)
            .classify("y eso?", &history, &answered(State::SimpleChat))
            .await;
        assert_eq!(c.source, Source::Model);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn prompt_carries_clipped_history() {
        let mock = Arc::new(SequentialMockProvider::texts(&[r#"{"intent": "RAG_QA"}"#]));
        let history: Vec<Turn> = (0..6).map(|i| Turn::user(format!("turno {i} {}", "z".repeat(400)))).collect();
        classifier(&mock)
            .classify("¿Qué garantía exige?", &history, &answered(State::RetrievalQa))
            .await;
        let prompt = &mock.requests()[0].messages[1].content;
        assert!(!prompt.contains("turno 1"));
        assert!(prompt.contains("turno 2"));
        assert!(prompt.contains("Intención anterior: RETRIEVAL_QA"));
        assert!(!prompt.contains(&"z".repeat(400)));
    }
}
