//! Suggested next questions after an evidence-backed answer.

use procura_config::FollowupConfig;
use procura_core::Message;
use procura_core::token::clip;
use tracing::{debug, warn};

use crate::llm::{Llm, Sampling};
use crate::parse::{LlmJson, parse_json};

const ANSWER_CLIP_CHARS: usize = 1500;

const FOLLOWUP_SYSTEM: &str = "Genera preguntas de seguimiento. Responde SOLO con un array JSON de strings.";

fn prompt(question: &str, answer: &str, count: usize) -> String {
    format!(
        "Genera {count} sugerencias cortas que el usuario podría pedir a continuación.\n\n\
         PREGUNTA DEL USUARIO:\n{question}\n\n\
         RESPUESTA DEL ASISTENTE:\n{answer}\n\n\
         Reglas:\n\
         1. Cada sugerencia es una acción concreta que lanza una búsqueda o consulta \
         (\"Buscar contratos de esta empresa\", \"Mostrar detalles del expediente 21seA34\").\n\
         2. Nada de preguntas abstractas ni de opinión.\n\
         3. Para empresas usa \"Buscar contratos de <EMPRESA>\", no \"detalles del contrato <EMPRESA>\".\n\n\
         Responde SOLO con un array JSON de strings.",
        answer = clip(answer, ANSWER_CLIP_CHARS)
    )
}

pub struct FollowupSuggester {
    llm: Llm,
    config: FollowupConfig,
}

impl FollowupSuggester {
    pub fn new(llm: Llm, config: FollowupConfig) -> Self {
        Self { llm, config }
    }

    pub fn applies_to(&self, answer: &str) -> bool {
        self.config.enabled && answer.chars().count() >= self.config.min_answer_chars
    }

    /// Up to `max_suggestions` labels. Any failure yields none.
    pub async fn suggest(&self, question: &str, answer: &str) -> Vec<String> {
        if !self.applies_to(answer) {
            return Vec::new();
        }
        let messages = vec![
            Message::system(FOLLOWUP_SYSTEM),
            Message::user(prompt(question, answer, self.config.max_suggestions)),
        ];
        let raw = match self
            .llm
            .complete(messages, Sampling::new(0.5).max_tokens(200))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Follow-up suggestion call failed");
                return Vec::new();
            }
        };

        let LlmJson::Parsed(items) = parse_json::<Vec<serde_json::Value>>(&raw) else {
            debug!("Follow-up reply was not a JSON array");
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .take(self.config.max_suggestions)
            .map(|s| clip(s, self.config.label_max_chars))
            .collect()
    }
}
