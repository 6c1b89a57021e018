//! Chapter-by-chapter drafting of a technical specification.

use procura_config::DraftConfig;
use procura_core::token::clip;
use procura_core::{GraphStore, Message, ReferenceChapter, ReferenceDocument};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::planner::ReadyDraft;
use crate::llm::{Embedder, Llm, Sampling};
use crate::turn::{CancelToken, EventSink, TurnError, TurnEvent};

/// Used when no reference document is available.
pub const DEFAULT_CHAPTERS: [&str; 6] = [
    "Objeto",
    "Alcance",
    "Especificaciones técnicas",
    "Plazo de ejecución",
    "Garantía",
    "Normativa aplicable",
];

const DEFAULT_FILE_NAME: &str = "ppt-generado";
const FILE_NAME_MAX_CHARS: usize = 80;

/// Paragraphs shorter than this are never treated as repeats.
const MIN_REPEAT_CHARS: usize = 20;

const DRAFT_SYSTEM: &str = "Eres un técnico de contratación pública que redacta Pliegos de \
     Prescripciones Técnicas en español. Escribe en Markdown, con lenguaje administrativo \
     claro y requisitos verificables. No inventes importes ni expedientes. Escribe solo el \
     apartado que se te pide, sin repetir su título. Si sientes que te repites, DETENTE.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftChapter {
    pub heading: String,
    pub text: String,
}

/// What the presentation layer needs to export the draft as a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftMetadata {
    pub title: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_contract_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_case_file: Option<String>,
    pub chapter_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub markdown: String,
    pub metadata: DraftMetadata,
    pub chapters: Vec<DraftChapter>,
}

/// Lowercase, drop punctuation, join words with `-`.
pub fn slug_filename(title: &str) -> String {
    let kept: String = title
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();
    let slug = kept.split_whitespace().collect::<Vec<_>>().join("-");
    let slug: String = slug.trim_matches('-').chars().take(FILE_NAME_MAX_CHARS).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        DEFAULT_FILE_NAME.to_string()
    } else {
        slug.to_string()
    }
}

/// The text of the first `# ` heading.
pub fn first_heading(markdown: &str) -> Option<&str> {
    markdown
        .lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn paragraph_key(paragraph: &str) -> String {
    paragraph
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Drop paragraphs already seen earlier in the text (or in `seen`).
pub fn drop_repeated_paragraphs(text: &str, seen: &mut HashSet<String>) -> String {
    let mut kept = Vec::new();
    for paragraph in text.split("\n\n") {
        let trimmed = paragraph.trim();
        if trimmed.is_empty() {
            continue;
        }
        let key = paragraph_key(trimmed);
        if key.chars().count() >= MIN_REPEAT_CHARS && !seen.insert(key) {
            debug!(chars = trimmed.len(), "Dropping repeated paragraph");
            continue;
        }
        kept.push(trimmed);
    }
    kept.join("\n\n")
}

pub struct DraftGenerator {
    llm: Llm,
    embedder: Embedder,
    graph: Arc<dyn GraphStore>,
    config: DraftConfig,
    /// (frequency, presence)
    penalties: (f32, f32),
}

impl DraftGenerator {
    pub fn new(
        llm: Llm,
        embedder: Embedder,
        graph: Arc<dyn GraphStore>,
        config: DraftConfig,
        penalties: (f32, f32),
    ) -> Self {
        Self {
            llm,
            embedder,
            graph,
            config,
            penalties,
        }
    }

    /// The pinned or nearest reference document. Failures mean no reference.
    pub async fn reference(&self, ready: &ReadyDraft) -> Option<ReferenceDocument> {
        let embedding = match self.embedder.embed(&ready.search_text()).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Embedding for reference search failed");
                if ready.reference_contract().is_none() {
                    return None;
                }
                Vec::new()
            }
        };
        match self
            .graph
            .reference_document(&embedding, ready.reference_contract())
            .await
        {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "Reference document lookup failed");
                None
            }
        }
    }

    fn skeleton(&self, reference: Option<&ReferenceDocument>) -> Vec<ReferenceChapter> {
        match reference.filter(|r| !r.chapters.is_empty()) {
            Some(doc) => {
                let mut chapters = doc.chapters.clone();
                chapters.sort_by_key(|c| c.order);
                chapters.truncate(self.config.max_reference_chapters);
                chapters
            }
            None => DEFAULT_CHAPTERS
                .iter()
                .zip(1..)
                .map(|(heading, order)| ReferenceChapter {
                    heading: heading.to_string(),
                    order,
                    text: String::new(),
                })
                .collect(),
        }
    }

    fn chapter_prompt(
        &self,
        ready: &ReadyDraft,
        reference: Option<&ReferenceDocument>,
        chapter: &ReferenceChapter,
    ) -> String {
        let mut prompt = format!(
            "Solicitud: {}\nObjeto del contrato: {}\nÁmbito técnico: {}\n",
            ready.request(),
            ready.subject(),
            ready.technical_domain()
        );
        if let Some(doc) = reference {
            prompt.push_str(&format!("Pliego de referencia: {} ({})\n", doc.title, doc.case_file));
        }
        prompt.push_str(&format!("\nApartado a redactar: {}\n", chapter.heading));
        if !chapter.text.trim().is_empty() {
            prompt.push_str(&format!(
                "\nTexto del apartado en el pliego de referencia (úsalo como guía, adáptalo al nuevo objeto):\n{}\n",
                clip(&chapter.text, self.config.chapter_clip_chars)
            ));
        }
        prompt
    }

    /// Draft every chapter, streaming each as it is written.
    pub async fn generate(
        &self,
        ready: &ReadyDraft,
        reference: Option<&ReferenceDocument>,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<Draft, TurnError> {
        let skeleton = self.skeleton(reference);
        let title = format!("Pliego de Prescripciones Técnicas: {}", ready.subject());
        info!(
            chapters = skeleton.len(),
            reference = reference.map(|r| r.case_file.as_str()).unwrap_or("none"),
            "Generating draft"
        );

        let header = format!("# {title}\n\n");
        events.emit(TurnEvent::Chunk { content: header.clone() }).await;
        let mut markdown = header;
        let mut chapters = Vec::with_capacity(skeleton.len());
        let mut seen = HashSet::new();
        let (frequency, presence) = self.penalties;

        for (index, chapter) in skeleton.iter().enumerate() {
            cancel.check()?;
            let heading = format!("## {}. {}", index + 1, chapter.heading);
            events
                .emit(TurnEvent::Chunk { content: format!("{heading}\n\n") })
                .await;

            let messages = vec![
                Message::system(DRAFT_SYSTEM),
                Message::user(self.chapter_prompt(ready, reference, chapter)),
            ];
            let sampling = Sampling::new(0.2)
                .max_tokens(self.config.chapter_max_tokens)
                .penalties(frequency, presence);
            let raw = self.llm.stream(messages, sampling, events, cancel).await?;
            events.emit(TurnEvent::Chunk { content: "\n\n".into() }).await;

            let text = drop_repeated_paragraphs(&raw, &mut seen);
            markdown.push_str(&format!("{heading}\n\n{text}\n\n"));
            chapters.push(DraftChapter {
                heading: chapter.heading.clone(),
                text,
            });
        }

        let title = first_heading(&markdown).unwrap_or(&title).to_string();
        let metadata = DraftMetadata {
            file_name: slug_filename(&title),
            title,
            reference_contract_id: reference.map(|r| r.contract_id.clone()),
            reference_case_file: reference.map(|r| r.case_file.clone()),
            chapter_count: chapters.len(),
        };
        Ok(Draft {
            markdown: markdown.trim_end().to_string(),
            metadata,
            chapters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::planner::DraftPlan;
    use crate::test_helpers::{SequentialMockProvider, StaticEmbedder};
    use procura_graph::in_memory::InMemoryGraph;
    use tokio::sync::mpsc;

    fn ready() -> ReadyDraft {
        DraftPlan {
            subject: Some("vehículo todoterreno".into()),
            technical_domain: Some("automoción".into()),
            ..DraftPlan::new("Genera un pliego para un vehículo")
        }
        .into_ready()
        .unwrap()
    }

    fn reference(chapters: usize) -> ReferenceDocument {
        ReferenceDocument {
            contract_id: "c-9".into(),
            case_file: "23suA9".into(),
            title: "Suministro de furgoneta".into(),
            link: None,
            chapters: (0..chapters)
                .rev()
                .map(|i| ReferenceChapter {
                    heading: format!("Capítulo {i}"),
                    order: i as i64,
                    text: format!("Texto de referencia {i}"),
                })
                .collect(),
        }
    }

    fn generator(mock: Arc<SequentialMockProvider>, graph: InMemoryGraph, config: DraftConfig) -> DraftGenerator {
        let embedder = Embedder::new(Arc::new(StaticEmbedder::new(vec![1.0, 0.0])), "e", 2, 4000);
        DraftGenerator::new(Llm::new(mock, "m"), embedder, Arc::new(graph), config, (0.3, 0.2))
    }

    #[test]
    fn slugs() {
        assert_eq!(slug_filename("Pliego de Prescripciones Técnicas: vehículo"), "pliego-de-prescripciones-técnicas-vehículo");
        assert_eq!(slug_filename("  ¿?  "), "ppt-generado");
        assert_eq!(slug_filename(&"a ".repeat(100)).chars().count(), 79);
    }

    #[test]
    fn repeated_paragraphs_are_dropped() {
        let mut seen = HashSet::new();
        let text = "El vehículo será de tracción total.\n\nEl  vehículo será de tracción TOTAL.\n\nOK\n\nOK";
        assert_eq!(
            drop_repeated_paragraphs(text, &mut seen),
            "El vehículo será de tracción total.\n\nOK\n\nOK"
        );
        let again = drop_repeated_paragraphs("El vehículo será de tracción total.", &mut seen);
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn follows_reference_chapter_order_and_cap() {
        let mock = Arc::new(SequentialMockProvider::texts(&["uno", "dos", "tres"]));
        let config = DraftConfig {
            max_reference_chapters: 3,
            ..Default::default()
        };
        let doc = reference(5);
        let (tx, mut rx) = mpsc::channel(64);
        let draft = generator(mock.clone(), InMemoryGraph::new(), config)
            .generate(&ready(), Some(&doc), &EventSink::new(tx), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(draft.metadata.chapter_count, 3);
        assert_eq!(draft.chapters[0].heading, "Capítulo 0");
        assert_eq!(draft.chapters[2].text, "tres");
        assert_eq!(draft.metadata.reference_case_file.as_deref(), Some("23suA9"));
        assert!(draft.markdown.starts_with("# Pliego de Prescripciones Técnicas: vehículo todoterreno"));
        assert_eq!(draft.metadata.file_name, "pliego-de-prescripciones-técnicas-vehículo-todoterreno");

        let request = &mock.requests()[0];
        assert_eq!(request.temperature, 0.2);
        assert_eq!(request.frequency_penalty, Some(0.3));
        assert_eq!(request.max_tokens, Some(900));
        assert!(request.messages[0].content.contains("DETENTE"));
        assert!(request.messages[1].content.contains("Texto de referencia 0"));

        let mut chunks = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, TurnEvent::Chunk { .. }) {
                chunks += 1;
            }
        }
        assert!(chunks >= 4);
    }

    #[tokio::test]
    async fn default_skeleton_without_reference() {
        let mock = Arc::new(SequentialMockProvider::texts(&["a", "b", "c", "d", "e", "f"]));
        let draft = generator(mock, InMemoryGraph::new(), DraftConfig::default())
            .generate(&ready(), None, &EventSink::none(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(draft.chapters.len(), DEFAULT_CHAPTERS.len());
        assert!(draft.markdown.contains("## 6. Normativa aplicable"));
        assert!(draft.metadata.reference_contract_id.is_none());
    }

    #[tokio::test]
    async fn nearest_reference_is_found_by_embedding() {
        let graph = InMemoryGraph::new();
        graph.add_reference(reference(2), vec![1.0, 0.0]).await;
        let mock = Arc::new(SequentialMockProvider::texts(&[]));
        let found = generator(mock, graph, DraftConfig::default()).reference(&ready()).await;
        assert_eq!(found.unwrap().case_file, "23suA9");
    }

    #[tokio::test]
    async fn cancellation_stops_generation() {
        let mock = Arc::new(SequentialMockProvider::texts(&[]));
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = generator(mock.clone(), InMemoryGraph::new(), DraftConfig::default())
            .generate(&ready(), None, &EventSink::none(), &cancel)
            .await;
        assert!(matches!(result, Err(TurnError::Cancelled)));
        assert_eq!(mock.call_count(), 0);
    }
}
