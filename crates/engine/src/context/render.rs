//! Prompt rendering: evidence sections and the answer message list.

use procura_core::token::clip;
use procura_core::{EvidenceItem, Message, Tier, Turn};

fn section_title(tier: Tier) -> &'static str {
    match tier {
        Tier::Contract => "### Contratos",
        Tier::Chapter => "### Capítulos de pliegos",
        Tier::Excerpt => "### Extractos",
    }
}

/// Render evidence as markdown, one section per non-empty tier, in the
/// order the items were given.
pub fn render_evidence(items: &[EvidenceItem]) -> String {
    let mut out = String::new();
    for tier in Tier::ALL {
        let in_tier: Vec<&EvidenceItem> = items.iter().filter(|i| i.tier() == tier).collect();
        if in_tier.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(section_title(tier));
        out.push('\n');
        for item in in_tier {
            let marker = if item.is_exact() { ", coincidencia exacta" } else { "" };
            out.push_str(&format!(
                "- [{}] (id {}, relevancia {:.2}{marker})\n{}\n",
                item.label(),
                item.id,
                item.score.value(),
                clip(&item.text, tier.clip_chars())
            ));
        }
    }
    out
}

/// Inputs for an answer prompt.
pub struct PromptParts<'a> {
    pub system: &'a str,
    pub summary: Option<&'a str>,
    pub history: &'a [Turn],
    /// Rendered evidence or table, placed before the question.
    pub context: Option<&'a str>,
    pub question: &'a str,
}

pub fn build_messages(parts: &PromptParts<'_>) -> Vec<Message> {
    let mut messages = vec![Message::system(parts.system)];

    if let Some(summary) = parts.summary.filter(|s| !s.trim().is_empty()) {
        messages.push(Message::system(format!(
            "Resumen de la conversación anterior:\n{summary}"
        )));
    }

    messages.extend(parts.history.iter().map(Turn::to_message));

    let user = match parts.context.filter(|c| !c.trim().is_empty()) {
        Some(context) => format!("Contexto:\n{context}\n\nPregunta: {}", parts.question),
        None => parts.question.to_string(),
    };
    messages.push(Message::user(user));
    messages
}
