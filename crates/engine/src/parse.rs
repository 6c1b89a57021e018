//! Parsing JSON out of model replies.
//!
//! Models wrap JSON in code fences, add prose around it, or emit almost-JSON.
//! [`parse_json`] classifies a reply; [`parse_with_repair`] spends at most
//! one extra model call fixing a repairable reply.

use procura_core::Message;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::llm::{Llm, Sampling};

#[derive(Debug, Clone, PartialEq)]
pub enum LlmJson<T> {
    Parsed(T),
    /// Looks like JSON but does not parse or match the expected shape.
    Repairable(String),
    Failed(String),
}

/// Remove a surrounding markdown code fence, if any.
pub fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the language tag on the opening line.
    let body = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// The outermost `{...}` or `[...]` span in `text`.
fn json_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_json<T: DeserializeOwned>(raw: &str) -> LlmJson<T> {
    let body = strip_fences(raw);
    if body.is_empty() {
        return LlmJson::Failed("empty reply".into());
    }
    if let Ok(value) = serde_json::from_str::<T>(body) {
        return LlmJson::Parsed(value);
    }
    match json_span(body) {
        Some(span) => match serde_json::from_str::<T>(span) {
            Ok(value) => LlmJson::Parsed(value),
            Err(_) => LlmJson::Repairable(span.to_string()),
        },
        None => LlmJson::Failed("no JSON in reply".into()),
    }
}

/// Parse, and on a repairable reply ask the model once to fix it.
///
/// `shape` describes the expected JSON for the repair prompt.
pub async fn parse_with_repair<T: DeserializeOwned>(
    llm: &Llm,
    raw: &str,
    shape: &str,
) -> Result<T, String> {
    let broken = match parse_json::<T>(raw) {
        LlmJson::Parsed(value) => return Ok(value),
        LlmJson::Failed(reason) => return Err(reason),
        LlmJson::Repairable(text) => text,
    };

    warn!(chars = broken.len(), "Model JSON did not parse, requesting repair");
    let messages = vec![
        Message::system(format!(
            "Corrige el siguiente JSON para que sea válido y siga exactamente esta forma: {shape}. \
             Devuelve SOLO el JSON, sin explicaciones."
        )),
        Message::user(broken),
    ];
    let repaired = llm
        .complete(messages, Sampling::new(0.0).max_tokens(400))
        .await
        .map_err(|e| format!("repair call failed: {e}"))?;

    match parse_json::<T>(&repaired) {
        LlmJson::Parsed(value) => Ok(value),
        LlmJson::Repairable(_) => Err("JSON still invalid after repair".into()),
        LlmJson::Failed(reason) => Err(reason),
    }
}
