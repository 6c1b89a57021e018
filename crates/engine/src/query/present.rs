//! Turning result rows into the user-facing answer.

use procura_config::QueryConfig;
use procura_core::{Message, Row};
use tracing::{debug, warn};

use super::schema::{EXPLAIN_SYSTEM, explain_prompt};
use super::table::{NO_RESULTS, looks_like_json, render_table, rows_to_json, wants_raw_json};
use crate::llm::{Llm, Sampling};
use crate::turn::{CancelToken, TurnError};

/// Answer for an executed query.
///
/// Raw JSON when asked for, a count plus the first rows when there are
/// too many to explain, otherwise a short model explanation of the table.
/// A failed or JSON-looking explanation falls back to the table.
pub async fn present_rows(
    llm: &Llm,
    config: &QueryConfig,
    question: &str,
    rows: &[Row],
    cancel: &CancelToken,
) -> Result<String, TurnError> {
    if wants_raw_json(question) {
        return Ok(rows_to_json(rows));
    }
    if rows.is_empty() {
        return Ok(NO_RESULTS.to_string());
    }

    let table = render_table(rows, config.table_max_rows, config.table_max_cols);
    if rows.len() > config.explain_max_rows {
        debug!(rows = rows.len(), "Too many rows to explain, returning table");
        return Ok(format!(
            "Se han encontrado **{} resultados** en la base de datos.\n\n\
             **Primeras {} filas:**\n\n{table}\n\n\
             Solo estas filas están en el contexto; pide un filtro más concreto para ver otras.",
            rows.len(),
            rows.len().min(config.table_max_rows),
        ));
    }

    cancel.check()?;
    let messages = vec![
        Message::system(EXPLAIN_SYSTEM),
        Message::user(explain_prompt(question, &table, rows.len())),
    ];
    let explained = tokio::select! {
        r = llm.complete(messages, Sampling::new(0.2).max_tokens(600)) => r,
        _ = cancel.cancelled() => return Err(TurnError::Cancelled),
    };
    match explained {
        Ok(text) if !text.is_empty() && !looks_like_json(&text) => Ok(format!("{text}\n\n{table}")),
        Ok(_) => Ok(table),
        Err(e) => {
            warn!(error = %e, "Result explanation failed, returning table");
            Ok(table)
        }
    }
}
