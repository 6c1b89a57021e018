//! Markdown rendering of query result rows.

use procura_core::Row;
use procura_core::token::clip;
use serde_json::Value;

pub const NO_RESULTS: &str = "No se han encontrado resultados.";

const CELL_MAX_CHARS: usize = 140;
const MONEY_HINTS: [&str; 5] = ["importe", "total", "factur", "presupuesto", "valor"];

fn is_money_column(column: &str) -> bool {
    let lower = column.to_lowercase();
    MONEY_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Spanish number format: `.` for thousands, `,` for decimals.
/// Whole numbers print without decimals, everything else with two.
pub fn format_number(value: f64) -> String {
    let integral = value.trunc() == value && value.abs() < 1e15;
    format_number_with(value, if integral { 0 } else { 2 })
}

fn format_number_with(value: f64, decimals: usize) -> String {
    let negative = value < 0.0;
    let abs = value.abs();
    let text = format!("{abs:.decimals$}");
    let (int_part, dec_part) = match text.split_once('.') {
        Some((i, d)) => (i, Some(d)),
        None => (text.as_str(), None),
    };

    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&grouped);
    if let Some(d) = dec_part {
        out.push(',');
        out.push_str(d);
    }
    out
}

fn format_cell(column: &str, value: &Value) -> String {
    let text = match value {
        Value::Null => "—".to_string(),
        Value::Bool(b) => if *b { "sí" } else { "no" }.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if is_money_column(column) => format!("{} €", format_number_with(f, 2)),
            Some(f) => format_number(f),
            None => n.to_string(),
        },
        Value::String(s) if s.trim().is_empty() => "—".to_string(),
        Value::String(s) => s.split_whitespace().collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    };
    clip(&text.replace(['\n', '\r'], " "), CELL_MAX_CHARS).replace('|', "\\|")
}

/// Whether the user asked for the raw rows as JSON.
pub fn wants_raw_json(question: &str) -> bool {
    let q = format!(" {}", question.to_lowercase());
    [" json", "en json", "formato json", "devuélveme json", "devuelveme json", "raw json"]
        .iter()
        .any(|tok| q.contains(tok))
}

/// A model "explanation" that is really JSON is replaced by the table.
pub fn looks_like_json(answer: &str) -> bool {
    let trimmed = answer.trim_start();
    answer.to_lowercase().contains("```json")
        || ((trimmed.starts_with('[') || trimmed.starts_with('{'))
            && serde_json::from_str::<Value>(answer.trim()).is_ok())
}

/// Columns in first-seen order across `rows`, at most `max_cols`.
fn columns(rows: &[Row], max_cols: usize) -> Vec<String> {
    let mut cols: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if cols.len() >= max_cols {
                return cols;
            }
            if !cols.contains(key) {
                cols.push(key.clone());
            }
        }
    }
    cols
}

/// Render up to `max_rows` rows and `max_cols` columns as a markdown table.
pub fn render_table(rows: &[Row], max_rows: usize, max_cols: usize) -> String {
    if rows.is_empty() {
        return NO_RESULTS.to_string();
    }
    let shown = &rows[..rows.len().min(max_rows)];
    let cols = columns(shown, max_cols);

    let header: Vec<String> = cols.iter().map(|c| c.replace('.', "_")).collect();
    let mut out = format!("| {} |\n", header.join(" | "));
    out.push_str(&format!("|{}\n", " --- |".repeat(cols.len())));

    for row in shown {
        let cells: Vec<String> = cols
            .iter()
            .map(|c| format_cell(c, row.get(c).unwrap_or(&Value::Null)))
            .collect();
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    out
}

/// Rows as pretty JSON for raw-output requests.
pub fn rows_to_json(rows: &[Row]) -> String {
    serde_json::to_string_pretty(rows).unwrap_or_else(|_| "[]".into())
}
