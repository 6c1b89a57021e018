//! Read-only query validator.
//!
//! A query is `Safe` when, outside string literals and comments:
//!
//! - no write or administrative keyword appears (CREATE, MERGE, SET, DELETE,
//!   DETACH, DROP, REMOVE, FOREACH, LOAD CSV, mutating procedure calls);
//! - it has a traversal clause (MATCH, or a vector index call) and a RETURN;
//! - brackets balance and there is a single statement;
//! - a relationship property `r.x` has an `[r:...]` or `[r]` binding.
//!
//! Pure functions: no I/O, no state.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::parse::strip_fences;

static WRITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(CREATE|MERGE|SET|DELETE|DETACH|DROP|REMOVE|FOREACH)\b")
        .expect("write keyword regex")
});

static LOAD_CSV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLOAD\s+CSV\b").expect("load csv regex"));

static MUTATING_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bCALL\s+(apoc\.|dbms\.|db\.create)").expect("procedure call regex")
});

static TRAVERSAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bMATCH\b|\bCALL\s+db\.index\.vector\.").expect("traversal regex")
});

static RETURN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bRETURN\b").expect("return regex"));

static LIMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\b").expect("limit regex"));

static REL_PROP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\br\.[A-Za-z_]").expect("relationship property regex"));

static REL_BIND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\s*r\s*[:\]]").expect("relationship binding regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Safe,
    Unsafe(String),
    SyntaxError(String),
}

impl Verdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, Verdict::Safe)
    }

    /// The rejection reason, fed back into the repair prompt.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Safe => None,
            Verdict::Unsafe(r) | Verdict::SyntaxError(r) => Some(r),
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Safe => write!(f, "SAFE"),
            Verdict::Unsafe(r) => write!(f, "UNSAFE: {r}"),
            Verdict::SyntaxError(r) => write!(f, "SYNTAX ERROR: {r}"),
        }
    }
}

/// Blank out string literals, quoted identifiers and comments so keywords
/// inside them are ignored. Quotes are kept; their contents are dropped.
///
/// `\` escapes only inside `'` and `"` strings; a backtick identifier escapes
/// a backtick by doubling it. An unterminated literal or block comment is an
/// error.
pub fn strip_literals(query: &str) -> Result<String, String> {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                out.push(c);
                let mut closed = false;
                while let Some(inner) = chars.next() {
                    if inner == '\\' {
                        chars.next();
                    } else if inner == c {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(format!("unterminated string literal starting with {c}"));
                }
                out.push(c);
            }
            '`' => {
                out.push(c);
                let mut closed = false;
                while let Some(inner) = chars.next() {
                    if inner == '`' {
                        if chars.peek() == Some(&'`') {
                            chars.next();
                            continue;
                        }
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err("unterminated quoted identifier".into());
                }
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                let mut closed = false;
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        closed = true;
                        break;
                    }
                    prev = inner;
                }
                if !closed {
                    return Err("unterminated block comment".into());
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// Clean a model-generated query: drop code fences and trailing `;`, and
/// cap the result size when no LIMIT is present.
pub fn normalize(raw: &str, default_limit: usize) -> String {
    let mut query = strip_fences(raw).trim().to_string();
    while query.ends_with(';') {
        query.pop();
        query = query.trim_end().to_string();
    }
    // An unparseable query is left for validate to reject.
    let has_limit = strip_literals(&query).map_or(true, |code| LIMIT_RE.is_match(&code));
    if !query.is_empty() && !has_limit {
        query.push_str(&format!("\nLIMIT {default_limit}"));
    }
    query
}

fn balanced(code: &str) -> Result<(), String> {
    let mut stack = Vec::new();
    for c in code.chars() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let open = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(open) {
                    return Err(format!("unbalanced '{c}'"));
                }
            }
            _ => {}
        }
    }
    match stack.last() {
        Some(open) => Err(format!("unclosed '{open}'")),
        None => Ok(()),
    }
}

pub fn validate(query: &str) -> Verdict {
    let code = match strip_literals(query) {
        Ok(code) => code,
        Err(reason) => return Verdict::SyntaxError(reason),
    };
    if code.trim().is_empty() {
        return Verdict::SyntaxError("empty query".into());
    }

    if let Some(m) = WRITE_RE.find(&code) {
        return Verdict::Unsafe(format!(
            "write keyword '{}' is not allowed; only read queries",
            m.as_str().to_ascii_uppercase()
        ));
    }
    if LOAD_CSV_RE.is_match(&code) {
        return Verdict::Unsafe("LOAD CSV is not allowed".into());
    }
    if let Some(m) = MUTATING_CALL_RE.find(&code) {
        return Verdict::Unsafe(format!("procedure call '{}' is not allowed", m.as_str()));
    }

    if code.trim_end().trim_end_matches(';').contains(';') {
        return Verdict::SyntaxError("multiple statements are not allowed".into());
    }
    if !TRAVERSAL_RE.is_match(&code) {
        return Verdict::SyntaxError("missing MATCH clause".into());
    }
    if !RETURN_RE.is_match(&code) {
        return Verdict::SyntaxError("missing RETURN clause".into());
    }
    if let Err(reason) = balanced(&code) {
        return Verdict::SyntaxError(reason);
    }
    if REL_PROP_RE.is_match(&code) && !REL_BIND_RE.is_match(&code) {
        return Verdict::SyntaxError(
            "relationship property 'r.' used without binding the relationship as [r:...]".into(),
        );
    }

    Verdict::Safe
}
