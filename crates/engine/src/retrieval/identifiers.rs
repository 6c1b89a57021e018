//! Structured identifiers recognised in free text.

use procura_core::Identifier;
use regex_lite::Regex;
use std::sync::LazyLock;

/// Company tax id (NIF/CIF): one letter and eight digits.
static TAX_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([A-Z]\d{8})\b").expect("tax id regex")
});

/// Case file: `24seA12` style or `2024/OBR_PUB/7` style.
static CASE_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{2}[a-zA-Z]+\d+|\d{4}/[A-Z_]+/\d+)\b").expect("case file regex")
});

/// All identifiers in `text`, case files first, without duplicates.
pub fn detect(text: &str) -> Vec<Identifier> {
    let mut found: Vec<Identifier> = Vec::new();
    for cap in CASE_FILE_RE.captures_iter(text) {
        let id = Identifier::CaseFile(cap[1].to_string());
        if !found.contains(&id) {
            found.push(id);
        }
    }
    for cap in TAX_ID_RE.captures_iter(text) {
        let id = Identifier::TaxId(cap[1].to_ascii_uppercase());
        if !found.contains(&id) {
            found.push(id);
        }
    }
    found
}

pub fn case_files(text: &str) -> Vec<String> {
    detect(text)
        .into_iter()
        .filter_map(|id| match id {
            Identifier::CaseFile(v) => Some(v),
            Identifier::TaxId(_) => None,
        })
        .collect()
}

pub fn tax_id(text: &str) -> Option<String> {
    detect(text).into_iter().find_map(|id| match id {
        Identifier::TaxId(v) => Some(v),
        Identifier::CaseFile(_) => None,
    })
}
