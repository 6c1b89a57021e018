//! Intent labels and the slots the classifier can fill.
//!
//! `Intent` is a closed set; free text from the classifier never drives
//! control flow directly. Unknown labels map to `None` in
//! [`Intent::from_label`] and the caller picks the default branch.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    GenerateDocument,
    QueryQa,
    RetrievalQa,
    SimpleChat,
    Greeting,
}

impl Intent {
    /// Parse a classifier label. Accepts the legacy aliases used by older prompts.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "GENERATE_DOCUMENT" | "GENERATE_PPT" => Some(Intent::GenerateDocument),
            "QUERY_QA" | "CYPHER_QA" => Some(Intent::QueryQa),
            "RETRIEVAL_QA" | "RAG_QA" => Some(Intent::RetrievalQa),
            "SIMPLE_CHAT" => Some(Intent::SimpleChat),
            "GREETING" => Some(Intent::Greeting),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::GenerateDocument => "GENERATE_DOCUMENT",
            Intent::QueryQa => "QUERY_QA",
            Intent::RetrievalQa => "RETRIEVAL_QA",
            Intent::SimpleChat => "SIMPLE_CHAT",
            Intent::Greeting => "GREETING",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the question is about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Focus {
    #[default]
    Contract,
    Company,
    General,
}

impl Focus {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "EMPRESA" | "COMPANY" => Focus::Company,
            "GENERAL" => Focus::General,
            _ => Focus::Contract,
        }
    }
}

/// Normalised slot values extracted alongside the intent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentSlots {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excerpt_types: Vec<String>,
    #[serde(default)]
    pub focus: Focus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub case_files: Vec<String>,
    #[serde(default)]
    pub is_followup: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewritten_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_contract: Option<String>,
}
