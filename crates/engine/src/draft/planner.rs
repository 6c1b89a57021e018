//! Parameter collection for document drafting.
//!
//! A [`DraftPlan`] lives across turns. Each turn folds in what the
//! classifier extracted and, when a question was pending, the user's reply.
//! While a required parameter is missing the plan asks for exactly one of
//! them, highest priority first. A complete plan converts into an immutable
//! [`ReadyDraft`].

use procura_core::IntentSlots;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftParam {
    Subject,
    TechnicalDomain,
    /// Optional: a prior contract to use as skeleton.
    ReferenceContract,
}

impl DraftParam {
    /// Required parameters in priority order.
    pub const REQUIRED: [DraftParam; 2] = [DraftParam::Subject, DraftParam::TechnicalDomain];

    pub fn label(self) -> &'static str {
        match self {
            DraftParam::Subject => "objeto del contrato",
            DraftParam::TechnicalDomain => "ámbito técnico",
            DraftParam::ReferenceContract => "contrato de referencia",
        }
    }

    pub fn question(self) -> &'static str {
        match self {
            DraftParam::Subject => {
                "¿Cuál es el objeto del contrato para el que quieres el pliego? \
                 Descríbelo en una frase (por ejemplo, «suministro de un vehículo todoterreno»)."
            }
            DraftParam::TechnicalDomain => {
                "¿Cuál es el ámbito técnico del pliego? \
                 (por ejemplo: vehículos, obras de urbanización, mantenimiento de software)"
            }
            DraftParam::ReferenceContract => {
                "¿Quieres basarte en algún contrato previo? Indica su expediente o responde «no»."
            }
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Accumulated parameters for a requested document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftPlan {
    /// The request that opened the plan.
    pub request: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_contract: Option<String>,
    /// The parameter the last clarification asked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asked: Option<DraftParam>,
}

impl DraftPlan {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            ..Default::default()
        }
    }

    fn slot(&mut self, param: DraftParam) -> &mut Option<String> {
        match param {
            DraftParam::Subject => &mut self.subject,
            DraftParam::TechnicalDomain => &mut self.technical_domain,
            DraftParam::ReferenceContract => &mut self.reference_contract,
        }
    }

    /// Fold in classifier slots and, if a question was pending, `answer`.
    pub fn absorb(&mut self, slots: &IntentSlots, answer: &str) {
        let reference = non_empty(&slots.reference_contract).or_else(|| slots.case_files.first().cloned());
        for (param, value) in [
            (DraftParam::Subject, non_empty(&slots.subject)),
            (DraftParam::TechnicalDomain, non_empty(&slots.technical_domain)),
            (DraftParam::ReferenceContract, reference),
        ] {
            if let Some(value) = value {
                *self.slot(param) = Some(value);
            }
        }

        if let Some(asked) = self.asked.take() {
            let reply = answer.trim();
            let slot = self.slot(asked);
            if slot.is_none() && !reply.is_empty() {
                *slot = Some(reply.to_string());
            }
        }
    }

    /// Required parameters still unknown, in priority order.
    pub fn missing(&self) -> Vec<DraftParam> {
        DraftParam::REQUIRED
            .into_iter()
            .filter(|p| match p {
                DraftParam::Subject => self.subject.is_none(),
                DraftParam::TechnicalDomain => self.technical_domain.is_none(),
                DraftParam::ReferenceContract => false,
            })
            .collect()
    }

    pub fn is_ready(&self) -> bool {
        self.missing().is_empty()
    }

    /// The single clarification to ask next, recording it as pending.
    pub fn next_question(&mut self) -> Option<&'static str> {
        let param = self.missing().into_iter().next()?;
        self.asked = Some(param);
        Some(param.question())
    }

    /// Freeze a complete plan. An incomplete plan is handed back.
    pub fn into_ready(self) -> Result<ReadyDraft, DraftPlan> {
        match (&self.subject, &self.technical_domain) {
            (Some(subject), Some(domain)) => Ok(ReadyDraft {
                subject: subject.clone(),
                technical_domain: domain.clone(),
                reference_contract: self.reference_contract.clone(),
                request: self.request,
            }),
            _ => Err(self),
        }
    }
}

/// The frozen parameter set handed to generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyDraft {
    request: String,
    subject: String,
    technical_domain: String,
    reference_contract: Option<String>,
}

impl ReadyDraft {
    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn technical_domain(&self) -> &str {
        &self.technical_domain
    }

    pub fn reference_contract(&self) -> Option<&str> {
        self.reference_contract.as_deref()
    }

    /// Text embedded to find the nearest reference document.
    pub fn search_text(&self) -> String {
        format!("{} {}", self.subject, self.technical_domain)
    }
}
