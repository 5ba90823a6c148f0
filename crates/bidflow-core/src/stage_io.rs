// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! Per-stage typed outputs.
//!
//! The original agent classes returned free-form dicts; here each stage has
//! a declared output schema, and parsing is total — it returns either the
//! typed variant or `StageOutput::ParseFailed` carrying the raw text. The
//! Supervisor reads typed fields, never dict keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserOutput {
    pub document_structure: Value,
    #[serde(default)]
    pub extracted_fields: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub summary: String,
    #[serde(default)]
    pub requirements: Value,
    #[serde(default)]
    pub risk_notes: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDraft {
    pub artifact_id: uuid::Uuid,
    pub name: String,
    pub kind: String,
    pub content: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentOutput {
    pub artifacts: Vec<ArtifactDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceOutput {
    pub is_compliant: bool,
    #[serde(default)]
    pub feedback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaSummary {
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaOutput {
    pub overall_status: String,
    #[serde(default)]
    pub summary: QaSummary,
}

impl Default for QaSummary {
    fn default() -> Self {
        Self { issues: Vec::new(), notes: String::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommsOutput {
    pub draft: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionOutput {
    pub submission_id: String,
    #[serde(default)]
    pub confirmation: Value,
}

/// Tagged union of every stage's possible output, plus the uniform
/// fallback for text the parser could not interpret as the declared schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage_output_type")]
pub enum StageOutput {
    Parser(ParserOutput),
    Analysis(AnalysisOutput),
    Content(ContentOutput),
    Compliance(ComplianceOutput),
    Qa(QaOutput),
    Comms(CommsOutput),
    Submission(SubmissionOutput),
    /// Structured parsing failed; the raw LLM text is preserved so a human
    /// can inspect it, and downstream consumers see no typed fields.
    ParseFailed { raw: String },
}

impl StageOutput {
    pub fn as_compliance(&self) -> Option<&ComplianceOutput> {
        match self {
            StageOutput::Compliance(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_qa(&self) -> Option<&QaOutput> {
        match self {
            StageOutput::Qa(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_content(&self) -> Option<&ContentOutput> {
        match self {
            StageOutput::Content(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_comms(&self) -> Option<&CommsOutput> {
        match self {
            StageOutput::Comms(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_parse_failure(&self) -> bool {
        matches!(self, StageOutput::ParseFailed { .. })
    }

    /// One-line summary used in `*_completed` events' `output_summary` field.
    pub fn summarize(&self) -> String {
        match self {
            StageOutput::Parser(_) => "document parsed".to_string(),
            StageOutput::Analysis(a) => a.summary.chars().take(140).collect(),
            StageOutput::Content(c) => format!("{} artifact(s) drafted", c.artifacts.len()),
            StageOutput::Compliance(c) => format!("is_compliant={}", c.is_compliant),
            StageOutput::Qa(q) => format!("overall_status={}", q.overall_status),
            StageOutput::Comms(c) => c.draft.chars().take(140).collect(),
            StageOutput::Submission(s) => format!("submission_id={}", s.submission_id),
            StageOutput::ParseFailed { raw } => format!("unparsed output ({} chars)", raw.len()),
        }
    }
}

/// Parses raw LLM text against a stage's declared schema, falling back to
/// `ParseFailed` — never an error. Tries structured JSON first (spec.md
/// §4.4 step 5), then the declared variant's shape, else the fallback.
pub fn parse_stage_output(raw: &str, parse_typed: impl FnOnce(&Value) -> Option<StageOutput>) -> StageOutput {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => parse_typed(&value).unwrap_or_else(|| StageOutput::ParseFailed { raw: raw.to_string() }),
        Err(_) => StageOutput::ParseFailed { raw: raw.to_string() },
    }
}
