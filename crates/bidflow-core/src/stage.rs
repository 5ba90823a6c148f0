// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! Flattened stage descriptors.
//!
//! The original had an abstract agent base class with seven concrete
//! subclasses; here a `Stage` is a single data record naming its input
//! builder and output parser as plain functions. Stages are data, not
//! classes — the Stage Runner contains no stage-specific branches.

use serde_json::{json, Value};

use crate::stage_io::{
    parse_stage_output, AnalysisOutput, ComplianceOutput, ContentOutput, ParserOutput, QaOutput, StageOutput,
    SubmissionOutput,
};
use crate::workflow_state::{StageName, WorkflowState};

/// An input builder and an output parser as plain function pointers, plus
/// the bookkeeping the Stage Runner needs to enforce a timeout.
pub struct Stage {
    pub name: StageName,
    pub sequence_order: u32,
    /// Upper bound on LLM tool-calling iterations; also sizes the per-stage
    /// timeout (see `Stage::timeout`).
    pub max_tool_iterations: u32,
    pub input_builder: fn(&WorkflowState) -> Value,
    pub output_parser: fn(&str) -> StageOutput,
}

impl Stage {
    /// Per-stage timeout: 30 seconds per tool iteration, a generous budget
    /// that still bounds a stuck stage well inside the 60-minute workflow
    /// deadline.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(30 * self.max_tool_iterations as u64)
    }
}

fn base_input(state: &WorkflowState) -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::new();
    map.insert("workflow_id".into(), json!(state.workflow_id));
    map.insert("project_id".into(), json!(state.project_id));
    map.insert("user_id".into(), json!(state.user_id));
    map.insert("session_id".into(), json!(state.session_id));
    map.insert("task_outputs".into(), json!(state.task_outputs));
    map
}

fn build_parser_input(state: &WorkflowState) -> Value {
    Value::Object(base_input(state))
}

fn build_analysis_input(state: &WorkflowState) -> Value {
    Value::Object(base_input(state))
}

fn build_content_input(state: &WorkflowState) -> Value {
    let mut map = base_input(state);
    let analysis = state.task_outputs.get(&StageName::Analysis);
    map.insert("analysis".into(), json!(analysis));
    map.insert(
        "prior_compliance_feedback".into(),
        json!(state
            .task_outputs
            .get(&StageName::Compliance)
            .and_then(|o| o.as_compliance())
            .map(|c| c.feedback.clone())),
    );
    map.insert(
        "prior_qa_feedback".into(),
        json!(state
            .task_outputs
            .get(&StageName::Qa)
            .and_then(|o| o.as_qa())
            .map(|q| q.summary.clone())),
    );
    map.insert("user_edits".into(), json!(state.content_edits));
    Value::Object(map)
}

fn build_compliance_input(state: &WorkflowState) -> Value {
    let mut map = base_input(state);
    map.insert("content".into(), json!(state.task_outputs.get(&StageName::Content)));
    Value::Object(map)
}

fn build_qa_input(state: &WorkflowState) -> Value {
    let mut map = base_input(state);
    map.insert("content".into(), json!(state.task_outputs.get(&StageName::Content)));
    map.insert("analysis".into(), json!(state.task_outputs.get(&StageName::Analysis)));
    Value::Object(map)
}

fn build_comms_input(state: &WorkflowState) -> Value {
    Value::Object(base_input(state))
}

fn build_submission_input(state: &WorkflowState) -> Value {
    let mut map = base_input(state);
    map.insert("analysis".into(), json!(state.task_outputs.get(&StageName::Analysis)));
    map.insert("artifact_export_locations".into(), json!(state.artifact_export_locations));
    Value::Object(map)
}

fn parse_parser(raw: &str) -> StageOutput {
    parse_stage_output(raw, |v| serde_json::from_value::<ParserOutput>(v.clone()).ok().map(StageOutput::Parser))
}

fn parse_analysis(raw: &str) -> StageOutput {
    parse_stage_output(raw, |v| serde_json::from_value::<AnalysisOutput>(v.clone()).ok().map(StageOutput::Analysis))
}

fn parse_content(raw: &str) -> StageOutput {
    parse_stage_output(raw, |v| serde_json::from_value::<ContentOutput>(v.clone()).ok().map(StageOutput::Content))
}

fn parse_compliance(raw: &str) -> StageOutput {
    parse_stage_output(raw, |v| {
        serde_json::from_value::<ComplianceOutput>(v.clone()).ok().map(StageOutput::Compliance)
    })
}

fn parse_qa(raw: &str) -> StageOutput {
    parse_stage_output(raw, |v| serde_json::from_value::<QaOutput>(v.clone()).ok().map(StageOutput::Qa))
}

fn parse_comms(raw: &str) -> StageOutput {
    parse_stage_output(raw, |v| {
        serde_json::from_value::<crate::stage_io::CommsOutput>(v.clone()).ok().map(StageOutput::Comms)
    })
}

fn parse_submission(raw: &str) -> StageOutput {
    parse_stage_output(raw, |v| serde_json::from_value::<SubmissionOutput>(v.clone()).ok().map(StageOutput::Submission))
}

/// The fixed sequence, in order. This table is the single source of truth
/// for stage behavior; nothing else branches on stage name.
pub const STAGES: [Stage; 7] = [
    Stage {
        name: StageName::Parser,
        sequence_order: 0,
        max_tool_iterations: 4,
        input_builder: build_parser_input,
        output_parser: parse_parser,
    },
    Stage {
        name: StageName::Analysis,
        sequence_order: 1,
        max_tool_iterations: 6,
        input_builder: build_analysis_input,
        output_parser: parse_analysis,
    },
    Stage {
        name: StageName::Content,
        sequence_order: 2,
        max_tool_iterations: 10,
        input_builder: build_content_input,
        output_parser: parse_content,
    },
    Stage {
        name: StageName::Compliance,
        sequence_order: 3,
        max_tool_iterations: 4,
        input_builder: build_compliance_input,
        output_parser: parse_compliance,
    },
    Stage {
        name: StageName::Qa,
        sequence_order: 4,
        max_tool_iterations: 6,
        input_builder: build_qa_input,
        output_parser: parse_qa,
    },
    Stage {
        name: StageName::Comms,
        sequence_order: 5,
        max_tool_iterations: 3,
        input_builder: build_comms_input,
        output_parser: parse_comms,
    },
    Stage {
        name: StageName::Submission,
        sequence_order: 6,
        max_tool_iterations: 4,
        input_builder: build_submission_input,
        output_parser: parse_submission,
    },
];

pub fn stage_descriptor(name: StageName) -> &'static Stage {
    STAGES.iter().find(|s| s.name == name).expect("every StageName has a descriptor")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_state() -> WorkflowState {
        WorkflowState::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "session-0000001")
    }

    #[test]
    fn table_covers_every_stage_in_order() {
        for (i, stage) in STAGES.iter().enumerate() {
            assert_eq!(stage.sequence_order, i as u32);
            assert_eq!(stage.name.sequence_order(), i as u32);
        }
    }

    #[test]
    fn content_input_carries_prior_feedback_and_edits() {
        let mut state = sample_state();
        state.mark_stage_complete(
            StageName::Compliance,
            StageOutput::Compliance(ComplianceOutput { is_compliant: false, feedback: "needs a signature block".into() }),
        );
        let input = build_content_input(&state);
        assert_eq!(input["prior_compliance_feedback"], json!("needs a signature block"));
    }

    #[test]
    fn base_input_always_present() {
        let state = sample_state();
        let input = (stage_descriptor(StageName::Parser).input_builder)(&state);
        assert_eq!(input["workflow_id"], json!(state.workflow_id));
    }
}
