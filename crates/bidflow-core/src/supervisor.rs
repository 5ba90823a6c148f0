// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! The pure hub-and-spoke decision function.
//!
//! Given a `WorkflowState`, `decide` returns the next stage identifier (or
//! a pause checkpoint, or `Complete`) plus a human-readable reason. It
//! performs no I/O and has no hidden state — calling it twice with the
//! same (logical) state yields the same decision, by construction, since
//! it only ever reads its argument.
//!
//! The rule order below and the keyword lists in [`classify_approval`] are
//! carried verbatim from the routing functions this is grounded on
//! (`_should_reanalyze`, `_should_retry_content_compliance`,
//! `_should_retry_content_qa`, `_should_retry_after_review`,
//! `_should_proceed_to_comms`, `_should_proceed_to_submission`).

use crate::workflow_state::{FeedbackIntent, PauseCheckpoint, StageName, WorkflowState};

/// One of the fourteen possible supervisor outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Initialize,
    Stage(StageName),
    Pause(PauseCheckpoint),
    Export,
    Complete,
}

/// A decision plus the state resets that must accompany it.
///
/// `decide` only reads its argument — it is the Graph Executor, not the
/// Supervisor, that applies `reset_stages`/`reset_checkpoints` before
/// re-dispatching. Carrying the resets alongside the decision keeps the
/// function pure while still expressing rules like "remove `content`,
/// `compliance` from completed; return `content`" (spec.md §4.5 rule 7).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resets {
    pub stages: Vec<StageName>,
    pub checkpoints: Vec<PauseCheckpoint>,
}

impl Resets {
    fn stages(stages: &[StageName]) -> Self {
        Self { stages: stages.to_vec(), checkpoints: Vec::new() }
    }

    fn stages_and_checkpoint(stages: &[StageName], checkpoint: PauseCheckpoint) -> Self {
        Self { stages: stages.to_vec(), checkpoints: vec![checkpoint] }
    }
}

/// Keywords indicating the user wants changes, used by rule 9 alongside an
/// explicit check for submitted content edits.
const CHANGE_KEYWORDS: [&str; 6] = ["change", "fix", "update", "modify", "edit", "improve"];

/// Keywords indicating approval at the artifact-review checkpoint.
const ARTIFACT_APPROVAL_KEYWORDS: [&str; 4] = ["approved", "approve", "looks good", "lgtm"];

/// Keywords indicating approval at the comms/submission permission checkpoints.
const PERMISSION_APPROVAL_KEYWORDS: [&str; 5] = ["yes", "approved", "proceed", "submit", "send"];

/// Keywords indicating decline at the comms/submission permission checkpoints.
const PERMISSION_REJECTION_KEYWORDS: [&str; 4] = ["no", "skip", "decline", "don't"];

/// Keywords indicating the user wants the document reparsed from scratch.
const REPARSE_KEYWORDS: [&str; 5] = ["reparse", "re-parse", "parse again", "wrong document", "re-upload"];

/// Keywords indicating the user wants only the analysis redone.
const REANALYZE_KEYWORDS: [&str; 4] = ["reanalyze", "re-analyze", "redo the analysis", "analysis is wrong"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

/// Classifies free-text feedback given while paused after analysis.
/// Unmatched text defaults to `Proceed`.
pub fn classify_feedback_intent(text: &str) -> FeedbackIntent {
    if contains_any(text, &REPARSE_KEYWORDS) {
        FeedbackIntent::Reparse
    } else if contains_any(text, &REANALYZE_KEYWORDS) {
        FeedbackIntent::Reanalyze
    } else {
        FeedbackIntent::Proceed
    }
}

/// Classifies approve/decline intent for the artifact-review checkpoint.
/// Unmatched text with no content edits defaults to approved (so a bare
/// "continue" does not stall a workflow); unmatched text accompanied by
/// edits is treated as a change request.
fn artifact_review_approved(feedback: &str, has_edits: bool) -> bool {
    if has_edits {
        return false;
    }
    if contains_any(feedback, &CHANGE_KEYWORDS) {
        return false;
    }
    contains_any(feedback, &ARTIFACT_APPROVAL_KEYWORDS) || !contains_any(feedback, &CHANGE_KEYWORDS)
}

/// Classifies approve/decline for the comms/submission permission
/// checkpoints. Unmatched text defaults to declined (conservative).
fn permission_approved(feedback: &str) -> bool {
    if contains_any(feedback, &PERMISSION_REJECTION_KEYWORDS) {
        false
    } else {
        contains_any(feedback, &PERMISSION_APPROVAL_KEYWORDS)
    }
}

/// The pure decision function. See module docs and spec.md §4.5.
///
/// Returns the decision, a human-readable reason, and any resets the Graph
/// Executor must apply to `state` before acting on the decision.
pub fn decide(state: &WorkflowState) -> (Decision, String, Resets) {
    use StageName::*;

    // Rule 1
    if state.workflow_id.is_nil() {
        return (Decision::Initialize, "workflow has no id yet".into(), Resets::default());
    }

    // Rule 2
    if !state.is_completed(Parser) {
        return (Decision::Stage(Parser), "parser has not run yet".into(), Resets::default());
    }

    // Rule 3
    if !state.is_completed(Analysis) {
        return (Decision::Stage(Analysis), "analysis has not run yet".into(), Resets::default());
    }

    // Rule 4
    if !state.has_passed(PauseCheckpoint::AfterAnalysis) {
        return (
            Decision::Pause(PauseCheckpoint::AfterAnalysis),
            "analysis complete, awaiting user feedback".into(),
            Resets::default(),
        );
    }

    // Rule 5: only applies while content has not yet been produced for this pass.
    if !state.is_completed(Content) && state.pause.is_none() {
        if let Some(feedback) = &state.user_feedback {
            return match state.feedback_intent {
                FeedbackIntent::Reparse => (
                    Decision::Stage(Parser),
                    format!("user requested reparse: {feedback:?}"),
                    Resets::stages_and_checkpoint(&[Parser, Analysis], PauseCheckpoint::AfterAnalysis),
                ),
                FeedbackIntent::Reanalyze => (
                    Decision::Stage(Analysis),
                    format!("user requested reanalysis: {feedback:?}"),
                    Resets::stages_and_checkpoint(&[Analysis], PauseCheckpoint::AfterAnalysis),
                ),
                FeedbackIntent::Proceed => (
                    Decision::Stage(Content),
                    "user approved analysis, proceeding to content".into(),
                    Resets::default(),
                ),
            };
        }
    }

    // Rule 6
    if state.is_completed(Content) && !state.is_completed(Compliance) {
        return (Decision::Stage(Compliance), "content complete, running compliance".into(), Resets::default());
    }

    // Rule 7
    if state.is_completed(Compliance) {
        let non_compliant = state
            .task_outputs
            .get(&Compliance)
            .and_then(|o| o.as_compliance())
            .map(|c| !c.is_compliant)
            .unwrap_or(false);
        if non_compliant && !state.is_completed(Qa) {
            return (
                Decision::Stage(Content),
                "compliance rejected content, retrying".into(),
                Resets::stages(&[Content, Compliance]),
            );
        }
        if !state.is_completed(Qa) {
            return (Decision::Stage(Qa), "content is compliant, proceeding to qa".into(), Resets::default());
        }
    }

    // Rule 8
    if state.is_completed(Qa) && !state.has_passed(PauseCheckpoint::ArtifactReview) {
        let qa_failed = state
            .task_outputs
            .get(&Qa)
            .and_then(|o| o.as_qa())
            .map(|q| q.overall_status != "complete")
            .unwrap_or(false);
        if qa_failed {
            return (
                Decision::Stage(Content),
                "qa found issues, retrying content".into(),
                Resets::stages(&[Content, Compliance, Qa]),
            );
        }
        return (
            Decision::Pause(PauseCheckpoint::ArtifactReview),
            "qa complete, awaiting artifact review".into(),
            Resets::default(),
        );
    }

    // Rule 9
    if state.has_passed(PauseCheckpoint::ArtifactReview) && !state.export_done && state.pause.is_none() {
        if let Some(feedback) = &state.user_feedback {
            let has_edits = !state.content_edits.is_empty();
            if artifact_review_approved(feedback, has_edits) {
                return (Decision::Export, "artifacts approved, exporting".into(), Resets::default());
            }
            return (
                Decision::Stage(Content),
                "artifact review requested changes, retrying content".into(),
                Resets::stages_and_checkpoint(&[Content, Compliance, Qa], PauseCheckpoint::ArtifactReview),
            );
        }
    }

    // Rule 10
    if state.export_done && !state.has_passed(PauseCheckpoint::CommsPermission) {
        return (
            Decision::Pause(PauseCheckpoint::CommsPermission),
            "artifacts exported, awaiting comms permission".into(),
            Resets::default(),
        );
    }

    // Rule 11
    if state.has_passed(PauseCheckpoint::CommsPermission)
        && !state.is_completed(Comms)
        && !state.has_passed(PauseCheckpoint::SubmissionPermission)
        && state.pause.is_none()
    {
        if let Some(feedback) = &state.user_feedback {
            if permission_approved(feedback) {
                return (Decision::Stage(Comms), "user approved comms".into(), Resets::default());
            }
            return (
                Decision::Pause(PauseCheckpoint::SubmissionPermission),
                "user declined comms, skipping".into(),
                Resets::default(),
            );
        }
    }

    // Rule 12
    if state.is_completed(Comms) && !state.has_passed(PauseCheckpoint::SubmissionPermission) {
        return (
            Decision::Pause(PauseCheckpoint::SubmissionPermission),
            "comms sent, awaiting submission permission".into(),
            Resets::default(),
        );
    }

    // Rule 13
    if state.has_passed(PauseCheckpoint::SubmissionPermission) && !state.is_completed(Submission) && state.pause.is_none() {
        if let Some(feedback) = &state.user_feedback {
            if permission_approved(feedback) {
                return (Decision::Stage(Submission), "user approved submission".into(), Resets::default());
            }
            return (Decision::Complete, "user declined submission".into(), Resets::default());
        }
    }

    // Rule 14
    if state.is_completed(Submission) {
        return (Decision::Complete, "submission complete".into(), Resets::default());
    }

    // Rule 15: fallback.
    (Decision::Complete, "no further rule matched, completing".into(), Resets::default())
}
