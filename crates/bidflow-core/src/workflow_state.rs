// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! The ephemeral, in-memory projection of a workflow during execution.
//!
//! `WorkflowState` is a plain value. Nothing in this module owns a database
//! connection or mutates anything outside itself — the State Store is the
//! only place a workflow's durable record changes. Every component that
//! touches state (Supervisor, Stage Runner, Graph Executor) receives one by
//! value or by reference and hands back a new value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::stage_io::StageOutput;

/// One node in the fixed processing sequence.
///
/// Order here is the canonical sequence order; `StageName::ALL` is the
/// authoritative list the rest of the core iterates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Parser,
    Analysis,
    Content,
    Compliance,
    Qa,
    Comms,
    Submission,
}

impl StageName {
    pub const ALL: [StageName; 7] = [
        StageName::Parser,
        StageName::Analysis,
        StageName::Content,
        StageName::Compliance,
        StageName::Qa,
        StageName::Comms,
        StageName::Submission,
    ];

    /// Stable ordinal within the fixed sequence, starting at 0.
    pub fn sequence_order(self) -> u32 {
        Self::ALL.iter().position(|s| *s == self).expect("exhaustive") as u32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Parser => "parser",
            StageName::Analysis => "analysis",
            StageName::Content => "content",
            StageName::Compliance => "compliance",
            StageName::Qa => "qa",
            StageName::Comms => "comms",
            StageName::Submission => "submission",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parser" => Ok(StageName::Parser),
            "analysis" => Ok(StageName::Analysis),
            "content" => Ok(StageName::Content),
            "compliance" => Ok(StageName::Compliance),
            "qa" => Ok(StageName::Qa),
            "comms" => Ok(StageName::Comms),
            "submission" => Ok(StageName::Submission),
            other => Err(format!("unknown stage name: {other}")),
        }
    }
}

/// A virtual node that records "waiting for human input" without invoking
/// an LLM. There are exactly four (glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseCheckpoint {
    AfterAnalysis,
    ArtifactReview,
    CommsPermission,
    SubmissionPermission,
}

impl PauseCheckpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            PauseCheckpoint::AfterAnalysis => "analysis",
            PauseCheckpoint::ArtifactReview => "artifact_review",
            PauseCheckpoint::CommsPermission => "comms",
            PauseCheckpoint::SubmissionPermission => "submission",
        }
    }
}

/// Classified intent of free-text feedback given while paused after analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackIntent {
    Reparse,
    Reanalyze,
    Proceed,
}

impl Default for FeedbackIntent {
    fn default() -> Self {
        FeedbackIntent::Proceed
    }
}

/// Classified approve/decline intent for a permission checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Declined,
}

/// One user edit applied to an artifact while paused for review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentEdit {
    pub artifact_id: Uuid,
    pub content: serde_json::Value,
}

/// One entry in a task's structured error log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageError {
    pub stage: StageName,
    pub kind: crate::error::ErrorKind,
    pub message: String,
    #[serde(default)]
    pub context: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

/// The in-memory projection of a workflow during execution (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub session_id: String,

    /// Stages whose Stage Task has transitioned to Completed.
    pub completed_stages: HashSet<StageName>,
    /// Last recorded output per completed stage.
    pub task_outputs: HashMap<StageName, StageOutput>,
    /// Retry count per stage, surfaced on `*_failed`/testable-property checks.
    pub stage_retry_counts: HashMap<StageName, u32>,

    /// Checkpoints the workflow has ever reached. Persistent — not cleared
    /// on resume, unlike `pause`.
    pub checkpoints_passed: HashSet<PauseCheckpoint>,
    /// The checkpoint the workflow is currently idling at, if any. Cleared
    /// by the Session Resumer when a new invocation carries user input.
    pub pause: Option<PauseCheckpoint>,

    pub user_feedback: Option<String>,
    #[serde(default)]
    pub feedback_intent: FeedbackIntent,
    #[serde(default)]
    pub content_edits: Vec<ContentEdit>,

    /// Whether the export action (artifacts → object storage) has run.
    pub export_done: bool,
    pub artifact_export_locations: HashMap<Uuid, String>,

    pub errors: Vec<StageError>,
    pub retry_count: u32,

    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(workflow_id: Uuid, project_id: Uuid, user_id: Uuid, session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id,
            project_id,
            user_id,
            session_id: session_id.into(),
            completed_stages: HashSet::new(),
            task_outputs: HashMap::new(),
            stage_retry_counts: HashMap::new(),
            checkpoints_passed: HashSet::new(),
            pause: None,
            user_feedback: None,
            feedback_intent: FeedbackIntent::default(),
            content_edits: Vec::new(),
            export_done: false,
            artifact_export_locations: HashMap::new(),
            errors: Vec::new(),
            retry_count: 0,
            started_at: now,
            last_updated_at: now,
        }
    }

    pub fn is_completed(&self, stage: StageName) -> bool {
        self.completed_stages.contains(&stage)
    }

    pub fn has_passed(&self, checkpoint: PauseCheckpoint) -> bool {
        self.checkpoints_passed.contains(&checkpoint)
    }

    /// Mark a stage complete and record its output. Idempotent.
    pub fn mark_stage_complete(&mut self, stage: StageName, output: StageOutput) {
        self.completed_stages.insert(stage);
        self.task_outputs.insert(stage, output);
        self.last_updated_at = Utc::now();
    }

    /// Record an error for a stage without marking it complete.
    pub fn record_error(&mut self, error: StageError) {
        self.errors.push(error);
        self.last_updated_at = Utc::now();
    }

    /// Reset one stage for retry: drop its completion, output, and bump
    /// both the per-stage and workflow-wide retry counters.
    pub fn reset_stage(&mut self, stage: StageName) {
        self.completed_stages.remove(&stage);
        self.task_outputs.remove(&stage);
        *self.stage_retry_counts.entry(stage).or_insert(0) += 1;
        self.retry_count += 1;
        self.last_updated_at = Utc::now();
    }

    pub fn reset_stages(&mut self, stages: &[StageName]) {
        for stage in stages {
            self.reset_stage(*stage);
        }
    }

    /// Enter a pause checkpoint: mark it passed (persistently) and idling (ephemerally).
    pub fn enter_pause(&mut self, checkpoint: PauseCheckpoint) {
        self.checkpoints_passed.insert(checkpoint);
        self.pause = Some(checkpoint);
        self.last_updated_at = Utc::now();
    }

    /// Apply incoming user input on resume: set feedback/edits, clear the
    /// ephemeral pause flag. Mirrors spec.md §4.7's Session Resumer steps.
    pub fn apply_user_input(&mut self, chat: Option<String>, content_edits: Vec<ContentEdit>, intent: FeedbackIntent) {
        self.user_feedback = chat;
        self.feedback_intent = intent;
        self.content_edits = content_edits;
        self.pause = None;
        self.last_updated_at = Utc::now();
    }

    pub fn progress_percentage(&self) -> u8 {
        let total = StageName::ALL.len();
        let done = self.completed_stages.len().min(total);
        ((done as f64 / total as f64) * 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WorkflowState {
        WorkflowState::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "session-0000001")
    }

    #[test]
    fn stage_ordering_is_stable() {
        assert_eq!(StageName::Parser.sequence_order(), 0);
        assert_eq!(StageName::Submission.sequence_order(), 6);
    }

    #[test]
    fn reset_stage_increments_counters() {
        let mut state = sample();
        state.mark_stage_complete(StageName::Content, StageOutput::ParseFailed { raw: "x".into() });
        state.reset_stage(StageName::Content);
        assert!(!state.is_completed(StageName::Content));
        assert_eq!(state.stage_retry_counts[&StageName::Content], 1);
        assert_eq!(state.retry_count, 1);
    }

    #[test]
    fn pause_then_resume_clears_ephemeral_flag_only() {
        let mut state = sample();
        state.enter_pause(PauseCheckpoint::AfterAnalysis);
        assert!(state.has_passed(PauseCheckpoint::AfterAnalysis));
        assert_eq!(state.pause, Some(PauseCheckpoint::AfterAnalysis));

        state.apply_user_input(Some("approved".into()), vec![], FeedbackIntent::Proceed);
        assert!(state.pause.is_none());
        // Persistent marker survives the resume.
        assert!(state.has_passed(PauseCheckpoint::AfterAnalysis));
    }

    #[test]
    fn progress_percentage_scales_with_completed_stages() {
        let mut state = sample();
        assert_eq!(state.progress_percentage(), 0);
        state.mark_stage_complete(StageName::Parser, StageOutput::ParseFailed { raw: "x".into() });
        assert!(state.progress_percentage() > 0);
    }
}
