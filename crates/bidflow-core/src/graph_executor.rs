// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! Hub-and-spoke driver loop (spec.md §4.6).
//!
//! Mirrors the teacher's top-level `execute` loop in `executor.rs`: at the
//! top of every iteration check the deadline, ask the pure decision
//! function what to do next, publish that decision, then act on it. The
//! loop itself holds the only branch on `Decision`; everything it
//! dispatches to (Stage Runner, State Store, Event Bus) is generic over
//! stage name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{BidflowError, Result};
use crate::event_bus::EventBus;
use crate::events;
use crate::stage_runner::StageRunner;
use crate::state_store::{ArtifactRecord, ArtifactStatus, StateStore, WorkflowUpdate};
use crate::supervisor::{decide, Decision};
use crate::workflow_state::{PauseCheckpoint, StageName, WorkflowState};

/// Overall workflow deadline (spec.md §4.6): 60 minutes of wall time from
/// `WorkflowState::started_at`.
pub const WORKFLOW_DEADLINE: std::time::Duration = std::time::Duration::from_secs(60 * 60);

/// Point at which a warning `progress_update` is emitted before the deadline fires.
pub const WORKFLOW_DEADLINE_WARNING: std::time::Duration = std::time::Duration::from_secs(50 * 60);

/// The object-storage collaborator the export pseudo-stage hands artifacts
/// to. Explicitly out of scope as an external service (spec.md §1); this
/// trait is the narrow seam the Graph Executor calls through, the same way
/// `LLMProvider` is the seam for stage invocation.
#[async_trait]
pub trait ArtifactExporter: Send + Sync {
    /// Exports every current artifact version for `workflow_id`, returning
    /// the export location keyed by artifact id.
    async fn export_all(&self, workflow_id: Uuid, artifact_ids: &[Uuid]) -> Result<HashMap<Uuid, String>>;
}

/// Outcome of driving a workflow until it pauses, completes, or fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Waiting,
    Completed,
    Failed,
}

pub struct RunOutcome {
    pub state: WorkflowState,
    pub status: RunStatus,
}

pub struct GraphExecutor {
    pub state_store: Arc<dyn StateStore>,
    pub event_bus: Arc<EventBus>,
    pub stage_runner: StageRunner,
    pub exporter: Arc<dyn ArtifactExporter>,
}

impl GraphExecutor {
    /// Drives `state` until it reaches a pause checkpoint, completes, or
    /// fails. `task_ids` maps each fixed stage to the durable Stage Task
    /// row id the Session Resumer loaded alongside the workflow.
    pub async fn run(&self, mut state: WorkflowState, task_ids: HashMap<StageName, Uuid>) -> Result<RunOutcome> {
        let mut warned = false;

        loop {
            let elapsed = (Utc::now() - state.started_at).to_std().unwrap_or_default();

            if elapsed >= WORKFLOW_DEADLINE {
                return Ok(self.fail_on_deadline(state).await?);
            }
            if !warned && elapsed >= WORKFLOW_DEADLINE_WARNING {
                warned = true;
                self.event_bus
                    .publish(events::progress_update(&state.session_id, state.workflow_id, state.progress_percentage(), "deadline_warning"))
                    .await?;
            }

            let (decision, reason, resets) = decide(&state);
            self.event_bus
                .publish(events::node_decided(&state.session_id, state.workflow_id, decision_label(decision), &reason))
                .await?;

            if !resets.stages.is_empty() {
                self.state_store
                    .reset_tasks(state.workflow_id, &resets.stages.iter().map(|s| s.to_string()).collect::<Vec<_>>())
                    .await?;
                state.reset_stages(&resets.stages);
            }
            for checkpoint in &resets.checkpoints {
                state.checkpoints_passed.remove(checkpoint);
            }

            match decision {
                Decision::Initialize => {
                    return Err(BidflowError::internal("graph executor received an uninitialized workflow state"));
                }
                Decision::Complete => {
                    return Ok(self.complete(state).await?);
                }
                Decision::Pause(checkpoint) => {
                    state.enter_pause(checkpoint);
                    self.state_store
                        .update_workflow(
                            state.workflow_id,
                            WorkflowUpdate {
                                status: Some(crate::state_store::Status::Waiting),
                                config_blob: Some(checkpoint_config_blob(&state)),
                                ..Default::default()
                            },
                        )
                        .await?;
                    self.event_bus
                        .publish(events::awaiting_feedback(&state.session_id, state.workflow_id, checkpoint.as_str(), prompt_for(checkpoint), None))
                        .await?;
                    return Ok(RunOutcome { state, status: RunStatus::Waiting });
                }
                Decision::Export => {
                    state = self.run_export(state).await?;
                }
                Decision::Stage(stage_name) => {
                    let task_id = *task_ids
                        .get(&stage_name)
                        .ok_or_else(|| BidflowError::not_found(format!("no stage task recorded for {stage_name}")))?;
                    let outcome = self.stage_runner.run(state, stage_name, task_id).await;
                    state = outcome.state;
                    if let Err(err) = outcome.result {
                        return Ok(self.fail_stage(state, stage_name, err).await?);
                    }
                    if stage_name == StageName::Content {
                        self.persist_content_artifacts(&state).await?;
                    }
                    if stage_name == StageName::Comms {
                        if let Some(comms) = state.task_outputs.get(&StageName::Comms).and_then(|o| o.as_comms()) {
                            self.event_bus.publish(events::email_draft(&state.session_id, state.workflow_id, &comms.draft)).await?;
                        }
                    }
                }
            }
        }
    }

    async fn run_export(&self, mut state: WorkflowState) -> Result<WorkflowState> {
        let artifact_ids: Vec<Uuid> = state
            .task_outputs
            .get(&StageName::Content)
            .and_then(|o| o.as_content())
            .map(|c| c.artifacts.iter().map(|a| a.artifact_id).collect())
            .unwrap_or_default();

        let locations = self.exporter.export_all(state.workflow_id, &artifact_ids).await?;
        for (artifact_id, location) in &locations {
            let versions = self.state_store.list_artifact_versions(*artifact_id).await?;
            if let Some(latest) = versions.iter().max_by_key(|v| v.version_number) {
                self.state_store.set_artifact_version_export_location(latest.id, location).await?;
            }
        }

        state.artifact_export_locations.extend(locations.clone());
        state.export_done = true;
        state.last_updated_at = Utc::now();

        self.state_store
            .update_workflow(state.workflow_id, WorkflowUpdate { config_blob: Some(checkpoint_config_blob(&state)), ..Default::default() })
            .await?;

        self.event_bus
            .publish(events::artifacts_exported(
                &state.session_id,
                state.workflow_id,
                &artifact_ids,
                serde_json::to_value(&locations)?,
            ))
            .await?;

        Ok(state)
    }

    /// Persists a completed content stage's drafted artifacts: a new
    /// Artifact row the first time an artifact id is seen, and a new
    /// Artifact Version every time (content regenerated by a compliance/QA
    /// retry loop becomes the next version rather than overwriting the
    /// first, per spec.md §3's "version numbers are contiguous" invariant).
    async fn persist_content_artifacts(&self, state: &WorkflowState) -> Result<()> {
        let Some(content) = state.task_outputs.get(&StageName::Content).and_then(|o| o.as_content()) else {
            return Ok(());
        };

        for draft in &content.artifacts {
            let existing = self.state_store.list_artifact_versions(draft.artifact_id).await?;
            if existing.is_empty() {
                self.state_store
                    .create_artifact(ArtifactRecord {
                        id: draft.artifact_id,
                        project_id: state.project_id,
                        name: draft.name.clone(),
                        kind: draft.kind.clone(),
                        category: String::new(),
                        status: ArtifactStatus::Draft,
                        tags: Vec::new(),
                        created_at: Utc::now(),
                        approved_at: None,
                        approver_id: None,
                    })
                    .await?;
            }
            self.state_store.create_artifact_version(draft.artifact_id, draft.content.clone()).await?;
        }

        let artifact_ids: Vec<Uuid> = content.artifacts.iter().map(|a| a.artifact_id).collect();
        self.event_bus
            .publish(events::artifacts_ready(&state.session_id, state.workflow_id, &artifact_ids, serde_json::to_value(&content.artifacts)?))
            .await?;

        Ok(())
    }

    async fn complete(&self, state: WorkflowState) -> Result<RunOutcome> {
        let now = Utc::now();
        let total_seconds = (now - state.started_at).num_milliseconds() as f64 / 1000.0;

        self.state_store
            .update_workflow(
                state.workflow_id,
                WorkflowUpdate { status: Some(crate::state_store::Status::Completed), completed_at: Some(now), error_summary: None },
            )
            .await?;
        self.event_bus
            .publish(events::workflow_completed(&state.session_id, state.workflow_id, "completed", total_seconds, "workflow finished"))
            .await?;

        Ok(RunOutcome { state, status: RunStatus::Completed })
    }

    async fn fail_on_deadline(&self, state: WorkflowState) -> Result<RunOutcome> {
        let err = BidflowError::timeout("workflow exceeded its 60 minute deadline");
        self.fail_stage_generic(state, err, "deadline exceeded").await
    }

    async fn fail_stage(&self, state: WorkflowState, stage_name: StageName, err: BidflowError) -> Result<RunOutcome> {
        self.event_bus
            .publish(events::manual_intervention_required(&state.session_id, state.workflow_id, &err.kind.to_string(), &err.suggested_actions()))
            .await?;
        self.fail_stage_generic(state, err, &format!("{stage_name} failed non-recoverably")).await
    }

    async fn fail_stage_generic(&self, state: WorkflowState, err: BidflowError, summary: &str) -> Result<RunOutcome> {
        let now = Utc::now();
        let total_seconds = (now - state.started_at).num_milliseconds() as f64 / 1000.0;

        self.state_store
            .update_workflow(
                state.workflow_id,
                WorkflowUpdate { status: Some(crate::state_store::Status::Failed), completed_at: Some(now), error_summary: Some(err.message.clone()) },
            )
            .await?;
        self.event_bus
            .publish(events::error_occurred(&state.session_id, state.workflow_id, &err))
            .await?;
        self.event_bus
            .publish(events::workflow_completed(&state.session_id, state.workflow_id, "failed", total_seconds, summary))
            .await?;

        Ok(RunOutcome { state, status: RunStatus::Failed })
    }
}

/// Carries the ephemeral fields a resumed workflow needs beyond what
/// `completed_stages`/`task_outputs` already reconstruct: which checkpoints
/// have ever been reached, and the export outcome. Spec.md's Workflow State
/// invariant calls for this to be "written back on every stage transition",
/// but the logical Workflows schema has no dedicated columns for it, so it
/// rides in `config_blob` alongside `user_id` (see
/// [`crate::session_resumer::rehydrate`] for the read side).
fn checkpoint_config_blob(state: &WorkflowState) -> serde_json::Value {
    serde_json::json!({
        "user_id": state.user_id,
        "checkpoints_passed": state.checkpoints_passed.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
        "export_done": state.export_done,
        "artifact_export_locations": state.artifact_export_locations,
    })
}

fn decision_label(decision: Decision) -> &'static str {
    match decision {
        Decision::Initialize => "initialize",
        Decision::Stage(s) => s.as_str(),
        Decision::Pause(c) => match c {
            PauseCheckpoint::AfterAnalysis => "await_analysis_feedback",
            PauseCheckpoint::ArtifactReview => "await_artifact_review",
            PauseCheckpoint::CommsPermission => "await_comms_permission",
            PauseCheckpoint::SubmissionPermission => "await_submission_permission",
        },
        Decision::Export => "export",
        Decision::Complete => "complete",
    }
}

fn prompt_for(checkpoint: PauseCheckpoint) -> &'static str {
    match checkpoint {
        PauseCheckpoint::AfterAnalysis => "Review the analysis and let us know how to proceed.",
        PauseCheckpoint::ArtifactReview => "Review the generated artifacts and approve or request changes.",
        PauseCheckpoint::CommsPermission => "Approve sending the client communication draft?",
        PauseCheckpoint::SubmissionPermission => "Approve final submission?",
    }
}
