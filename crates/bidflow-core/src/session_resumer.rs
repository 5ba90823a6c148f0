// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! Loads or creates a workflow by session key and hands it to the Graph
//! Executor (spec.md §4.7).

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{BidflowError, Result};
use crate::event_bus::EventBus;
use crate::events;
use crate::graph_executor::{GraphExecutor, RunOutcome};
use crate::stage::STAGES;
use crate::state_store::{StageSpec, StateStore};
use crate::supervisor::classify_feedback_intent;
use crate::workflow_state::{ContentEdit, StageName, WorkflowState};

/// The chat text and artifact edits carried on a resume invocation.
#[derive(Debug, Clone, Default)]
pub struct UserInput {
    pub chat: Option<String>,
    pub content_edits: Vec<ContentEdit>,
}

pub struct SessionResumer {
    pub state_store: Arc<dyn StateStore>,
    pub event_bus: Arc<EventBus>,
    pub graph_executor: GraphExecutor,
}

impl SessionResumer {
    /// `start=true` with no `user_input` creates a new workflow; `start=false`
    /// loads the existing one and merges the incoming feedback. Any other
    /// combination is a validation error (spec.md §4.7, §6).
    pub async fn resume(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        session_id: &str,
        start: bool,
        user_input: Option<UserInput>,
    ) -> Result<RunOutcome> {
        match (start, &user_input) {
            (true, Some(_)) => {
                return Err(BidflowError::validation("start=true forbids user_input"));
            }
            (false, None) => {
                return Err(BidflowError::validation("user_input is required when start=false"));
            }
            _ => {}
        }

        if start {
            self.start_new(project_id, user_id, session_id).await
        } else {
            self.resume_existing(session_id, user_input.unwrap_or_default()).await
        }
    }

    async fn start_new(&self, project_id: Uuid, user_id: Uuid, session_id: &str) -> Result<RunOutcome> {
        let stages: Vec<StageSpec> = STAGES
            .iter()
            .map(|s| StageSpec { stage_name: s.name.to_string(), sequence_order: s.sequence_order as i32 })
            .collect();

        let workflow_id = self.state_store.create_workflow(project_id, session_id, user_id, &stages).await?;
        let state = WorkflowState::new(workflow_id, project_id, user_id, session_id.to_string());

        self.event_bus
            .publish(events::workflow_created(session_id, workflow_id, STAGES.len(), &StageName::ALL))
            .await?;

        let (_, task_ids) = self
            .state_store
            .load_active_workflow(session_id)
            .await?
            .ok_or_else(|| BidflowError::internal("workflow vanished immediately after creation"))?;

        self.graph_executor.run(state, task_id_map(&task_ids)).await
    }

    async fn resume_existing(&self, session_id: &str, input: UserInput) -> Result<RunOutcome> {
        let (record, tasks) = self
            .state_store
            .load_active_workflow(session_id)
            .await?
            .ok_or_else(|| BidflowError::not_found(format!("no active workflow for session {session_id}")))?;

        // Persisted as an internal event-log entry, not one of the public SSE
        // catalog types (spec.md §6's catalog stays closed): a record of what
        // the user sent, so a replayed session can show its own input back.
        self.state_store
            .append_event(crate::state_store::NewEvent {
                session_id: session_id.to_string(),
                workflow_id: record.id,
                event_type: "user_message".to_string(),
                payload_blob: serde_json::json!({"chat": input.chat, "content_edits": input.content_edits}),
            })
            .await?;

        let intent = input.chat.as_deref().map(classify_feedback_intent).unwrap_or_default();

        let mut state = rehydrate(&record, &tasks)?;
        state.apply_user_input(input.chat, input.content_edits, intent);

        self.graph_executor.run(state, task_id_map(&tasks)).await
    }
}

fn parse_checkpoint(name: &str) -> Option<crate::workflow_state::PauseCheckpoint> {
    use crate::workflow_state::PauseCheckpoint::*;
    match name {
        "analysis" => Some(AfterAnalysis),
        "artifact_review" => Some(ArtifactReview),
        "comms" => Some(CommsPermission),
        "submission" => Some(SubmissionPermission),
        _ => None,
    }
}

fn task_id_map(tasks: &[crate::state_store::StageTaskRecord]) -> HashMap<StageName, Uuid> {
    tasks
        .iter()
        .filter_map(|t| t.stage_name.parse::<StageName>().ok().map(|name| (name, t.id)))
        .collect()
}

/// Rebuilds the ephemeral `WorkflowState` from a Workflow row and its
/// Stage Task rows, per spec.md §3's rehydration invariant.
fn rehydrate(record: &crate::state_store::WorkflowRecord, tasks: &[crate::state_store::StageTaskRecord]) -> Result<WorkflowState> {
    let user_id = record
        .config_blob
        .get("user_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(Uuid::nil);

    let mut state = WorkflowState::new(record.id, record.project_id, user_id, record.session_id.clone());
    state.started_at = record.created_at;
    state.last_updated_at = record.last_updated_at;

    // `completed_stages`/`task_outputs` are rebuilt below from the Stage
    // Task rows; `checkpoints_passed`/`export_done`/`artifact_export_locations`
    // have no row of their own, so they're read back out of the same
    // `config_blob` the Graph Executor writes them into on every pause and
    // on export (see `checkpoint_config_blob`). Their absence (a freshly
    // created workflow with no prior pause) is not an error, just empty.
    if let Some(names) = record.config_blob.get("checkpoints_passed").and_then(|v| v.as_array()) {
        for name in names.iter().filter_map(|v| v.as_str()) {
            if let Some(checkpoint) = parse_checkpoint(name) {
                state.checkpoints_passed.insert(checkpoint);
            }
        }
    }
    if let Some(export_done) = record.config_blob.get("export_done").and_then(|v| v.as_bool()) {
        state.export_done = export_done;
    }
    if let Some(locations) = record.config_blob.get("artifact_export_locations") {
        if let Ok(locations) = serde_json::from_value(locations.clone()) {
            state.artifact_export_locations = locations;
        }
    }

    for task in tasks {
        let Ok(stage_name) = task.stage_name.parse::<StageName>() else { continue };
        if task.status == crate::state_store::Status::Completed {
            if let Some(output_blob) = &task.output_blob {
                if let Ok(output) = serde_json::from_value(output_blob.clone()) {
                    state.mark_stage_complete(stage_name, output);
                }
            }
        }
        state.stage_retry_counts.insert(stage_name, task.retry_count.max(0) as u32);
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::IdempotencyLedger;
    use crate::providers::{CompletionRequest, CompletionResponse, LLMProvider, ProviderError};
    use crate::stage_runner::StageRunner;
    use crate::state_store::{
        ArtifactRecord, ArtifactStatus, ArtifactVersionRecord, EventRecord, NewEvent, StageTaskRecord, TaskUpdate, WorkflowRecord, WorkflowUpdate,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;

    struct FakeStore {
        workflow_id: Uuid,
        session_id: String,
        project_id: Uuid,
        user_id: Uuid,
        created: Mutex<bool>,
    }

    #[async_trait]
    impl StateStore for FakeStore {
        async fn create_workflow(&self, _: Uuid, _: &str, _: Uuid, _: &[StageSpec]) -> Result<Uuid> {
            *self.created.lock() = true;
            Ok(self.workflow_id)
        }
        async fn load_active_workflow(&self, session_id: &str) -> Result<Option<(WorkflowRecord, Vec<StageTaskRecord>)>> {
            if session_id != self.session_id || !*self.created.lock() {
                return Ok(None);
            }
            let record = WorkflowRecord {
                id: self.workflow_id,
                project_id: self.project_id,
                session_id: self.session_id.clone(),
                status: crate::state_store::Status::Open,
                created_at: chrono::Utc::now(),
                last_updated_at: chrono::Utc::now(),
                completed_at: None,
                error_summary: None,
                config_blob: serde_json::json!({"user_id": self.user_id}),
            };
            let tasks = STAGES
                .iter()
                .map(|s| StageTaskRecord {
                    id: Uuid::new_v4(),
                    workflow_id: self.workflow_id,
                    stage_name: s.name.to_string(),
                    sequence_order: s.sequence_order as i32,
                    status: crate::state_store::Status::Open,
                    input_blob: serde_json::json!({}),
                    output_blob: None,
                    retry_count: 0,
                    error_log_blob: serde_json::json!([]),
                    started_at: None,
                    completed_at: None,
                    execution_time_seconds: None,
                })
                .collect();
            Ok(Some((record, tasks)))
        }
        async fn update_task(&self, _: Uuid, _: TaskUpdate) -> Result<()> {
            Ok(())
        }
        async fn reset_tasks(&self, _: Uuid, _: &[String]) -> Result<()> {
            Ok(())
        }
        async fn update_workflow(&self, _: Uuid, _: WorkflowUpdate) -> Result<()> {
            Ok(())
        }
        async fn append_event(&self, event: NewEvent) -> Result<EventRecord> {
            Ok(EventRecord { id: 1, session_id: event.session_id, workflow_id: event.workflow_id, event_type: event.event_type, payload_blob: event.payload_blob, created_at: chrono::Utc::now() })
        }
        async fn fetch_events_since(&self, _: &str, _: i64) -> Result<Vec<EventRecord>> {
            Ok(vec![])
        }
        async fn create_artifact(&self, _: ArtifactRecord) -> Result<()> {
            unimplemented!()
        }
        async fn set_artifact_status(&self, _: Uuid, _: ArtifactStatus, _: Option<Uuid>) -> Result<()> {
            unimplemented!()
        }
        async fn create_artifact_version(&self, _: Uuid, _: Value) -> Result<ArtifactVersionRecord> {
            unimplemented!()
        }
        async fn set_artifact_version_export_location(&self, _: Uuid, _: &str) -> Result<()> {
            unimplemented!()
        }
        async fn list_artifact_versions(&self, _: Uuid) -> Result<Vec<ArtifactVersionRecord>> {
            unimplemented!()
        }
    }

    struct FakeLedger;

    #[async_trait]
    impl IdempotencyLedger for FakeLedger {
        async fn acquire(&self, _: &str, _: std::time::Duration) -> Result<bool> {
            Ok(true)
        }
        async fn release(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn lookup_cached(&self, _: &str) -> Result<Option<Value>> {
            Ok(None)
        }
        async fn store_cached(&self, _: &str, _: Value, _: std::time::Duration) -> Result<()> {
            Ok(())
        }
    }

    struct FakeLLM;

    #[async_trait]
    impl LLMProvider for FakeLLM {
        async fn complete(&self, _: CompletionRequest) -> std::result::Result<CompletionResponse, ProviderError> {
            // Satisfies both ParserOutput's and AnalysisOutput's required fields so
            // the same stub can play both of the first two stages in this test.
            Ok(CompletionResponse {
                text: r#"{"document_structure":{},"summary":"ok"}"#.into(),
                model: "fake".into(),
                tokens_used: None,
                metadata: Default::default(),
            })
        }
        fn name(&self) -> &str {
            "fake"
        }
    }

    struct FakeExporter;

    #[async_trait]
    impl crate::graph_executor::ArtifactExporter for FakeExporter {
        async fn export_all(&self, _: Uuid, _: &[Uuid]) -> Result<HashMap<Uuid, String>> {
            Ok(HashMap::new())
        }
    }

    fn resumer(store: Arc<FakeStore>) -> SessionResumer {
        let bus = Arc::new(EventBus::new(store.clone(), 64));
        let stage_runner = StageRunner::new(store.clone(), Arc::new(FakeLedger), bus.clone(), Arc::new(FakeLLM));
        SessionResumer {
            state_store: store.clone(),
            event_bus: bus.clone(),
            graph_executor: GraphExecutor { state_store: store, event_bus: bus, stage_runner, exporter: Arc::new(FakeExporter) },
        }
    }

    #[tokio::test]
    async fn start_true_with_user_input_is_rejected() {
        let store = Arc::new(FakeStore { workflow_id: Uuid::new_v4(), session_id: "session-0000001".into(), project_id: Uuid::new_v4(), user_id: Uuid::new_v4(), created: Mutex::new(false) });
        let err = resumer(store)
            .resume(Uuid::new_v4(), Uuid::new_v4(), "session-0000001", true, Some(UserInput::default()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn resume_without_existing_workflow_is_not_found() {
        let store = Arc::new(FakeStore { workflow_id: Uuid::new_v4(), session_id: "session-0000001".into(), project_id: Uuid::new_v4(), user_id: Uuid::new_v4(), created: Mutex::new(false) });
        let err = resumer(store)
            .resume(Uuid::new_v4(), Uuid::new_v4(), "session-0000001", false, Some(UserInput::default()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn start_new_creates_workflow_and_runs_until_pause() {
        let project_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let store = Arc::new(FakeStore { workflow_id: Uuid::new_v4(), session_id: "session-0000001".into(), project_id, user_id, created: Mutex::new(false) });
        let outcome = resumer(store).resume(project_id, user_id, "session-0000001", true, None).await.unwrap();
        assert_eq!(outcome.status, crate::graph_executor::RunStatus::Waiting);
        assert_eq!(outcome.state.pause, Some(crate::workflow_state::PauseCheckpoint::AfterAnalysis));
    }
}
