// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! Executes a single Stage Task against an LLM provider (spec.md §4.4).
//!
//! The six-step algorithm mirrors the teacher's `executor.rs` step loop:
//! transition the task to in-progress, build input, invoke under an
//! idempotency guard and a timeout, parse output, transition to its
//! terminal state, and retry transient failures with backoff. Stage
//! behavior itself lives entirely in the `stage.rs` table; this module
//! contains no per-stage branches.

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::error::{BidflowError, ErrorKind, Result};
use crate::event_bus::EventBus;
use crate::events;
use crate::idempotency::{run_once, stage_operation_key, IdempotencyLedger};
use crate::providers::{CompletionRequest, LLMProvider};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::stage::{stage_descriptor, Stage};
use crate::stage_io::StageOutput;
use crate::state_store::{StateStore, TaskUpdate};
use crate::workflow_state::{StageError, StageName, WorkflowState};

/// Collaborators a Stage Runner needs, grouped so callers construct one
/// value instead of threading four `Arc`s through every call site.
pub struct StageRunner {
    pub state_store: Arc<dyn StateStore>,
    pub ledger: Arc<dyn IdempotencyLedger>,
    pub event_bus: Arc<EventBus>,
    pub llm: Arc<dyn LLMProvider>,
}

/// Result of running one stage: the updated state plus whether it
/// succeeded, so the Graph Executor can decide whether to retry.
pub struct StageRunOutcome {
    pub state: WorkflowState,
    pub result: Result<()>,
}

impl StageRunner {
    pub fn new(
        state_store: Arc<dyn StateStore>,
        ledger: Arc<dyn IdempotencyLedger>,
        event_bus: Arc<EventBus>,
        llm: Arc<dyn LLMProvider>,
    ) -> Self {
        Self { state_store, ledger, event_bus, llm }
    }

    /// Runs `stage_name` against the LLM, retrying transient failures per
    /// [`RetryPolicy::default`]. `task_id` identifies the durable Stage
    /// Task row to transition.
    pub async fn run(&self, mut state: WorkflowState, stage_name: StageName, task_id: Uuid) -> StageRunOutcome {
        let stage = stage_descriptor(stage_name);
        let executor = RetryExecutor::new(RetryPolicy::default());

        let outcome = executor
            .execute_with_info(|attempt| self.attempt(&state, stage, task_id, attempt))
            .await;

        match outcome {
            Ok(output) => {
                state.mark_stage_complete(stage_name, output);
                StageRunOutcome { state, result: Ok(()) }
            }
            Err(err) => {
                state.record_error(StageError {
                    stage: stage_name,
                    kind: err.kind,
                    message: err.message.clone(),
                    context: serde_json::json!({}),
                    occurred_at: chrono::Utc::now(),
                });
                StageRunOutcome { state, result: Err(err) }
            }
        }
    }

    /// One attempt: transition to in-progress (only on the first try),
    /// build input, invoke under the idempotency guard and stage timeout,
    /// parse the output, and transition to Completed or Failed.
    async fn attempt(&self, state: &WorkflowState, stage: &'static Stage, task_id: Uuid, attempt: u32) -> Result<StageOutput> {
        let started_at = Instant::now();

        if attempt == 0 {
            self.state_store
                .update_task(task_id, TaskUpdate { status: Some(crate::state_store::Status::InProgress), started_at: Some(chrono::Utc::now()), ..Default::default() })
                .await?;
            self.event_bus
                .publish(events::stage_started(&state.session_id, state.workflow_id, stage.name, task_id, state.progress_percentage()))
                .await?;
        }

        let input = (stage.input_builder)(state);
        let key = stage_operation_key(state.workflow_id, stage.name.as_str(), "invoke");
        let llm = self.llm.clone();
        let request = CompletionRequest {
            model: "default".to_string(),
            prompt: input.to_string(),
            system: None,
            temperature: None,
            max_tokens: None,
            extra: Default::default(),
        };

        let invoke = async move {
            llm.complete(request)
                .await
                .map(|resp| serde_json::json!({"text": resp.text}))
                .map_err(|err| BidflowError::with_source(ErrorKind::Transient, "llm invocation failed", err))
        };

        let raw = tokio::time::timeout(stage.timeout(), run_once(self.ledger.as_ref(), &key, stage.timeout(), || invoke))
            .await
            .map_err(|_| BidflowError::timeout(format!("{} exceeded its {:?} timeout", stage.name, stage.timeout())))??;

        let text = raw.get("text").and_then(|v| v.as_str()).unwrap_or_default();
        // `output_parser` is total: non-conforming text becomes
        // `StageOutput::ParseFailed { raw }` rather than an error, and is
        // persisted and completed like any other typed output (spec.md
        // §4.4 step 5, §9) — the Supervisor reads typed fields where it
        // needs them and tolerates the raw fallback elsewhere.
        let output = (stage.output_parser)(text);
        let elapsed = started_at.elapsed().as_secs_f64();

        self.state_store
            .update_task(
                task_id,
                TaskUpdate {
                    status: Some(crate::state_store::Status::Completed),
                    output_blob: Some(serde_json::to_value(&output)?),
                    completed_at: Some(chrono::Utc::now()),
                    execution_time_seconds: Some(elapsed),
                    ..Default::default()
                },
            )
            .await?;
        self.event_bus
            .publish(events::stage_completed(&state.session_id, state.workflow_id, stage.name, task_id, elapsed, &output.summarize()))
            .await?;

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionResponse, ProviderError};
    use crate::state_store::{ArtifactRecord, ArtifactStatus, ArtifactVersionRecord, EventRecord, NewEvent, StageSpec, StageTaskRecord, WorkflowRecord, WorkflowUpdate};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;

    struct FakeStore {
        updates: Mutex<Vec<TaskUpdate>>,
    }

    #[async_trait]
    impl StateStore for FakeStore {
        async fn create_workflow(&self, _: Uuid, _: &str, _: Uuid, _: &[StageSpec]) -> Result<Uuid> {
            unimplemented!()
        }
        async fn load_active_workflow(&self, _: &str) -> Result<Option<(WorkflowRecord, Vec<StageTaskRecord>)>> {
            unimplemented!()
        }
        async fn update_task(&self, _: Uuid, update: TaskUpdate) -> Result<()> {
            self.updates.lock().push(update);
            Ok(())
        }
        async fn reset_tasks(&self, _: Uuid, _: &[String]) -> Result<()> {
            unimplemented!()
        }
        async fn update_workflow(&self, _: Uuid, _: WorkflowUpdate) -> Result<()> {
            unimplemented!()
        }
        async fn append_event(&self, event: NewEvent) -> Result<EventRecord> {
            Ok(EventRecord {
                id: 1,
                session_id: event.session_id,
                workflow_id: event.workflow_id,
                event_type: event.event_type,
                payload_blob: event.payload_blob,
                created_at: chrono::Utc::now(),
            })
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

    struct FakeLLM {
        text: String,
    }

    #[async_trait]
    impl LLMProvider for FakeLLM {
        async fn complete(&self, _: CompletionRequest) -> std::result::Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse { text: self.text.clone(), model: "fake".into(), tokens_used: None, metadata: Default::default() })
        }
        fn name(&self) -> &str {
            "fake"
        }
    }

    fn sample_state() -> WorkflowState {
        WorkflowState::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "session-0000001")
    }

    #[tokio::test]
    async fn successful_stage_marks_state_complete() {
        let store = Arc::new(FakeStore { updates: Mutex::new(vec![]) });
        let bus = Arc::new(EventBus::new(store.clone(), 16));
        let runner = StageRunner::new(store, Arc::new(FakeLedger), bus, Arc::new(FakeLLM { text: r#"{"document_structure":{"sections":[]},"extracted_fields":{}}"#.into() }));

        let state = sample_state();
        let outcome = runner.run(state, StageName::Parser, Uuid::new_v4()).await;

        assert!(outcome.result.is_ok());
        assert!(outcome.state.is_completed(StageName::Parser));
    }

    #[tokio::test]
    async fn non_json_output_falls_back_and_completes() {
        let store = Arc::new(FakeStore { updates: Mutex::new(vec![]) });
        let bus = Arc::new(EventBus::new(store.clone(), 16));
        let runner = StageRunner::new(store, Arc::new(FakeLedger), bus, Arc::new(FakeLLM { text: "not json at all".into() }));

        let state = sample_state();
        let outcome = runner.run(state, StageName::Parser, Uuid::new_v4()).await;

        assert!(outcome.result.is_ok());
        assert!(outcome.state.is_completed(StageName::Parser));
        assert!(outcome.state.errors.is_empty());
        let output = outcome.state.task_outputs.get(&StageName::Parser).expect("parser output recorded");
        match output {
            StageOutput::ParseFailed { raw } => assert_eq!(raw, "not json at all"),
            other => panic!("expected ParseFailed, got {other:?}"),
        }
    }
}
