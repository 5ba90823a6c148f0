// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! The durable persistence port.
//!
//! This module defines the contract the rest of the core programs against
//! (spec.md §4.1) and the plain record types that cross the boundary. The
//! concrete Postgres adapter lives in `bidflow-state`, which depends on
//! this crate and converts its own `sqlx`-mapped rows to and from these
//! records — the same "convert at the boundary" shape the teacher uses in
//! `executor_state.rs` to bridge its own two status enums.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

/// Shared status vocabulary for Workflows and Stage Tasks (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    InProgress,
    Waiting,
    Completed,
    Failed,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Waiting => "waiting",
            Status::Completed => "completed",
            Status::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Status {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "open" => Ok(Status::Open),
            "in_progress" => Ok(Status::InProgress),
            "waiting" => Ok(Status::Waiting),
            "completed" => Ok(Status::Completed),
            "failed" => Ok(Status::Failed),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Draft,
    Review,
    Approved,
    Rejected,
}

/// A Workflow row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub session_id: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_summary: Option<String>,
    /// Free-form config blob; also where `user_id` is stashed, since the
    /// logical Workflows schema (spec.md §6) has no dedicated column for it.
    pub config_blob: Value,
}

/// A Stage Task row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTaskRecord {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub stage_name: String,
    pub sequence_order: i32,
    pub status: Status,
    pub input_blob: Value,
    pub output_blob: Option<Value>,
    pub retry_count: i32,
    pub error_log_blob: Value,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub kind: String,
    pub category: String,
    pub status: ArtifactStatus,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approver_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactVersionRecord {
    pub id: Uuid,
    pub artifact_id: Uuid,
    pub version_number: i32,
    pub content_blob: Value,
    pub export_location: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub session_id: String,
    pub workflow_id: Uuid,
    pub event_type: String,
    pub payload_blob: Value,
    pub created_at: DateTime<Utc>,
}

/// A not-yet-persisted event; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub session_id: String,
    pub workflow_id: Uuid,
    pub event_type: String,
    pub payload_blob: Value,
}

/// Partial update applied to a Stage Task row.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<Status>,
    pub output_blob: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_seconds: Option<f64>,
    pub append_error: Option<Value>,
    /// Bypasses the monotonic-progression check (spec.md §4.1).
    pub force: bool,
}

/// Partial update applied to a Workflow row.
#[derive(Debug, Clone, Default)]
pub struct WorkflowUpdate {
    pub status: Option<Status>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_summary: Option<String>,
    /// Replaces `config_blob` wholesale when set. Used to carry the
    /// checkpoint/export bookkeeping the Session Resumer needs across a
    /// rehydration boundary (checkpoints reached, export completion,
    /// export locations) — see [`crate::session_resumer::rehydrate`].
    pub config_blob: Option<Value>,
}

/// Declares a stage to be created alongside a new workflow.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub stage_name: String,
    pub sequence_order: i32,
}

/// The durable persistence contract (spec.md §4.1).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Transactional: inserts the Workflow row and one Stage Task row per
    /// entry in `stages`, all with status Open. Fails with `Conflict` if a
    /// non-terminal workflow already exists for `(project_id, session_id)`.
    async fn create_workflow(
        &self,
        project_id: Uuid,
        session_id: &str,
        user_id: Uuid,
        stages: &[StageSpec],
    ) -> Result<Uuid>;

    /// Returns the most recent non-terminal workflow for `session_id` and
    /// its Stage Tasks, or `None` if there isn't one.
    async fn load_active_workflow(&self, session_id: &str) -> Result<Option<(WorkflowRecord, Vec<StageTaskRecord>)>>;

    /// Partial update; fails `NotFound` if the task is absent, or
    /// `InvalidTransition` if the update regresses status without `force`.
    async fn update_task(&self, task_id: Uuid, update: TaskUpdate) -> Result<()>;

    /// Single transaction: sets the named stages back to Open and
    /// increments their retry counts.
    async fn reset_tasks(&self, workflow_id: Uuid, stage_names: &[String]) -> Result<()>;

    async fn update_workflow(&self, workflow_id: Uuid, update: WorkflowUpdate) -> Result<()>;

    /// Insert-only; assigns a monotonically increasing `id`.
    async fn append_event(&self, event: NewEvent) -> Result<EventRecord>;

    /// Time-ordered events for `session_id` with `id > since_id`.
    async fn fetch_events_since(&self, session_id: &str, since_id: i64) -> Result<Vec<EventRecord>>;

    async fn create_artifact(&self, artifact: ArtifactRecord) -> Result<()>;
    async fn set_artifact_status(&self, artifact_id: Uuid, status: ArtifactStatus, approver_id: Option<Uuid>) -> Result<()>;

    /// Inserts the next contiguous version for `artifact_id` (starts at 1).
    async fn create_artifact_version(&self, artifact_id: Uuid, content_blob: Value) -> Result<ArtifactVersionRecord>;
    async fn set_artifact_version_export_location(&self, version_id: Uuid, location: &str) -> Result<()>;
    async fn list_artifact_versions(&self, artifact_id: Uuid) -> Result<Vec<ArtifactVersionRecord>>;
}
