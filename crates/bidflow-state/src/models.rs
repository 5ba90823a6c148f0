// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! `sqlx`-mapped row types and their conversions to/from the plain DTOs
//! `bidflow-core` defines in `state_store.rs`.
//!
//! The core programs against `Status`, `WorkflowRecord`, `StageTaskRecord`,
//! and friends without knowing anything about columns or row mapping; this
//! module is the only place those two worlds touch, the same way the
//! teacher's `executor_state.rs` converts between its own `StepStatus` and
//! the state crate's `StepStatus` at the boundary rather than sharing one
//! enum between the two layers.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use bidflow_core::state_store::{
    ArtifactRecord, ArtifactStatus, ArtifactVersionRecord, EventRecord, Status, StageTaskRecord,
    WorkflowRecord,
};

/// Row shape of the `workflows` table.
#[derive(Debug, Clone, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub session_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_summary: Option<String>,
    pub config_blob: Value,
}

impl WorkflowRow {
    pub fn into_record(self) -> Result<WorkflowRecord, String> {
        Ok(WorkflowRecord {
            id: self.id,
            project_id: self.project_id,
            session_id: self.session_id,
            status: parse_status(&self.status)?,
            created_at: self.created_at,
            last_updated_at: self.last_updated_at,
            completed_at: self.completed_at,
            error_summary: self.error_summary,
            config_blob: self.config_blob,
        })
    }
}

/// Row shape of the `stage_tasks` table.
#[derive(Debug, Clone, FromRow)]
pub struct StageTaskRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub stage_name: String,
    pub sequence_order: i32,
    pub status: String,
    pub input_blob: Value,
    pub output_blob: Option<Value>,
    pub retry_count: i32,
    pub error_log_blob: Value,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_seconds: Option<f64>,
}

impl StageTaskRow {
    pub fn into_record(self) -> Result<StageTaskRecord, String> {
        Ok(StageTaskRecord {
            id: self.id,
            workflow_id: self.workflow_id,
            stage_name: self.stage_name,
            sequence_order: self.sequence_order,
            status: parse_status(&self.status)?,
            input_blob: self.input_blob,
            output_blob: self.output_blob,
            retry_count: self.retry_count,
            error_log_blob: self.error_log_blob,
            started_at: self.started_at,
            completed_at: self.completed_at,
            execution_time_seconds: self.execution_time_seconds,
        })
    }
}

/// Row shape of the `artifacts` table.
#[derive(Debug, Clone, FromRow)]
pub struct ArtifactRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub kind: String,
    pub category: String,
    pub status: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approver_id: Option<Uuid>,
}

impl ArtifactRow {
    pub fn into_record(self) -> Result<ArtifactRecord, String> {
        Ok(ArtifactRecord {
            id: self.id,
            project_id: self.project_id,
            name: self.name,
            kind: self.kind,
            category: self.category,
            status: parse_artifact_status(&self.status)?,
            tags: self.tags,
            created_at: self.created_at,
            approved_at: self.approved_at,
            approver_id: self.approver_id,
        })
    }
}

/// Row shape of the `artifact_versions` table.
#[derive(Debug, Clone, FromRow)]
pub struct ArtifactVersionRow {
    pub id: Uuid,
    pub artifact_id: Uuid,
    pub version_number: i32,
    pub content_blob: Value,
    pub export_location: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<ArtifactVersionRow> for ArtifactVersionRecord {
    fn from(row: ArtifactVersionRow) -> Self {
        ArtifactVersionRecord {
            id: row.id,
            artifact_id: row.artifact_id,
            version_number: row.version_number,
            content_blob: row.content_blob,
            export_location: row.export_location,
            created_at: row.created_at,
        }
    }
}

/// Row shape of the `events` table.
#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub id: i64,
    pub session_id: String,
    pub workflow_id: Uuid,
    pub event_type: String,
    pub payload_blob: Value,
    pub created_at: DateTime<Utc>,
}

impl From<EventRow> for EventRecord {
    fn from(row: EventRow) -> Self {
        EventRecord {
            id: row.id,
            session_id: row.session_id,
            workflow_id: row.workflow_id,
            event_type: row.event_type,
            payload_blob: row.payload_blob,
            created_at: row.created_at,
        }
    }
}

pub fn status_column(status: Status) -> &'static str {
    match status {
        Status::Open => "open",
        Status::InProgress => "in_progress",
        Status::Waiting => "waiting",
        Status::Completed => "completed",
        Status::Failed => "failed",
    }
}

fn parse_status(raw: &str) -> Result<Status, String> {
    raw.parse::<Status>()
}

pub fn artifact_status_column(status: ArtifactStatus) -> &'static str {
    match status {
        ArtifactStatus::Draft => "draft",
        ArtifactStatus::Review => "review",
        ArtifactStatus::Approved => "approved",
        ArtifactStatus::Rejected => "rejected",
    }
}

fn parse_artifact_status(raw: &str) -> Result<ArtifactStatus, String> {
    match raw {
        "draft" => Ok(ArtifactStatus::Draft),
        "review" => Ok(ArtifactStatus::Review),
        "approved" => Ok(ArtifactStatus::Approved),
        "rejected" => Ok(ArtifactStatus::Rejected),
        other => Err(format!("unknown artifact status: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_column_name() {
        for status in [Status::Open, Status::InProgress, Status::Waiting, Status::Completed, Status::Failed] {
            let column = status_column(status);
            assert_eq!(parse_status(column).unwrap(), status);
        }
    }

    #[test]
    fn artifact_status_round_trips_through_its_column_name() {
        for status in [ArtifactStatus::Draft, ArtifactStatus::Review, ArtifactStatus::Approved, ArtifactStatus::Rejected] {
            let column = artifact_status_column(status);
            assert_eq!(parse_artifact_status(column).unwrap(), status);
        }
    }
}
