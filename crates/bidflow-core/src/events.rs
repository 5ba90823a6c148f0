// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! The event catalog (spec.md §6): one constructor per event type so
//! callers never hand-assemble a payload whose shape can drift from what
//! subscribers expect.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::state_store::NewEvent;
use crate::workflow_state::StageName;

fn event(session_id: &str, workflow_id: Uuid, event_type: &str, payload: Value) -> NewEvent {
    NewEvent { session_id: session_id.to_string(), workflow_id, event_type: event_type.to_string(), payload_blob: payload }
}

pub fn workflow_created(session_id: &str, workflow_id: Uuid, total_tasks: usize, agent_sequence: &[StageName]) -> NewEvent {
    event(
        session_id,
        workflow_id,
        "workflow_created",
        json!({
            "workflow_execution_id": workflow_id,
            "total_tasks": total_tasks,
            "agent_sequence": agent_sequence.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        }),
    )
}

pub fn node_decided(session_id: &str, workflow_id: Uuid, decision: &str, reason: &str) -> NewEvent {
    event(session_id, workflow_id, "node_decided", json!({"decision": decision, "reason": reason}))
}

pub fn stage_started(session_id: &str, workflow_id: Uuid, stage: StageName, task_id: Uuid, progress_percentage: u8) -> NewEvent {
    event(
        session_id,
        workflow_id,
        &format!("{}_started", stage.as_str()),
        json!({
            "stage": stage.as_str(),
            "task_id": task_id,
            "sequence_order": stage.sequence_order(),
            "progress_percentage": progress_percentage,
        }),
    )
}

pub fn stage_completed(
    session_id: &str,
    workflow_id: Uuid,
    stage: StageName,
    task_id: Uuid,
    execution_time_seconds: f64,
    output_summary: &str,
) -> NewEvent {
    event(
        session_id,
        workflow_id,
        &format!("{}_completed", stage.as_str()),
        json!({
            "stage": stage.as_str(),
            "task_id": task_id,
            "execution_time_seconds": execution_time_seconds,
            "output_summary": output_summary,
        }),
    )
}

pub fn stage_failed(
    session_id: &str,
    workflow_id: Uuid,
    stage: StageName,
    task_id: Uuid,
    error_code: &str,
    error_message: &str,
    is_recoverable: bool,
) -> NewEvent {
    event(
        session_id,
        workflow_id,
        &format!("{}_failed", stage.as_str()),
        json!({
            "stage": stage.as_str(),
            "task_id": task_id,
            "error_code": error_code,
            "error_message": error_message,
            "is_recoverable": is_recoverable,
        }),
    )
}

pub fn awaiting_feedback(session_id: &str, workflow_id: Uuid, checkpoint: &str, prompt: &str, review_data: Option<Value>) -> NewEvent {
    event(
        session_id,
        workflow_id,
        "awaiting_feedback",
        json!({"checkpoint": checkpoint, "prompt": prompt, "review_data": review_data}),
    )
}

pub fn artifacts_ready(session_id: &str, workflow_id: Uuid, artifact_ids: &[Uuid], artifacts: Value) -> NewEvent {
    event(session_id, workflow_id, "artifacts_ready", json!({"artifact_ids": artifact_ids, "artifacts": artifacts}))
}

pub fn artifacts_exported(session_id: &str, workflow_id: Uuid, artifact_ids: &[Uuid], export_locations: Value) -> NewEvent {
    event(
        session_id,
        workflow_id,
        "artifacts_exported",
        json!({"artifact_ids": artifact_ids, "export_locations": export_locations}),
    )
}

pub fn email_draft(session_id: &str, workflow_id: Uuid, draft: &str) -> NewEvent {
    event(session_id, workflow_id, "email_draft", json!({"draft": draft}))
}

pub fn progress_update(session_id: &str, workflow_id: Uuid, progress_percentage: u8, current_step: &str) -> NewEvent {
    event(
        session_id,
        workflow_id,
        "progress_update",
        json!({"progress_percentage": progress_percentage, "current_step": current_step}),
    )
}

pub fn error_occurred(session_id: &str, workflow_id: Uuid, error: &crate::error::BidflowError) -> NewEvent {
    event(
        session_id,
        workflow_id,
        "error_occurred",
        json!({
            "kind": error.kind.to_string(),
            "message": error.message,
            "recoverable": error.is_retryable(),
            "suggested_actions": error.suggested_actions(),
        }),
    )
}

pub fn manual_intervention_required(session_id: &str, workflow_id: Uuid, error_code: &str, suggested_actions: &[&str]) -> NewEvent {
    event(
        session_id,
        workflow_id,
        "manual_intervention_required",
        json!({"error_code": error_code, "suggested_actions": suggested_actions}),
    )
}

pub fn workflow_completed(session_id: &str, workflow_id: Uuid, completion_status: &str, total_execution_time_seconds: f64, summary: &str) -> NewEvent {
    event(
        session_id,
        workflow_id,
        "workflow_completed",
        json!({
            "completion_status": completion_status,
            "total_execution_time_seconds": total_execution_time_seconds,
            "summary": summary,
        }),
    )
}

pub fn queue_overflow(session_id: &str, workflow_id: Uuid) -> NewEvent {
    event(session_id, workflow_id, "queue_overflow", json!({}))
}

pub fn server_shutdown(session_id: &str, workflow_id: Uuid) -> NewEvent {
    event(session_id, workflow_id, "server_shutdown", json!({}))
}

/// Formats an event per spec.md §6's SSE wire format.
pub fn to_sse(record: &crate::state_store::EventRecord) -> String {
    format!("id: {}\nevent: {}\ndata: {}\n\n", record.id, record.event_type, record.payload_blob)
}
