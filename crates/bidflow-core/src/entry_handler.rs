// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! Thin adapter between a transport and the Session Resumer (spec.md §4.8).
//!
//! Validates the request shape, calls `Session Resumer → Graph Executor`,
//! and leaves event-stream construction to the caller: `handle` returns the
//! terminal [`RunOutcome`] rather than writing bytes itself, since SSE
//! formatting already lives in [`crate::events::to_sse`] and transport code
//! (bidflow-cli, an HTTP layer) decides how to frame a response around it.

use uuid::Uuid;

use crate::error::{BidflowError, Result};
use crate::graph_executor::RunOutcome;
use crate::session_resumer::{SessionResumer, UserInput};

/// The validated shape of an entry-point request (spec.md §6).
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub session_id: String,
    pub start: bool,
    pub user_input: Option<UserInput>,
}

/// Minimum length for `session_id` (spec.md §6 validation rule).
const MIN_SESSION_ID_LEN: usize = 10;

impl EntryRequest {
    pub fn validate(&self) -> Result<()> {
        if self.session_id.len() < MIN_SESSION_ID_LEN {
            return Err(BidflowError::validation(format!(
                "session_id must be at least {MIN_SESSION_ID_LEN} characters"
            )));
        }
        if self.start && self.user_input.is_some() {
            return Err(BidflowError::validation("start=true forbids user_input"));
        }
        if !self.start && self.user_input.is_none() {
            return Err(BidflowError::validation("user_input is required when start=false"));
        }
        Ok(())
    }
}

/// What the terminal marker tells the caller once the stream closes
/// (spec.md §4.8: "waiting, complete, or failed").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalMarker {
    Waiting,
    Complete,
    Failed,
}

impl From<crate::graph_executor::RunStatus> for TerminalMarker {
    fn from(status: crate::graph_executor::RunStatus) -> Self {
        match status {
            crate::graph_executor::RunStatus::Waiting => TerminalMarker::Waiting,
            crate::graph_executor::RunStatus::Completed => TerminalMarker::Complete,
            crate::graph_executor::RunStatus::Failed => TerminalMarker::Failed,
        }
    }
}

pub struct EntryHandler {
    pub session_resumer: SessionResumer,
}

impl EntryHandler {
    /// Validates `request`, drives it through the Session Resumer and Graph
    /// Executor, and returns the terminal marker alongside the run outcome.
    /// No raw error ever reaches the caller unwrapped: failures surface
    /// through `RunStatus::Failed`, or — for request-shape problems — as a
    /// `Validation`/`NotFound` `BidflowError` the transport maps to its own
    /// error response (spec.md §7: no raw exceptions leak to the caller).
    pub async fn handle(&self, request: EntryRequest) -> Result<(TerminalMarker, RunOutcome)> {
        request.validate()?;

        let outcome = self
            .session_resumer
            .resume(request.project_id, request.user_id, &request.session_id, request.start, request.user_input)
            .await?;

        let marker = TerminalMarker::from(outcome.status);
        Ok((marker, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_session_id() {
        let request = EntryRequest { project_id: Uuid::new_v4(), user_id: Uuid::new_v4(), session_id: "short".into(), start: true, user_input: None };
        assert!(request.validate().is_err());
    }

    #[test]
    fn rejects_start_with_user_input() {
        let request = EntryRequest {
            project_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            session_id: "session-0000001".into(),
            start: true,
            user_input: Some(UserInput::default()),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn rejects_resume_without_user_input() {
        let request = EntryRequest { project_id: Uuid::new_v4(), user_id: Uuid::new_v4(), session_id: "session-0000001".into(), start: false, user_input: None };
        assert!(request.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_start_request() {
        let request = EntryRequest { project_id: Uuid::new_v4(), user_id: Uuid::new_v4(), session_id: "session-0000001".into(), start: true, user_input: None };
        assert!(request.validate().is_ok());
    }
}
