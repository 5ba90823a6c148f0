// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! Stable error kinds and the error type carried across every component.
//!
//! Error *kinds* are data (an enumerant stored on [`BidflowError`]), not the
//! Rust type itself — a database timeout and an LLM rate limit are both
//! `ErrorKind::Transient` even though they originate in unrelated crates.

use std::fmt;

/// Result type alias used throughout the core.
pub type Result<T> = std::result::Result<T, BidflowError>;

/// Stable, serializable error classification.
///
/// These are the only kinds the system ever produces; callers match on
/// this enum rather than on a deep type hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Database connection/timeout, LLM rate-limit, storage throttle, network blips.
    Transient,
    /// Malformed input or schema violation. Not retried.
    Validation,
    /// Workflow/task/row absent when expected.
    NotFound,
    /// State-machine violation (e.g. completing a task twice).
    InvalidTransition,
    /// Per-stage or per-workflow deadline exceeded.
    Timeout,
    /// Explicit cancellation.
    Cancelled,
    /// Active workflow already exists for a session on `start=true`.
    Conflict,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Whether the Stage Runner should retry an error of this kind.
    ///
    /// Only `Transient` is retried; every other kind is terminal for the
    /// current stage invocation (spec.md §7 propagation policy).
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// The error type returned by every fallible operation in the core.
///
/// Carries enough for the Graph Executor to build a `*_failed` or
/// `manual_intervention_required` event without re-deriving a kind from a
/// string message (spec.md §7: user-visible errors always include an error
/// code, a human message, whether recoverable, and suggested recovery
/// actions).
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct BidflowError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BidflowError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source<E>(kind: ErrorKind, message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn invalid_transition(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::InvalidTransition,
            format!("invalid transition from {from} to {to}"),
        )
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Recovery actions surfaced to the caller, per spec.md §7.
    pub fn suggested_actions(&self) -> Vec<&'static str> {
        match self.kind {
            ErrorKind::Transient => vec!["retry workflow from last checkpoint"],
            ErrorKind::Timeout => vec![
                "retry workflow from last checkpoint",
                "contact support if the deadline keeps being exceeded",
            ],
            ErrorKind::Conflict => {
                vec!["resume the existing workflow for this session instead of starting a new one"]
            }
            ErrorKind::NotFound => vec!["verify the session identifier"],
            ErrorKind::Validation => vec!["correct the request payload and retry"],
            ErrorKind::InvalidTransition | ErrorKind::Internal => vec!["contact support"],
            ErrorKind::Cancelled => vec![],
        }
    }
}

impl From<serde_json::Error> for BidflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(ErrorKind::Internal, "serialization failure", err)
    }
}
