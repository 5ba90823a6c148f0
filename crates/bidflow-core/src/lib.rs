// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! Bidflow Core - the interruptible workflow scheduler and durable state
//! machine behind the bid workflow pipeline.
//!
//! A workflow runs a fixed sequence of LLM-driven stages (parsing,
//! analysis, content generation, compliance review, quality review,
//! export, notification, submission), pausing at defined checkpoints for
//! human input and resuming on demand, potentially across many process
//! invocations. This crate owns that scheduling and state machine; it does
//! not own prompts, transport, or per-stage business content.
//!
//! # Example
//!
//! ```rust
//! use bidflow_core::supervisor::{decide, Decision};
//! use bidflow_core::workflow_state::{StageName, WorkflowState};
//! use uuid::Uuid;
//!
//! let state = WorkflowState::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "session-0000001");
//! let (decision, reason, _resets) = decide(&state);
//! assert_eq!(decision, Decision::Stage(StageName::Parser));
//! assert!(!reason.is_empty());
//! ```

pub mod config;
pub mod entry_handler;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod graph_executor;
pub mod health;
pub mod idempotency;
pub mod providers;
pub mod retry;
pub mod session_resumer;
pub mod stage;
pub mod stage_io;
pub mod stage_runner;
pub mod state_store;
pub mod supervisor;
pub mod workflow_state;

pub use config::Config;
pub use entry_handler::{EntryHandler, EntryRequest, TerminalMarker};
pub use error::{BidflowError, ErrorKind, Result};
pub use event_bus::EventBus;
pub use graph_executor::{ArtifactExporter, GraphExecutor, RunOutcome, RunStatus};
pub use idempotency::IdempotencyLedger;
pub use providers::{CompletionRequest, CompletionResponse, LLMProvider, ProviderError};
pub use retry::{RetryExecutor, RetryPolicy};
pub use session_resumer::{SessionResumer, UserInput};
pub use stage_runner::StageRunner;
pub use state_store::StateStore;
pub use supervisor::{decide, Decision};
pub use workflow_state::{PauseCheckpoint, StageName, WorkflowState};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
