// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! Bidflow SDK — programmatic access to the workflow scheduler for
//! embedding it in a host application, re-exporting bidflow-core's public
//! surface alongside the concrete Postgres state store.

pub use bidflow_core::*;
pub use bidflow_state::{PostgresIdempotencyLedger, PostgresStateStore};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
