// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! Process-wide configuration, assembled from the environment the same way
//! the provider clients build themselves via `from_env` (see
//! `bidflow-providers`'s `AnthropicProvider::from_env`).

use std::time::Duration;

use crate::error::{BidflowError, Result};
use crate::event_bus::DEFAULT_QUEUE_CAPACITY;
use crate::graph_executor::WORKFLOW_DEADLINE;
use crate::retry::RetryPolicy;

/// Top-level configuration for a running bidflow-core instance.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub event_queue_capacity: usize,
    pub workflow_deadline: Duration,
    pub retry_policy: RetryPolicy,
    pub idempotency_ttl: Duration,
}

impl Config {
    /// Builds configuration from the environment. `DATABASE_URL` is the
    /// only required variable; everything else falls back to the spec's
    /// defaults.
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| BidflowError::validation("DATABASE_URL environment variable not set"))?;

        let event_queue_capacity = env_usize("BIDFLOW_EVENT_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?;
        let workflow_deadline_secs = env_u64("BIDFLOW_WORKFLOW_DEADLINE_SECS", WORKFLOW_DEADLINE.as_secs())?;
        let idempotency_ttl_secs = env_u64("BIDFLOW_IDEMPOTENCY_TTL_SECS", 3600)?;

        Ok(Self {
            database_url,
            event_queue_capacity,
            workflow_deadline: Duration::from_secs(workflow_deadline_secs),
            retry_policy: RetryPolicy::default(),
            idempotency_ttl: Duration::from_secs(idempotency_ttl_secs),
        })
    }
}

fn env_usize(key: &str, default: usize) -> Result<usize> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| BidflowError::validation(format!("{key} must be a positive integer"))),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| BidflowError::validation(format!("{key} must be a positive integer"))),
        Err(_) => Ok(default),
    }
}
