// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! Operation-key → cached-result mapping with TTL and mutual exclusion.
//!
//! Grounded on the trait-object registration pattern the teacher uses for
//! `Arc<dyn LLMProvider>` — there is no equivalent concept in the teacher's
//! executor, so this is modeled fresh, but kept in the same "narrow async
//! trait behind an `Arc`" shape the rest of the core already uses.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::Result;

/// Backing store for idempotency locks and cached results. Implemented by
/// `bidflow-state`'s Postgres-backed `Idempotency` table.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Atomic "insert if absent". Returns `false` if a live lock exists.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Deletes the lock for `key`, if any.
    async fn release(&self, key: &str) -> Result<()>;

    /// Returns a cached result if present and unexpired.
    async fn lookup_cached(&self, key: &str) -> Result<Option<Value>>;

    /// Upserts a cached result with a fresh expiry.
    async fn store_cached(&self, key: &str, result: Value, ttl: Duration) -> Result<()>;
}

/// Interval between polls while waiting for a peer to release a lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on poll attempts before giving up with `Conflict`. At 100ms
/// per poll this is a 30 second wait, comfortably inside the per-stage
/// timeout stages are wrapped in.
const MAX_LOCK_POLLS: u32 = 300;

/// The composite primitive described in spec.md §4.2: look up a cached
/// result, or acquire the lock, run `fn`, cache its result, and release.
pub async fn run_once<F, Fut>(ledger: &dyn IdempotencyLedger, key: &str, ttl: Duration, fn_: F) -> Result<Value>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<Value>>,
{
    if let Some(cached) = ledger.lookup_cached(key).await? {
        return Ok(cached);
    }

    let mut polls = 0;
    loop {
        if ledger.acquire(key, ttl).await? {
            break;
        }
        polls += 1;
        if polls >= MAX_LOCK_POLLS {
            return Err(crate::error::BidflowError::conflict(format!(
                "timed out waiting for idempotency lock on {key}"
            )));
        }
        if let Some(cached) = ledger.lookup_cached(key).await? {
            return Ok(cached);
        }
        tokio::time::sleep(LOCK_POLL_INTERVAL).await;
    }

    match fn_().await {
        Ok(result) => {
            ledger.store_cached(key, result.clone(), ttl).await?;
            ledger.release(key).await?;
            Ok(result)
        }
        Err(err) => {
            ledger.release(key).await?;
            Err(err)
        }
    }
}

/// Builds the deterministic idempotency key for a stage operation
/// (spec.md §4.2: `workflow:{workflowId}:stage:{stageName}:{operation}`).
pub fn stage_operation_key(workflow_id: uuid::Uuid, stage_name: &str, operation: &str) -> String {
    format!("workflow:{workflow_id}:stage:{stage_name}:{operation}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// An in-memory ledger for exercising `run_once` without a database.
    struct MemoryLedger {
        locks: DashMap<String, ()>,
        cache: DashMap<String, Value>,
    }

    impl MemoryLedger {
        fn new() -> Self {
            Self { locks: DashMap::new(), cache: DashMap::new() }
        }
    }

    #[async_trait]
    impl IdempotencyLedger for MemoryLedger {
        async fn acquire(&self, key: &str, _ttl: Duration) -> Result<bool> {
            Ok(self.locks.insert(key.to_string(), ()).is_none())
        }

        async fn release(&self, key: &str) -> Result<()> {
            self.locks.remove(key);
            Ok(())
        }

        async fn lookup_cached(&self, key: &str) -> Result<Option<Value>> {
            Ok(self.cache.get(key).map(|v| v.clone()))
        }

        async fn store_cached(&self, key: &str, result: Value, _ttl: Duration) -> Result<()> {
            self.cache.insert(key.to_string(), result);
            Ok(())
        }
    }

    #[test]
    fn key_format_matches_spec() {
        let id = uuid::Uuid::nil();
        assert_eq!(stage_operation_key(id, "analysis", "invoke"), format!("workflow:{id}:stage:analysis:invoke"));
    }

    #[tokio::test]
    async fn second_call_hits_cache_not_the_function() {
        let ledger = MemoryLedger::new();
        let calls = Arc::new(AtomicU32::new(0));

        let run = |calls: Arc<AtomicU32>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, crate::error::BidflowError>(serde_json::json!({"ok": true}))
        };

        let key = "workflow:x:stage:analysis:invoke";
        let first = run_once(&ledger, key, Duration::from_secs(60), || run(calls.clone())).await.unwrap();
        let second = run_once(&ledger, key, Duration::from_secs(60), || run(calls.clone())).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_call_releases_lock_and_caches_nothing() {
        let ledger = MemoryLedger::new();
        let key = "workflow:x:stage:analysis:invoke";

        let result = run_once(&ledger, key, Duration::from_secs(60), || async {
            Err::<Value, _>(crate::error::BidflowError::transient("boom"))
        })
        .await;
        assert!(result.is_err());
        assert!(ledger.lookup_cached(key).await.unwrap().is_none());
        assert!(ledger.acquire(key, Duration::from_secs(60)).await.unwrap());
    }
}
