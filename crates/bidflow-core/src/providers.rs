// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! Provider trait definitions (re-exported from bidflow-providers).
//!
//! Only the LLM completion seam is used by the stage pipeline; embedding
//! and vector-search traits are not re-exported here since nothing in this
//! crate's scope calls them (spec.md §1 scopes this core to document
//! processing, not retrieval).

pub use bidflow_providers::{CompletionRequest, CompletionResponse, LLMProvider, ProviderError};
