// Copyright (c) 2025 Bidflow Team
// SPDX-License-Identifier: Apache-2.0

//! LLM provider integrations for bidflow-core's Stage Runner.
//!
//! Scoped to chat/completion clients only: the bid workflow pipeline's
//! stages all drive an LLM completion call, never an embedding or vector
//! search, so those provider families aren't carried here.

pub mod anthropic;
pub mod openai;

pub mod traits;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAIProvider;
pub use traits::{CompletionRequest, CompletionResponse, LLMProvider, ProviderError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
