//! Model-side plumbing between the
//! [`ExecutionLoop`](crate::agent::engine::ExecutionLoop) and whatever
//! actually generates completions:
//!
//! - [`provider`]: the [`ModelProvider`] port, request/response types, and a
//!   [`ScriptedProvider`] for tests and offline runs.
//! - [`retry`]: rate-limit / transient / permanent error classification and
//!   exponential backoff for transient failures.

pub mod provider;
pub mod retry;

pub use provider::{CompletionRequest, ModelProvider, ModelResponse, ScriptedProvider};
pub use retry::RetryConfig;
