//! Convenience re-exports for common `toolcall-rs` types.
//!
//! ```ignore
//! use toolcall_rs::prelude::*;
//! ```
//!
//! Covers building a [`ToolSet`], configuring and running the
//! [`ExecutionLoop`] or [`Orchestrator`], and observing events. Strategy
//! internals and compression rules stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::error::{ProviderError, ToolError};
pub use crate::{
    Arguments, ConversationMessage, GatheredItem, ToolCall, ToolDefinition, ToolResult,
    json_schema_for,
};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    CompositeEventHandler, DesignInput, Designer, EmptyResultRetry, EngineConfig, EventHandler,
    ExecutionLoop, FnEventHandler, LoggingHandler, LoopEvent, LoopOutcome, LoopRequest,
    LoopStatus, NoopHandler, Orchestrator, OrchestratorResponse, Plan, Planner,
};

// ── Model provider ──────────────────────────────────────────────────
pub use crate::api::{CompletionRequest, ModelProvider, ModelResponse};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{
    FnTool, GeoPoint, NameMapping, SessionContext, SlotBinding, Tool, ToolBackend, ToolFuture,
    ToolSet,
};
