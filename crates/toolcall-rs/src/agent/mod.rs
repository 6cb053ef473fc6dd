//! Agent runtime: the [`ExecutionLoop`] and the modules around it.
//!
//! - [`engine::ExecutionLoop`]: the bounded multi-turn loop. Start here.
//! - [`orchestrator::Orchestrator`]: discovery, planning, loop, design for
//!   one user request.
//! - [`execution`]: per-call mechanics: resolve, enrich, execute, classify.
//! - [`recovery`]: tool calls written as plain text, recovered by an ordered
//!   chain of [`RecoveryStrategy`] implementations.
//! - [`config::EngineConfig`]: every knob, with JSON loading.
//! - [`events`]: [`EventHandler`] trait and [`LoopEvent`] enum for
//!   observing the loop.
//! - [`prompt`]: the system instruction sent with every turn.

pub mod config;
pub mod engine;
pub mod events;
pub(crate) mod execution;
pub mod orchestrator;
pub mod prompt;
pub mod recovery;

// Re-export commonly used items at the module level.
pub use config::{EmptyResultRetry, EngineConfig, LoopMessages};
pub use engine::{ExecutionLoop, LoopRequest};
pub use events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, LoopEvent, LoopOutcome,
    LoopStatus, NoopHandler,
};
pub use orchestrator::{
    DesignInput, Designer, Orchestrator, OrchestratorResponse, OrchestratorResult, Plan, Planner,
};
pub use prompt::SystemPromptBuilder;
pub use recovery::{CallRecovery, Recovered, RecoveryConfig, RecoveryStrategy, strip_call_syntax};
