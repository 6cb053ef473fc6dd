//! Events, handlers, and outcomes for the [`ExecutionLoop`](super::engine::ExecutionLoop).
//!
//! The loop reports its progress through [`LoopEvent`] variants, from turn
//! start through recovery and tool execution to completion. Callers
//! implement [`EventHandler`] to observe them for logging, metrics, or UI
//! progress.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use crate::{Arguments, GatheredItem, ToolCall};
use serde::Serialize;
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted by the execution loop during a run.
#[derive(Debug)]
pub enum LoopEvent<'a> {
    /// A new turn is starting.
    TurnStart { turn: u32, max_turns: u32 },
    /// The model returned text (may be alongside tool calls).
    Text(&'a str),
    /// Tool calls were recovered from plain text.
    CallsRecovered {
        turn: u32,
        strategy: &'a str,
        calls: &'a [ToolCall],
    },
    /// A tool is about to be executed (original name, enriched arguments).
    ToolExecuting { name: &'a str, args: &'a Arguments },
    /// A tool finished; `content` is the history-budget copy.
    ToolResult {
        name: &'a str,
        call_id: &'a str,
        is_error: bool,
        content: &'a str,
    },
    /// The model asked for a tool that does not exist.
    UnknownTool { name: &'a str },
    /// A successful result looked empty.
    EmptyResult { name: &'a str, retried: bool },
    /// A tool returned an error.
    ToolFailed { name: &'a str, error: &'a str },
    /// The provider answered with a different model than before.
    ModelSwitched { model: &'a str },
    /// The loop finished (a turn produced no tool calls).
    Finished { turns: u32 },
    /// The loop hit the turn limit.
    TurnLimitReached { max_turns: u32 },
    /// The model call failed and the loop is ending with a degraded answer.
    ProviderFailed { error: &'a str, rate_limited: bool },
}

/// Handler for loop events.
///
/// ```ignore
/// struct Progress;
///
/// impl EventHandler for Progress {
///     fn on_event(&self, event: &LoopEvent<'_>) {
///         if let LoopEvent::ToolExecuting { name, .. } = event {
///             println!("running {name}...");
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called for each event. The default implementation ignores it.
    fn on_event(&self, event: &LoopEvent<'_>) {
        let _ = event;
    }
}

/// A no-op event handler.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let LoopEvent::Text(text) = event {
///         println!("{text}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&LoopEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&LoopEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&LoopEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &LoopEvent<'_>) {
        (self.0)(event)
    }
}

/// An event handler that delegates to multiple inner handlers, in
/// registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with(my_metrics_handler);
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler to the chain.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &LoopEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// An event handler that logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &LoopEvent<'_>) {
        match event {
            LoopEvent::TurnStart { turn, max_turns } => {
                info!("[turn {turn}/{max_turns}]");
            }
            LoopEvent::Text(text) => {
                let preview: String = text.chars().take(200).collect();
                debug!(
                    "Model text: {preview}{}",
                    if text.chars().count() > 200 { "..." } else { "" }
                );
            }
            LoopEvent::CallsRecovered {
                turn,
                strategy,
                calls,
            } => {
                warn!(
                    "Recovered {} tool call(s) from text in turn {turn} ({strategy})",
                    calls.len()
                );
            }
            LoopEvent::ToolExecuting { name, .. } => {
                debug!("Executing tool: {name}");
            }
            LoopEvent::ToolResult {
                name,
                is_error,
                content,
                ..
            } => {
                debug!(
                    "Tool {name} result: {} bytes{}",
                    content.len(),
                    if *is_error { " (error)" } else { "" }
                );
            }
            LoopEvent::UnknownTool { name } => {
                warn!("Model requested unknown tool '{name}'");
            }
            LoopEvent::EmptyResult { name, retried } => {
                info!(
                    "Tool {name} returned an empty result{}",
                    if *retried { "; retried with broadened arguments" } else { "" }
                );
            }
            LoopEvent::ToolFailed { name, error } => {
                warn!("Tool {name} failed: {error}");
            }
            LoopEvent::ModelSwitched { model } => {
                debug!("Continuing with model {model}");
            }
            LoopEvent::Finished { turns } => {
                info!("Loop finished after {turns} turn(s)");
            }
            LoopEvent::TurnLimitReached { max_turns } => {
                info!("Loop hit turn limit ({max_turns})");
            }
            LoopEvent::ProviderFailed {
                error,
                rate_limited,
            } => {
                warn!(
                    "Model call failed{}: {error}",
                    if *rate_limited { " (rate limited)" } else { "" }
                );
            }
        }
    }
}

// ── Outcome ────────────────────────────────────────────────────────

/// How a loop run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    /// A turn produced no tool calls.
    Completed,
    /// `max_turns` was reached while the model still requested tools.
    TurnLimit,
    /// The provider reported rate limiting or quota exhaustion.
    RateLimited,
    /// Any other provider failure.
    ProviderFailed,
}

/// The result of a complete [`ExecutionLoop::run()`](super::engine::ExecutionLoop::run).
#[derive(Debug, Clone, Serialize)]
pub struct LoopOutcome {
    /// User-facing answer text. Never carries recovered call syntax.
    pub text: String,
    /// Every tool result, UI-budget compressed, in execution order.
    pub gathered: Vec<GatheredItem>,
    /// The model that answered last, if the provider reported one.
    pub used_model: Option<String>,
    /// Number of model turns executed.
    pub turns: u32,
    pub status: LoopStatus,
    /// Tool calls synthesized from plain text across all turns.
    pub recovered_calls: usize,
}

impl LoopOutcome {
    /// Whether the run ended without a provider failure.
    pub fn is_success(&self) -> bool {
        matches!(self.status, LoopStatus::Completed | LoopStatus::TurnLimit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn composite_dispatches_to_all_handlers() {
        static FIRST: AtomicUsize = AtomicUsize::new(0);
        static SECOND: AtomicUsize = AtomicUsize::new(0);
        let handler = CompositeEventHandler::new()
            .with(FnEventHandler::new(|_| {
                FIRST.fetch_add(1, Ordering::SeqCst);
            }))
            .with_if(false, NoopHandler)
            .with(FnEventHandler::new(|_| {
                SECOND.fetch_add(1, Ordering::SeqCst);
            }));
        handler.on_event(&LoopEvent::Finished { turns: 1 });
        handler.on_event(&LoopEvent::Text("hi"));
        assert_eq!(FIRST.load(Ordering::SeqCst), 2);
        assert_eq!(SECOND.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fn_handler_sees_event_payload() {
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = FnEventHandler::new(move |event| {
            if let LoopEvent::UnknownTool { name } = event {
                sink.lock().unwrap().push(name.to_string());
            }
        });
        handler.on_event(&LoopEvent::UnknownTool { name: "ghost" });
        handler.on_event(&LoopEvent::TurnStart {
            turn: 1,
            max_turns: 5,
        });
        assert_eq!(*seen.lock().unwrap(), vec!["ghost".to_string()]);
    }

    #[test]
    fn logging_handler_accepts_every_event() {
        let calls = vec![ToolCall::new("search", Arguments::new())];
        let args = Arguments::new();
        for event in [
            LoopEvent::TurnStart {
                turn: 1,
                max_turns: 2,
            },
            LoopEvent::Text("text"),
            LoopEvent::CallsRecovered {
                turn: 1,
                strategy: "bare",
                calls: &calls,
            },
            LoopEvent::ToolExecuting {
                name: "search",
                args: &args,
            },
            LoopEvent::ToolResult {
                name: "search",
                call_id: "c1",
                is_error: false,
                content: "[]",
            },
            LoopEvent::UnknownTool { name: "x" },
            LoopEvent::EmptyResult {
                name: "search",
                retried: true,
            },
            LoopEvent::ToolFailed {
                name: "search",
                error: "boom",
            },
            LoopEvent::ModelSwitched { model: "m" },
            LoopEvent::Finished { turns: 1 },
            LoopEvent::TurnLimitReached { max_turns: 2 },
            LoopEvent::ProviderFailed {
                error: "429",
                rate_limited: true,
            },
        ] {
            LoggingHandler.on_event(&event);
        }
    }

    #[test]
    fn outcome_success() {
        let outcome = LoopOutcome {
            text: String::new(),
            gathered: vec![],
            used_model: None,
            turns: 1,
            status: LoopStatus::RateLimited,
            recovered_calls: 0,
        };
        assert!(!outcome.is_success());
    }
}
