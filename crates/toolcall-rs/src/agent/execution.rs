//! Per-call mechanics of one loop turn.
//!
//! [`execute_tool_calls`] is called by [`super::engine::ExecutionLoop::run()`]
//! with the calls of a single turn. Calls run sequentially, in emission
//! order: resolve the name, enrich the arguments, execute, classify the
//! outcome, then append a history-budget copy to the conversation and a
//! UI-budget copy to the gathered data.

use super::config::EngineConfig;
use super::events::{EventHandler, LoopEvent};
use crate::context::{ContextAccumulator, ResultCompressor};
use crate::context::compress::find_list;
use crate::error::ToolError;
use crate::tools::core::ToolBackend;
use crate::tools::enrich::{ArgumentEnricher, SessionContext};
use crate::tools::names::NameMapping;
use crate::tools::reflection::format_tool_failure;
use crate::{Arguments, ConversationMessage, GatheredItem, ToolCall, ToolDefinition, ToolResult};
use serde_json::Value;
use tracing::{debug, info};

// ── Per-request state ─────────────────────────────────────────────

/// Read-only collaborators shared by every call in a request.
pub(crate) struct TurnContext<'a> {
    pub backend: &'a dyn ToolBackend,
    pub config: &'a EngineConfig,
    pub enricher: &'a ArgumentEnricher,
    pub compressor: &'a ResultCompressor,
    pub names: &'a NameMapping,
    /// Definitions under their original names.
    pub catalog: &'a [ToolDefinition],
    /// Sanitized names of the active tools, listed in unknown-tool feedback.
    pub active_names: &'a [String],
    pub user_message: &'a str,
    pub session: &'a SessionContext,
    pub events: &'a dyn EventHandler,
}

/// Mutable state owned by one request.
pub(crate) struct RequestState {
    pub messages: Vec<ConversationMessage>,
    pub gathered: Vec<GatheredItem>,
    pub accumulator: ContextAccumulator,
}

impl RequestState {
    pub fn new(user_message: &str) -> Self {
        Self {
            messages: vec![ConversationMessage::user(user_message)],
            gathered: Vec::new(),
            accumulator: ContextAccumulator::new(),
        }
    }
}

// ── Tool execution ────────────────────────────────────────────────

/// Execute one turn's calls and record their results.
pub(crate) async fn execute_tool_calls(
    ctx: &TurnContext<'_>,
    state: &mut RequestState,
    calls: &[ToolCall],
) {
    for call in calls {
        let original = ctx.names.resolve(&call.name);
        let args = ctx.enricher.enrich_call(
            &original,
            call.args.clone(),
            ctx.user_message,
            ctx.catalog,
            ctx.session,
            &state.accumulator,
        );

        ctx.events.on_event(&LoopEvent::ToolExecuting {
            name: &original,
            args: &args,
        });
        let outcome = ctx.backend.execute(&original, args.clone()).await;

        let (result, unknown) = match outcome {
            Err(e) if e.is_not_found() => (unknown_tool_result(ctx, &call.name), true),
            Err(e) => (failure_result(ctx, &original, &args, &e), false),
            Ok(r) if reports_unknown_tool(&r, &original, &call.name) => {
                (unknown_tool_result(ctx, &call.name), true)
            }
            Ok(r) if !r.is_error && is_empty_result(&r, ctx.config.empty_result_min_chars) => {
                (handle_empty_result(ctx, &original, &args, r).await, false)
            }
            Ok(r) => {
                if r.is_error {
                    ctx.events.on_event(&LoopEvent::ToolFailed {
                        name: &original,
                        error: &r.joined_text(),
                    });
                }
                (r, false)
            }
        };

        if !result.is_error {
            let slots = state.accumulator.absorb(&result, &ctx.config.extraction);
            if !slots.is_empty() {
                debug!("[context] {original}: stored {}", slots.join(", "));
            }
        }

        let history = ctx
            .compressor
            .compress(&result, ctx.config.history_item_limit)
            .joined_text();
        ctx.events.on_event(&LoopEvent::ToolResult {
            name: &original,
            call_id: &call.id,
            is_error: result.is_error,
            content: &history,
        });
        state
            .messages
            .push(ConversationMessage::tool_result(&call.id, &call.name, history));

        // Corrective feedback is for the model only.
        if !unknown {
            state.gathered.push(GatheredItem {
                tool: original,
                result: ctx.compressor.compress(&result, ctx.config.ui_item_limit),
            });
        }
    }
}

// ── Classification ────────────────────────────────────────────────

fn unknown_tool_result(ctx: &TurnContext<'_>, requested: &str) -> ToolResult {
    ctx.events.on_event(&LoopEvent::UnknownTool { name: requested });
    let text = ctx
        .config
        .messages
        .unknown_tool
        .replace("{tool}", requested)
        .replace("{tools}", &ctx.active_names.join(", "));
    ToolResult::error(text)
}

fn failure_result(
    ctx: &TurnContext<'_>,
    original: &str,
    args: &Arguments,
    error: &ToolError,
) -> ToolResult {
    let message = error.to_string();
    ctx.events.on_event(&LoopEvent::ToolFailed {
        name: original,
        error: &message,
    });
    ToolResult::error(format_tool_failure(original, args, &message))
}

/// Whether an error result says the tool itself does not exist.
fn reports_unknown_tool(result: &ToolResult, original: &str, sanitized: &str) -> bool {
    if !result.is_error {
        return false;
    }
    let text = result.joined_text().to_lowercase();
    let names_tool = text.contains(&original.to_lowercase()) || text.contains(&sanitized.to_lowercase());
    text.contains("unknown tool")
        || (names_tool
            && text.contains("tool")
            && (text.contains("not found") || text.contains("does not exist")))
}

/// Whether a successful result carries no usable data.
pub(crate) fn is_empty_result(result: &ToolResult, min_chars: usize) -> bool {
    let text = result.joined_text();
    let trimmed = text.trim();
    if trimmed.chars().count() < min_chars {
        return true;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Null) => true,
        Ok(Value::Array(items)) => items.is_empty(),
        Ok(Value::Object(obj)) => {
            obj.is_empty() || find_list(&Value::Object(obj)).is_some_and(|l| l.is_empty())
        }
        _ => false,
    }
}

/// Apply the configured broadening rule once, else append the hint.
async fn handle_empty_result(
    ctx: &TurnContext<'_>,
    original: &str,
    args: &Arguments,
    mut result: ToolResult,
) -> ToolResult {
    let min_chars = ctx.config.empty_result_min_chars;
    let mut retried = false;

    if let Some(rule) = ctx.config.empty_result_retry(original) {
        let mut broadened = args.clone();
        for field in &rule.drop_fields {
            broadened.remove(field);
        }
        for (field, value) in &rule.set_fields {
            broadened.insert(field.clone(), value.clone());
        }
        if &broadened != args {
            retried = true;
            info!("Empty result from {original}; retrying with broadened arguments");
            ctx.events.on_event(&LoopEvent::ToolExecuting {
                name: original,
                args: &broadened,
            });
            match ctx.backend.execute(original, broadened).await {
                Ok(mut second) if !second.is_error && !is_empty_result(&second, min_chars) => {
                    if let Some(note) = &rule.note {
                        second.push_text(note.clone());
                    }
                    ctx.events.on_event(&LoopEvent::EmptyResult {
                        name: original,
                        retried,
                    });
                    return second;
                }
                Ok(_) => debug!("[retry] {original}: broadened call still empty"),
                Err(e) => debug!("[retry] {original}: broadened call failed: {e}"),
            }
        }
    }

    ctx.events.on_event(&LoopEvent::EmptyResult {
        name: original,
        retried,
    });
    result.push_text(ctx.config.messages.empty_result_hint.clone());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::config::EmptyResultRetry;
    use crate::agent::events::NoopHandler;
    use crate::tools::core::{FnTool, ToolSet};
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Deserialize)]
    struct SearchArgs {
        #[serde(default)]
        query: String,
        #[serde(default)]
        category: Option<String>,
    }

    fn search_def() -> ToolDefinition {
        ToolDefinition::new(
            "api.v1/search",
            "Search",
            json!({
                "type": "object",
                "properties": {"query": {"type": "string"}, "category": {"type": "string"}}
            }),
        )
    }

    /// Returns items only when no category filter is given.
    fn search_tool(calls: Arc<AtomicUsize>) -> FnTool {
        FnTool::new(search_def(), move |args: SearchArgs| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if args.category.is_some() {
                    Ok(ToolResult::text(r#"{"items": []}"#))
                } else {
                    Ok(ToolResult::text(
                        json!({"items": [{"id": 1, "name": args.query}]}).to_string(),
                    ))
                }
            }
        })
    }

    fn fail_tool() -> FnTool {
        FnTool::new(
            ToolDefinition::new("explode", "Always fails", json!({"type": "object", "properties": {}})),
            |_: Value| async { Err(ToolError::failed("explode", "HTTP 404 resource missing")) },
        )
    }

    struct Fixture {
        tools: ToolSet,
        config: EngineConfig,
        enricher: ArgumentEnricher,
        compressor: ResultCompressor,
        names: NameMapping,
        catalog: Vec<ToolDefinition>,
        active: Vec<String>,
        session: SessionContext,
    }

    impl Fixture {
        fn new(config: EngineConfig, calls: Arc<AtomicUsize>) -> Self {
            let tools = ToolSet::new().with(search_tool(calls)).with(fail_tool());
            let catalog = tools.definitions();
            let names = NameMapping::new();
            let active = catalog.iter().map(|d| names.sanitize(&d.name)).collect();
            Self {
                tools,
                enricher: ArgumentEnricher::new(config.enrichment.clone()),
                compressor: ResultCompressor::new(config.compression.clone()),
                config,
                names,
                catalog,
                active,
                session: SessionContext::default(),
            }
        }

        fn ctx(&self) -> TurnContext<'_> {
            TurnContext {
                backend: &self.tools,
                config: &self.config,
                enricher: &self.enricher,
                compressor: &self.compressor,
                names: &self.names,
                catalog: &self.catalog,
                active_names: &self.active,
                user_message: "find coffee",
                session: &self.session,
                events: &NoopHandler,
            }
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall::new(name, args.as_object().cloned().unwrap_or_default()).with_id("call_1_0")
    }

    #[tokio::test]
    async fn resolves_sanitized_names_and_records_results() {
        let fixture = Fixture::new(EngineConfig::default(), Arc::default());
        let mut state = RequestState::new("find coffee");
        let sanitized = fixture.names.sanitize("api.v1/search");
        execute_tool_calls(
            &fixture.ctx(),
            &mut state,
            &[call(&sanitized, json!({"query": "coffee"}))],
        )
        .await;

        let last = state.messages.last().unwrap();
        assert_eq!(last.name.as_deref(), Some(sanitized.as_str()));
        assert_eq!(last.tool_call_id.as_deref(), Some("call_1_0"));
        assert_eq!(state.gathered[0].tool, "api.v1/search");
        assert_eq!(state.accumulator.get("id"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn unknown_tool_lists_valid_names() {
        let fixture = Fixture::new(EngineConfig::default(), Arc::default());
        let mut state = RequestState::new("x");
        execute_tool_calls(&fixture.ctx(), &mut state, &[call("weather", json!({}))]).await;

        let feedback = &state.messages.last().unwrap().content;
        assert!(feedback.contains("Tool 'weather' does not exist"), "{feedback}");
        for name in &fixture.active {
            assert!(feedback.contains(name.as_str()));
        }
        assert!(state.gathered.is_empty());
    }

    #[tokio::test]
    async fn tool_failure_becomes_reflection_text() {
        let fixture = Fixture::new(EngineConfig::default(), Arc::default());
        let mut state = RequestState::new("x");
        execute_tool_calls(&fixture.ctx(), &mut state, &[call("explode", json!({}))]).await;

        let text = &state.messages.last().unwrap().content;
        assert!(text.contains("HTTP 404"));
        assert!(text.contains("Possible causes and recovery:"));
        assert!(state.gathered[0].result.is_error);
        assert!(state.accumulator.is_empty());
    }

    #[tokio::test]
    async fn empty_result_is_retried_once_with_broadened_args() {
        let config = EngineConfig::default().with_empty_result_retry(
            EmptyResultRetry::new("api.v1/search")
                .drop_field("category")
                .with_note("Category filter removed."),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let fixture = Fixture::new(config, calls.clone());
        let mut state = RequestState::new("x");
        let sanitized = fixture.names.sanitize("api.v1/search");
        execute_tool_calls(
            &fixture.ctx(),
            &mut state,
            &[call(&sanitized, json!({"query": "tea", "category": "shops"}))],
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let text = state.gathered[0].result.joined_text();
        assert!(text.contains("\"tea\""));
        assert!(text.ends_with("Category filter removed."));
    }

    #[tokio::test]
    async fn empty_result_without_rule_gets_hint() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fixture = Fixture::new(EngineConfig::default(), calls.clone());
        let mut state = RequestState::new("x");
        let sanitized = fixture.names.sanitize("api.v1/search");
        execute_tool_calls(
            &fixture.ctx(),
            &mut state,
            &[call(&sanitized, json!({"query": "tea", "category": "shops"}))],
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let text = &state.messages.last().unwrap().content;
        assert!(text.contains("alternate forms"), "{text}");
    }

    #[test]
    fn empty_result_shapes() {
        for text in ["", "  ", "[]", "{}", "null", r#"{"data": []}"#, r#"{"results":[]}"#] {
            assert!(is_empty_result(&ToolResult::text(text), 4), "{text:?}");
        }
        for text in [r#"[{"id": 1}]"#, r#"{"total": 0, "name": "x"}"#, "Some prose answer"] {
            assert!(!is_empty_result(&ToolResult::text(text), 4), "{text:?}");
        }
    }

    #[test]
    fn unknown_tool_detection_from_error_text() {
        assert!(reports_unknown_tool(
            &ToolResult::error("Unknown tool: foo"),
            "foo",
            "foo"
        ));
        assert!(reports_unknown_tool(
            &ToolResult::error("tool api/search not found"),
            "api/search",
            "api_search"
        ));
        assert!(!reports_unknown_tool(
            &ToolResult::error("record 12 not found"),
            "get_record",
            "get_record"
        ));
        assert!(!reports_unknown_tool(&ToolResult::text("Unknown tool"), "x", "x"));
    }
}
