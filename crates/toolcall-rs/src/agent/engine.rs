//! The bounded multi-turn execution loop.
//!
//! Each turn sends the conversation, the active tools (sanitized and
//! normalized) and a system instruction to the [`ModelProvider`]. Native
//! calls are taken as-is; when a turn has none but does have text,
//! [`CallRecovery`] looks for calls written out as text. Calls are then
//! executed through [`super::execution`]. The loop ends when a turn yields no
//! calls, when `max_turns` is reached, or when the provider fails.

use super::config::EngineConfig;
use super::events::{EventHandler, LoopEvent, LoopOutcome, LoopStatus};
use super::execution::{RequestState, TurnContext, execute_tool_calls};
use super::prompt::build_system_instruction;
use super::recovery::CallRecovery;
use crate::api::provider::{CompletionRequest, ModelProvider};
use crate::api::retry::retry_provider_call;
use crate::context::ResultCompressor;
use crate::error::ProviderError;
use crate::tools::core::ToolBackend;
use crate::tools::enrich::{ArgumentEnricher, SessionContext};
use crate::tools::names::NameMapping;
use crate::tools::schema::normalize_parameters;
use crate::{ToolCall, ToolDefinition};
use tracing::{debug, info};

// ── Request ───────────────────────────────────────────────────────

/// One user request to run through the loop.
#[derive(Debug, Clone, Default)]
pub struct LoopRequest {
    pub user_message: String,
    /// Tools to expose, under their original names. `None` exposes the
    /// backend's whole catalog.
    pub tools: Option<Vec<ToolDefinition>>,
    pub session: SessionContext,
    /// Preferred model for the first turn; overrides the configured default.
    pub model: Option<String>,
    /// Extra text appended to the system instruction.
    pub instructions: Option<String>,
    /// The user's own words when `user_message` carries added context (a
    /// folded plan). Argument enrichment reads locality from this.
    pub original_message: Option<String>,
}

impl LoopRequest {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_session(mut self, session: SessionContext) -> Self {
        self.session = session;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_original_message(mut self, message: impl Into<String>) -> Self {
        self.original_message = Some(message.into());
        self
    }

    /// Text that argument enrichment may mine for localities.
    pub fn enrichment_text(&self) -> &str {
        self.original_message.as_deref().unwrap_or(&self.user_message)
    }
}

// ── ExecutionLoop ─────────────────────────────────────────────────

/// The execution loop.
///
/// ```ignore
/// let provider = MyProvider::new(api_key);
/// let tools = ToolSet::new().with(search_tool());
/// let names = NameMapping::new();
///
/// let outcome = ExecutionLoop::new(&provider, &tools, EngineConfig::default())
///     .run(LoopRequest::new("Cafes near the river"), &names)
///     .await;
/// println!("{}", outcome.text);
/// ```
///
/// `ExecutionLoop<'a>` borrows the provider, backend, and event handler; bind
/// them to `let`s before building the loop.
pub struct ExecutionLoop<'a> {
    provider: &'a dyn ModelProvider,
    backend: &'a dyn ToolBackend,
    config: EngineConfig,
    event_handler: &'a dyn EventHandler,
    recovery: CallRecovery,
    enricher: ArgumentEnricher,
    compressor: ResultCompressor,
}

impl<'a> ExecutionLoop<'a> {
    pub fn new(
        provider: &'a dyn ModelProvider,
        backend: &'a dyn ToolBackend,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            backend,
            recovery: CallRecovery::new(config.recovery.clone()),
            enricher: ArgumentEnricher::new(config.enrichment.clone()),
            compressor: ResultCompressor::new(config.compression.clone()),
            config,
            event_handler: &super::events::NoopHandler,
        }
    }

    /// Attach an event handler.
    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    /// Replace the recovery chain (for example to append a strategy).
    pub fn with_recovery(mut self, recovery: CallRecovery) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one request to completion.
    ///
    /// `names` receives every sanitized name exposed to the model, so calls
    /// resolve back to the original tools. Provider failures end the run
    /// with a degraded answer; they are never returned as errors.
    pub async fn run(&self, request: LoopRequest, names: &NameMapping) -> LoopOutcome {
        let catalog = request
            .tools
            .clone()
            .unwrap_or_else(|| self.backend.definitions());
        let active: Vec<ToolDefinition> = catalog
            .iter()
            .map(|d| ToolDefinition {
                name: names.sanitize(&d.name),
                description: d.description.clone(),
                parameters: normalize_parameters(&d.parameters),
            })
            .collect();
        let active_names: Vec<String> = active.iter().map(|d| d.name.clone()).collect();
        let known: Vec<&str> = active_names.iter().map(String::as_str).collect();
        let system_instruction = build_system_instruction(&active, request.instructions.as_deref());
        let max_turns = self.config.max_turns.max(1);

        info!(
            "Execution loop started: {} tool(s), max {max_turns} turn(s)",
            active.len()
        );

        let ctx = TurnContext {
            backend: self.backend,
            config: &self.config,
            enricher: &self.enricher,
            compressor: &self.compressor,
            names,
            catalog: &catalog,
            active_names: &active_names,
            user_message: request.enrichment_text(),
            session: &request.session,
            events: self.event_handler,
        };
        let mut state = RequestState::new(&request.user_message);
        let mut model = request.model.clone().or_else(|| self.config.default_model.clone());
        let mut used_model: Option<String> = None;
        let mut last_text = String::new();
        let mut recovered_calls = 0usize;

        for turn in 1..=max_turns {
            self.event_handler
                .on_event(&LoopEvent::TurnStart { turn, max_turns });

            let completion = CompletionRequest {
                messages: state.messages.clone(),
                tools: active.clone(),
                system_instruction: system_instruction.clone(),
                model: model.clone(),
            };
            let response = match retry_provider_call(&self.config.retry, || {
                self.provider.complete(completion.clone())
            })
            .await
            {
                Ok(response) => response,
                Err(e) => {
                    return self.degraded(e, state, last_text, used_model, turn, recovered_calls);
                }
            };

            // Pin the model that answered.
            if let Some(answered) = &response.used_model {
                if model.as_ref() != Some(answered) {
                    self.event_handler
                        .on_event(&LoopEvent::ModelSwitched { model: answered });
                    model = Some(answered.clone());
                }
                used_model = Some(answered.clone());
            }

            let (mut calls, text) = if !response.function_calls.is_empty() {
                (response.function_calls, response.text)
            } else if !response.text.trim().is_empty() {
                let recovered = self.recovery.recover(&response.text, &known, &active);
                match recovered.strategy {
                    Some(strategy) => {
                        recovered_calls += recovered.calls.len();
                        self.event_handler.on_event(&LoopEvent::CallsRecovered {
                            turn,
                            strategy,
                            calls: &recovered.calls,
                        });
                        (recovered.calls, recovered.cleaned_text)
                    }
                    None => (Vec::new(), response.text),
                }
            } else {
                (Vec::new(), response.text)
            };

            if !text.trim().is_empty() {
                self.event_handler.on_event(&LoopEvent::Text(&text));
                last_text = text.clone();
            }

            if calls.is_empty() {
                self.event_handler
                    .on_event(&LoopEvent::Finished { turns: turn });
                let text = if text.trim().is_empty() { last_text } else { text };
                return LoopOutcome {
                    text,
                    gathered: state.gathered,
                    used_model,
                    turns: turn,
                    status: LoopStatus::Completed,
                    recovered_calls,
                };
            }

            assign_call_ids(&mut calls, turn);
            debug!("Turn {turn}: {} tool call(s)", calls.len());
            state
                .messages
                .push(crate::ConversationMessage::model_tool_calls(text, calls.clone()));
            execute_tool_calls(&ctx, &mut state, &calls).await;
        }

        self.event_handler
            .on_event(&LoopEvent::TurnLimitReached { max_turns });
        let text = if last_text.trim().is_empty() {
            self.config.messages.turn_limit_fallback.clone()
        } else {
            last_text
        };
        LoopOutcome {
            text,
            gathered: state.gathered,
            used_model,
            turns: max_turns,
            status: LoopStatus::TurnLimit,
            recovered_calls,
        }
    }

    /// Natural-language answer for a provider failure.
    fn degraded(
        &self,
        error: ProviderError,
        state: RequestState,
        last_text: String,
        used_model: Option<String>,
        turn: u32,
        recovered_calls: usize,
    ) -> LoopOutcome {
        let rate_limited = error.is_rate_limited();
        self.event_handler.on_event(&LoopEvent::ProviderFailed {
            error: error.reason(),
            rate_limited,
        });
        let messages = &self.config.messages;
        let (notice, status) = if rate_limited {
            (messages.rate_limited.clone(), LoopStatus::RateLimited)
        } else {
            (
                format!("{} {}", messages.provider_failure, error.reason()),
                LoopStatus::ProviderFailed,
            )
        };
        let text = if last_text.trim().is_empty() {
            notice
        } else {
            format!("{last_text}\n\n{notice}")
        };
        LoopOutcome {
            text,
            gathered: state.gathered,
            used_model,
            turns: turn,
            status,
            recovered_calls,
        }
    }
}

fn assign_call_ids(calls: &mut [ToolCall], turn: u32) {
    for (i, call) in calls.iter_mut().enumerate() {
        if call.id.is_empty() {
            call.id = format!("call_{turn}_{i}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::FnEventHandler;
    use crate::api::provider::{ModelResponse, ScriptedProvider};
    use crate::tools::core::{FnTool, ToolSet};
    use crate::{Arguments, Role, ToolResult};
    use serde_json::{Value, json};
    use std::sync::Mutex;

    fn echo_tools() -> ToolSet {
        ToolSet::new()
            .with(FnTool::new(
                ToolDefinition::new(
                    "catalog/list-items",
                    "List items",
                    json!({
                        "$schema": "http://json-schema.org/draft-07/schema#",
                        "type": "object",
                        "properties": {"query": {"type": "string"}}
                    }),
                ),
                |args: Value| async move {
                    Ok(ToolResult::text(json!({"items": [{"id": 7, "echo": args}]}).to_string()))
                },
            ))
            .with(FnTool::new(
                ToolDefinition::new("foo", "Foo", json!({"type": "object", "properties": {}})),
                |args: Value| async move { Ok(ToolResult::text(format!("foo got {args}"))) },
            ))
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall::new(name, args.as_object().cloned().unwrap_or_default())
    }

    #[tokio::test]
    async fn native_call_then_answer() {
        let provider = ScriptedProvider::from_responses(vec![
            ModelResponse::calls(vec![call("catalog_list_items", json!({"query": "lamps"}))])
                .with_model("model-a"),
            ModelResponse::text("Found one lamp.").with_model("model-a"),
        ]);
        let tools = echo_tools();
        let names = NameMapping::new();
        let outcome = ExecutionLoop::new(&provider, &tools, EngineConfig::default())
            .run(LoopRequest::new("lamps please"), &names)
            .await;

        assert_eq!(outcome.status, LoopStatus::Completed);
        assert_eq!(outcome.text, "Found one lamp.");
        assert_eq!(outcome.turns, 2);
        assert_eq!(outcome.used_model.as_deref(), Some("model-a"));
        assert_eq!(outcome.gathered.len(), 1);
        assert_eq!(outcome.gathered[0].tool, "catalog/list-items");

        let requests = provider.requests();
        assert_eq!(requests[0].model, None);
        assert_eq!(requests[1].model.as_deref(), Some("model-a"));
        assert!(requests[0].tools[0].parameters.get("$schema").is_none());
        assert!(requests[0].system_instruction.contains("catalog_list_items"));

        let history = &requests[1].messages;
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].role, Role::Model);
        assert_eq!(history[1].tool_calls.as_ref().unwrap()[0].id, "call_1_0");
        assert_eq!(history[2].role, Role::Tool);
        assert_eq!(history[2].tool_call_id.as_deref(), Some("call_1_0"));
    }

    #[tokio::test]
    async fn always_calling_model_stops_at_max_turns() {
        for max_turns in [1, 3, 5] {
            let provider = ScriptedProvider::from_responses(vec![ModelResponse {
                text: "Still looking.".into(),
                function_calls: vec![call("foo", json!({}))],
                used_model: None,
            }]);
            let tools = echo_tools();
            let names = NameMapping::new();
            let outcome = ExecutionLoop::new(
                &provider,
                &tools,
                EngineConfig::default().with_max_turns(max_turns),
            )
            .run(LoopRequest::new("loop forever"), &names)
            .await;

            assert_eq!(outcome.turns, max_turns);
            assert_eq!(outcome.status, LoopStatus::TurnLimit);
            assert_eq!(outcome.text, "Still looking.");
            assert_eq!(provider.requests().len(), max_turns as usize);
            assert_eq!(outcome.gathered.len(), max_turns as usize);
        }
    }

    #[tokio::test]
    async fn turn_limit_without_text_uses_fallback() {
        let provider =
            ScriptedProvider::from_responses(vec![ModelResponse::calls(vec![call("foo", json!({}))])]);
        let tools = echo_tools();
        let config = EngineConfig::default().with_max_turns(2);
        let fallback = config.messages.turn_limit_fallback.clone();
        let outcome = ExecutionLoop::new(&provider, &tools, config)
            .run(LoopRequest::new("x"), &names_for_test())
            .await;
        assert_eq!(outcome.text, fallback);
    }

    fn names_for_test() -> NameMapping {
        NameMapping::new()
    }

    #[tokio::test]
    async fn recovers_call_from_text() {
        let provider = ScriptedProvider::from_responses(vec![
            ModelResponse::text(r#"Calling now: foo({"x":1})"#),
            ModelResponse::text("Done."),
        ]);
        let tools = echo_tools();
        let names = NameMapping::new();
        let recovered = Mutex::new(Vec::new());
        let handler = FnEventHandler::new(|event| {
            if let LoopEvent::CallsRecovered { calls, strategy, .. } = event {
                recovered
                    .lock()
                    .unwrap()
                    .push((strategy.to_string(), calls.to_vec()));
            }
        });
        let outcome = ExecutionLoop::new(&provider, &tools, EngineConfig::default())
            .with_event_handler(&handler)
            .run(LoopRequest::new("x"), &names)
            .await;

        assert_eq!(outcome.recovered_calls, 1);
        let recovered = recovered.lock().unwrap();
        assert_eq!(recovered[0].0, "bare_call");
        assert_eq!(recovered[0].1[0].name, "foo");
        let mut expected = Arguments::new();
        expected.insert("x".into(), json!(1));
        assert_eq!(recovered[0].1[0].args, expected);

        let history = &provider.requests()[1].messages;
        assert_eq!(history[1].content, "Calling now:");
        assert!(history[2].content.contains(r#"foo got {"x":1}"#));
        assert_eq!(outcome.text, "Done.");
    }

    #[tokio::test]
    async fn unknown_tool_is_fed_back() {
        let provider = ScriptedProvider::from_responses(vec![
            ModelResponse::calls(vec![call("weather", json!({"city": "Porto"}))]),
            ModelResponse::text("Sorry."),
        ]);
        let tools = echo_tools();
        let names = NameMapping::new();
        let outcome = ExecutionLoop::new(&provider, &tools, EngineConfig::default())
            .run(LoopRequest::new("weather?"), &names)
            .await;

        assert!(outcome.is_success());
        let feedback = &provider.requests()[1].messages[2].content;
        assert!(feedback.contains("catalog_list_items"), "{feedback}");
        assert!(feedback.contains("foo"));
    }

    #[tokio::test]
    async fn rate_limit_returns_degraded_answer() {
        let provider = ScriptedProvider::new(vec![
            Ok(ModelResponse::calls(vec![call("foo", json!({}))])),
            Err(ProviderError::RateLimited("HTTP 429".into())),
        ]);
        let tools = echo_tools();
        let config = EngineConfig::default();
        let expected = config.messages.rate_limited.clone();
        let outcome = ExecutionLoop::new(&provider, &tools, config)
            .run(LoopRequest::new("x"), &names_for_test())
            .await;

        assert_eq!(outcome.status, LoopStatus::RateLimited);
        assert_eq!(outcome.text, expected);
        assert_eq!(outcome.gathered.len(), 1);
        assert_eq!(outcome.turns, 2);
    }

    #[tokio::test]
    async fn other_provider_errors_carry_reason() {
        let provider =
            ScriptedProvider::new(vec![Err(ProviderError::Other("invalid api key".into()))]);
        let tools = echo_tools();
        let outcome = ExecutionLoop::new(&provider, &tools, EngineConfig::default())
            .run(LoopRequest::new("x"), &names_for_test())
            .await;
        assert_eq!(outcome.status, LoopStatus::ProviderFailed);
        assert!(outcome.text.ends_with("invalid api key"));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_when_configured() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Transient("HTTP 503".into())),
            Ok(ModelResponse::text("recovered")),
        ]);
        let tools = echo_tools();
        let mut config = EngineConfig::default().with_retries(1);
        config.retry.initial_delay = std::time::Duration::from_millis(1);
        config.retry.jitter = false;
        let outcome = ExecutionLoop::new(&provider, &tools, config)
            .run(LoopRequest::new("x"), &names_for_test())
            .await;
        assert_eq!(outcome.text, "recovered");
        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn request_tools_and_model_override_catalog() {
        let provider = ScriptedProvider::from_responses(vec![ModelResponse::text("ok")]);
        let tools = echo_tools();
        let only_foo = vec![tools.definitions().into_iter().find(|d| d.name == "foo").unwrap()];
        let outcome = ExecutionLoop::new(
            &provider,
            &tools,
            EngineConfig::default().with_default_model("default-model"),
        )
        .run(
            LoopRequest::new("x")
                .with_tools(only_foo)
                .with_model(Some("planner-model".into()))
                .with_instructions("Be brief."),
            &names_for_test(),
        )
        .await;
        assert_eq!(outcome.text, "ok");
        let request = &provider.requests()[0];
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.model.as_deref(), Some("planner-model"));
        assert!(request.system_instruction.ends_with("Be brief."));
    }

    #[test]
    fn call_ids_are_stable() {
        let mut calls = vec![
            call("a", json!({})),
            call("b", json!({})).with_id("native"),
            call("c", json!({})),
        ];
        assign_call_ids(&mut calls, 3);
        let ids: Vec<&str> = calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["call_3_0", "native", "call_3_2"]);
    }
}
