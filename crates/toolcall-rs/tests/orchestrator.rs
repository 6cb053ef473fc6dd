//! End-to-end runs through the orchestrator with scripted collaborators.

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Mutex;
use toolcall_rs::api::ScriptedProvider;
use toolcall_rs::error::ProviderError;
use toolcall_rs::prelude::*;

// ── Fixtures ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ListArgs {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    limit: Option<u64>,
}

#[derive(Deserialize)]
struct DetailArgs {
    id: u64,
}

const LIST_TOOL: &str = "api_1111111111111111111111111111__dn_list_items";

fn tools(seen: &'static Mutex<Vec<String>>) -> ToolSet {
    ToolSet::new()
        .with(FnTool::new(
            ToolDefinition::new(
                LIST_TOOL,
                "List catalogue items",
                json!({
                    "$schema": "http://json-schema.org/draft-07/schema#",
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "limit": {"type": "integer"},
                        "filters": {"type": "array", "items": [{"type": "string"}, {"type": "integer"}]}
                    }
                }),
            ),
            move |args: ListArgs| async move {
                seen.lock().unwrap().push(format!("list:{:?}:{:?}", args.query, args.limit));
                let items: Vec<Value> = (1..=20)
                    .map(|i| json!({"id": i, "name": format!("item {i}"), "description": "long text"}))
                    .collect();
                Ok(ToolResult::text(json!({"items": items}).to_string()))
            },
        ))
        .with(FnTool::new(
            ToolDefinition::new(
                "dn/get-item",
                "Get one item",
                json!({
                    "type": "object",
                    "properties": {"id": {"type": "integer"}},
                    "required": ["id"]
                }),
            ),
            move |args: DetailArgs| async move {
                seen.lock().unwrap().push(format!("get:{}", args.id));
                Ok(ToolResult::text(json!({"id": args.id, "name": "item"}).to_string()))
            },
        ))
}

struct FixedPlanner(Plan);

impl Planner for FixedPlanner {
    fn plan<'a>(
        &'a self,
        _user_message: &'a str,
        _catalog: &'a [ToolDefinition],
    ) -> BoxFuture<'a, Result<Plan, String>> {
        let plan = self.0.clone();
        Box::pin(async move { Ok(plan) })
    }
}

struct FailingPlanner;

impl Planner for FailingPlanner {
    fn plan<'a>(
        &'a self,
        _user_message: &'a str,
        _catalog: &'a [ToolDefinition],
    ) -> BoxFuture<'a, Result<Plan, String>> {
        Box::pin(async { Err("planner offline".to_string()) })
    }
}

/// Echoes how much data it was given.
struct CountingDesigner;

impl Designer for CountingDesigner {
    fn design(&self, input: DesignInput) -> BoxFuture<'_, Result<Value, String>> {
        Box::pin(async move {
            Ok(json!({
                "text": input.text,
                "sources": input.gathered_data.len(),
                "model": input.used_model,
            }))
        })
    }
}

struct BrokenDesigner;

impl Designer for BrokenDesigner {
    fn design(&self, _input: DesignInput) -> BoxFuture<'_, Result<Value, String>> {
        Box::pin(async { Err("layout failed".to_string()) })
    }
}

fn call(name: &str, args: Value) -> ToolCall {
    ToolCall::new(name, args.as_object().cloned().unwrap_or_default())
}

fn leak_log() -> &'static Mutex<Vec<String>> {
    Box::leak(Box::new(Mutex::new(Vec::new())))
}

// ── Scenarios ─────────────────────────────────────────────────────

#[tokio::test]
async fn list_then_detail_then_design() {
    let seen = leak_log();
    let tools = tools(seen);
    let provider = ScriptedProvider::from_responses(vec![
        ModelResponse::calls(vec![call("dn_list_items", json!({"query": "lamps"}))])
            .with_model("model-a"),
        // Written as text; "3" is coerced to the declared integer.
        ModelResponse::text("Checking the first one: dn_get_item(id=\"3\")").with_model("model-a"),
        ModelResponse::text("Item 3 is a lamp.").with_model("model-a"),
    ]);
    let planner = FixedPlanner(Plan {
        tools: vec![],
        thought: "List, then fetch details.".into(),
        steps: vec![json!("list items"), json!("get item")],
        used_model: Some("planner-pick".into()),
    });
    let designer = CountingDesigner;
    let result = Orchestrator::new(&provider, &tools, EngineConfig::default())
        .with_planner(&planner)
        .with_designer(&designer)
        .handle("Show me lamps", SessionContext::default())
        .await;

    assert_eq!(
        result.response,
        OrchestratorResponse::Designed(json!({
            "text": "Item 3 is a lamp.",
            "sources": 2,
            "model": "model-a",
        }))
    );
    assert_eq!(result.outcome.turns, 3);
    assert_eq!(result.outcome.recovered_calls, 1);

    let log = seen.lock().unwrap().clone();
    assert_eq!(log[1], "get:3");

    let requests = provider.requests();
    // The planner's model is used until the provider reports another.
    assert_eq!(requests[0].model.as_deref(), Some("planner-pick"));
    assert_eq!(requests[1].model.as_deref(), Some("model-a"));
    assert!(requests[0].messages[0].content.contains("Plan: List, then fetch details."));

    // Name adaptation and schema normalization.
    let names: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["dn_list_items", "dn_get_item"]);
    let list_schema = &requests[0].tools[0].parameters;
    assert!(list_schema.get("$schema").is_none());
    assert_eq!(list_schema["properties"]["filters"]["items"], json!({"type": "string"}));

    // History budget: 5 of 20 entries, flagged with the original count.
    let history: Value = serde_json::from_str(&requests[1].messages[2].content).unwrap();
    assert_eq!(history["items"].as_array().unwrap().len(), 5);
    assert_eq!(history["_truncated"], json!(true));
    assert_eq!(history["_totalItems"], json!(20));
    assert!(history["items"][0].get("description").is_none());

    // UI budget keeps all 20.
    let gathered: Value =
        serde_json::from_str(&result.outcome.gathered[0].result.joined_text()).unwrap();
    assert_eq!(gathered["items"].as_array().unwrap().len(), 20);
    assert_eq!(result.outcome.gathered[0].tool, LIST_TOOL);
}

#[tokio::test]
async fn planner_subset_and_failure_fallback() {
    let tools = tools(leak_log());
    let provider = ScriptedProvider::from_responses(vec![ModelResponse::text("Nothing to do.")]);
    let planner = FixedPlanner(Plan {
        tools: vec!["dn/get-item".into()],
        ..Default::default()
    });
    Orchestrator::new(&provider, &tools, EngineConfig::default())
        .with_planner(&planner)
        .handle("hi", SessionContext::default())
        .await;
    assert_eq!(provider.requests()[0].tools.len(), 1);

    let provider = ScriptedProvider::from_responses(vec![ModelResponse::text("Nothing to do.")]);
    let result = Orchestrator::new(&provider, &tools, EngineConfig::default())
        .with_planner(&FailingPlanner)
        .handle("hi", SessionContext::default())
        .await;
    assert_eq!(provider.requests()[0].tools.len(), 2);
    assert!(result.plan.is_none());
    assert_eq!(
        result.response,
        OrchestratorResponse::Text("Nothing to do.".into())
    );
}

#[tokio::test]
async fn designer_failure_returns_stripped_text() {
    let tools = tools(leak_log());
    let provider = ScriptedProvider::from_responses(vec![ModelResponse::text(
        "Here is the answer. <function=unknown_tool>{}</function>",
    )]);
    let result = Orchestrator::new(&provider, &tools, EngineConfig::default())
        .with_designer(&BrokenDesigner)
        .handle("hi", SessionContext::default())
        .await;
    assert_eq!(
        result.response,
        OrchestratorResponse::Text("Here is the answer.".into())
    );
}

#[tokio::test]
async fn endless_tool_calls_stop_at_max_turns() {
    let tools = tools(leak_log());
    let provider = ScriptedProvider::from_responses(vec![ModelResponse::calls(vec![call(
        "dn_get_item",
        json!({"id": 1}),
    )])]);
    let result = Orchestrator::new(&provider, &tools, EngineConfig::default().with_max_turns(4))
        .handle("loop", SessionContext::default())
        .await;
    assert_eq!(result.outcome.turns, 4);
    assert_eq!(result.outcome.status, LoopStatus::TurnLimit);
    assert_eq!(provider.requests().len(), 4);
    match result.response {
        OrchestratorResponse::Text(text) => assert!(!text.is_empty()),
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn unknown_tool_never_surfaces_as_error() {
    let tools = tools(leak_log());
    let provider = ScriptedProvider::from_responses(vec![
        ModelResponse::calls(vec![call("get_weather", json!({}))]),
        ModelResponse::text("I can only look up items."),
    ]);
    let result = Orchestrator::new(&provider, &tools, EngineConfig::default())
        .handle("weather?", SessionContext::default())
        .await;
    assert!(result.outcome.is_success());
    let feedback = &provider.requests()[1].messages[2].content;
    assert!(feedback.contains("dn_list_items") && feedback.contains("dn_get_item"));
}

#[tokio::test]
async fn rate_limit_keeps_gathered_data() {
    let tools = tools(leak_log());
    let provider = ScriptedProvider::new(vec![
        Ok(ModelResponse::calls(vec![call("dn_get_item", json!({"id": 2}))])),
        Err(ProviderError::classify("HTTP 429: quota exceeded")),
    ]);
    let result = Orchestrator::new(&provider, &tools, EngineConfig::default())
        .with_designer(&CountingDesigner)
        .handle("item 2", SessionContext::default())
        .await;
    assert_eq!(result.outcome.status, LoopStatus::RateLimited);
    match result.response {
        OrchestratorResponse::Designed(doc) => assert_eq!(doc["sources"], json!(1)),
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn plan_text_does_not_feed_locality() {
    let seen: &'static Mutex<Vec<Value>> = Box::leak(Box::new(Mutex::new(Vec::new())));
    let tools = ToolSet::new().with(FnTool::new(
        ToolDefinition::new(
            "places/search",
            "Search places",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "city": {"type": "string"},
                    "lat": {"type": "number"},
                    "lng": {"type": "number"}
                }
            }),
        ),
        move |args: serde_json::Map<String, Value>| async move {
            seen.lock().unwrap().push(Value::Object(args));
            Ok(ToolResult::text("[]"))
        },
    ));
    let provider = ScriptedProvider::from_responses(vec![
        ModelResponse::calls(vec![call("places_search", json!({"query": "coffee"}))]),
        ModelResponse::text("Done."),
    ]);
    let planner = FixedPlanner(Plan {
        thought: "Search in Catalog first.".into(),
        ..Default::default()
    });
    Orchestrator::new(&provider, &tools, EngineConfig::default())
        .with_planner(&planner)
        .handle("Coffee please", SessionContext::with_location(38.7, -9.1))
        .await;

    // The folded plan reached the model, but not the enricher.
    assert!(provider.requests()[0].messages[0].content.contains("Search in Catalog"));
    let args = seen.lock().unwrap()[0].clone();
    assert!(args.get("city").is_none(), "{args}");
    assert_eq!(args["lat"], json!(38.7));
    assert_eq!(args["lng"], json!(-9.1));
}
