//! Tool-calling execution engine for LLM agents.
//!
//! `toolcall-rs` turns a model's possibly-malformed tool intent into concrete,
//! validated tool invocations. The core abstraction is the
//! [`ExecutionLoop`](agent::engine::ExecutionLoop): a bounded multi-turn loop
//! that sends the conversation to a [`ModelProvider`](api::provider::ModelProvider),
//! recovers tool calls the model wrote as plain text, enriches arguments,
//! executes tools through a [`ToolBackend`](tools::core::ToolBackend), and
//! compresses results before they re-enter the conversation.
//!
//! The [`Orchestrator`](agent::orchestrator::Orchestrator) wraps the loop with
//! tool discovery, a [`Planner`](agent::orchestrator::Planner) that narrows the
//! tool set, and a [`Designer`](agent::orchestrator::Designer) that renders the
//! gathered data.
//!
//! # Getting started
//!
//! ```ignore
//! use toolcall_rs::prelude::*;
//!
//! let tools = ToolSet::new().with(my_search_tool());
//! let config = EngineConfig::default().with_max_turns(6);
//! let names = NameMapping::new();
//!
//! let outcome = ExecutionLoop::new(&provider, &tools, config)
//!     .with_event_handler(&LoggingHandler)
//!     .run(LoopRequest::new("Find cafes in Lisbon"), &names)
//!     .await;
//!
//! println!("{}", outcome.text);
//! ```
//!
//! # Where to find things
//!
//! - **Identifier and schema adaptation:** [`tools::names`] (sanitize/resolve
//!   tool names) and [`tools::schema`] (normalize parameter schemas).
//! - **Argument defaults and cross-turn inheritance:** [`tools::enrich`] and
//!   [`context::accumulator`].
//! - **Recovering calls from text:** [`agent::recovery`].
//! - **Result budgets:** [`context::compress`].
//! - **The loop itself:** [`agent::engine`] and [`agent::execution`].
//! - **Configuration:** [`agent::config::EngineConfig`].
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | Execution loop, orchestrator, call recovery, events, config |
//! | [`tools`] | Tool backend port, `ToolSet`, name mapping, schema normalizer, enrichment |
//! | [`context`] | Result compression and the per-request context accumulator |
//! | [`api`] | Model provider port, provider error classification and retry |

pub mod agent;
pub mod api;
pub mod context;
pub mod error;
pub mod prelude;
pub mod tools;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Re-export schemars for downstream crates.
pub use schemars;

/// Arguments of a tool call: a JSON object.
pub type Arguments = Map<String, Value>;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`.
///
/// The generated schema carries `$schema` and `title` keys; run it through
/// [`tools::schema::normalize`] before handing it to a strict consumer.
///
/// ```
/// use toolcall_rs::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct SearchArgs {
///     query: String,
///     #[serde(default)]
///     limit: Option<u32>,
/// }
///
/// let schema = json_schema_for::<SearchArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"query".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema).unwrap_or_else(|_| empty_object_schema())
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

// ── Tool definitions ───────────────────────────────────────────────

/// A named, schema-described operation the model can request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Build a definition whose parameters are derived from `T`.
    pub fn for_args<T: JsonSchema>(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, json_schema_for::<T>())
    }

    /// The declared `properties` object, if any.
    pub fn properties(&self) -> Option<&Map<String, Value>> {
        self.parameters.get("properties").and_then(Value::as_object)
    }

    /// Whether the parameters declare a property named `field`.
    pub fn declares(&self, field: &str) -> bool {
        self.properties().is_some_and(|p| p.contains_key(field))
    }

    /// The schema of a single declared property.
    pub fn property(&self, field: &str) -> Option<&Value> {
        self.properties().and_then(|p| p.get(field))
    }

    /// Names listed under `required`.
    pub fn required_fields(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

// ── Tool calls and results ─────────────────────────────────────────

/// A tool invocation requested by the model (natively or recovered from text).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    /// Correlation id. Empty until the loop assigns one.
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Arguments,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Arguments) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            args,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// One content item of a [`ToolResult`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Text { text: String },
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        let ContentItem::Text { text } = self;
        text
    }
}

/// Output of a tool execution.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct ToolResult {
    #[serde(rename = "isError", default)]
    pub is_error: bool,
    #[serde(default)]
    pub content: Vec<ContentItem>,
}

impl ToolResult {
    /// A successful result carrying a single text item.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            content: vec![ContentItem::text(text)],
        }
    }

    /// An error result carrying a single text item.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: vec![ContentItem::text(text)],
        }
    }

    /// Concatenate all text items, separated by newlines.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(ContentItem::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Append a text item (hints, retry notes).
    pub fn push_text(&mut self, text: impl Into<String>) {
        self.content.push(ContentItem::text(text));
    }
}

// ── Conversation ───────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Model => write!(f, "model"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the conversation the model observes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConversationMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool name for `Role::Tool` messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Id of the call a `Role::Tool` message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: None,
            name: None,
            tool_call_id: None,
        }
    }

    pub fn model_text(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
            tool_calls: None,
            name: None,
            tool_call_id: None,
        }
    }

    pub fn model_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
            tool_calls: Some(calls),
            name: None,
            tool_call_id: None,
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            name: Some(name.into()),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A tool result surfaced to the Designer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GatheredItem {
    /// Original (unsanitized) tool name.
    pub tool: String,
    pub result: ToolResult,
}
