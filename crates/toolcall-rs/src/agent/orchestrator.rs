//! Request handling around the execution loop.
//!
//! [`Orchestrator::handle`] runs one user request end to end:
//!
//! 1. Discover the catalog from the [`ToolBackend`].
//! 2. Ask the optional [`Planner`] which tools matter; an empty or failed
//!    plan falls back to the whole catalog.
//! 3. Fold the plan's thought and steps into the user message and run the
//!    [`ExecutionLoop`] with a fresh [`NameMapping`].
//! 4. Hand the answer and gathered data to the optional [`Designer`]. When
//!    it fails, or there is none, the answer is returned as plain text with
//!    any leftover call syntax stripped.

use super::config::EngineConfig;
use super::engine::{ExecutionLoop, LoopRequest};
use super::events::{EventHandler, LoopOutcome};
use super::recovery::strip_call_syntax;
use crate::tools::core::ToolBackend;
use crate::tools::enrich::SessionContext;
use crate::tools::names::{NameMapping, sanitize_name};
use crate::api::provider::ModelProvider;
use crate::{GatheredItem, ToolDefinition};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

// ── Ports ─────────────────────────────────────────────────────────

/// The Planner's answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Plan {
    /// Tool names to expose (original or sanitized). Empty means all.
    pub tools: Vec<String>,
    pub thought: String,
    pub steps: Vec<Value>,
    pub used_model: Option<String>,
}

/// Chooses the tools relevant to a request.
pub trait Planner: Send + Sync {
    fn plan<'a>(
        &'a self,
        user_message: &'a str,
        catalog: &'a [ToolDefinition],
    ) -> BoxFuture<'a, Result<Plan, String>>;
}

/// What the Designer renders.
#[derive(Debug, Clone, Serialize)]
pub struct DesignInput {
    pub text: String,
    pub gathered_data: Vec<GatheredItem>,
    pub used_model: Option<String>,
}

/// Renders the loop's answer and data into a UI document.
pub trait Designer: Send + Sync {
    fn design(&self, input: DesignInput) -> BoxFuture<'_, Result<Value, String>>;
}

/// The user-facing result of a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum OrchestratorResponse {
    Designed(Value),
    Text(String),
}

/// Response plus the details behind it.
#[derive(Debug, Clone)]
pub struct OrchestratorResult {
    pub response: OrchestratorResponse,
    pub outcome: LoopOutcome,
    pub plan: Option<Plan>,
}

// ── Orchestrator ──────────────────────────────────────────────────

pub struct Orchestrator<'a> {
    provider: &'a dyn ModelProvider,
    backend: &'a dyn ToolBackend,
    planner: Option<&'a dyn Planner>,
    designer: Option<&'a dyn Designer>,
    config: EngineConfig,
    event_handler: &'a dyn EventHandler,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        provider: &'a dyn ModelProvider,
        backend: &'a dyn ToolBackend,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            backend,
            planner: None,
            designer: None,
            config,
            event_handler: &super::events::NoopHandler,
        }
    }

    pub fn with_planner(mut self, planner: &'a dyn Planner) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_designer(mut self, designer: &'a dyn Designer) -> Self {
        self.designer = Some(designer);
        self
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    /// Handle one user request.
    pub async fn handle(&self, user_message: &str, session: SessionContext) -> OrchestratorResult {
        let catalog = self.backend.definitions();
        info!("Handling request with {} tool(s) in the catalog", catalog.len());

        let plan = match self.planner {
            Some(planner) => match planner.plan(user_message, &catalog).await {
                Ok(plan) => Some(plan),
                Err(e) => {
                    warn!("Planner failed, exposing the full catalog: {e}");
                    None
                }
            },
            None => None,
        };

        let tools = select_tools(&catalog, plan.as_ref());
        let message = match &plan {
            Some(plan) => fold_plan(user_message, plan),
            None => user_message.to_string(),
        };
        let request = LoopRequest::new(message)
            .with_original_message(user_message)
            .with_tools(tools)
            .with_session(session)
            .with_model(plan.as_ref().and_then(|p| p.used_model.clone()));

        // One mapping per request.
        let names = NameMapping::new();
        let outcome = ExecutionLoop::new(self.provider, self.backend, self.config.clone())
            .with_event_handler(self.event_handler)
            .run(request, &names)
            .await;

        let response = self.respond(&outcome, &catalog).await;
        OrchestratorResult {
            response,
            outcome,
            plan,
        }
    }

    async fn respond(
        &self,
        outcome: &LoopOutcome,
        catalog: &[ToolDefinition],
    ) -> OrchestratorResponse {
        if let Some(designer) = self.designer {
            let input = DesignInput {
                text: outcome.text.clone(),
                gathered_data: outcome.gathered.clone(),
                used_model: outcome.used_model.clone(),
            };
            match designer.design(input).await {
                Ok(document) => return OrchestratorResponse::Designed(document),
                Err(e) => warn!("Designer failed, returning plain text: {e}"),
            }
        }
        // Call fragments may use either name form.
        let names: Vec<String> = catalog
            .iter()
            .flat_map(|d| [d.name.clone(), sanitize_name(&d.name)])
            .collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let text = strip_call_syntax(&outcome.text, &names);
        if text.is_empty() {
            OrchestratorResponse::Text(self.config.messages.designer_fallback.clone())
        } else {
            OrchestratorResponse::Text(text)
        }
    }
}

/// The catalog subset named by the plan, or everything.
fn select_tools(catalog: &[ToolDefinition], plan: Option<&Plan>) -> Vec<ToolDefinition> {
    let Some(plan) = plan.filter(|p| !p.tools.is_empty()) else {
        return catalog.to_vec();
    };
    let selected: Vec<ToolDefinition> = catalog
        .iter()
        .filter(|d| {
            plan.tools
                .iter()
                .any(|t| *t == d.name || *t == sanitize_name(&d.name))
        })
        .cloned()
        .collect();
    if selected.is_empty() {
        warn!(
            "Plan named no known tools ({}); exposing the full catalog",
            plan.tools.join(", ")
        );
        return catalog.to_vec();
    }
    debug!("Plan selected {} of {} tool(s)", selected.len(), catalog.len());
    selected
}

fn fold_plan(user_message: &str, plan: &Plan) -> String {
    let mut message = user_message.to_string();
    if !plan.thought.trim().is_empty() {
        message.push_str("\n\nPlan: ");
        message.push_str(plan.thought.trim());
    }
    if !plan.steps.is_empty() {
        message.push_str("\n\nSteps:");
        for (i, step) in plan.steps.iter().enumerate() {
            let step = match step {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            message.push_str(&format!("\n{}. {step}", i + 1));
        }
    }
    message
}
