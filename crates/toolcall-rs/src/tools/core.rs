//! Tool backend port and the in-process tool registry.
//!
//! The [`ExecutionLoop`](crate::agent::engine::ExecutionLoop) talks to tools
//! only through [`ToolBackend`]: "list what you have" and "run this name with
//! these arguments". Remote catalogs (HTTP APIs, databases) implement it
//! directly. [`ToolSet`] is the in-process implementation: a registry of
//! [`Tool`] trait objects with schema validation and per-call timeouts.

use crate::error::ToolError;
use crate::tools::validate::validate_tool_arguments;
use crate::{Arguments, ToolDefinition, ToolResult};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Boxed future returned by tool execution.
///
/// Type alias to keep trait signatures and implementations readable.
pub type ToolFuture<'a> = BoxFuture<'a, Result<ToolResult, ToolError>>;

// ── ToolBackend ────────────────────────────────────────────────────

/// Anything that can list and execute tools by name.
///
/// Errors are reported as [`ToolError`]; the execution loop feeds them back
/// to the model instead of aborting.
pub trait ToolBackend: Send + Sync {
    /// The full catalog, with original (unsanitized) names.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Execute `name` with `args`.
    fn execute<'a>(&'a self, name: &'a str, args: Arguments) -> ToolFuture<'a>;
}

// ── Tool trait ─────────────────────────────────────────────────────

/// A single tool hosted in a [`ToolSet`].
///
/// ```ignore
/// struct Weather { client: WeatherClient }
///
/// impl Tool for Weather {
///     fn definition(&self) -> ToolDefinition { /* ... */ }
///
///     fn execute(&self, args: Arguments) -> ToolFuture<'_> {
///         Box::pin(async move {
///             let city = args.get("city").and_then(|v| v.as_str()).unwrap_or("Lisbon");
///             let report = self.client.forecast(city).await
///                 .map_err(|e| ToolError::failed("weather", e.to_string()))?;
///             Ok(ToolResult::text(report))
///         })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The definition advertised to the model.
    fn definition(&self) -> ToolDefinition;

    /// Execute with already-enriched arguments.
    ///
    /// Uses a boxed future so that the trait is dyn-compatible (object-safe).
    fn execute(&self, args: Arguments) -> ToolFuture<'_>;

    /// The tool's name (convenience: delegates to definition).
    fn name(&self) -> String {
        self.definition().name
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// Default timeout for tool execution (60 seconds).
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// A collection of tools that can be dispatched by name.
///
/// ```ignore
/// let tools = ToolSet::new()
///     .with_arg_validation(true)
///     .with_default_timeout(Some(Duration::from_secs(30)))
///     .with(search_tool())
///     .with_if(details_enabled, details_tool());
/// ```
pub struct ToolSet {
    tools: BTreeMap<String, Box<dyn Tool>>,
    /// Whether to validate arguments against the tool's schema before execution.
    validate_args: bool,
    /// Per-call timeout. `None` disables timeouts.
    default_timeout: Option<Duration>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("validate_args", &self.validate_args)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ToolSet {
    /// Create an empty tool set.
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            validate_args: false,
            default_timeout: None,
        }
    }

    /// Enable JSON Schema argument validation before tool execution.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    /// Set a default timeout for tool execution. Pass `None` to disable timeouts.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Box::new(tool));
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Conditionally register a tool (builder pattern).
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    async fn dispatch(&self, name: &str, args: Arguments) -> Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        if self.validate_args {
            let schema = tool.definition().parameters;
            validate_tool_arguments(&schema, &args).map_err(|reason| {
                ToolError::InvalidArguments {
                    tool: name.to_string(),
                    reason,
                }
            })?;
        }

        log_tool_call(name, &args);
        let start = std::time::Instant::now();

        let result = match self.default_timeout {
            Some(limit) => match tokio::time::timeout(limit, tool.execute(args)).await {
                Ok(r) => r,
                Err(_) => {
                    info!(
                        "Tool {name} timed out after {:.1}s (limit: {:.0}s)",
                        start.elapsed().as_secs_f64(),
                        limit.as_secs_f64(),
                    );
                    Err(ToolError::Timeout {
                        tool: name.to_string(),
                        seconds: limit.as_secs(),
                    })
                }
            },
            None => tool.execute(args).await,
        };

        let elapsed = start.elapsed();
        match &result {
            Ok(r) => {
                let text = r.joined_text();
                debug!(
                    "Tool {name} completed in {:.0}ms ({} bytes)",
                    elapsed.as_secs_f64() * 1000.0,
                    text.len()
                );
                trace!(
                    "Tool {name} result preview: {}",
                    text.chars().take(300).collect::<String>()
                );
            }
            Err(e) => debug!(
                "Tool {name} failed in {:.0}ms: {e}",
                elapsed.as_secs_f64() * 1000.0
            ),
        }
        result
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolBackend for ToolSet {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    fn execute<'a>(&'a self, name: &'a str, args: Arguments) -> ToolFuture<'a> {
        Box::pin(self.dispatch(name, args))
    }
}

// ── FnTool ────────────────────────────────────────────────────────

/// Type-erased async handler for [`FnTool`].
type ErasedToolHandler = Box<dyn Fn(Arguments) -> ToolFuture<'static> + Send + Sync>;

/// A closure-based tool that deserializes its arguments into `A`.
///
/// Use [`FnTool`] for stateless tools. For tools that need shared state
/// (database connections, API clients), implement [`Tool`] on a struct.
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct SearchArgs {
///     query: String,
///     #[serde(default)]
///     limit: Option<u32>,
/// }
///
/// let tool = FnTool::new(
///     ToolDefinition::for_args::<SearchArgs>("search", "Search the catalog"),
///     |args: SearchArgs| async move {
///         Ok(ToolResult::text(format!("results for {}", args.query)))
///     },
/// );
/// ```
pub struct FnTool {
    def: ToolDefinition,
    handler: ErasedToolHandler,
}

impl FnTool {
    /// Create a new closure-based tool.
    ///
    /// Arguments that fail to deserialize into `A` surface as
    /// [`ToolError::InvalidArguments`].
    pub fn new<A, F, Fut>(def: ToolDefinition, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult, ToolError>> + Send + 'static,
    {
        let tool_name = def.name.clone();
        let erased = move |raw: Arguments| -> ToolFuture<'static> {
            match serde_json::from_value::<A>(serde_json::Value::Object(raw)) {
                Ok(args) => Box::pin(handler(args)),
                Err(e) => {
                    let err = ToolError::InvalidArguments {
                        tool: tool_name.clone(),
                        reason: e.to_string(),
                    };
                    Box::pin(async move { Err(err) })
                }
            }
        };

        Self {
            def,
            handler: Box::new(erased),
        }
    }
}

impl Tool for FnTool {
    fn definition(&self) -> ToolDefinition {
        self.def.clone()
    }

    fn execute(&self, args: Arguments) -> ToolFuture<'_> {
        (self.handler)(args)
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.def.name)
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, args: &Arguments) {
    let arguments = serde_json::Value::Object(args.clone()).to_string();
    let args_preview: String = arguments.chars().take(120).collect();
    info!(
        "[tool] {}({args_preview}{})",
        name,
        if arguments.chars().count() > 120 { "..." } else { "" }
    );
    debug!("[tool] {name} full args ({} bytes)", arguments.len());
    trace!("[tool] {name} arguments: {arguments}");
}
