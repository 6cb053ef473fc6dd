//! Configuration for the [`ExecutionLoop`](super::engine::ExecutionLoop).
//!
//! Everything has a working default. Override fields through the builder
//! methods, struct update syntax, or a JSON file (every field is optional).
//!
//! ```ignore
//! let config = EngineConfig::default()
//!     .with_max_turns(8)
//!     .with_item_limits(5, 50)
//!     .with_retries(2);
//!
//! let config = EngineConfig {
//!     enrichment: EnrichmentConfig::default()
//!         .with_fallback_location(GeoPoint::new(38.72, -9.14)),
//!     ..EngineConfig::default()
//! };
//!
//! let config = EngineConfig::from_json_file("engine.json")?;
//! ```

use crate::agent::recovery::RecoveryConfig;
use crate::api::retry::RetryConfig;
use crate::context::accumulator::ExtractionConfig;
use crate::context::compress::{
    CompressionConfig, DEFAULT_HISTORY_ITEM_LIMIT, DEFAULT_UI_ITEM_LIMIT,
};
use crate::error::ConfigError;
use crate::tools::enrich::EnrichmentConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

// ── Empty-result retries ───────────────────────────────────────────

/// One-shot broadened retry for a tool whose result came back empty.
///
/// ```json
/// {"tool": "search_places", "drop_fields": ["category"], "set_fields": {"radius": 5000},
///  "note": "No exact matches; showing results without the category filter."}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmptyResultRetry {
    /// Original tool name.
    pub tool: String,
    /// Fields removed from the arguments.
    #[serde(default)]
    pub drop_fields: Vec<String>,
    /// Fields set (or replaced) in the arguments.
    #[serde(default)]
    pub set_fields: Map<String, Value>,
    /// Text appended to the retried result so the model knows it was broadened.
    #[serde(default)]
    pub note: Option<String>,
}

impl EmptyResultRetry {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            drop_fields: Vec::new(),
            set_fields: Map::new(),
            note: None,
        }
    }

    pub fn drop_field(mut self, field: impl Into<String>) -> Self {
        self.drop_fields.push(field.into());
        self
    }

    pub fn set_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.set_fields.insert(field.into(), value);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

// ── User-facing messages ───────────────────────────────────────────

/// Fixed texts the loop feeds to the model or returns to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopMessages {
    /// Answer when the provider is rate limited or out of quota.
    pub rate_limited: String,
    /// Answer prefix for other provider failures; the reason is appended.
    pub provider_failure: String,
    /// Answer when the turn limit is reached and no text was produced.
    pub turn_limit_fallback: String,
    /// Hint appended to empty results.
    pub empty_result_hint: String,
    /// Corrective text for unknown tools. `{tool}` and `{tools}` are replaced.
    pub unknown_tool: String,
    /// Answer when the Designer fails and no text survives sanitizing.
    pub designer_fallback: String,
}

impl Default for LoopMessages {
    fn default() -> Self {
        Self {
            rate_limited: "The AI service is receiving too many requests right now. \
                           Please wait a moment and try again."
                .into(),
            provider_failure: "Sorry, something went wrong while generating a response:".into(),
            turn_limit_fallback: "I gathered some data but could not finish the answer \
                                  within the allowed number of steps."
                .into(),
            empty_result_hint: "The tool returned no results. Try alternate forms of the \
                                search terms (singular/plural, synonyms, broader terms, \
                                different spelling) or remove restrictive filters."
                .into(),
            unknown_tool: "Tool '{tool}' does not exist. Use only one of these tools: {tools}."
                .into(),
            designer_fallback: "Here is what I found.".into(),
        }
    }
}

// ── EngineConfig ───────────────────────────────────────────────────

/// Configuration for the execution loop and orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard upper bound on model turns per request.
    pub max_turns: u32,
    /// Item limit for results appended to conversation history.
    pub history_item_limit: usize,
    /// Item limit for results surfaced to the Designer.
    pub ui_item_limit: usize,
    /// Results with less trimmed text than this count as empty.
    pub empty_result_min_chars: usize,
    pub enrichment: EnrichmentConfig,
    pub compression: CompressionConfig,
    pub extraction: ExtractionConfig,
    pub recovery: RecoveryConfig,
    pub empty_result_retries: Vec<EmptyResultRetry>,
    /// Retry policy for transient provider failures.
    pub retry: RetryConfig,
    pub messages: LoopMessages,
    /// Preferred model for the first turn. `None` lets the provider choose.
    pub default_model: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: 5,
            history_item_limit: DEFAULT_HISTORY_ITEM_LIMIT,
            ui_item_limit: DEFAULT_UI_ITEM_LIMIT,
            empty_result_min_chars: 4,
            enrichment: EnrichmentConfig::default(),
            compression: CompressionConfig::default(),
            extraction: ExtractionConfig::default(),
            recovery: RecoveryConfig::default(),
            empty_result_retries: Vec::new(),
            retry: RetryConfig::default(),
            messages: LoopMessages::default(),
            default_model: None,
        }
    }
}

impl EngineConfig {
    /// Set the maximum number of model turns (at least 1).
    pub fn with_max_turns(mut self, turns: u32) -> Self {
        self.max_turns = turns.max(1);
        self
    }

    /// Set the history and UI item limits.
    pub fn with_item_limits(mut self, history: usize, ui: usize) -> Self {
        self.history_item_limit = history;
        self.ui_item_limit = ui;
        self
    }

    /// Retry transient provider failures up to `retries` times.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retry = RetryConfig::with_retries(retries);
        self
    }

    pub fn with_enrichment(mut self, enrichment: EnrichmentConfig) -> Self {
        self.enrichment = enrichment;
        self
    }

    pub fn with_empty_result_retry(mut self, rule: EmptyResultRetry) -> Self {
        self.empty_result_retries.push(rule);
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Parse a JSON document. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        let turns = config.max_turns;
        Ok(config.with_max_turns(turns))
    }

    /// Load a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// The empty-result retry rule for `tool`, if one is configured.
    pub fn empty_result_retry(&self, tool: &str) -> Option<&EmptyResultRetry> {
        self.empty_result_retries.iter().find(|r| r.tool == tool)
    }
}
